//! Gas pricing and debounced fee estimation for draft transfers

use super::request::{format_amount, TransferRequest, ValidatedTransfer, NATIVE_DECIMALS};
use super::TransferCall;
use crate::chain::{GasPrice, NodeClient, TokenRegistry};
use crate::config::WalletConfig;
use crate::error::WalletResult;

use ethers::types::{Address, U256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Gas limit and price adjustments applied before signing
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new(gas_limit_buffer_percent: u64, gas_price_buffer_percent: u64) -> Self {
        Self {
            gas_limit_buffer_percent,
            gas_price_buffer_percent,
        }
    }

    pub fn from_config(config: &WalletConfig) -> Self {
        Self::new(
            config.gas_limit_buffer_percent,
            config.gas_price_buffer_percent,
        )
    }

    /// Node estimate plus the configured headroom
    pub fn buffered_gas_limit(&self, estimate: U256) -> U256 {
        estimate + estimate * self.gas_limit_buffer_percent / 100
    }

    /// Current gas price with the configured buffer applied
    pub async fn get_gas_price(&self, node: &dyn NodeClient) -> WalletResult<GasPrice> {
        let gas_price = node.get_gas_price().await?;
        let buffered = self.bump(&gas_price, 100 + self.gas_price_buffer_percent);

        debug!("Gas price for chain {}: {:?}", node.chain_id(), buffered);
        Ok(buffered)
    }

    /// Scale every component of a gas price by `factor` percent
    pub fn bump(&self, current: &GasPrice, factor: u64) -> GasPrice {
        match current {
            GasPrice::Legacy(price) => GasPrice::Legacy(*price * factor / 100),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                base_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: *max_fee_per_gas * factor / 100,
                max_priority_fee_per_gas: *max_priority_fee_per_gas * factor / 100,
                base_fee_per_gas: *base_fee_per_gas,
            },
        }
    }

    /// Price for a same-nonce replacement: the higher of current and original, bumped
    ///
    /// Nodes only accept a replacement that outbids the original on every component.
    pub fn replacement_gas_price(
        &self,
        current: &GasPrice,
        original: &GasPrice,
        factor: u64,
    ) -> GasPrice {
        let floor = match (current, original) {
            (GasPrice::Legacy(now), GasPrice::Legacy(then)) => GasPrice::Legacy((*now).max(*then)),
            (
                GasPrice::Eip1559 {
                    max_fee_per_gas: fee_now,
                    max_priority_fee_per_gas: tip_now,
                    base_fee_per_gas,
                },
                GasPrice::Eip1559 {
                    max_fee_per_gas: fee_then,
                    max_priority_fee_per_gas: tip_then,
                    ..
                },
            ) => GasPrice::Eip1559 {
                max_fee_per_gas: (*fee_now).max(*fee_then),
                max_priority_fee_per_gas: (*tip_now).max(*tip_then),
                base_fee_per_gas: *base_fee_per_gas,
            },
            _ => current.clone(),
        };
        self.bump(&floor, factor)
    }

    /// Calculate total cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        gas_limit * gas_price.effective()
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new(20, 0)
    }
}

/// Network fee for a draft transfer
#[derive(Debug, Clone, PartialEq)]
pub struct FeeEstimate {
    /// Fee in whole native units (e.g. "0.000105")
    pub amount_in_native_units: String,
    pub wei: U256,
    pub gas_limit: U256,
    pub gas_price: GasPrice,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeeState {
    /// No estimate for the current draft (invalid draft or estimation failed)
    Unavailable,
    Calculating,
    Ready(FeeEstimate),
}

impl FeeState {
    pub fn estimate(&self) -> Option<&FeeEstimate> {
        match self {
            FeeState::Ready(estimate) => Some(estimate),
            _ => None,
        }
    }
}

struct FeeShared {
    node: Arc<dyn NodeClient>,
    tokens: Arc<TokenRegistry>,
    gas: GasEstimator,
    generation: AtomicU64,
    state: watch::Sender<FeeState>,
}

impl FeeShared {
    /// Publish `state` unless a newer draft has been scheduled since `generation`
    ///
    /// The check runs under the channel's write lock, so a stale result can never
    /// land after the newer draft's own update.
    fn publish(&self, generation: u64, state: FeeState) -> bool {
        self.state.send_if_modified(|current| {
            if generation != self.generation.load(Ordering::SeqCst) {
                return false;
            }
            *current = state;
            true
        })
    }

    async fn estimate(
        &self,
        transfer: &ValidatedTransfer,
        from: Address,
    ) -> WalletResult<FeeEstimate> {
        let node = self.node.as_ref();
        let call = TransferCall::prepare(node, &self.tokens, transfer).await?;
        let tx = call.estimation_tx(from);
        let (gas_limit, gas_price) = tokio::try_join!(
            node.estimate_gas(&tx),
            self.gas.get_gas_price(node)
        )?;

        let wei = GasEstimator::calculate_cost(gas_limit, &gas_price);
        Ok(FeeEstimate {
            amount_in_native_units: format_amount(wei, NATIVE_DECIMALS)?,
            wei,
            gas_limit,
            gas_price,
        })
    }
}

/// Debounced fee estimation where only the latest draft can publish a result
pub struct FeeEstimator {
    shared: Arc<FeeShared>,
    debounce: Duration,
    scheduled: Mutex<Option<JoinHandle<()>>>,
}

impl FeeEstimator {
    pub fn new(
        node: Arc<dyn NodeClient>,
        tokens: Arc<TokenRegistry>,
        gas: GasEstimator,
        debounce: Duration,
    ) -> Self {
        let (state, _) = watch::channel(FeeState::Unavailable);

        Self {
            shared: Arc::new(FeeShared {
                node,
                tokens,
                gas,
                generation: AtomicU64::new(0),
                state,
            }),
            debounce,
            scheduled: Mutex::new(None),
        }
    }

    /// Register a new draft; any evaluation scheduled for an earlier draft is cancelled
    pub fn schedule(&self, draft: &TransferRequest, from: Address) {
        let mut scheduled = self.lock_scheduled();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = scheduled.take() {
            previous.abort();
        }

        let transfer = match draft.validate() {
            Ok(transfer) => transfer,
            Err(e) => {
                debug!("Draft {} has no fee: {}", generation, e);
                self.shared.publish(generation, FeeState::Unavailable);
                return;
            }
        };

        self.shared.publish(generation, FeeState::Calculating);

        let shared = self.shared.clone();
        let debounce = self.debounce;
        *scheduled = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if shared.generation.load(Ordering::SeqCst) != generation {
                return;
            }

            let state = match shared.estimate(&transfer, from).await {
                Ok(estimate) => {
                    crate::metrics::record_fee_estimate("available");
                    FeeState::Ready(estimate)
                }
                Err(e) => {
                    debug!("Fee estimation for draft {} failed: {}", generation, e);
                    crate::metrics::record_fee_estimate("unavailable");
                    FeeState::Unavailable
                }
            };

            if !shared.publish(generation, state) {
                debug!("Discarded fee result for superseded draft {}", generation);
            }
        }));
    }

    /// Forget the current draft
    pub fn reset(&self) {
        let mut scheduled = self.lock_scheduled();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = scheduled.take() {
            previous.abort();
        }
        self.shared.publish(generation, FeeState::Unavailable);
    }

    pub fn current(&self) -> FeeState {
        self.shared.state.borrow().clone()
    }

    /// Stream of fee states for the latest draft
    pub fn subscribe(&self) -> watch::Receiver<FeeState> {
        self.shared.state.subscribe()
    }

    fn lock_scheduled(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.scheduled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for FeeEstimator {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_scheduled().take() {
            handle.abort();
        }
    }
}
