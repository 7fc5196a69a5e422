//! Transfer submission: build, sign, broadcast, then hand off to a settlement watcher

use super::call::{TransferCall, NATIVE_TRANSFER_GAS};
use super::gas::GasEstimator;
use super::nonce::NonceManager;
use super::request::TransferRequest;
use crate::chain::{GasPrice, NodeClient, SettlementState, SettlementWatcher, TokenRegistry};
use crate::error::{WalletError, WalletResult};
use crate::events::{SettlementOutcome, WalletEvent};
use crate::session::WalletSession;
use crate::state::{PendingTransactionTracker, PendingTransfer};

use chrono::Utc;
use dashmap::DashMap;
use ethers::signers::Signer;
use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A broadcast transfer; `settled` resolves once the wallet has applied its outcome
#[derive(Debug)]
pub struct SubmissionHandle {
    pub hash: H256,
    pub nonce: U256,
    settled: oneshot::Receiver<SettlementState>,
}

impl SubmissionHandle {
    /// Wait for the terminal state
    pub async fn settled(self) -> WalletResult<SettlementState> {
        self.settled.await.map_err(|_| {
            WalletError::Session(format!(
                "Wallet locked before {:?} settled",
                self.hash
            ))
        })
    }

    /// Wait for settlement, treating anything other than confirmation as an error
    pub async fn confirmed(self) -> WalletResult<u64> {
        let hash = self.hash;
        match self.settled().await? {
            SettlementState::Confirmed { block_number } => Ok(block_number),
            SettlementState::Failed { reason } => {
                Err(WalletError::SettlementFailure { hash, reason })
            }
            other => Err(WalletError::SettlementFailure {
                hash,
                reason: other.name().to_string(),
            }),
        }
    }
}

/// Submits transfers for one session
pub struct TransactionSubmitter {
    node: Arc<dyn NodeClient>,
    tokens: Arc<TokenRegistry>,
    session: WalletSession,
    nonces: Arc<NonceManager>,
    gas: GasEstimator,
    tracker: Arc<PendingTransactionTracker>,
    watcher: Arc<SettlementWatcher>,
    outcomes: mpsc::Sender<SettlementOutcome>,
    events: broadcast::Sender<WalletEvent>,
    native_symbol: String,
    replacement_bump_percent: u64,
    /// Live settlement watchers by transfer hash
    watchers: DashMap<H256, JoinHandle<()>>,
}

impl TransactionSubmitter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node: Arc<dyn NodeClient>,
        tokens: Arc<TokenRegistry>,
        session: WalletSession,
        gas: GasEstimator,
        tracker: Arc<PendingTransactionTracker>,
        watcher: Arc<SettlementWatcher>,
        outcomes: mpsc::Sender<SettlementOutcome>,
        events: broadcast::Sender<WalletEvent>,
        native_symbol: impl Into<String>,
        replacement_bump_percent: u64,
    ) -> Self {
        let nonces = Arc::new(NonceManager::new(session.address()));
        info!(
            "Transaction submitter ready for {:?} on chain {}",
            session.address(),
            node.chain_id()
        );

        Self {
            node,
            tokens,
            session,
            nonces,
            gas,
            tracker,
            watcher,
            outcomes,
            events,
            native_symbol: native_symbol.into(),
            replacement_bump_percent,
            watchers: DashMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.session.address()
    }

    /// Validate, sign and broadcast a transfer
    ///
    /// Invalid input fails before any network call. On any failure the nonce is
    /// released and nothing is added to the pending set.
    pub async fn submit(&self, request: &TransferRequest) -> WalletResult<SubmissionHandle> {
        let transfer = request.validate().map_err(|e| {
            crate::metrics::record_transfer_rejected("invalid_input");
            e
        })?;
        let asset_symbol = transfer.asset.symbol(&self.native_symbol).to_string();
        let from = self.address();

        let call = TransferCall::prepare(self.node.as_ref(), &self.tokens, &transfer)
            .await
            .map_err(|e| self.rejected(e))?;

        let nonce = self
            .nonces
            .next_nonce(self.node.as_ref())
            .await
            .map_err(|e| self.rejected(e))?;

        let sent = async {
            let estimate = self
                .node
                .estimate_gas(&call.estimation_tx(from))
                .await
                .map_err(into_rejection)?;
            let gas_limit = self.gas.buffered_gas_limit(estimate);
            let gas_price = self.gas.get_gas_price(self.node.as_ref()).await?;
            let hash = self.sign_and_send(&call, nonce, gas_limit, &gas_price).await?;
            Ok::<_, WalletError>((hash, gas_price))
        }
        .await;

        let (hash, gas_price) = match sent {
            Ok(sent) => sent,
            Err(e) => {
                self.release_nonce(nonce, &e).await;
                return Err(self.rejected(e));
            }
        };

        let pending = PendingTransfer {
            hash,
            from_address: from,
            to_address: transfer.recipient,
            amount: transfer.amount.clone(),
            asset_symbol: asset_symbol.clone(),
            submitted_at: Utc::now(),
            nonce,
            gas_price,
        };

        info!(
            "Submitted {} {} to {:?}: {:?} (nonce {})",
            pending.amount, asset_symbol, pending.to_address, hash, nonce
        );
        crate::metrics::record_transfer_submitted(&asset_symbol);

        Ok(self.track(pending).await)
    }

    /// Replace a pending transfer with a zero-value self-transfer at the same nonce
    ///
    /// The replacement is tracked as its own pending transfer. Whichever of the two is
    /// mined settles as confirmed; the other settles as replaced.
    pub async fn cancel(&self, hash: H256) -> WalletResult<SubmissionHandle> {
        let original = self
            .tracker
            .get(hash)
            .await
            .ok_or(WalletError::TransferNotPending { hash })?;

        let from = self.address();
        let current = self.gas.get_gas_price(self.node.as_ref()).await?;
        let gas_price = self.gas.replacement_gas_price(
            &current,
            &original.gas_price,
            self.replacement_bump_percent,
        );

        let call = TransferCall::cancellation(from);
        let replacement = self
            .sign_and_send(
                &call,
                original.nonce,
                U256::from(NATIVE_TRANSFER_GAS),
                &gas_price,
            )
            .await
            .map_err(|e| {
                crate::metrics::record_transfer_rejected("replacement");
                e
            })?;

        info!(
            "Broadcast cancellation {:?} for {:?} at nonce {}",
            replacement, hash, original.nonce
        );

        let pending = PendingTransfer {
            hash: replacement,
            from_address: from,
            to_address: from,
            amount: "0".to_string(),
            asset_symbol: self.native_symbol.clone(),
            submitted_at: Utc::now(),
            nonce: original.nonce,
            gas_price,
        };
        Ok(self.track(pending).await)
    }

    /// Stop every settlement watcher (lock / logout)
    pub fn abort_watchers(&self) {
        let hashes: Vec<H256> = self.watchers.iter().map(|entry| *entry.key()).collect();
        for hash in hashes {
            if let Some((_, handle)) = self.watchers.remove(&hash) {
                handle.abort();
            }
        }
    }

    /// Number of settlement watchers still running
    pub fn active_watchers(&self) -> usize {
        self.watchers
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    async fn sign_and_send(
        &self,
        call: &TransferCall,
        nonce: U256,
        gas_limit: U256,
        gas_price: &GasPrice,
    ) -> WalletResult<H256> {
        let chain_id = self.node.chain_id();
        let tx = call.build(self.address(), nonce, gas_limit, gas_price, chain_id);

        let signer = self.session.signer().clone().with_chain_id(chain_id);
        let signature = signer
            .sign_transaction(&tx)
            .await
            .map_err(|e| WalletError::Internal(format!("Failed to sign transaction: {}", e)))?;

        let raw = tx.rlp_signed(&signature);
        debug!(
            "Broadcasting nonce {} with gas limit {} ({} bytes)",
            nonce,
            gas_limit,
            raw.len()
        );
        self.node.send_raw_transaction(raw).await
    }

    /// Register the pending entry, announce it and start its watcher
    async fn track(&self, pending: PendingTransfer) -> SubmissionHandle {
        let (hash, nonce) = (pending.hash, pending.nonce);
        self.tracker.add(pending.clone()).await;

        // No subscribers is fine
        let _ = self.events.send(WalletEvent::TransferSubmitted { hash, nonce });

        let (done, settled) = oneshot::channel();
        let watcher = self.watcher.clone();
        let outcomes = self.outcomes.clone();
        let nonces = self.nonces.clone();
        let handle = tokio::spawn(async move {
            let state = watcher.watch(hash, pending.from_address, nonce).await;
            if state == SettlementState::Dropped {
                // The node forgot this nonce; the local counter is now ahead of it
                nonces.resync().await;
            }
            let outcome = SettlementOutcome {
                hash,
                nonce,
                state,
                submitted_at: pending.submitted_at,
                done,
            };
            if outcomes.send(outcome).await.is_err() {
                debug!("Coordinator stopped, dropping outcome for {:?}", hash);
            }
        });

        self.watchers.retain(|_, handle| !handle.is_finished());
        self.watchers.insert(hash, handle);

        SubmissionHandle {
            hash,
            nonce,
            settled,
        }
    }

    async fn release_nonce(&self, nonce: U256, cause: &WalletError) {
        self.nonces.release(nonce).await;
        if let WalletError::SubmissionRejected(message) = cause {
            if message.to_lowercase().contains("nonce") {
                warn!("Node refused nonce {}: {}", nonce, message);
                self.nonces.resync().await;
            }
        }
    }

    fn rejected(&self, e: WalletError) -> WalletError {
        let reason = match &e {
            WalletError::NetworkUnavailable(_) => "network",
            WalletError::SubmissionRejected(_) => "rejected",
            WalletError::InvalidInput(_) => "invalid_input",
            _ => "other",
        };
        crate::metrics::record_transfer_rejected(reason);
        error!("Transfer from {:?} not submitted: {}", self.address(), e);
        e
    }
}

impl Drop for TransactionSubmitter {
    fn drop(&mut self) {
        self.abort_watchers();
    }
}

/// A node refusing to estimate a transfer is refusing the transfer
fn into_rejection(e: WalletError) -> WalletError {
    match e {
        WalletError::Contract(message) => WalletError::SubmissionRejected(message),
        other => other,
    }
}
