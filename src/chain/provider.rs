//! Chain provider with multi-RPC support and automatic failover

use super::NodeClient;
use crate::config::{GasPriceStrategy, NodeConfig};
use crate::error::{WalletError, WalletResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Node configuration
    config: NodeConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: NodeConfig) -> WalletResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(500));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(WalletError::Config(format!(
                "No valid RPC providers for chain {}",
                config.chain_id
            )));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        if self.http_providers.len() < 2 {
            return;
        }
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Map a provider error, failing over when the transport itself broke
    fn map_error(
        &self,
        e: ProviderError,
        on_rejected: fn(String) -> WalletError,
    ) -> WalletError {
        match RpcError::as_error_response(&e) {
            Some(response) => on_rejected(response.message.clone()),
            None => {
                self.failover();
                WalletError::NetworkUnavailable(format!(
                    "chain {}: {}",
                    self.config.chain_id, e
                ))
            }
        }
    }

    /// Estimate EIP-1559 fees as (max fee, priority fee, base fee)
    async fn estimate_eip1559_fees(&self) -> WalletResult<(U256, U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| self.map_error(e, WalletError::Contract))?
            .ok_or_else(|| WalletError::NetworkUnavailable("No latest block".to_string()))?;

        let base_fee = block.base_fee_per_gas.ok_or_else(|| {
            WalletError::Config(format!(
                "Chain {} has no base fee; use the legacy gas price strategy",
                self.config.chain_id
            ))
        })?;

        let priority_fee = match self.http().request::<_, U256>("eth_maxPriorityFeePerGas", ()).await
        {
            Ok(fee) => fee,
            Err(e) => {
                debug!("eth_maxPriorityFeePerGas unavailable, using 2 gwei: {}", e);
                U256::from(2_000_000_000u64)
            }
        };

        // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
        let max_fee = base_fee * 2 + priority_fee;

        Ok((
            std::cmp::min(max_fee, self.max_gas_price()),
            priority_fee,
            base_fee,
        ))
    }

    fn max_gas_price(&self) -> U256 {
        U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64)
    }
}

#[async_trait]
impl NodeClient for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn get_balance(&self, address: Address) -> WalletResult<U256> {
        self.http()
            .get_balance(address, None)
            .await
            .map_err(|e| self.map_error(e, WalletError::Contract))
    }

    async fn get_gas_price(&self) -> WalletResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| self.map_error(e, WalletError::Contract))?;
                Ok(GasPrice::Legacy(std::cmp::min(price, self.max_gas_price())))
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee, priority_fee, base_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                    base_fee_per_gas: base_fee,
                })
            }
        }
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> WalletResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| self.map_error(e, WalletError::Contract))
    }

    async fn call(&self, tx: &TypedTransaction) -> WalletResult<Bytes> {
        self.http()
            .call(tx, None)
            .await
            .map_err(|e| self.map_error(e, WalletError::Contract))
    }

    async fn get_pending_nonce(&self, address: Address) -> WalletResult<U256> {
        self.http()
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.map_error(e, WalletError::Contract))
    }

    async fn get_confirmed_nonce(&self, address: Address) -> WalletResult<U256> {
        self.http()
            .get_transaction_count(address, Some(BlockNumber::Latest.into()))
            .await
            .map_err(|e| self.map_error(e, WalletError::Contract))
    }

    async fn get_block_number(&self) -> WalletResult<u64> {
        self.http()
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(|e| self.map_error(e, WalletError::Contract))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> WalletResult<H256> {
        let pending = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(|e| self.map_error(e, WalletError::SubmissionRejected))?;
        Ok(pending.tx_hash())
    }

    async fn get_transaction_receipt(
        &self,
        hash: H256,
    ) -> WalletResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| self.map_error(e, WalletError::Contract))
    }
}

/// Gas price types
#[derive(Debug, Clone, PartialEq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
        /// Base fee of the latest block when the price was quoted
        base_fee_per_gas: U256,
    },
}

impl GasPrice {
    /// Price per gas unit a transaction is expected to pay right now
    ///
    /// For EIP-1559 this is base fee plus tip, capped by the max fee; the max fee
    /// itself is only an upper bound.
    pub fn effective(&self) -> U256 {
        match self {
            GasPrice::Legacy(price) => *price,
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                base_fee_per_gas,
            } => (*base_fee_per_gas + *max_priority_fee_per_gas).min(*max_fee_per_gas),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::HttpClientError;

    fn node_config(urls: Vec<&str>) -> NodeConfig {
        NodeConfig {
            chain_id: 97,
            rpc_urls: urls.into_iter().map(String::from).collect(),
            native_symbol: "BNB".to_string(),
            gas_price_strategy: GasPriceStrategy::Legacy,
            max_gas_price_gwei: 100,
            confirmation_blocks: 1,
            poll_interval_ms: 2_000,
            settlement_timeout_secs: 600,
        }
    }

    #[test]
    fn test_invalid_urls_rejected() {
        let result = ChainProvider::new(node_config(vec!["not a url"]));
        assert!(matches!(result, Err(WalletError::Config(_))));
    }

    #[test]
    fn test_failover_rotates_providers() {
        let provider = ChainProvider::new(node_config(vec![
            "http://127.0.0.1:8545",
            "http://127.0.0.1:8546",
        ]))
        .unwrap();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 1);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_node_refusal_is_not_a_transport_failure() {
        let provider = ChainProvider::new(node_config(vec![
            "http://127.0.0.1:8545",
            "http://127.0.0.1:8546",
        ]))
        .unwrap();

        let refusal = ProviderError::from(HttpClientError::JsonRpcError(
            ethers::providers::JsonRpcError {
                code: -32000,
                message: "nonce too low".to_string(),
                data: None,
            },
        ));
        match provider.map_error(refusal, WalletError::SubmissionRejected) {
            WalletError::SubmissionRejected(message) => assert_eq!(message, "nonce too low"),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);

        let broken = ProviderError::CustomError("connection refused".to_string());
        assert!(matches!(
            provider.map_error(broken, WalletError::SubmissionRejected),
            WalletError::NetworkUnavailable(_)
        ));
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_effective_gas_price() {
        let legacy = GasPrice::Legacy(U256::from(7));
        assert_eq!(legacy.effective(), U256::from(7));
        let eip1559 = GasPrice::Eip1559 {
            max_fee_per_gas: U256::from(30),
            max_priority_fee_per_gas: U256::from(2),
            base_fee_per_gas: U256::from(14),
        };
        assert_eq!(eip1559.effective(), U256::from(16));

        // A base fee spike is still bounded by the max fee
        let capped = GasPrice::Eip1559 {
            max_fee_per_gas: U256::from(30),
            max_priority_fee_per_gas: U256::from(2),
            base_fee_per_gas: U256::from(40),
        };
        assert_eq!(capped.effective(), U256::from(30));
    }
}
