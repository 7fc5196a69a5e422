//! Tracked tokens and their cached decimal precision

use super::erc20;
use super::NodeClient;
use crate::config::TokenConfig;
use crate::error::{WalletError, WalletResult};

use dashmap::DashMap;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, U256};
use tracing::debug;

/// A fungible token whose balance the wallet tracks
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedToken {
    pub symbol: String,
    pub contract: Address,
}

/// Configured tokens plus a per-contract decimals cache
pub struct TokenRegistry {
    tokens: Vec<TrackedToken>,
    /// contract -> decimals, seeded from config and filled on first use
    decimals: DashMap<Address, u8>,
}

impl TokenRegistry {
    pub fn new(tokens: &[TokenConfig]) -> WalletResult<Self> {
        let decimals = DashMap::new();
        let mut tracked = Vec::with_capacity(tokens.len());

        for token in tokens {
            let contract: Address = token.contract_address.parse().map_err(|e| {
                WalletError::Config(format!(
                    "Invalid contract address for {}: {}",
                    token.symbol, e
                ))
            })?;
            if let Some(d) = token.decimals {
                decimals.insert(contract, d);
            }
            tracked.push(TrackedToken {
                symbol: token.symbol.clone(),
                contract,
            });
        }

        Ok(Self {
            tokens: tracked,
            decimals,
        })
    }

    pub fn tracked(&self) -> &[TrackedToken] {
        &self.tokens
    }

    /// Look up a tracked token by symbol, ignoring case
    pub fn by_symbol(&self, symbol: &str) -> Option<&TrackedToken> {
        self.tokens
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Decimal precision for a token contract, fetched once and cached
    pub async fn decimals(&self, node: &dyn NodeClient, contract: Address) -> WalletResult<u8> {
        if let Some(d) = self.decimals.get(&contract) {
            return Ok(*d);
        }

        let raw = node.call(&call_tx(contract, erc20::encode_decimals())).await?;
        let decimals = erc20::decode_decimals(&raw)?;
        self.decimals.insert(contract, decimals);

        debug!("Cached decimals {} for token {:?}", decimals, contract);
        Ok(decimals)
    }

    /// Raw `balanceOf(owner)` for a token contract
    pub async fn balance_of(
        &self,
        node: &dyn NodeClient,
        contract: Address,
        owner: Address,
    ) -> WalletResult<U256> {
        let raw = node
            .call(&call_tx(contract, erc20::encode_balance_of(owner)))
            .await?;
        erc20::decode_uint(&raw)
    }
}

fn call_tx(contract: Address, data: ethers::types::Bytes) -> TypedTransaction {
    TransactionRequest::new().to(contract).data(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockNodeClient;
    use ethers::abi::{self, Token};

    const USDT: &str = "0x787A697324dbA4AB965C58CD33c13ff5eeA6295F";

    fn registry(decimals: Option<u8>) -> TokenRegistry {
        TokenRegistry::new(&[TokenConfig {
            symbol: "USDT".to_string(),
            contract_address: USDT.to_string(),
            decimals,
        }])
        .unwrap()
    }

    #[tokio::test]
    async fn test_decimals_fetched_once() {
        let mut node = MockNodeClient::new();
        node.expect_call()
            .times(1)
            .returning(|_| Ok(abi::encode(&[Token::Uint(U256::from(6))]).into()));

        let registry = registry(None);
        let contract = registry.by_symbol("usdt").unwrap().contract;
        assert_eq!(registry.decimals(&node, contract).await.unwrap(), 6);
        assert_eq!(registry.decimals(&node, contract).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_configured_decimals_skip_network() {
        let mut node = MockNodeClient::new();
        node.expect_call().never();

        let registry = registry(Some(18));
        let contract = registry.tracked()[0].contract;
        assert_eq!(registry.decimals(&node, contract).await.unwrap(), 18);
    }

    #[test]
    fn test_invalid_contract_rejected() {
        let result = TokenRegistry::new(&[TokenConfig {
            symbol: "BAD".to_string(),
            contract_address: "0x1234".to_string(),
            decimals: None,
        }]);
        assert!(matches!(result, Err(WalletError::Config(_))));
    }
}
