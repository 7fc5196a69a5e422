//! Chain module - blockchain node access for the wallet
//!
//! This module provides:
//! - The `NodeClient` seam every wallet component talks to
//! - An ethers HTTP implementation with multi-RPC failover
//! - ERC-20 call data encoding and a token decimals cache
//! - Settlement watching for submitted transfers

pub mod erc20;
pub mod provider;
pub mod settlement;
pub mod token;

pub use provider::{ChainProvider, GasPrice};
pub use settlement::{SettlementState, SettlementWatcher};
pub use token::{TokenRegistry, TrackedToken};

use crate::error::WalletResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// JSON-RPC surface of the blockchain node used by the wallet
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Chain ID used for EIP-155 signing
    fn chain_id(&self) -> u64;

    async fn get_balance(&self, address: Address) -> WalletResult<U256>;

    /// Current gas price per the configured pricing strategy
    async fn get_gas_price(&self) -> WalletResult<GasPrice>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> WalletResult<U256>;

    /// Read-only contract call (`eth_call`)
    async fn call(&self, tx: &TypedTransaction) -> WalletResult<Bytes>;

    /// Next nonce including transactions still in the mempool
    async fn get_pending_nonce(&self, address: Address) -> WalletResult<U256>;

    /// Next nonce according to mined blocks only
    async fn get_confirmed_nonce(&self, address: Address) -> WalletResult<U256>;

    async fn get_block_number(&self) -> WalletResult<u64>;

    async fn send_raw_transaction(&self, raw: Bytes) -> WalletResult<H256>;

    async fn get_transaction_receipt(&self, hash: H256)
        -> WalletResult<Option<TransactionReceipt>>;
}
