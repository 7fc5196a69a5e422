//! Backend ledger service
//!
//! The backend owns confirmed transfer history, wallet unlock and the address book.
//! The wallet core only reads history; confirmations are logged best-effort.

mod http;

pub use http::HttpLedgerClient;

use crate::error::WalletResult;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Confirmed transfer as reported by the backend history feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedTransferRecord {
    pub hash: H256,
    #[serde(rename = "from")]
    pub from_address: Address,
    #[serde(rename = "to")]
    pub to_address: Address,
    #[serde(deserialize_with = "decimal_string")]
    pub amount: String,
    #[serde(rename = "tokenName")]
    pub asset_symbol: String,
    pub timestamp: DateTime<Utc>,
}

/// Address book entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "contactName")]
    pub name: String,
    #[serde(rename = "contactAddress")]
    pub address: Address,
}

/// Wallet material returned by a successful unlock
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockedWallet {
    pub name: String,
    pub address: Address,
    pub private_key: String,
}

impl fmt::Debug for UnlockedWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedWallet")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// REST surface of the backend ledger service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// `GET /history/{address}`
    async fn fetch_history(&self, address: Address) -> WalletResult<Vec<ConfirmedTransferRecord>>;

    /// `POST /tx/{hash}`; idempotent
    async fn log_transaction(&self, hash: H256) -> WalletResult<()>;

    /// `POST /wallet/{name}`
    async fn unlock(&self, name: &str, password: &str) -> WalletResult<UnlockedWallet>;

    /// `GET /contacts/{address}`
    async fn fetch_contacts(&self, owner: Address) -> WalletResult<Vec<Contact>>;

    /// `POST /contacts`
    async fn add_contact(&self, owner: Address, name: &str, address: Address)
        -> WalletResult<()>;

    /// `DELETE /contacts/{id}`
    async fn delete_contact(&self, id: &str) -> WalletResult<()>;
}

/// Accept amounts sent either as JSON strings or numbers
fn decimal_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok("0".to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected decimal amount, got {}",
            other
        ))),
    }
}
