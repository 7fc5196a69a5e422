//! Unlocked wallet identity
//!
//! A `WalletSession` exists from unlock until lock. It is never mutated; unlocking
//! again produces a new session.

mod storage;

pub use storage::{PersistedSession, SessionStorage};

use crate::backend::UnlockedWallet;
use crate::error::{WalletError, WalletResult};

use chrono::{DateTime, Utc};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::fmt;

/// Authenticated in-memory identity every wallet component operates against
#[derive(Clone)]
pub struct WalletSession {
    name: String,
    signer: LocalWallet,
    unlocked_at: DateTime<Utc>,
}

impl WalletSession {
    /// Build a session from a hex private key
    pub fn new(name: impl Into<String>, private_key: &str) -> WalletResult<Self> {
        let signer = private_key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| WalletError::Session(format!("Invalid private key: {}", e)))?;

        Ok(Self {
            name: name.into(),
            signer,
            unlocked_at: Utc::now(),
        })
    }

    /// Build a session from the backend's unlock response, checking the key matches the address
    pub fn from_unlocked(wallet: &UnlockedWallet) -> WalletResult<Self> {
        let session = Self::new(wallet.name.clone(), &wallet.private_key)?;
        if session.address() != wallet.address {
            return Err(WalletError::Session(format!(
                "Signing key does not control {:?}",
                wallet.address
            )));
        }
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn signer(&self) -> &LocalWallet {
        &self.signer
    }

    pub fn unlocked_at(&self) -> DateTime<Utc> {
        self.unlocked_at
    }

    pub(crate) fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            name: self.name.clone(),
            address: self.address(),
            private_key: hex::encode(self.signer.signer().to_bytes()),
        }
    }
}

impl fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSession")
            .field("name", &self.name)
            .field("address", &self.address())
            .field("unlocked_at", &self.unlocked_at)
            .finish_non_exhaustive()
    }
}
