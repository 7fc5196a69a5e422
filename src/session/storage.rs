//! Durable client-local session cache

use super::WalletSession;
use crate::error::WalletResult;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Fixed storage key for the cached session
const SESSION_KEY: &str = "walletData";

/// On-disk form of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub name: String,
    pub address: Address,
    pub private_key: String,
}

/// Stores one session as JSON under a fixed name
pub struct SessionStorage {
    path: PathBuf,
}

impl SessionStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", SESSION_KEY)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, session: &WalletSession) -> WalletResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(&session.to_persisted())?;
        fs::write(&self.path, data)?;

        debug!("Saved session for {:?}", session.address());
        Ok(())
    }

    /// Restore the cached session, if any
    ///
    /// A cache entry that no longer yields a usable session is removed.
    pub fn restore(&self) -> WalletResult<Option<WalletSession>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let persisted: PersistedSession = match serde_json::from_slice(&data) {
            Ok(p) => p,
            Err(e) => {
                warn!("Discarding unreadable session cache: {}", e);
                self.clear()?;
                return Ok(None);
            }
        };

        let session = WalletSession::new(persisted.name, &persisted.private_key)?;
        if session.address() != persisted.address {
            warn!("Discarding session cache with mismatched address");
            self.clear()?;
            return Ok(None);
        }

        info!("Restored session for {:?}", session.address());
        Ok(Some(session))
    }

    pub fn clear(&self) -> WalletResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
