//! In-flight transfers submitted during this session

use crate::chain::GasPrice;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use tokio::sync::RwLock;
use tracing::debug;

/// A broadcast transfer awaiting settlement
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransfer {
    pub hash: H256,
    pub from_address: Address,
    pub to_address: Address,
    /// Decimal amount as entered by the user
    pub amount: String,
    pub asset_symbol: String,
    pub submitted_at: DateTime<Utc>,
    pub nonce: U256,
    /// Price paid, needed to outbid this transfer with a replacement
    pub gas_price: GasPrice,
}

/// Ordered set of pending transfers keyed by hash, newest first
///
/// This is the single source of truth for the pending set; every add and remove
/// goes through the same lock, so a removal can never be lost to a stale copy.
#[derive(Default)]
pub struct PendingTransactionTracker {
    entries: RwLock<Vec<PendingTransfer>>,
}

impl PendingTransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transfer; an entry with the same hash is replaced in place
    pub async fn add(&self, transfer: PendingTransfer) {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.hash == transfer.hash) {
            Some(existing) => *existing = transfer,
            None => entries.insert(0, transfer),
        }
        crate::metrics::record_pending_count(entries.len());
    }

    /// Remove the entry for `hash`, returning it if it was tracked
    pub async fn remove(&self, hash: H256) -> Option<PendingTransfer> {
        let mut entries = self.entries.write().await;
        let idx = entries.iter().position(|e| e.hash == hash)?;
        let removed = entries.remove(idx);
        crate::metrics::record_pending_count(entries.len());

        debug!("Retired pending transfer {:?}", hash);
        Some(removed)
    }

    /// Remove every entry at `nonce` other than `keep`
    ///
    /// Once one transaction at a nonce confirms, all others at that nonce are dead.
    pub async fn remove_superseded(&self, nonce: U256, keep: H256) -> Vec<PendingTransfer> {
        let mut entries = self.entries.write().await;
        let (superseded, kept): (Vec<_>, Vec<_>) = entries
            .drain(..)
            .partition(|e| e.nonce == nonce && e.hash != keep);
        *entries = kept;
        crate::metrics::record_pending_count(entries.len());
        superseded
    }

    pub async fn get(&self, hash: H256) -> Option<PendingTransfer> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.hash == hash)
            .cloned()
    }

    pub async fn snapshot(&self) -> Vec<PendingTransfer> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop everything (lock / logout)
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        crate::metrics::record_pending_count(0);
    }
}
