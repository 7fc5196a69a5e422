//! Transfer history: confirmed records from the backend merged with pending transfers

use super::pending::PendingTransfer;
use crate::backend::{ConfirmedTransferRecord, LedgerClient};
use crate::error::WalletResult;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

/// One row of the reconciled history view
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedTransfer {
    pub hash: H256,
    pub from_address: Address,
    pub to_address: Address,
    pub amount: String,
    pub asset_symbol: String,
    /// Submission time for pending entries, server time for confirmed ones
    pub timestamp: DateTime<Utc>,
    pub status: TransferStatus,
    /// Only known for transfers submitted in this session
    pub nonce: Option<U256>,
}

impl DisplayedTransfer {
    pub fn is_pending(&self) -> bool {
        self.status == TransferStatus::Pending
    }

    /// Direction relative to `owner`
    pub fn direction(&self, owner: Address) -> Direction {
        if self.from_address == owner {
            Direction::Sent
        } else {
            Direction::Received
        }
    }
}

impl From<&PendingTransfer> for DisplayedTransfer {
    fn from(p: &PendingTransfer) -> Self {
        Self {
            hash: p.hash,
            from_address: p.from_address,
            to_address: p.to_address,
            amount: p.amount.clone(),
            asset_symbol: p.asset_symbol.clone(),
            timestamp: p.submitted_at,
            status: TransferStatus::Pending,
            nonce: Some(p.nonce),
        }
    }
}

impl From<&ConfirmedTransferRecord> for DisplayedTransfer {
    fn from(r: &ConfirmedTransferRecord) -> Self {
        Self {
            hash: r.hash,
            from_address: r.from_address,
            to_address: r.to_address,
            amount: r.amount.clone(),
            asset_symbol: r.asset_symbol.clone(),
            timestamp: r.timestamp,
            status: TransferStatus::Confirmed,
            nonce: None,
        }
    }
}

/// Merges pending transfers with confirmed history
pub struct HistoryReconciler;

impl HistoryReconciler {
    /// Build the display list from the two inputs
    ///
    /// A pending entry is dropped once a confirmed record carries its hash, so no hash
    /// appears twice. Ordered newest first; on equal timestamps pending entries lead.
    pub fn reconcile(
        pending: &[PendingTransfer],
        confirmed: &[ConfirmedTransferRecord],
    ) -> Vec<DisplayedTransfer> {
        let mut seen: HashSet<H256> = HashSet::with_capacity(confirmed.len() + pending.len());
        let mut combined = Vec::with_capacity(confirmed.len() + pending.len());

        for record in confirmed {
            if seen.insert(record.hash) {
                combined.push(DisplayedTransfer::from(record));
            }
        }
        for transfer in pending {
            if seen.insert(transfer.hash) {
                combined.push(DisplayedTransfer::from(transfer));
            }
        }

        combined.sort_by(|a, b| match b.timestamp.cmp(&a.timestamp) {
            CmpOrdering::Equal => status_rank(a.status).cmp(&status_rank(b.status)),
            other => other,
        });
        combined
    }
}

fn status_rank(status: TransferStatus) -> u8 {
    match status {
        TransferStatus::Pending => 0,
        TransferStatus::Confirmed => 1,
    }
}

#[derive(Default)]
struct CacheState {
    records: Vec<ConfirmedTransferRecord>,
    applied_generation: u64,
}

/// Confirmed history for the session address, replaced wholesale on each fetch
#[derive(Default)]
pub struct HistoryCache {
    state: RwLock<CacheState>,
    generation: AtomicU64,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch history and replace the cache
    ///
    /// Returns `false` when a fetch started later has already been applied, in which
    /// case this older response is discarded.
    pub async fn refresh(&self, ledger: &dyn LedgerClient, address: Address) -> WalletResult<bool> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let records = ledger.fetch_history(address).await?;

        let mut state = self.state.write().await;
        if generation <= state.applied_generation {
            debug!(
                "Discarding stale history response (generation {} <= {})",
                generation, state.applied_generation
            );
            return Ok(false);
        }
        state.records = records;
        state.applied_generation = generation;
        Ok(true)
    }

    pub async fn records(&self) -> Vec<ConfirmedTransferRecord> {
        self.state.read().await.records.clone()
    }

    pub async fn contains(&self, hash: H256) -> bool {
        self.state.read().await.records.iter().any(|r| r.hash == hash)
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.records.clear();
        state.applied_generation = self.generation.load(Ordering::SeqCst);
    }
}
