//! Wallet event types
//!
//! `WalletEvent` is what the host UI subscribes to. `SettlementOutcome` is the
//! internal message a settlement watcher sends to the coordinator.

use crate::chain::SettlementState;

use chrono::{DateTime, Utc};
use ethers::types::{H256, U256};
use tokio::sync::oneshot;

/// Notifications broadcast to every subscriber of a wallet
#[derive(Debug, Clone, PartialEq)]
pub enum WalletEvent {
    /// Transfer broadcast and added to the pending set
    TransferSubmitted { hash: H256, nonce: U256 },

    /// Transfer included with the required confirmations
    TransferConfirmed { hash: H256, block_number: u64 },

    /// Transfer reverted or never settled
    TransferFailed { hash: H256, reason: String },

    /// A new balance snapshot was applied
    BalancesUpdated,

    /// Confirmed history was replaced
    HistoryUpdated,

    /// Non-fatal problem the user should see once
    Notice { message: String },
}

impl WalletEvent {
    /// Get event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            WalletEvent::TransferSubmitted { .. } => "transfer_submitted",
            WalletEvent::TransferConfirmed { .. } => "transfer_confirmed",
            WalletEvent::TransferFailed { .. } => "transfer_failed",
            WalletEvent::BalancesUpdated => "balances_updated",
            WalletEvent::HistoryUpdated => "history_updated",
            WalletEvent::Notice { .. } => "notice",
        }
    }

    /// Hash of the transfer this event is about, if any
    pub fn transfer_hash(&self) -> Option<H256> {
        match self {
            WalletEvent::TransferSubmitted { hash, .. }
            | WalletEvent::TransferConfirmed { hash, .. }
            | WalletEvent::TransferFailed { hash, .. } => Some(*hash),
            _ => None,
        }
    }
}

/// Terminal state reported by a settlement watcher
#[derive(Debug)]
pub struct SettlementOutcome {
    pub hash: H256,
    pub nonce: U256,
    pub state: SettlementState,
    pub submitted_at: DateTime<Utc>,
    /// Resolves the submitter's handle once the coordinator has applied the outcome
    pub done: oneshot::Sender<SettlementState>,
}
