//! Wallet state owned by the session
//!
//! Handles:
//! - The in-flight transfer set
//! - Confirmed history and its reconciliation with in-flight transfers
//! - Balance snapshots
//!
//! Each piece of state is owned by exactly one component and only changes through
//! that component's operations; readers get snapshots.

pub mod balance;
pub mod history;
pub mod pending;

pub use balance::{AssetFailure, BalanceAggregator, BalanceRefresh, BalanceSnapshot};
pub use history::{Direction, DisplayedTransfer, HistoryCache, HistoryReconciler, TransferStatus};
pub use pending::{PendingTransactionTracker, PendingTransfer};
