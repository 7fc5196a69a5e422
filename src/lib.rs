//! Custodial wallet client core
//!
//! Holds one unlocked wallet session, talks to an EVM node over JSON-RPC and to the
//! backend ledger service over REST, and keeps pending transfers, confirmed history,
//! balances and fee estimates consistent while responses arrive in any order.

pub mod backend;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod session;
pub mod state;
pub mod tx;
pub mod wallet;

pub use backend::{ConfirmedTransferRecord, Contact, HttpLedgerClient, LedgerClient};
pub use chain::{ChainProvider, GasPrice, NodeClient, SettlementState, TrackedToken};
pub use config::Settings;
pub use error::{WalletError, WalletResult};
pub use events::WalletEvent;
pub use session::{SessionStorage, WalletSession};
pub use state::{BalanceSnapshot, Direction, DisplayedTransfer, PendingTransfer, TransferStatus};
pub use tx::{Asset, FeeEstimate, FeeState, SubmissionHandle, TransferRequest};
pub use wallet::{WalletClient, WalletServices};
