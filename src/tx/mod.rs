//! Transfer submission with nonce management and fee estimation

mod call;
pub mod gas;
mod nonce;
pub mod request;
mod sender;

pub use call::{TransferCall, NATIVE_TRANSFER_GAS};
pub use gas::{FeeEstimate, FeeEstimator, FeeState, GasEstimator};
pub use nonce::NonceManager;
pub use request::{Asset, TransferRequest, ValidatedTransfer};
pub use sender::{SubmissionHandle, TransactionSubmitter};
