//! Error types for the wallet client core

use ethers::types::H256;
use thiserror::Error;

/// Main error type for wallet operations
#[derive(Error, Debug)]
pub enum WalletError {
    /// Rejected before any network call; nothing was changed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The node refused the signed transfer (insufficient funds, nonce conflict, ...)
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Settlement failed for tx {hash:?}: {reason}")]
    SettlementFailure { hash: H256, reason: String },

    #[error("Backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Transfer {hash:?} is not pending")]
    TransferNotPending { hash: H256 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WalletError {
    /// Check if the caller may retry the operation as-is
    pub fn is_retryable(&self) -> bool {
        match self {
            WalletError::NetworkUnavailable(_) => true,
            WalletError::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Short message suitable for a transient UI notification
    pub fn user_message(&self) -> String {
        match self {
            WalletError::InvalidInput(_) => "Invalid inputs.".to_string(),
            WalletError::NetworkUnavailable(_) => "Network unavailable, please retry.".to_string(),
            WalletError::SubmissionRejected(reason) => reason.clone(),
            WalletError::SettlementFailure { .. } => {
                "Transaction failed or was dropped.".to_string()
            }
            WalletError::Backend { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            WalletError::Internal(format!("Malformed backend response: {}", e))
        } else {
            WalletError::NetworkUnavailable(e.to_string())
        }
    }
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(WalletError::NetworkUnavailable("timeout".into()).is_retryable());
        assert!(WalletError::Backend {
            status: 503,
            message: "down".into()
        }
        .is_retryable());
        assert!(!WalletError::Backend {
            status: 404,
            message: "missing".into()
        }
        .is_retryable());
        assert!(!WalletError::SubmissionRejected("insufficient funds".into()).is_retryable());
        assert!(!WalletError::InvalidInput("amount".into()).is_retryable());
    }

    #[test]
    fn test_settlement_failure_message() {
        let err = WalletError::SettlementFailure {
            hash: H256::zero(),
            reason: "dropped".into(),
        };
        assert_eq!(err.user_message(), "Transaction failed or was dropped.");
    }
}
