//! Settlement tracking for broadcast transfers
//!
//! A broadcast transfer settles in exactly one of these ways:
//! - Confirmed: a successful receipt with enough confirmations
//! - Failed: the receipt reports a revert
//! - Replaced: the sender's nonce was consumed by a different transaction
//! - Dropped: nothing happened before the settlement timeout

use super::NodeClient;
use crate::error::WalletResult;

use ethers::types::{Address, TransactionReceipt, H256, U256, U64};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-transfer lifecycle state
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementState {
    Submitted,
    Confirmed { block_number: u64 },
    Failed { reason: String },
    Dropped,
    Replaced,
}

impl SettlementState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SettlementState::Submitted)
    }

    /// Get state name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            SettlementState::Submitted => "submitted",
            SettlementState::Confirmed { .. } => "confirmed",
            SettlementState::Failed { .. } => "failed",
            SettlementState::Dropped => "dropped",
            SettlementState::Replaced => "replaced",
        }
    }
}

/// Polls the node until a transfer reaches a terminal state
pub struct SettlementWatcher {
    node: Arc<dyn NodeClient>,
    /// Required confirmation blocks (1 = included in the latest block)
    confirmation_blocks: u64,
    poll_interval: Duration,
    timeout: Duration,
}

impl SettlementWatcher {
    pub fn new(
        node: Arc<dyn NodeClient>,
        confirmation_blocks: u64,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            node,
            confirmation_blocks: confirmation_blocks.max(1),
            poll_interval,
            timeout,
        }
    }

    /// Wait for the transfer `hash` sent by `from` at `nonce` to settle
    pub async fn watch(&self, hash: H256, from: Address, nonce: U256) -> SettlementState {
        let started = Instant::now();

        loop {
            match self.poll(hash, from, nonce).await {
                Ok(state) if !state.is_terminal() => {}
                Ok(terminal) => {
                    info!("Transfer {:?} settled: {}", hash, terminal.name());
                    return terminal;
                }
                Err(e) => {
                    // Transient node errors never settle a transfer on their own
                    warn!("Settlement poll for {:?} failed: {}", hash, e);
                }
            }

            if started.elapsed() >= self.timeout {
                warn!(
                    "Transfer {:?} not settled after {:?}, treating as dropped",
                    hash, self.timeout
                );
                return SettlementState::Dropped;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Single settlement check
    pub async fn poll(
        &self,
        hash: H256,
        from: Address,
        nonce: U256,
    ) -> WalletResult<SettlementState> {
        if let Some(receipt) = self.node.get_transaction_receipt(hash).await? {
            return self.check_receipt(&receipt).await;
        }

        let mined_nonce = self.node.get_confirmed_nonce(from).await?;
        if mined_nonce > nonce {
            // Our own inclusion may have landed between the two calls
            if let Some(receipt) = self.node.get_transaction_receipt(hash).await? {
                return self.check_receipt(&receipt).await;
            }
            debug!(
                "Nonce {} of {:?} consumed by another transaction, {:?} replaced",
                nonce, from, hash
            );
            return Ok(SettlementState::Replaced);
        }

        Ok(SettlementState::Submitted)
    }

    async fn check_receipt(&self, receipt: &TransactionReceipt) -> WalletResult<SettlementState> {
        if receipt.status != Some(U64::from(1)) {
            return Ok(SettlementState::Failed {
                reason: "execution reverted".to_string(),
            });
        }

        let Some(block) = receipt.block_number.map(|b| b.as_u64()) else {
            return Ok(SettlementState::Submitted);
        };

        if self.confirmation_blocks > 1 {
            let current_block = self.node.get_block_number().await?;
            let confirmations = current_block.saturating_sub(block) + 1;
            if confirmations < self.confirmation_blocks {
                debug!(
                    "Transfer {:?} has {} / {} confirmations",
                    receipt.transaction_hash, confirmations, self.confirmation_blocks
                );
                return Ok(SettlementState::Submitted);
            }
        }

        Ok(SettlementState::Confirmed {
            block_number: block,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockNodeClient;

    fn receipt(hash: H256, status: u64, block: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: hash,
            status: Some(U64::from(status)),
            block_number: Some(U64::from(block)),
            ..Default::default()
        }
    }

    fn watcher(node: MockNodeClient, confirmations: u64) -> SettlementWatcher {
        SettlementWatcher::new(
            Arc::new(node),
            confirmations,
            Duration::from_millis(100),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_successful_receipt_confirms() {
        let hash = H256::repeat_byte(1);
        let mut node = MockNodeClient::new();
        node.expect_get_transaction_receipt()
            .returning(move |h| Ok(Some(receipt(h, 1, 42))));

        let state = watcher(node, 1)
            .poll(hash, Address::zero(), U256::zero())
            .await
            .unwrap();
        assert_eq!(state, SettlementState::Confirmed { block_number: 42 });
    }

    #[tokio::test]
    async fn test_reverted_receipt_fails() {
        let hash = H256::repeat_byte(2);
        let mut node = MockNodeClient::new();
        node.expect_get_transaction_receipt()
            .returning(move |h| Ok(Some(receipt(h, 0, 42))));

        let state = watcher(node, 1)
            .poll(hash, Address::zero(), U256::zero())
            .await
            .unwrap();
        assert!(matches!(state, SettlementState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_consumed_nonce_without_receipt_is_replaced() {
        let mut node = MockNodeClient::new();
        node.expect_get_transaction_receipt().returning(|_| Ok(None));
        node.expect_get_confirmed_nonce()
            .returning(|_| Ok(U256::from(8)));

        let state = watcher(node, 1)
            .poll(H256::repeat_byte(3), Address::zero(), U256::from(7))
            .await
            .unwrap();
        assert_eq!(state, SettlementState::Replaced);
    }

    #[tokio::test]
    async fn test_waits_for_confirmation_depth() {
        let mut node = MockNodeClient::new();
        node.expect_get_transaction_receipt()
            .returning(move |h| Ok(Some(receipt(h, 1, 100))));
        node.expect_get_block_number().returning(|| Ok(101));

        let state = watcher(node, 3)
            .poll(H256::repeat_byte(4), Address::zero(), U256::zero())
            .await
            .unwrap();
        assert_eq!(state, SettlementState::Submitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsettled_transfer_is_dropped_after_timeout() {
        let mut node = MockNodeClient::new();
        node.expect_get_transaction_receipt().returning(|_| Ok(None));
        node.expect_get_confirmed_nonce()
            .returning(|_| Ok(U256::from(7)));

        let state = watcher(node, 1)
            .watch(H256::repeat_byte(5), Address::zero(), U256::from(7))
            .await;
        assert_eq!(state, SettlementState::Dropped);
    }
}
