//! Nonce allocation for the session account
//!
//! Handles:
//! - Local nonce tracking so back-to-back submissions never collide
//! - Re-seeding from the node's pending count when it runs ahead
//! - Rolling back a nonce whose broadcast failed

use crate::chain::NodeClient;
use crate::error::WalletResult;

use ethers::types::{Address, U256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Hands out nonces for one account
pub struct NonceManager {
    address: Address,
    /// Next nonce to hand out; `None` until first use or after a resync
    next: Mutex<Option<U256>>,
}

impl NonceManager {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            next: Mutex::new(None),
        }
    }

    /// Allocate the next nonce
    ///
    /// Takes the higher of the local counter and the node's pending transaction count,
    /// so transactions sent from elsewhere are accounted for.
    pub async fn next_nonce(&self, node: &dyn NodeClient) -> WalletResult<U256> {
        let mut next = self.next.lock().await;
        let on_chain = node.get_pending_nonce(self.address).await?;

        let nonce = match *next {
            Some(local) if local > on_chain => local,
            Some(local) => {
                if local < on_chain {
                    debug!(
                        "Pending nonce for {:?} moved ahead: local {}, node {}",
                        self.address, local, on_chain
                    );
                }
                on_chain
            }
            None => on_chain,
        };

        *next = Some(nonce + 1);
        debug!("Allocated nonce {} for {:?}", nonce, self.address);
        Ok(nonce)
    }

    /// Return a nonce whose transaction never reached the mempool
    pub async fn release(&self, nonce: U256) {
        let mut next = self.next.lock().await;
        match *next {
            Some(current) if current == nonce + 1 => *next = Some(nonce),
            Some(current) => {
                // A later nonce is already out; the next allocation re-reads the node
                warn!(
                    "Released nonce {} below allocated {} for {:?}, resyncing",
                    nonce, current, self.address
                );
                *next = None;
            }
            None => {}
        }
    }

    /// Forget local state; the next allocation uses the node's count
    pub async fn resync(&self) {
        *self.next.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockNodeClient;

    fn node_with_pending(count: u64) -> MockNodeClient {
        let mut node = MockNodeClient::new();
        node.expect_get_pending_nonce()
            .returning(move |_| Ok(U256::from(count)));
        node
    }

    #[tokio::test]
    async fn test_sequential_allocation() {
        let node = node_with_pending(5);
        let nonces = NonceManager::new(Address::zero());

        assert_eq!(nonces.next_nonce(&node).await.unwrap(), U256::from(5));
        assert_eq!(nonces.next_nonce(&node).await.unwrap(), U256::from(6));
    }

    #[tokio::test]
    async fn test_release_reuses_last_nonce() {
        let node = node_with_pending(5);
        let nonces = NonceManager::new(Address::zero());

        let nonce = nonces.next_nonce(&node).await.unwrap();
        nonces.release(nonce).await;
        assert_eq!(nonces.next_nonce(&node).await.unwrap(), nonce);
    }

    #[tokio::test]
    async fn test_node_ahead_wins() {
        let nonces = NonceManager::new(Address::zero());
        nonces.next_nonce(&node_with_pending(2)).await.unwrap();
        assert_eq!(
            nonces.next_nonce(&node_with_pending(9)).await.unwrap(),
            U256::from(9)
        );
    }

    #[tokio::test]
    async fn test_resync_follows_node_after_eviction() {
        let node = node_with_pending(5);
        let nonces = NonceManager::new(Address::zero());
        nonces.next_nonce(&node).await.unwrap();

        // Local counter stays ahead of a node that lost nonce 5
        assert_eq!(nonces.next_nonce(&node).await.unwrap(), U256::from(6));

        nonces.resync().await;
        assert_eq!(nonces.next_nonce(&node).await.unwrap(), U256::from(5));
    }
}
