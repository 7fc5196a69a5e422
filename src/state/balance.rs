//! Native and token balances for the session address

use crate::chain::{NodeClient, TokenRegistry, TrackedToken};
use crate::error::WalletResult;
use crate::tx::request::{format_amount, NATIVE_DECIMALS};

use chrono::{DateTime, Utc};
use ethers::types::Address;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Formatted balances; an asset whose last fetch failed is absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceSnapshot {
    pub native: Option<String>,
    /// symbol -> decimal balance
    pub tokens: BTreeMap<String, String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetFailure {
    pub symbol: String,
    pub error: String,
}

/// Result of one refresh pass
#[derive(Debug, Clone)]
pub struct BalanceRefresh {
    pub snapshot: BalanceSnapshot,
    pub failures: Vec<AssetFailure>,
    /// `false` when a later refresh had already been applied
    pub applied: bool,
}

impl BalanceRefresh {
    /// Single user-facing notice for all failed assets
    pub fn notice(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let symbols: Vec<&str> = self.failures.iter().map(|f| f.symbol.as_str()).collect();
        Some(format!("Could not load balances for {}", symbols.join(", ")))
    }
}

#[derive(Default)]
struct SnapshotState {
    snapshot: BalanceSnapshot,
    applied_generation: u64,
}

/// Fetches every tracked balance concurrently and swaps the snapshot in one step
pub struct BalanceAggregator {
    node: Arc<dyn NodeClient>,
    tokens: Arc<TokenRegistry>,
    native_symbol: String,
    state: RwLock<SnapshotState>,
    generation: AtomicU64,
}

impl BalanceAggregator {
    pub fn new(
        node: Arc<dyn NodeClient>,
        tokens: Arc<TokenRegistry>,
        native_symbol: impl Into<String>,
    ) -> Self {
        Self {
            node,
            tokens,
            native_symbol: native_symbol.into(),
            state: RwLock::new(SnapshotState::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn refresh(&self, address: Address) -> BalanceRefresh {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (native, tokens) = tokio::join!(
            self.fetch_native(address),
            join_all(
                self.tokens
                    .tracked()
                    .iter()
                    .map(|token| self.fetch_token(token, address))
            )
        );

        let mut snapshot = BalanceSnapshot {
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        let mut failures = Vec::new();

        match native {
            Ok(balance) => snapshot.native = Some(balance),
            Err(e) => failures.push(AssetFailure {
                symbol: self.native_symbol.clone(),
                error: e.to_string(),
            }),
        }
        for (token, result) in self.tokens.tracked().iter().zip(tokens) {
            match result {
                Ok(balance) => {
                    snapshot.tokens.insert(token.symbol.clone(), balance);
                }
                Err(e) => failures.push(AssetFailure {
                    symbol: token.symbol.clone(),
                    error: e.to_string(),
                }),
            }
        }

        for failure in &failures {
            crate::metrics::record_balance_failure(&failure.symbol);
        }
        if !failures.is_empty() {
            let details: Vec<String> = failures
                .iter()
                .map(|f| format!("{}: {}", f.symbol, f.error))
                .collect();
            warn!(
                "Balance refresh for {:?} partially failed: {}",
                address,
                details.join("; ")
            );
        }

        let mut state = self.state.write().await;
        if generation <= state.applied_generation {
            debug!(
                "Discarding stale balance refresh (generation {} <= {})",
                generation, state.applied_generation
            );
            return BalanceRefresh {
                snapshot: state.snapshot.clone(),
                failures,
                applied: false,
            };
        }
        state.snapshot = snapshot.clone();
        state.applied_generation = generation;

        BalanceRefresh {
            snapshot,
            failures,
            applied: true,
        }
    }

    pub async fn snapshot(&self) -> BalanceSnapshot {
        self.state.read().await.snapshot.clone()
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.snapshot = BalanceSnapshot::default();
        state.applied_generation = self.generation.load(Ordering::SeqCst);
    }

    async fn fetch_native(&self, address: Address) -> WalletResult<String> {
        let wei = self.node.get_balance(address).await?;
        format_amount(wei, NATIVE_DECIMALS)
    }

    async fn fetch_token(&self, token: &TrackedToken, owner: Address) -> WalletResult<String> {
        let node = self.node.as_ref();
        let decimals = self.tokens.decimals(node, token.contract).await?;
        let raw = self.tokens.balance_of(node, token.contract, owner).await?;
        format_amount(raw, decimals)
    }
}
