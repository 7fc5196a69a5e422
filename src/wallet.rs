//! Wallet client: one unlocked session wired to the node, the backend and the
//! settlement coordinator
//!
//! Settlement watchers never touch wallet state themselves. They send their terminal
//! state to the coordinator task, which is the only place lifecycle mutations happen
//! after a transfer has been submitted.

use crate::backend::{Contact, HttpLedgerClient, LedgerClient};
use crate::chain::{
    ChainProvider, NodeClient, SettlementState, SettlementWatcher, TokenRegistry, TrackedToken,
};
use crate::config::Settings;
use crate::error::{WalletError, WalletResult};
use crate::events::{SettlementOutcome, WalletEvent};
use crate::session::{SessionStorage, WalletSession};
use crate::state::{
    BalanceAggregator, BalanceRefresh, BalanceSnapshot, DisplayedTransfer, HistoryCache,
    HistoryReconciler, PendingTransactionTracker, PendingTransfer,
};
use crate::tx::request::parse_address;
use crate::tx::{
    FeeEstimator, FeeState, GasEstimator, SubmissionHandle, TransactionSubmitter,
    TransferRequest,
};

use chrono::Utc;
use ethers::types::{Address, H256};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;
const OUTCOME_CAPACITY: usize = 64;

/// External services a wallet talks to
#[derive(Clone)]
pub struct WalletServices {
    pub node: Arc<dyn NodeClient>,
    pub ledger: Arc<dyn LedgerClient>,
}

impl WalletServices {
    pub fn new(node: Arc<dyn NodeClient>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self { node, ledger }
    }

    /// JSON-RPC provider and HTTP backend client from configuration
    pub fn from_settings(settings: &Settings) -> WalletResult<Self> {
        let node = ChainProvider::new(settings.node.clone())?;
        let ledger = HttpLedgerClient::new(&settings.backend)?;
        Ok(Self::new(Arc::new(node), Arc::new(ledger)))
    }
}

/// Read-side state refreshed by both the client and the coordinator
struct ReadModel {
    address: Address,
    ledger: Arc<dyn LedgerClient>,
    history: HistoryCache,
    balances: BalanceAggregator,
    events: broadcast::Sender<WalletEvent>,
}

impl ReadModel {
    async fn refresh_history(&self) -> WalletResult<bool> {
        match self.history.refresh(self.ledger.as_ref(), self.address).await {
            Ok(applied) => {
                if applied {
                    let _ = self.events.send(WalletEvent::HistoryUpdated);
                }
                Ok(applied)
            }
            Err(e) => {
                warn!("History refresh for {:?} failed: {}", self.address, e);
                let _ = self.events.send(WalletEvent::Notice {
                    message: e.user_message(),
                });
                Err(e)
            }
        }
    }

    async fn refresh_balances(&self) -> BalanceRefresh {
        let refresh = self.balances.refresh(self.address).await;
        if refresh.applied {
            let _ = self.events.send(WalletEvent::BalancesUpdated);
        }
        if let Some(message) = refresh.notice() {
            let _ = self.events.send(WalletEvent::Notice { message });
        }
        refresh
    }
}

/// Applies settlement outcomes to the wallet state
struct SettlementCoordinator {
    tracker: Arc<PendingTransactionTracker>,
    read: Arc<ReadModel>,
}

impl SettlementCoordinator {
    async fn run(self, mut outcomes: mpsc::Receiver<SettlementOutcome>) {
        info!("Settlement coordinator started for {:?}", self.read.address);

        while let Some(outcome) = outcomes.recv().await {
            self.apply(outcome).await;
        }

        info!("Settlement coordinator stopped for {:?}", self.read.address);
    }

    async fn apply(&self, outcome: SettlementOutcome) {
        let SettlementOutcome {
            hash,
            nonce,
            state,
            submitted_at,
            done,
        } = outcome;

        let latency = (Utc::now() - submitted_at).num_milliseconds().max(0) as f64 / 1000.0;
        crate::metrics::record_transfer_settled(state.name(), latency);
        debug!("Applying {} outcome for {:?}", state.name(), hash);

        match &state {
            SettlementState::Confirmed { block_number } => {
                let _ = self.read.events.send(WalletEvent::TransferConfirmed {
                    hash,
                    block_number: *block_number,
                });

                if let Err(e) = self.read.ledger.log_transaction(hash).await {
                    warn!("Backend did not record confirmed transfer {:?}: {}", hash, e);
                    crate::metrics::record_backend_log_failure();
                }

                // Fetch history before retiring so the transfer never drops out of view
                let _ = self.read.refresh_history().await;

                self.tracker.remove(hash).await;
                for superseded in self.tracker.remove_superseded(nonce, hash).await {
                    debug!(
                        "Retired {:?}, nonce {} taken by {:?}",
                        superseded.hash, nonce, hash
                    );
                }

                self.read.refresh_balances().await;
            }
            SettlementState::Failed { reason } => {
                self.fail(hash, reason.clone()).await;
                // Gas was still spent
                self.read.refresh_balances().await;
            }
            SettlementState::Dropped => {
                self.fail(hash, "not mined before the settlement timeout".to_string())
                    .await;
            }
            SettlementState::Replaced => {
                if self.tracker.remove(hash).await.is_some() {
                    debug!("Transfer {:?} replaced at nonce {}", hash, nonce);
                }
            }
            SettlementState::Submitted => {
                warn!("Watcher for {:?} returned without settling", hash);
            }
        }

        // The submitter may have stopped waiting
        let _ = done.send(state);
    }

    async fn fail(&self, hash: H256, reason: String) {
        if self.tracker.remove(hash).await.is_none() {
            return;
        }
        warn!("Transfer {:?} failed: {}", hash, reason);
        let _ = self
            .read
            .events
            .send(WalletEvent::TransferFailed { hash, reason });
    }
}

/// Everything the UI needs for one unlocked wallet
pub struct WalletClient {
    session: WalletSession,
    ledger: Arc<dyn LedgerClient>,
    tokens: Arc<TokenRegistry>,
    tracker: Arc<PendingTransactionTracker>,
    read: Arc<ReadModel>,
    submitter: TransactionSubmitter,
    fees: FeeEstimator,
    events: broadcast::Sender<WalletEvent>,
    /// Present when the session is persisted between runs
    storage: Option<SessionStorage>,
    coordinator: JoinHandle<()>,
}

impl WalletClient {
    /// Start a wallet for an unlocked session and load balances and history
    pub async fn open(
        settings: &Settings,
        services: WalletServices,
        session: WalletSession,
        storage: Option<SessionStorage>,
    ) -> WalletResult<Self> {
        let WalletServices { node, ledger } = services;
        let address = session.address();
        let tokens = Arc::new(TokenRegistry::new(&settings.tokens)?);
        let gas = GasEstimator::from_config(&settings.wallet);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (outcomes, outcome_rx) = mpsc::channel(OUTCOME_CAPACITY);

        let tracker = Arc::new(PendingTransactionTracker::new());
        let read = Arc::new(ReadModel {
            address,
            ledger: ledger.clone(),
            history: HistoryCache::new(),
            balances: BalanceAggregator::new(
                node.clone(),
                tokens.clone(),
                settings.node.native_symbol.clone(),
            ),
            events: events.clone(),
        });

        let watcher = Arc::new(SettlementWatcher::new(
            node.clone(),
            settings.node.confirmation_blocks,
            settings.poll_interval(),
            settings.settlement_timeout(),
        ));
        let submitter = TransactionSubmitter::new(
            node.clone(),
            tokens.clone(),
            session.clone(),
            gas.clone(),
            tracker.clone(),
            watcher,
            outcomes,
            events.clone(),
            settings.node.native_symbol.clone(),
            settings.wallet.replacement_bump_percent,
        );
        let fees = FeeEstimator::new(node, tokens.clone(), gas, settings.fee_debounce());

        let coordinator = tokio::spawn(
            SettlementCoordinator {
                tracker: tracker.clone(),
                read: read.clone(),
            }
            .run(outcome_rx),
        );

        let wallet = Self {
            session,
            ledger,
            tokens,
            tracker,
            read,
            submitter,
            fees,
            events,
            storage,
            coordinator,
        };

        info!(
            "Wallet {} opened for {:?}",
            wallet.session.name(),
            address
        );
        if let Err(e) = wallet.refresh().await {
            debug!("Initial refresh incomplete: {}", e);
        }
        Ok(wallet)
    }

    /// Unlock against the backend and persist the resulting session
    pub async fn unlock(
        settings: &Settings,
        services: WalletServices,
        name: &str,
        password: &str,
    ) -> WalletResult<Self> {
        let unlocked = services.ledger.unlock(name, password).await?;
        let session = WalletSession::from_unlocked(&unlocked)?;

        let storage = SessionStorage::new(&settings.wallet.storage_dir);
        storage.save(&session)?;

        Self::open(settings, services, session, Some(storage)).await
    }

    /// Reopen the session persisted by a previous unlock, if there is one
    pub async fn restore(
        settings: &Settings,
        services: WalletServices,
    ) -> WalletResult<Option<Self>> {
        let storage = SessionStorage::new(&settings.wallet.storage_dir);
        let Some(session) = storage.restore()? else {
            return Ok(None);
        };

        info!("Restored session for {:?}", session.address());
        Ok(Some(
            Self::open(settings, services, session, Some(storage)).await?,
        ))
    }

    pub fn session(&self) -> &WalletSession {
        &self.session
    }

    pub fn address(&self) -> Address {
        self.session.address()
    }

    pub fn tokens(&self) -> &[TrackedToken] {
        self.tokens.tracked()
    }

    pub fn token(&self, symbol: &str) -> Option<TrackedToken> {
        self.tokens.by_symbol(symbol).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    /// Sign and broadcast a transfer
    pub async fn send(&self, request: &TransferRequest) -> WalletResult<SubmissionHandle> {
        self.submitter.submit(request).await
    }

    /// Replace a pending transfer with a zero-value self-transfer at its nonce
    pub async fn cancel(&self, hash: H256) -> WalletResult<SubmissionHandle> {
        self.submitter.cancel(hash).await
    }

    /// Recompute the fee for the draft being edited
    pub fn update_draft(&self, draft: &TransferRequest) {
        self.fees.schedule(draft, self.address());
    }

    pub fn clear_draft(&self) {
        self.fees.reset();
    }

    pub fn fee_estimate(&self) -> FeeState {
        self.fees.current()
    }

    pub fn subscribe_fees(&self) -> watch::Receiver<FeeState> {
        self.fees.subscribe()
    }

    pub async fn refresh_balances(&self) -> BalanceRefresh {
        self.read.refresh_balances().await
    }

    /// Fetch confirmed history; `Ok(false)` means a newer fetch already landed
    pub async fn refresh_history(&self) -> WalletResult<bool> {
        self.read.refresh_history().await
    }

    /// Refresh balances and history together
    pub async fn refresh(&self) -> WalletResult<()> {
        let (_, history) = tokio::join!(self.refresh_balances(), self.refresh_history());
        history.map(|_| ())
    }

    pub async fn balances(&self) -> BalanceSnapshot {
        self.read.balances.snapshot().await
    }

    pub async fn pending(&self) -> Vec<PendingTransfer> {
        self.tracker.snapshot().await
    }

    /// Pending and confirmed transfers merged for display
    pub async fn history(&self) -> Vec<DisplayedTransfer> {
        let pending = self.tracker.snapshot().await;
        let confirmed = self.read.history.records().await;
        HistoryReconciler::reconcile(&pending, &confirmed)
    }

    pub async fn contacts(&self) -> WalletResult<Vec<Contact>> {
        self.ledger.fetch_contacts(self.address()).await
    }

    pub async fn add_contact(&self, name: &str, address: &str) -> WalletResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WalletError::InvalidInput(
                "Contact name is required".to_string(),
            ));
        }
        let address = parse_address(address)?;
        self.ledger.add_contact(self.address(), name, address).await
    }

    pub async fn delete_contact(&self, id: &str) -> WalletResult<()> {
        self.ledger.delete_contact(id).await
    }

    /// End the session: stop background work, drop cached state and forget the
    /// persisted session
    pub async fn lock(self) -> WalletResult<()> {
        self.submitter.abort_watchers();
        self.coordinator.abort();
        self.fees.reset();

        self.tracker.clear().await;
        self.read.history.clear().await;
        self.read.balances.clear().await;

        if let Some(storage) = &self.storage {
            storage.clear()?;
        }

        info!("Wallet {} locked", self.session.name());
        Ok(())
    }
}

impl Drop for WalletClient {
    fn drop(&mut self) {
        self.coordinator.abort();
    }
}
