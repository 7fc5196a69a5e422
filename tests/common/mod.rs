//! In-memory node and backend used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use custodial_wallet::backend::{ConfirmedTransferRecord, Contact, LedgerClient, UnlockedWallet};
use custodial_wallet::chain::{erc20, GasPrice, NodeClient};
use custodial_wallet::session::WalletSession;
use custodial_wallet::wallet::{WalletClient, WalletServices};
use custodial_wallet::{Settings, WalletError, WalletResult};
use ethers::abi::{self, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use ethers::utils::keccak256;
use ethers::utils::rlp::Rlp;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const TEST_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const RECIPIENT: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
pub const USDT: &str = "0x787A697324dbA4AB965C58CD33c13ff5eeA6295F";
pub const USDC: &str = "0x342e3aA1248AB77E319e3331C6fD3f1F2d4B36B1";

pub const GAS_PRICE_WEI: u64 = 5_000_000_000;

pub fn address(s: &str) -> Address {
    s.parse().unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn settings(storage_dir: &std::path::Path) -> Settings {
    Settings::from_toml(&format!(
        r#"
        [node]
        chain_id = 97
        rpc_urls = ["http://127.0.0.1:8545"]
        native_symbol = "BNB"
        poll_interval_ms = 10
        settlement_timeout_secs = 5

        [backend]
        api_url = "http://localhost:5001/api"

        [wallet]
        storage_dir = "{}"

        [[tokens]]
        symbol = "USDT"
        contract_address = "{}"

        [[tokens]]
        symbol = "USDC"
        contract_address = "{}"
        "#,
        storage_dir.display(),
        USDT,
        USDC
    ))
    .unwrap()
}

/// A transaction the node accepted
#[derive(Debug, Clone)]
pub struct SentTx {
    pub hash: H256,
    pub tx: TypedTransaction,
}

#[derive(Default)]
struct NodeState {
    balances: HashMap<Address, U256>,
    token_balances: HashMap<(Address, Address), U256>,
    token_decimals: HashMap<Address, u8>,
    failing_tokens: HashSet<Address>,
    next_nonce: U256,
    mined_nonce: U256,
    block_number: u64,
    sent: Vec<SentTx>,
    receipts: HashMap<H256, TransactionReceipt>,
    reject_sends: Option<String>,
    estimate_calls: usize,
    last_estimate: Option<TypedTransaction>,
    network_calls: usize,
}

/// Single-account node: every nonce belongs to the session address
pub struct MockNode {
    state: Mutex<NodeState>,
}

impl MockNode {
    pub fn new() -> Self {
        let mut state = NodeState {
            block_number: 100,
            ..Default::default()
        };
        state.token_decimals.insert(address(USDT), 6);
        state.token_decimals.insert(address(USDC), 6);
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn set_balance(&self, owner: Address, wei: U256) {
        self.state.lock().unwrap().balances.insert(owner, wei);
    }

    pub fn set_token_balance(&self, token: Address, owner: Address, raw: U256) {
        self.state
            .lock()
            .unwrap()
            .token_balances
            .insert((token, owner), raw);
    }

    pub fn fail_token(&self, token: Address) {
        self.state.lock().unwrap().failing_tokens.insert(token);
    }

    pub fn reject_sends(&self, message: &str) {
        self.state.lock().unwrap().reject_sends = Some(message.to_string());
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn estimate_calls(&self) -> usize {
        self.state.lock().unwrap().estimate_calls
    }

    pub fn last_estimate(&self) -> Option<TypedTransaction> {
        self.state.lock().unwrap().last_estimate.clone()
    }

    pub fn network_calls(&self) -> usize {
        self.state.lock().unwrap().network_calls
    }

    /// Mine `hash` in the next block
    pub fn mine(&self, hash: H256, success: bool) {
        let mut state = self.state.lock().unwrap();
        let nonce = state
            .sent
            .iter()
            .find(|s| s.hash == hash)
            .and_then(|s| s.tx.nonce().copied())
            .expect("mined transaction was never sent");

        state.block_number += 1;
        let receipt = TransactionReceipt {
            transaction_hash: hash,
            status: Some(U64::from(if success { 1 } else { 0 })),
            block_number: Some(U64::from(state.block_number)),
            ..Default::default()
        };
        state.receipts.insert(hash, receipt);
        if nonce + 1 > state.mined_nonce {
            state.mined_nonce = nonce + 1;
        }
    }

    /// Forget every unmined transaction, as a node does when its mempool evicts them
    pub fn evict_pending(&self) {
        let mut state = self.state.lock().unwrap();
        state.next_nonce = state.mined_nonce;
    }

    fn touch(&self) -> std::sync::MutexGuard<'_, NodeState> {
        let mut state = self.state.lock().unwrap();
        state.network_calls += 1;
        state
    }
}

fn selector(data: &[u8]) -> &[u8] {
    &data[..data.len().min(4)]
}

#[async_trait]
impl NodeClient for MockNode {
    fn chain_id(&self) -> u64 {
        97
    }

    async fn get_balance(&self, owner: Address) -> WalletResult<U256> {
        Ok(self
            .touch()
            .balances
            .get(&owner)
            .copied()
            .unwrap_or_default())
    }

    async fn get_gas_price(&self) -> WalletResult<GasPrice> {
        self.touch();
        Ok(GasPrice::Legacy(U256::from(GAS_PRICE_WEI)))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> WalletResult<U256> {
        let mut state = self.touch();
        state.estimate_calls += 1;
        state.last_estimate = Some(tx.clone());
        let is_call = tx.data().map(|d| !d.is_empty()).unwrap_or(false);
        Ok(U256::from(if is_call { 52_000 } else { 21_000 }))
    }

    async fn call(&self, tx: &TypedTransaction) -> WalletResult<Bytes> {
        let state = self.touch();
        let token = tx.to_addr().copied().unwrap_or_default();
        if state.failing_tokens.contains(&token) {
            return Err(WalletError::Contract("execution reverted".to_string()));
        }

        let data = tx.data().cloned().unwrap_or_default();
        if selector(&data) == selector(&erc20::encode_decimals()) {
            let decimals = state.token_decimals.get(&token).copied().unwrap_or(18);
            return Ok(abi::encode(&[Token::Uint(U256::from(decimals))]).into());
        }

        if data.len() != 36 {
            return Err(WalletError::Contract("unknown selector".to_string()));
        }
        let owner = Address::from_slice(&data[16..36]);
        if data == erc20::encode_balance_of(owner) {
            let balance = state
                .token_balances
                .get(&(token, owner))
                .copied()
                .unwrap_or_default();
            return Ok(abi::encode(&[Token::Uint(balance)]).into());
        }

        Err(WalletError::Contract("unknown selector".to_string()))
    }

    async fn get_pending_nonce(&self, _address: Address) -> WalletResult<U256> {
        let state = self.touch();
        Ok(state.next_nonce.max(state.mined_nonce))
    }

    async fn get_confirmed_nonce(&self, _address: Address) -> WalletResult<U256> {
        Ok(self.touch().mined_nonce)
    }

    async fn get_block_number(&self) -> WalletResult<u64> {
        Ok(self.touch().block_number)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> WalletResult<H256> {
        let mut state = self.touch();
        if let Some(message) = &state.reject_sends {
            return Err(WalletError::SubmissionRejected(message.clone()));
        }

        let (tx, _signature) = TypedTransaction::decode_signed(&Rlp::new(raw.as_ref()))
            .map_err(|e| WalletError::SubmissionRejected(e.to_string()))?;
        let hash = H256::from(keccak256(raw.as_ref()));
        if let Some(nonce) = tx.nonce() {
            if *nonce + 1 > state.next_nonce {
                state.next_nonce = *nonce + 1;
            }
        }
        state.sent.push(SentTx { hash, tx });
        Ok(hash)
    }

    async fn get_transaction_receipt(&self, hash: H256) -> WalletResult<Option<TransactionReceipt>> {
        Ok(self.touch().receipts.get(&hash).cloned())
    }
}

#[derive(Default)]
struct LedgerState {
    history: Vec<ConfirmedTransferRecord>,
    logged: Vec<H256>,
    history_fetches: usize,
    fail_logging: bool,
    contacts: Vec<Contact>,
    unlocked: Option<UnlockedWallet>,
}

/// Backend holding history and contacts in memory
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_record(&self, record: ConfirmedTransferRecord) {
        self.state.lock().unwrap().history.push(record);
    }

    pub fn fail_logging(&self) {
        self.state.lock().unwrap().fail_logging = true;
    }

    pub fn logged(&self) -> Vec<H256> {
        self.state.lock().unwrap().logged.clone()
    }

    pub fn history_fetches(&self) -> usize {
        self.state.lock().unwrap().history_fetches
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.state.lock().unwrap().contacts.clone()
    }

    pub fn allow_unlock(&self, name: &str) {
        self.state.lock().unwrap().unlocked = Some(UnlockedWallet {
            name: name.to_string(),
            address: address(TEST_ADDRESS),
            private_key: format!("0x{}", TEST_KEY),
        });
    }
}

pub fn record(hash: H256, from: Address, to: Address, amount: &str, secs: i64) -> ConfirmedTransferRecord {
    ConfirmedTransferRecord {
        hash,
        from_address: from,
        to_address: to,
        amount: amount.to_string(),
        asset_symbol: "BNB".to_string(),
        timestamp: at(secs),
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn fetch_history(&self, _address: Address) -> WalletResult<Vec<ConfirmedTransferRecord>> {
        let mut state = self.state.lock().unwrap();
        state.history_fetches += 1;
        Ok(state.history.clone())
    }

    async fn log_transaction(&self, hash: H256) -> WalletResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_logging {
            return Err(WalletError::Backend {
                status: 500,
                message: "database unavailable".to_string(),
            });
        }
        state.logged.push(hash);
        Ok(())
    }

    async fn unlock(&self, name: &str, password: &str) -> WalletResult<UnlockedWallet> {
        let state = self.state.lock().unwrap();
        match &state.unlocked {
            Some(wallet) if wallet.name == name && password == "correct horse" => Ok(wallet.clone()),
            _ => Err(WalletError::Backend {
                status: 401,
                message: "Invalid credentials".to_string(),
            }),
        }
    }

    async fn fetch_contacts(&self, _owner: Address) -> WalletResult<Vec<Contact>> {
        Ok(self.state.lock().unwrap().contacts.clone())
    }

    async fn add_contact(&self, _owner: Address, name: &str, address: Address) -> WalletResult<()> {
        let mut state = self.state.lock().unwrap();
        let id = format!("contact-{}", state.contacts.len() + 1);
        state.contacts.push(Contact {
            id,
            name: name.to_string(),
            address,
        });
        Ok(())
    }

    async fn delete_contact(&self, id: &str) -> WalletResult<()> {
        self.state.lock().unwrap().contacts.retain(|c| c.id != id);
        Ok(())
    }
}

/// An open wallet plus handles on its fake services
pub struct Harness {
    pub wallet: WalletClient,
    pub node: Arc<MockNode>,
    pub ledger: Arc<MockLedger>,
    pub settings: Settings,
    pub dir: TempDir,
}

impl Harness {
    pub fn services(&self) -> WalletServices {
        WalletServices::new(self.node.clone(), self.ledger.clone())
    }
}

/// Open a wallet after letting the caller seed the fake services
pub async fn open_wallet(seed: impl FnOnce(&MockNode, &MockLedger)) -> Harness {
    let node = Arc::new(MockNode::new());
    let ledger = Arc::new(MockLedger::new());
    seed(&node, &ledger);

    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let session = WalletSession::new("alice", TEST_KEY).unwrap();
    let wallet = WalletClient::open(
        &settings,
        WalletServices::new(node.clone(), ledger.clone()),
        session,
        None,
    )
    .await
    .unwrap();

    Harness {
        wallet,
        node,
        ledger,
        settings,
        dir,
    }
}
