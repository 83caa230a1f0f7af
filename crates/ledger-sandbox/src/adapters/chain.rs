//! # In-Memory Chain
//!
//! Reference ledger engine behind the outbound ports.
//!
//! - `WorldState`: immutable account map pinned to one root.
//! - `StateStore`: roots → `Arc<WorldState>`, with FIFO pruning.
//! - `InMemoryChain`: block index, pending pool, gas price oracle, event
//!   fan-out, and `mine_block`, the only path that commits state.

use crate::config::BackendConfig;
use crate::domain::entities::{
    Account, BlockContext, ChangeSet, TransactionReceipt, TransactionRequest, TransactionStatus,
};
use crate::domain::services::keccak256;
use crate::domain::value_objects::{
    u256_to_word, Address, Bytes, Hash, StorageKey, StorageValue, U256,
};
use crate::errors::{BackendError, PoolError, StateError};
use crate::events::{ChainEvent, EVENT_CHANNEL_CAPACITY};
use crate::evm::EvmEngine;
use crate::execution::EngineAdapter;
use crate::ports::outbound::{
    ChainReader, EventSource, ExecutionEngine, ExecutionState, GasPriceOracle, StateRepository,
    StateView, TransactionPool,
};
use crate::signer::recover_signer;
use crate::snapshot::SnapshotManager;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, trace, warn};

// =============================================================================
// WORLD STATE
// =============================================================================

/// Immutable account state at one root.
#[derive(Debug, Clone)]
pub struct WorldState {
    root: Hash,
    accounts: BTreeMap<Address, Account>,
}

impl WorldState {
    /// Builds a state and computes its root.
    #[must_use]
    pub fn from_accounts(accounts: BTreeMap<Address, Account>) -> Self {
        let root = compute_state_root(&accounts);
        Self { root, accounts }
    }

    /// All accounts, ordered by address.
    #[must_use]
    pub fn accounts(&self) -> &BTreeMap<Address, Account> {
        &self.accounts
    }

    /// New state with `changes` applied on top of this one.
    #[must_use]
    pub fn apply(&self, changes: ChangeSet) -> Self {
        let mut accounts = self.accounts.clone();
        for (address, change) in changes.accounts {
            let account = accounts.entry(address).or_default();
            if let Some(balance) = change.balance {
                account.balance = balance;
            }
            if let Some(nonce) = change.nonce {
                account.nonce = nonce;
            }
            for (key, value) in change.storage {
                if value.is_zero() {
                    account.storage.remove(&key);
                } else {
                    account.storage.insert(key, value);
                }
            }
        }
        Self::from_accounts(accounts)
    }
}

impl StateView for WorldState {
    fn state_root(&self) -> Hash {
        self.root
    }

    fn balance_of(&self, address: &Address) -> Result<U256, StateError> {
        Ok(self
            .accounts
            .get(address)
            .map_or_else(U256::zero, |a| a.balance))
    }

    fn nonce_of(&self, address: &Address) -> Result<u64, StateError> {
        Ok(self.accounts.get(address).map_or(0, |a| a.nonce))
    }

    fn code_of(&self, address: &Address) -> Result<Bytes, StateError> {
        Ok(self
            .accounts
            .get(address)
            .map(|a| a.code.clone())
            .unwrap_or_default())
    }

    fn storage_at(&self, address: &Address, key: &StorageKey) -> Result<StorageValue, StateError> {
        Ok(self
            .accounts
            .get(address)
            .and_then(|a| a.storage.get(key).copied())
            .unwrap_or_default())
    }

    fn exists(&self, address: &Address) -> Result<bool, StateError> {
        Ok(self.accounts.contains_key(address))
    }
}

/// Keccak over the canonical (address-ordered) account encoding.
fn compute_state_root(accounts: &BTreeMap<Address, Account>) -> Hash {
    let mut buf = Vec::with_capacity(accounts.len() * 128);
    for (address, account) in accounts {
        buf.extend_from_slice(&address.0);
        buf.extend_from_slice(&u256_to_word(account.balance));
        buf.extend_from_slice(&account.nonce.to_be_bytes());
        buf.extend_from_slice(&keccak256(account.code.as_slice()).0);
        buf.extend_from_slice(&(account.storage.len() as u64).to_be_bytes());
        for (key, value) in &account.storage {
            buf.extend_from_slice(&key.0);
            buf.extend_from_slice(&value.0);
        }
    }
    keccak256(&buf)
}

// =============================================================================
// STATE STORE
// =============================================================================

#[derive(Default)]
struct StoreInner {
    states: HashMap<Hash, Arc<WorldState>>,
    order: VecDeque<Hash>,
    pruned: HashSet<Hash>,
}

/// Versioned state keyed by root. Keeps the most recent `history_limit`
/// roots; older ones become `Unavailable`.
pub struct StateStore {
    inner: RwLock<StoreInner>,
    history_limit: usize,
}

impl StateStore {
    /// Empty store retaining `history_limit` roots (at least one).
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            history_limit: history_limit.max(1),
        }
    }

    /// Inserts an initial state and returns its root.
    pub fn insert_genesis(&self, accounts: BTreeMap<Address, Account>) -> Hash {
        self.insert(WorldState::from_accounts(accounts))
    }

    /// Number of retained roots.
    #[must_use]
    pub fn retained(&self) -> usize {
        self.inner.read().states.len()
    }

    fn insert(&self, state: WorldState) -> Hash {
        let root = state.root;
        let mut inner = self.inner.write();
        if inner.states.contains_key(&root) {
            return root;
        }
        inner.pruned.remove(&root);
        inner.states.insert(root, Arc::new(state));
        inner.order.push_back(root);

        while inner.order.len() > self.history_limit {
            if let Some(oldest) = inner.order.pop_front() {
                inner.states.remove(&oldest);
                inner.pruned.insert(oldest);
                debug!(root = ?oldest, "state root pruned");
            }
        }
        root
    }

    fn world_at(&self, root: &Hash) -> Result<Arc<WorldState>, StateError> {
        let inner = self.inner.read();
        if let Some(state) = inner.states.get(root) {
            return Ok(Arc::clone(state));
        }
        if inner.pruned.contains(root) {
            Err(StateError::Unavailable { root: *root })
        } else {
            Err(StateError::InvalidRoot { root: *root })
        }
    }
}

impl StateRepository for StateStore {
    fn view_at(&self, root: &Hash) -> Result<Arc<dyn StateView>, StateError> {
        let world: Arc<dyn StateView> = self.world_at(root)?;
        Ok(world)
    }

    fn apply(&self, parent: &Hash, changes: ChangeSet) -> Result<Hash, StateError> {
        let next = self.world_at(parent)?.apply(changes);
        Ok(self.insert(next))
    }
}

// =============================================================================
// GENESIS
// =============================================================================

/// Initial allocation of the chain.
#[derive(Debug, Clone, Default)]
pub struct Genesis {
    /// Pre-funded and pre-deployed accounts.
    pub accounts: BTreeMap<Address, Account>,
    /// Timestamp of block 0.
    pub timestamp: u64,
}

impl Genesis {
    /// Empty genesis.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an account.
    #[must_use]
    pub fn with_account(mut self, address: Address, account: Account) -> Self {
        self.accounts.insert(address, account);
        self
    }
}

// =============================================================================
// PENDING POOL
// =============================================================================

struct PendingPool {
    queue: VecDeque<TransactionRequest>,
    hashes: HashSet<Hash>,
    capacity: usize,
}

impl PendingPool {
    fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            hashes: HashSet::new(),
            capacity,
        }
    }

    /// Takes the queue. Hashes stay known until the block is recorded.
    fn drain(&mut self) -> Vec<TransactionRequest> {
        self.queue.drain(..).collect()
    }

    fn requeue_front(&mut self, txs: Vec<TransactionRequest>) {
        for tx in txs.into_iter().rev() {
            self.hashes.insert(tx.hash());
            self.queue.push_front(tx);
        }
    }

    fn forget<'h>(&mut self, hashes: impl IntoIterator<Item = &'h Hash>) {
        for hash in hashes {
            self.hashes.remove(hash);
        }
    }
}

/// Final statuses for the most recent blocks.
struct StatusLog {
    statuses: HashMap<Hash, TransactionStatus>,
    blocks: VecDeque<Vec<Hash>>,
    history_limit: usize,
}

impl StatusLog {
    fn new(history_limit: usize) -> Self {
        Self {
            statuses: HashMap::new(),
            blocks: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    fn get(&self, tx_hash: &Hash) -> Option<&TransactionStatus> {
        self.statuses.get(tx_hash)
    }

    fn is_included(&self, tx_hash: &Hash) -> bool {
        matches!(self.statuses.get(tx_hash), Some(TransactionStatus::Included(_)))
    }

    /// Records one block's outcomes. An `Included` status is never replaced
    /// by a later drop of the same hash.
    fn record_block(&mut self, receipts: &[TransactionReceipt], dropped: &[(Hash, String)]) {
        let mut hashes = Vec::with_capacity(receipts.len() + dropped.len());
        for receipt in receipts {
            self.statuses
                .insert(receipt.tx_hash, TransactionStatus::Included(receipt.clone()));
            hashes.push(receipt.tx_hash);
        }
        for (tx_hash, reason) in dropped {
            if self.is_included(tx_hash) {
                continue;
            }
            self.statuses.insert(
                *tx_hash,
                TransactionStatus::Dropped {
                    reason: reason.clone(),
                },
            );
            hashes.push(*tx_hash);
        }
        self.blocks.push_back(hashes);

        while self.blocks.len() > self.history_limit {
            if let Some(expired) = self.blocks.pop_front() {
                for tx_hash in &expired {
                    self.statuses.remove(tx_hash);
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.statuses.len()
    }
}

struct BlockIndex {
    genesis: BlockContext,
    blocks: Vec<BlockContext>,
}

impl BlockIndex {
    fn best(&self) -> &BlockContext {
        self.blocks.last().unwrap_or(&self.genesis)
    }

    fn get(&self, number: u64) -> Option<&BlockContext> {
        if number == 0 {
            return Some(&self.genesis);
        }
        self.blocks.get(usize::try_from(number - 1).ok()?)
    }
}

// =============================================================================
// IN-MEMORY CHAIN
// =============================================================================

/// Single-node in-memory ledger engine.
///
/// Submission only queues. State moves forward exclusively through
/// [`InMemoryChain::mine_block`].
pub struct InMemoryChain {
    config: BackendConfig,
    store: Arc<StateStore>,
    snapshots: SnapshotManager,
    adapter: EngineAdapter,
    index: RwLock<BlockIndex>,
    pool: Mutex<PendingPool>,
    statuses: RwLock<StatusLog>,
    gas_price: RwLock<U256>,
    events: broadcast::Sender<ChainEvent>,
    mining: Mutex<()>,
}

impl InMemoryChain {
    /// Chain running the bundled EVM.
    #[must_use]
    pub fn new(config: &BackendConfig, genesis: Genesis) -> Self {
        let engine = Arc::new(EvmEngine::new(config.max_execution_steps));
        Self::with_engine(config, genesis, engine)
    }

    /// Chain running a caller-supplied engine.
    #[must_use]
    pub fn with_engine(
        config: &BackendConfig,
        genesis: Genesis,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        let store = Arc::new(StateStore::new(config.state_history_limit));
        let genesis_root = store.insert_genesis(genesis.accounts);
        let genesis_block = BlockContext {
            number: 0,
            hash: Hash::ZERO,
            parent_hash: Hash::ZERO,
            coinbase: config.coinbase,
            state_root: genesis_root,
            gas_limit: config.block_gas_limit,
            timestamp: genesis.timestamp,
            chain_id: config.chain_id,
        }
        .seal(&[]);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            chain_id = config.chain_id,
            genesis_root = ?genesis_root,
            "in-memory chain initialized"
        );

        Self {
            config: config.clone(),
            snapshots: SnapshotManager::new(store.clone()),
            store,
            adapter: EngineAdapter::new(engine, config.max_payload_size),
            index: RwLock::new(BlockIndex {
                genesis: genesis_block,
                blocks: Vec::new(),
            }),
            pool: Mutex::new(PendingPool::new(config.pool_capacity)),
            statuses: RwLock::new(StatusLog::new(config.state_history_limit)),
            gas_price: RwLock::new(U256::from(config.default_gas_price)),
            events,
            mining: Mutex::new(()),
        }
    }

    /// Versioned state backing this chain.
    #[must_use]
    pub fn state_store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    /// View of the best block's state.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the head root has been pruned.
    pub fn live_state(&self) -> Result<Arc<dyn StateView>, StateError> {
        let root = self.best_block().state_root;
        self.store.view_at(&root)
    }

    /// Sets the price returned by the gas price oracle.
    pub fn set_gas_price(&self, price: U256) {
        *self.gas_price.write() = price;
    }

    /// Number of transactions with a recorded final status.
    #[must_use]
    pub fn recorded_statuses(&self) -> usize {
        self.statuses.read().len()
    }

    /// Executes the pending pool into a new block and commits it.
    ///
    /// Each transaction is checked for a valid signature, then run with fee
    /// accounting against a single tracking snapshot. A transaction that
    /// aborts is reverted to its checkpoint and dropped. Transactions that
    /// no longer fit the block gas limit stay pending.
    ///
    /// # Errors
    ///
    /// State errors opening or committing the block snapshot. The drained
    /// transactions are back in the pool when this returns an error.
    #[instrument(skip(self))]
    pub fn mine_block(&self) -> Result<BlockContext, BackendError> {
        let _mining = self.mining.lock();
        let parent = self.best_block();
        let mut snapshot = self.snapshots.open_tracking(&parent.state_root)?;
        let pending = self.pool.lock().drain();

        let header = BlockContext {
            number: parent.number + 1,
            hash: Hash::ZERO,
            parent_hash: parent.hash,
            coinbase: self.config.coinbase,
            state_root: parent.state_root,
            gas_limit: self.config.block_gas_limit,
            timestamp: next_timestamp(parent.timestamp),
            chain_id: self.config.chain_id,
        };

        let mut included = Vec::new();
        let mut receipts = Vec::new();
        let mut dropped = Vec::new();
        let mut deferred = Vec::new();
        let mut block_gas = 0u64;

        for tx in &pending {
            let tx_hash = tx.hash();

            if let Err(reason) = verify_sender(tx) {
                dropped.push((tx_hash, reason));
                continue;
            }
            if block_gas.saturating_add(tx.gas_limit) > header.gas_limit
                && tx.gas_limit <= header.gas_limit
            {
                deferred.push(tx.clone());
                continue;
            }

            let checkpoint = snapshot.checkpoint();
            match self.adapter.run(tx, &mut snapshot, &header, false) {
                Ok(outcome) => {
                    block_gas += outcome.gas_used;
                    included.push(tx_hash);
                    receipts.push(TransactionReceipt {
                        tx_hash,
                        block_number: header.number,
                        success: outcome.success,
                        gas_used: outcome.gas_used,
                        revert_reason: outcome.revert_reason,
                    });
                }
                Err(err) => {
                    snapshot.revert_to(checkpoint);
                    dropped.push((tx_hash, err.to_string()));
                }
            }
        }

        let state_root = match snapshot.commit() {
            Ok(root) => root,
            Err(err) => {
                warn!(error = %err, pending = pending.len(), "block commit failed, requeueing");
                self.pool.lock().requeue_front(pending);
                return Err(err.into());
            }
        };
        let block = BlockContext {
            state_root,
            ..header
        }
        .seal(&included);

        if !deferred.is_empty() {
            self.pool.lock().requeue_front(deferred);
        }
        self.index.write().blocks.push(block.clone());
        self.record(&block, receipts, dropped);
        Ok(block)
    }

    fn record(
        &self,
        block: &BlockContext,
        receipts: Vec<TransactionReceipt>,
        dropped: Vec<(Hash, String)>,
    ) {
        let included = receipts.len();
        self.statuses.write().record_block(&receipts, &dropped);
        self.pool.lock().forget(
            receipts
                .iter()
                .map(|r| &r.tx_hash)
                .chain(dropped.iter().map(|(tx_hash, _)| tx_hash)),
        );

        for (tx_hash, reason) in dropped {
            warn!(tx_hash = ?tx_hash, reason = %reason, "transaction dropped");
            self.publish(ChainEvent::TransactionDropped { tx_hash, reason });
        }
        for receipt in receipts {
            self.publish(ChainEvent::TransactionIncluded { receipt });
        }
        self.publish(ChainEvent::BlockImported {
            number: block.number,
            hash: block.hash,
            state_root: block.state_root,
            transaction_count: included,
        });

        info!(
            number = block.number,
            hash = ?block.hash,
            state_root = ?block.state_root,
            transactions = included,
            "block imported"
        );
    }

    fn publish(&self, event: ChainEvent) {
        let kind = event.kind();
        if self.events.send(event).is_err() {
            trace!(kind, "no event subscribers");
        }
    }
}

fn verify_sender(tx: &TransactionRequest) -> Result<(), String> {
    let recovered =
        recover_signer(&tx.signing_hash(), &tx.signature).map_err(|e| e.to_string())?;
    if recovered == tx.sender {
        Ok(())
    } else {
        Err(format!(
            "invalid signature: recovered {recovered:?}, expected {:?}",
            tx.sender
        ))
    }
}

fn next_timestamp(parent: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    now.max(parent + 1)
}

impl StateRepository for InMemoryChain {
    fn view_at(&self, root: &Hash) -> Result<Arc<dyn StateView>, StateError> {
        self.store.view_at(root)
    }

    fn apply(&self, parent: &Hash, changes: ChangeSet) -> Result<Hash, StateError> {
        self.store.apply(parent, changes)
    }
}

impl ChainReader for InMemoryChain {
    fn best_block(&self) -> BlockContext {
        self.index.read().best().clone()
    }

    fn block_by_number(&self, number: u64) -> Option<BlockContext> {
        self.index.read().get(number).cloned()
    }
}

impl TransactionPool for InMemoryChain {
    fn submit_transaction(&self, tx: TransactionRequest) -> Result<Hash, PoolError> {
        let tx_hash = tx.hash();
        let sender = tx.sender;
        if self.statuses.read().is_included(&tx_hash) {
            return Err(PoolError::AlreadyKnown(tx_hash));
        }
        {
            let mut pool = self.pool.lock();
            if pool.hashes.contains(&tx_hash) {
                return Err(PoolError::AlreadyKnown(tx_hash));
            }
            if pool.queue.len() >= pool.capacity {
                return Err(PoolError::PoolFull {
                    capacity: pool.capacity,
                });
            }
            pool.hashes.insert(tx_hash);
            pool.queue.push_back(tx);
        }
        debug!(tx_hash = ?tx_hash, sender = ?sender, "transaction queued");
        self.publish(ChainEvent::TransactionSubmitted { tx_hash, sender });
        Ok(tx_hash)
    }

    fn pending_count(&self) -> usize {
        self.pool.lock().queue.len()
    }

    fn transaction_status(&self, tx_hash: &Hash) -> TransactionStatus {
        if self.pool.lock().hashes.contains(tx_hash) {
            return TransactionStatus::Pending;
        }
        self.statuses
            .read()
            .get(tx_hash)
            .cloned()
            .unwrap_or(TransactionStatus::Unknown)
    }
}

impl GasPriceOracle for InMemoryChain {
    fn gas_price(&self) -> U256 {
        *self.gas_price.read()
    }
}

impl EventSource for InMemoryChain {
    fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }
}

// =============================================================================
// TESTS
// =============================================================================
