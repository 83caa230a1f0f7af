//! # Outbound Ports
//!
//! What the sandbox needs from the ledger engine it wraps. The in-memory
//! chain and the bundled EVM are one implementation; any engine that can
//! hand out immutable views per root and run one frame against a mutable
//! state can be plugged in instead.

use crate::domain::entities::{
    BlockContext, ChangeSet, Log, TransactionRequest, TransactionStatus,
};
use crate::domain::value_objects::{Address, Bytes, Hash, StorageKey, StorageValue, U256};
use crate::errors::{PoolError, StateError, VmError};
use crate::events::ChainEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

// =============================================================================
// STATE
// =============================================================================

/// Read-only account state at one fixed root.
///
/// Implementations must only touch local storage. Unknown accounts read as
/// empty rather than failing.
pub trait StateView: Send + Sync {
    /// Root this view is pinned to.
    fn state_root(&self) -> Hash;

    /// Balance in wei.
    fn balance_of(&self, address: &Address) -> Result<U256, StateError>;

    /// Account nonce.
    fn nonce_of(&self, address: &Address) -> Result<u64, StateError>;

    /// Contract code, empty for EOAs and unknown accounts.
    fn code_of(&self, address: &Address) -> Result<Bytes, StateError>;

    /// Storage slot value, zero when unset.
    fn storage_at(&self, address: &Address, key: &StorageKey) -> Result<StorageValue, StateError>;

    /// Whether the account exists in this state.
    fn exists(&self, address: &Address) -> Result<bool, StateError>;
}

/// Versioned state store: views per root, and the commit primitive.
pub trait StateRepository: Send + Sync {
    /// Immutable view at `root`.
    ///
    /// # Errors
    ///
    /// `StateError::Unavailable` for pruned roots, `StateError::InvalidRoot`
    /// for roots never seen.
    fn view_at(&self, root: &Hash) -> Result<Arc<dyn StateView>, StateError>;

    /// Applies `changes` on top of `parent` and returns the new root.
    ///
    /// # Errors
    ///
    /// Same as [`StateRepository::view_at`] for `parent`.
    fn apply(&self, parent: &Hash, changes: ChangeSet) -> Result<Hash, StateError>;
}

/// Journal position returned by [`ExecutionState::checkpoint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Checkpoint(pub(crate) usize);

/// Mutable state the engine executes against.
///
/// Every write is journaled so that [`ExecutionState::revert_to`] can undo
/// it. Implemented by tracking snapshots and their rollback guards.
pub trait ExecutionState {
    /// Balance in wei.
    fn balance(&self, address: &Address) -> Result<U256, StateError>;

    /// Account nonce.
    fn nonce(&self, address: &Address) -> Result<u64, StateError>;

    /// Contract code.
    fn code(&self, address: &Address) -> Result<Bytes, StateError>;

    /// Storage slot value.
    fn storage(&self, address: &Address, key: &StorageKey) -> Result<StorageValue, StateError>;

    /// Whether the account exists (in the base or through a pending write).
    fn exists(&self, address: &Address) -> Result<bool, StateError>;

    /// Overwrites a balance.
    fn set_balance(&mut self, address: &Address, balance: U256) -> Result<(), StateError>;

    /// Overwrites a nonce.
    fn set_nonce(&mut self, address: &Address, nonce: u64) -> Result<(), StateError>;

    /// Writes a storage slot.
    fn set_storage(
        &mut self,
        address: &Address,
        key: StorageKey,
        value: StorageValue,
    ) -> Result<(), StateError>;

    /// Marks the current journal position.
    fn checkpoint(&mut self) -> Checkpoint;

    /// Undoes every write recorded after `checkpoint`.
    fn revert_to(&mut self, checkpoint: Checkpoint);

    /// Moves `value` from `from` to `to`. Returns `false`, writing nothing,
    /// when `from` cannot cover it.
    fn transfer(&mut self, from: &Address, to: &Address, value: U256) -> Result<bool, StateError> {
        if value.is_zero() {
            return Ok(true);
        }
        let from_balance = self.balance(from)?;
        if from_balance < value {
            return Ok(false);
        }
        self.set_balance(from, from_balance - value)?;
        let to_balance = self.balance(to)?;
        self.set_balance(to, to_balance.saturating_add(value))?;
        Ok(true)
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// One message call handed to the engine.
#[derive(Clone, Debug)]
pub struct CallFrame {
    /// Transaction origin.
    pub origin: Address,
    /// Immediate caller.
    pub caller: Address,
    /// Account whose code runs.
    pub address: Address,
    /// Wei attached to the call.
    pub value: U256,
    /// Calldata.
    pub input: Bytes,
    /// Code to run.
    pub code: Bytes,
    /// Gas available to the frame.
    pub gas_limit: u64,
    /// Transaction gas price.
    pub gas_price: U256,
    /// Block the frame runs in.
    pub block: BlockContext,
    /// Writes forbidden.
    pub is_static: bool,
}

/// How a frame ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// STOP or RETURN.
    Success,
    /// REVERT; output holds the revert data.
    Revert,
    /// Exceptional halt; all frame gas is consumed.
    Halt(String),
}

/// What the engine reports for a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameOutcome {
    /// How execution ended.
    pub status: FrameStatus,
    /// Return or revert data.
    pub output: Bytes,
    /// Gas consumed by the frame.
    pub gas_used: u64,
    /// Refund accrued (uncapped).
    pub gas_refund: u64,
    /// Logs emitted.
    pub logs: Vec<Log>,
}

/// Bytecode executor.
pub trait ExecutionEngine: Send + Sync {
    /// Runs `frame` against `state`.
    ///
    /// Reverts and halts come back as `Ok` with the matching status.
    ///
    /// # Errors
    ///
    /// Only faults the engine cannot express as an outcome.
    fn execute(
        &self,
        frame: &CallFrame,
        state: &mut dyn ExecutionState,
    ) -> Result<FrameOutcome, VmError>;
}

// =============================================================================
// CHAIN
// =============================================================================

/// Block lookups.
pub trait ChainReader: Send + Sync {
    /// Current head.
    fn best_block(&self) -> BlockContext;

    /// Block at `number`, if any.
    fn block_by_number(&self, number: u64) -> Option<BlockContext>;
}

/// The engine's pending-transaction intake.
pub trait TransactionPool: Send + Sync {
    /// Queues a signed transaction and returns its hash. Does not execute it.
    ///
    /// # Errors
    ///
    /// Pool capacity or duplicate rejections.
    fn submit_transaction(&self, tx: TransactionRequest) -> Result<Hash, PoolError>;

    /// Number of queued transactions.
    fn pending_count(&self) -> usize;

    /// Where a submitted transaction currently stands.
    fn transaction_status(&self, tx_hash: &Hash) -> TransactionStatus;
}

/// Current network gas price.
pub trait GasPriceOracle: Send + Sync {
    /// Price in wei per gas.
    fn gas_price(&self) -> U256;
}

/// Chain event fan-out.
pub trait EventSource: Send + Sync {
    /// New subscription; events published before this call are not replayed.
    fn subscribe(&self) -> broadcast::Receiver<ChainEvent>;
}
