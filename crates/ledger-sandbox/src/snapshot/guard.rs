//! Scoped snapshot ownership for the simulation path.

use crate::domain::value_objects::{Address, Bytes, Hash, StorageKey, StorageValue, U256};
use crate::errors::StateError;
use crate::ports::outbound::{Checkpoint, ExecutionState};
use crate::snapshot::tracking::{SnapshotId, TrackingSnapshot};

/// Owns a [`TrackingSnapshot`] and rolls it back when dropped.
///
/// The guard exposes state access but no commit, so anything holding a guard
/// cannot persist writes. Rollback runs on normal return, on `?` early
/// return and while unwinding from a panic.
#[derive(Debug)]
pub struct RollbackGuard {
    snapshot: TrackingSnapshot,
}

impl RollbackGuard {
    /// Takes ownership of `snapshot`.
    #[must_use]
    pub fn new(snapshot: TrackingSnapshot) -> Self {
        Self { snapshot }
    }

    /// Correlation id of the guarded snapshot.
    #[must_use]
    pub fn id(&self) -> SnapshotId {
        self.snapshot.id()
    }

    /// Root the snapshot forked from.
    #[must_use]
    pub fn base_root(&self) -> Hash {
        self.snapshot.base_root()
    }

    /// Accounts with pending writes.
    #[must_use]
    pub fn pending_accounts(&self) -> usize {
        self.snapshot.pending_accounts()
    }

    /// Rolls back now instead of at scope end.
    pub fn release(mut self) {
        self.snapshot.rollback();
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        self.snapshot.rollback();
    }
}

impl ExecutionState for RollbackGuard {
    fn balance(&self, address: &Address) -> Result<U256, StateError> {
        self.snapshot.balance(address)
    }

    fn nonce(&self, address: &Address) -> Result<u64, StateError> {
        self.snapshot.nonce(address)
    }

    fn code(&self, address: &Address) -> Result<Bytes, StateError> {
        self.snapshot.code(address)
    }

    fn storage(&self, address: &Address, key: &StorageKey) -> Result<StorageValue, StateError> {
        self.snapshot.storage(address, key)
    }

    fn exists(&self, address: &Address) -> Result<bool, StateError> {
        self.snapshot.exists(address)
    }

    fn set_balance(&mut self, address: &Address, balance: U256) -> Result<(), StateError> {
        self.snapshot.set_balance(address, balance)
    }

    fn set_nonce(&mut self, address: &Address, nonce: u64) -> Result<(), StateError> {
        self.snapshot.set_nonce(address, nonce)
    }

    fn set_storage(
        &mut self,
        address: &Address,
        key: StorageKey,
        value: StorageValue,
    ) -> Result<(), StateError> {
        self.snapshot.set_storage(address, key, value)
    }

    fn checkpoint(&mut self) -> Checkpoint {
        self.snapshot.checkpoint()
    }

    fn revert_to(&mut self, checkpoint: Checkpoint) {
        self.snapshot.revert_to(checkpoint);
    }
}
