//! # Snapshot Manager
//!
//! Opens isolated, mutation-tracking overlays on top of versioned state.
//!
//! | Operation | Cost | Failure |
//! |-----------|------|---------|
//! | `open_tracking(root)` | O(1), `Arc` clone | `InvalidRoot`, `Unavailable` |
//! | `open_scoped(root)` | O(1) | same |
//! | `TrackingSnapshot::rollback` | O(writes) | none |
//! | `TrackingSnapshot::commit` | O(writes) + repository apply | `AlreadyFinalized` |
//!
//! Concurrent opens against the same root share the immutable base and never
//! block each other.

pub mod guard;
pub mod journal;
pub mod tracking;

pub use guard::RollbackGuard;
pub use journal::JournalEntry;
pub use tracking::{SnapshotId, SnapshotStatus, TrackingSnapshot};

use crate::domain::value_objects::Hash;
use crate::errors::StateError;
use crate::ports::outbound::{StateRepository, StateView};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Factory for tracking snapshots over one repository.
#[derive(Clone)]
pub struct SnapshotManager {
    repository: Arc<dyn StateRepository>,
    open_count: Arc<AtomicUsize>,
}

impl SnapshotManager {
    /// Creates a manager over `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn StateRepository>) -> Self {
        Self {
            repository,
            open_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Immutable view at `root`.
    ///
    /// # Errors
    ///
    /// `InvalidRoot` or `Unavailable`.
    pub fn view_at(&self, root: &Hash) -> Result<Arc<dyn StateView>, StateError> {
        self.repository.view_at(root)
    }

    /// Opens a tracking snapshot. The caller owns both terminal operations.
    ///
    /// # Errors
    ///
    /// `InvalidRoot` or `Unavailable`.
    pub fn open_tracking(&self, root: &Hash) -> Result<TrackingSnapshot, StateError> {
        let base = self.repository.view_at(root)?;
        Ok(TrackingSnapshot::new(
            base,
            Arc::clone(&self.repository),
            Arc::clone(&self.open_count),
        ))
    }

    /// Opens a snapshot that can only be rolled back.
    ///
    /// # Errors
    ///
    /// `InvalidRoot` or `Unavailable`.
    pub fn open_scoped(&self, root: &Hash) -> Result<RollbackGuard, StateError> {
        self.open_tracking(root).map(RollbackGuard::new)
    }

    /// Snapshots opened by this manager and not yet finalized.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("open_count", &self.open_count())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::chain::StateStore;
    use crate::domain::entities::Account;
    use crate::domain::value_objects::{Address, StorageKey, StorageValue, U256};
    use crate::errors::SnapshotError;
    use crate::ports::outbound::ExecutionState;
    use std::collections::BTreeMap;

    fn alice() -> Address {
        Address::from_low_u8(0xa1)
    }

    fn bob() -> Address {
        Address::from_low_u8(0xb0)
    }

    fn setup() -> (Arc<StateStore>, SnapshotManager, Hash) {
        let mut accounts = BTreeMap::new();
        accounts.insert(alice(), Account::with_balance(U256::from(1000)));
        let store = Arc::new(StateStore::new(8));
        let root = store.insert_genesis(accounts);
        let manager = SnapshotManager::new(store.clone());
        (store, manager, root)
    }

    #[test]
    fn test_reads_fall_through_to_base() {
        let (_store, manager, root) = setup();
        let snap = manager.open_tracking(&root).unwrap();
        assert_eq!(snap.balance(&alice()).unwrap(), U256::from(1000));
        assert_eq!(snap.balance(&bob()).unwrap(), U256::zero());
        assert!(snap.exists(&alice()).unwrap());
        assert!(!snap.exists(&bob()).unwrap());
        assert_eq!(snap.base_root(), root);
    }

    #[test]
    fn test_unknown_root_is_invalid() {
        let (_store, manager, _root) = setup();
        let bogus = Hash::new([0xee; 32]);
        assert_eq!(
            manager.open_tracking(&bogus).unwrap_err(),
            StateError::InvalidRoot { root: bogus }
        );
    }

    #[test]
    fn test_rollback_discards_and_is_idempotent() {
        let (store, manager, root) = setup();
        let mut snap = manager.open_tracking(&root).unwrap();
        snap.set_balance(&alice(), U256::from(1)).unwrap();
        snap.set_storage(&bob(), StorageKey::default(), StorageValue::from_u256(U256::one()))
            .unwrap();
        assert_eq!(snap.pending_accounts(), 2);

        snap.rollback();
        snap.rollback();
        assert_eq!(snap.status(), SnapshotStatus::RolledBack);
        assert_eq!(snap.pending_accounts(), 0);
        assert_eq!(manager.open_count(), 0);

        let live = store.view_at(&root).unwrap();
        assert_eq!(live.balance_of(&alice()).unwrap(), U256::from(1000));
    }

    #[test]
    fn test_commit_once_then_already_finalized() {
        let (store, manager, root) = setup();
        let mut snap = manager.open_tracking(&root).unwrap();
        assert!(snap.transfer(&alice(), &bob(), U256::from(300)).unwrap());

        let new_root = snap.commit().unwrap();
        assert_ne!(new_root, root);
        assert_eq!(snap.commit().unwrap_err(), SnapshotError::AlreadyFinalized);
        snap.rollback();
        assert_eq!(snap.status(), SnapshotStatus::Committed { root: new_root });

        let committed = store.view_at(&new_root).unwrap();
        assert_eq!(committed.balance_of(&bob()).unwrap(), U256::from(300));
        assert_eq!(committed.balance_of(&alice()).unwrap(), U256::from(700));
        let original = store.view_at(&root).unwrap();
        assert_eq!(original.balance_of(&alice()).unwrap(), U256::from(1000));
    }

    #[test]
    fn test_commit_after_rollback_fails() {
        let (_store, manager, root) = setup();
        let mut snap = manager.open_tracking(&root).unwrap();
        snap.rollback();
        assert_eq!(snap.commit().unwrap_err(), SnapshotError::AlreadyFinalized);
    }

    #[test]
    fn test_writes_after_finalize_are_rejected() {
        let (_store, manager, root) = setup();
        let mut snap = manager.open_tracking(&root).unwrap();
        snap.rollback();
        assert_eq!(
            snap.set_nonce(&alice(), 9).unwrap_err(),
            StateError::SnapshotFinalized
        );
    }

    #[test]
    fn test_empty_commit_keeps_base_root() {
        let (_store, manager, root) = setup();
        let mut snap = manager.open_tracking(&root).unwrap();
        assert_eq!(snap.commit().unwrap(), root);
    }

    #[test]
    fn test_checkpoint_revert_undoes_nested_writes() {
        let (_store, manager, root) = setup();
        let mut snap = manager.open_tracking(&root).unwrap();
        snap.set_nonce(&alice(), 1).unwrap();
        let cp = snap.checkpoint();
        snap.set_nonce(&alice(), 2).unwrap();
        snap.set_balance(&bob(), U256::from(5)).unwrap();
        snap.revert_to(cp);

        assert_eq!(snap.nonce(&alice()).unwrap(), 1);
        assert_eq!(snap.balance(&bob()).unwrap(), U256::zero());
        assert!(!snap.exists(&bob()).unwrap());
        assert_eq!(snap.pending_accounts(), 1);
    }

    #[test]
    fn test_transfer_refuses_overdraft_without_writing() {
        let (_store, manager, root) = setup();
        let mut snap = manager.open_tracking(&root).unwrap();
        assert!(!snap.transfer(&alice(), &bob(), U256::from(1001)).unwrap());
        assert_eq!(snap.journal_len(), 0);
    }

    #[test]
    fn test_drop_rolls_back_open_snapshot() {
        let (_store, manager, root) = setup();
        {
            let mut snap = manager.open_tracking(&root).unwrap();
            snap.set_balance(&alice(), U256::zero()).unwrap();
            assert_eq!(manager.open_count(), 1);
        }
        assert_eq!(manager.open_count(), 0);
    }

    #[test]
    fn test_guard_rolls_back_on_panic() {
        let (store, manager, root) = setup();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut guard = manager.open_scoped(&root).unwrap();
            guard.set_balance(&alice(), U256::zero()).unwrap();
            panic!("engine blew up");
        }));
        assert!(result.is_err());
        assert_eq!(manager.open_count(), 0);
        let live = store.view_at(&root).unwrap();
        assert_eq!(live.balance_of(&alice()).unwrap(), U256::from(1000));
    }

    #[test]
    fn test_independent_snapshots_on_same_root() {
        let (_store, manager, root) = setup();
        let mut a = manager.open_tracking(&root).unwrap();
        let mut b = manager.open_tracking(&root).unwrap();
        a.set_balance(&alice(), U256::from(1)).unwrap();
        b.set_balance(&alice(), U256::from(2)).unwrap();
        assert_eq!(a.balance(&alice()).unwrap(), U256::from(1));
        assert_eq!(b.balance(&alice()).unwrap(), U256::from(2));
        assert_ne!(a.id(), b.id());
        a.rollback();
        b.rollback();
    }
}
