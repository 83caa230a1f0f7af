//! # Tracking Snapshot
//!
//! Copy-on-write overlay over an immutable [`StateView`]. Opening one costs an
//! `Arc` clone and an empty map; the base is never copied.

use crate::domain::entities::{AccountChange, ChangeSet};
use crate::domain::value_objects::{Address, Bytes, Hash, StorageKey, StorageValue, U256};
use crate::errors::{SnapshotError, StateError};
use crate::ports::outbound::{Checkpoint, ExecutionState, StateRepository, StateView};
use crate::snapshot::journal::{AccountOverlay, JournalEntry};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Correlation id of one snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal state of a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotStatus {
    /// Accepting writes.
    Open,
    /// Merged into the parent, producing `root`.
    Committed {
        /// Root created by the commit.
        root: Hash,
    },
    /// Pending writes discarded.
    RolledBack,
}

/// Mutation-tracking overlay with exactly two terminal operations.
///
/// - [`TrackingSnapshot::commit`] merges the overlay into the repository,
///   at most once.
/// - [`TrackingSnapshot::rollback`] discards it; repeat calls are no-ops.
///
/// Dropping a snapshot that is still open rolls it back.
pub struct TrackingSnapshot {
    id: SnapshotId,
    base: Arc<dyn StateView>,
    repository: Arc<dyn StateRepository>,
    overlay: HashMap<Address, AccountOverlay>,
    journal: Vec<JournalEntry>,
    status: SnapshotStatus,
    open_count: Arc<AtomicUsize>,
}

impl TrackingSnapshot {
    pub(crate) fn new(
        base: Arc<dyn StateView>,
        repository: Arc<dyn StateRepository>,
        open_count: Arc<AtomicUsize>,
    ) -> Self {
        open_count.fetch_add(1, Ordering::SeqCst);
        let snapshot = Self {
            id: SnapshotId::new(),
            base,
            repository,
            overlay: HashMap::new(),
            journal: Vec::new(),
            status: SnapshotStatus::Open,
            open_count,
        };
        trace!(snapshot_id = %snapshot.id, root = ?snapshot.base.state_root(), "snapshot opened");
        snapshot
    }

    /// Correlation id.
    #[must_use]
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    /// Root of the underlying view.
    #[must_use]
    pub fn base_root(&self) -> Hash {
        self.base.state_root()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> SnapshotStatus {
        self.status
    }

    /// Returns true until commit or rollback.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == SnapshotStatus::Open
    }

    /// Number of accounts with pending writes.
    #[must_use]
    pub fn pending_accounts(&self) -> usize {
        self.overlay.len()
    }

    /// Number of journaled writes.
    #[must_use]
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Discards all pending writes. Never fails; a no-op once finalized.
    pub fn rollback(&mut self) {
        if !self.is_open() {
            trace!(snapshot_id = %self.id, status = ?self.status, "rollback on finalized snapshot ignored");
            return;
        }
        let discarded = self.journal.len();
        self.overlay.clear();
        self.journal.clear();
        self.finalize(SnapshotStatus::RolledBack);
        debug!(snapshot_id = %self.id, discarded, "snapshot rolled back");
    }

    /// Merges pending writes into the repository and returns the new root.
    ///
    /// A snapshot with no pending writes commits to its base root.
    ///
    /// # Errors
    ///
    /// `SnapshotError::AlreadyFinalized` after a commit or rollback, or the
    /// repository's error; in the latter case the snapshot stays open.
    pub fn commit(&mut self) -> Result<Hash, SnapshotError> {
        if !self.is_open() {
            warn!(snapshot_id = %self.id, status = ?self.status, "commit on finalized snapshot");
            return Err(SnapshotError::AlreadyFinalized);
        }

        let base_root = self.base.state_root();
        let changes = self.change_set();
        let root = if changes.is_empty() {
            base_root
        } else {
            self.repository.apply(&base_root, changes)?
        };

        self.overlay.clear();
        self.journal.clear();
        self.finalize(SnapshotStatus::Committed { root });
        debug!(snapshot_id = %self.id, parent = ?base_root, root = ?root, "snapshot committed");
        Ok(root)
    }

    fn finalize(&mut self, status: SnapshotStatus) {
        self.status = status;
        self.open_count.fetch_sub(1, Ordering::SeqCst);
    }

    fn change_set(&self) -> ChangeSet {
        let accounts = self
            .overlay
            .iter()
            .map(|(address, acct)| {
                let change = AccountChange {
                    balance: acct.balance,
                    nonce: acct.nonce,
                    storage: acct.storage.iter().map(|(k, v)| (*k, *v)).collect(),
                };
                (*address, change)
            })
            .collect();
        ChangeSet { accounts }
    }

    fn ensure_open(&self) -> Result<(), StateError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StateError::SnapshotFinalized)
        }
    }

    fn entry(&mut self, address: &Address) -> &mut AccountOverlay {
        if !self.overlay.contains_key(address) {
            self.journal
                .push(JournalEntry::AccountTouched { address: *address });
        }
        self.overlay.entry(*address).or_default()
    }
}

impl ExecutionState for TrackingSnapshot {
    fn balance(&self, address: &Address) -> Result<U256, StateError> {
        match self.overlay.get(address).and_then(|a| a.balance) {
            Some(balance) => Ok(balance),
            None => self.base.balance_of(address),
        }
    }

    fn nonce(&self, address: &Address) -> Result<u64, StateError> {
        match self.overlay.get(address).and_then(|a| a.nonce) {
            Some(nonce) => Ok(nonce),
            None => self.base.nonce_of(address),
        }
    }

    fn code(&self, address: &Address) -> Result<Bytes, StateError> {
        self.base.code_of(address)
    }

    fn storage(&self, address: &Address, key: &StorageKey) -> Result<StorageValue, StateError> {
        match self.overlay.get(address).and_then(|a| a.storage.get(key)) {
            Some(value) => Ok(*value),
            None => self.base.storage_at(address, key),
        }
    }

    fn exists(&self, address: &Address) -> Result<bool, StateError> {
        if self.overlay.contains_key(address) {
            return Ok(true);
        }
        self.base.exists(address)
    }

    fn set_balance(&mut self, address: &Address, balance: U256) -> Result<(), StateError> {
        self.ensure_open()?;
        let previous = self.entry(address).balance.replace(balance);
        self.journal.push(JournalEntry::BalanceChange {
            address: *address,
            previous,
        });
        Ok(())
    }

    fn set_nonce(&mut self, address: &Address, nonce: u64) -> Result<(), StateError> {
        self.ensure_open()?;
        let previous = self.entry(address).nonce.replace(nonce);
        self.journal.push(JournalEntry::NonceChange {
            address: *address,
            previous,
        });
        Ok(())
    }

    fn set_storage(
        &mut self,
        address: &Address,
        key: StorageKey,
        value: StorageValue,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        let previous = self.entry(address).storage.insert(key, value);
        self.journal.push(JournalEntry::StorageChange {
            address: *address,
            key,
            previous,
        });
        Ok(())
    }

    fn checkpoint(&mut self) -> Checkpoint {
        Checkpoint(self.journal.len())
    }

    fn revert_to(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.0 {
            if let Some(entry) = self.journal.pop() {
                entry.undo(&mut self.overlay);
            }
        }
    }
}

impl Drop for TrackingSnapshot {
    fn drop(&mut self) {
        if self.is_open() {
            debug!(snapshot_id = %self.id, "discarding unfinalized snapshot on drop");
            self.rollback();
        }
    }
}

impl fmt::Debug for TrackingSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingSnapshot")
            .field("id", &self.id)
            .field("base_root", &self.base.state_root())
            .field("pending_accounts", &self.overlay.len())
            .field("journal_len", &self.journal.len())
            .field("status", &self.status)
            .finish()
    }
}
