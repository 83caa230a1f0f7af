//! Write journal for tracking snapshots.
//!
//! Each entry remembers what the overlay held *before* a write, so entries
//! can be undone in reverse order back to any checkpoint.

use crate::domain::value_objects::{Address, StorageKey, StorageValue, U256};
use std::collections::HashMap;

/// Pending writes for one account inside a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct AccountOverlay {
    pub balance: Option<U256>,
    pub nonce: Option<u64>,
    pub storage: HashMap<StorageKey, StorageValue>,
}

/// One undoable write. `previous == None` means the overlay had no value and
/// reads fell through to the base view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalEntry {
    /// First write to an account created its overlay entry.
    AccountTouched {
        /// Touched account.
        address: Address,
    },
    /// Balance overwritten.
    BalanceChange {
        /// Account.
        address: Address,
        /// Overlay value before the write.
        previous: Option<U256>,
    },
    /// Nonce overwritten.
    NonceChange {
        /// Account.
        address: Address,
        /// Overlay value before the write.
        previous: Option<u64>,
    },
    /// Storage slot overwritten.
    StorageChange {
        /// Account.
        address: Address,
        /// Slot.
        key: StorageKey,
        /// Overlay value before the write.
        previous: Option<StorageValue>,
    },
}

impl JournalEntry {
    /// Restores `overlay` to the state before this entry.
    pub(crate) fn undo(self, overlay: &mut HashMap<Address, AccountOverlay>) {
        match self {
            Self::AccountTouched { address } => {
                overlay.remove(&address);
            }
            Self::BalanceChange { address, previous } => {
                if let Some(acct) = overlay.get_mut(&address) {
                    acct.balance = previous;
                }
            }
            Self::NonceChange { address, previous } => {
                if let Some(acct) = overlay.get_mut(&address) {
                    acct.nonce = previous;
                }
            }
            Self::StorageChange {
                address,
                key,
                previous,
            } => {
                if let Some(acct) = overlay.get_mut(&address) {
                    match previous {
                        Some(value) => {
                            acct.storage.insert(key, value);
                        }
                        None => {
                            acct.storage.remove(&key);
                        }
                    }
                }
            }
        }
    }
}
