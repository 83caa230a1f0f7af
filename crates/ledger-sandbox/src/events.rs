//! # Chain Events
//!
//! Notifications published by the engine while it processes the pending
//! pool. Consumers subscribe through [`crate::ports::EventSource`].

use crate::domain::entities::TransactionReceipt;
use crate::domain::value_objects::{Address, Hash};
use serde::{Deserialize, Serialize};

/// Capacity of the broadcast channel. Slow subscribers lag past this.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle events of transactions and blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    /// Accepted into the pending pool.
    TransactionSubmitted {
        /// Transaction hash.
        tx_hash: Hash,
        /// Signer address.
        sender: Address,
    },

    /// Executed and included in a block.
    TransactionIncluded {
        /// Receipt of the execution.
        receipt: TransactionReceipt,
    },

    /// Refused during processing; never included.
    TransactionDropped {
        /// Transaction hash.
        tx_hash: Hash,
        /// Why it was refused.
        reason: String,
    },

    /// A new best block.
    BlockImported {
        /// Height.
        number: u64,
        /// Block hash.
        hash: Hash,
        /// Post-state root.
        state_root: Hash,
        /// Included transaction count.
        transaction_count: usize,
    },
}

impl ChainEvent {
    /// Short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransactionSubmitted { .. } => "transaction_submitted",
            Self::TransactionIncluded { .. } => "transaction_included",
            Self::TransactionDropped { .. } => "transaction_dropped",
            Self::BlockImported { .. } => "block_imported",
        }
    }
}
