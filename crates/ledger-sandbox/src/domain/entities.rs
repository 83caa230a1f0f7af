//! # Domain Entities
//!
//! Accounts, blocks, transaction requests and execution results.

use crate::domain::services::{decode_revert_reason, keccak256};
use crate::domain::value_objects::{
    u256_to_word, Address, Bytes, EcdsaSignature, Hash, StorageKey, StorageValue, U256,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default block gas limit.
pub const BLOCK_GAS_LIMIT: u64 = 30_000_000;

// =============================================================================
// ACCOUNT
// =============================================================================

/// Account state as stored by the repository.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Balance in wei.
    pub balance: U256,
    /// Number of transactions sent.
    pub nonce: u64,
    /// Contract bytecode; empty for externally-owned accounts.
    pub code: Bytes,
    /// Non-zero storage slots.
    pub storage: BTreeMap<StorageKey, StorageValue>,
}

impl Account {
    /// Externally-owned account with a balance.
    #[must_use]
    pub fn with_balance(balance: U256) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }

    /// Contract account with code.
    #[must_use]
    pub fn with_code(code: Bytes) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    /// Adds a storage slot.
    #[must_use]
    pub fn with_storage(mut self, key: StorageKey, value: StorageValue) -> Self {
        if !value.is_zero() {
            self.storage.insert(key, value);
        }
        self
    }

    /// Returns true if the account holds code.
    #[must_use]
    pub fn is_contract(&self) -> bool {
        !self.code.is_empty()
    }
}

// =============================================================================
// BLOCK CONTEXT
// =============================================================================

/// The block a transaction or simulation runs against.
///
/// `state_root` is the post-state of this block; simulating "at" a block
/// means forking from this root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    /// Block height.
    pub number: u64,
    /// Block hash.
    pub hash: Hash,
    /// Parent block hash.
    pub parent_hash: Hash,
    /// Fee recipient.
    pub coinbase: Address,
    /// Post-state root.
    pub state_root: Hash,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Chain identifier.
    pub chain_id: u64,
}

impl BlockContext {
    /// Computes the block hash from the header fields and transaction hashes.
    #[must_use]
    pub fn seal(mut self, transactions: &[Hash]) -> Self {
        let mut buf = Vec::with_capacity(160 + transactions.len() * 32);
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(&self.parent_hash.0);
        buf.extend_from_slice(&self.coinbase.0);
        buf.extend_from_slice(&self.state_root.0);
        buf.extend_from_slice(&self.gas_limit.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.chain_id.to_be_bytes());
        for tx in transactions {
            buf.extend_from_slice(&tx.0);
        }
        self.hash = keccak256(&buf);
        self
    }
}

// =============================================================================
// TRANSACTION REQUEST
// =============================================================================

/// A transaction as handed to the engine adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// Sender (for simulations, identity only).
    pub sender: Address,
    /// Target; `None` means contract creation.
    pub to: Option<Address>,
    /// Wei transferred to the target.
    pub value: U256,
    /// Calldata.
    pub payload: Bytes,
    /// Sender nonce.
    pub nonce: u64,
    /// Gas allowance.
    pub gas_limit: u64,
    /// Price per unit of gas.
    pub gas_price: U256,
    /// Sender signature over [`TransactionRequest::signing_hash`].
    pub signature: EcdsaSignature,
}

impl TransactionRequest {
    /// Digest the sender signs: every field except the signature.
    #[must_use]
    pub fn signing_hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(160 + self.payload.len());
        buf.extend_from_slice(&self.sender.0);
        match self.to {
            Some(to) => {
                buf.push(1);
                buf.extend_from_slice(&to.0);
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&u256_to_word(self.value));
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.gas_limit.to_be_bytes());
        buf.extend_from_slice(&u256_to_word(self.gas_price));
        buf.extend_from_slice(&(self.payload.len() as u64).to_be_bytes());
        buf.extend_from_slice(self.payload.as_slice());
        keccak256(&buf)
    }

    /// Content hash identifying the signed transaction.
    #[must_use]
    pub fn hash(&self) -> Hash {
        let mut buf = [0u8; 97];
        buf[..32].copy_from_slice(&self.signing_hash().0);
        buf[32..].copy_from_slice(&self.signature.to_bytes());
        keccak256(&buf)
    }

    /// Maximum wei the sender must hold up front: value + gas × price.
    #[must_use]
    pub fn max_cost(&self) -> Option<U256> {
        U256::from(self.gas_limit)
            .checked_mul(self.gas_price)?
            .checked_add(self.value)
    }
}

// =============================================================================
// EXECUTION OUTCOME
// =============================================================================

/// A log record emitted by LOG0-LOG4.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<Hash>,
    /// Unindexed data.
    pub data: Bytes,
}

/// Result of running one transaction. The only artifact that leaves a
/// simulation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Return data (or revert data when unsuccessful).
    pub return_data: Bytes,
    /// Gas charged, intrinsic cost included.
    pub gas_used: u64,
    /// Whether execution completed without revert or halt.
    pub success: bool,
    /// Decoded revert reason or halt description.
    pub revert_reason: Option<String>,
    /// Logs emitted by a successful execution.
    pub logs: Vec<Log>,
}

impl ExecutionOutcome {
    /// Successful outcome.
    #[must_use]
    pub fn success(return_data: Bytes, gas_used: u64, logs: Vec<Log>) -> Self {
        Self {
            return_data,
            gas_used,
            success: true,
            revert_reason: None,
            logs,
        }
    }

    /// Reverted outcome; the reason is decoded from `Error(string)` data.
    #[must_use]
    pub fn reverted(return_data: Bytes, gas_used: u64) -> Self {
        let reason = decode_revert_reason(return_data.as_slice())
            .unwrap_or_else(|| "execution reverted".to_string());
        Self {
            return_data,
            gas_used,
            success: false,
            revert_reason: Some(reason),
            logs: Vec::new(),
        }
    }

    /// Halted outcome (out of gas, invalid opcode, ...).
    #[must_use]
    pub fn halted(reason: impl Into<String>, gas_used: u64) -> Self {
        Self {
            return_data: Bytes::new(),
            gas_used,
            success: false,
            revert_reason: Some(reason.into()),
            logs: Vec::new(),
        }
    }

    /// Reason to report when unsuccessful.
    #[must_use]
    pub fn failure_reason(&self) -> String {
        self.revert_reason
            .clone()
            .unwrap_or_else(|| "execution failed".to_string())
    }
}

// =============================================================================
// RECEIPTS
// =============================================================================

/// Record of a mined transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Transaction hash.
    pub tx_hash: Hash,
    /// Including block.
    pub block_number: u64,
    /// Execution success.
    pub success: bool,
    /// Gas charged.
    pub gas_used: u64,
    /// Revert reason, if any.
    pub revert_reason: Option<String>,
}

/// Where a submitted transaction currently stands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Waiting in the pending pool.
    Pending,
    /// Mined, possibly unsuccessfully.
    Included(TransactionReceipt),
    /// Rejected while being processed; never included.
    Dropped {
        /// Why the engine refused it.
        reason: String,
    },
    /// Never seen.
    Unknown,
}

// =============================================================================
// CHANGE SETS
// =============================================================================

/// Pending writes for one account, as produced by a committed snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountChange {
    /// New balance.
    pub balance: Option<U256>,
    /// New nonce.
    pub nonce: Option<u64>,
    /// Slot writes; zero values clear the slot.
    pub storage: BTreeMap<StorageKey, StorageValue>,
}

/// All writes merged into the parent on commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Per-account writes.
    pub accounts: BTreeMap<Address, AccountChange>,
}

impl ChangeSet {
    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::encode_revert_reason;

    fn sample_tx() -> TransactionRequest {
        TransactionRequest {
            sender: Address::from_low_u8(1),
            to: Some(Address::from_low_u8(2)),
            value: U256::from(5),
            payload: Bytes::from_slice(&[0xde, 0xad]),
            nonce: 3,
            gas_limit: 50_000,
            gas_price: U256::from(2),
            signature: EcdsaSignature::PLACEHOLDER,
        }
    }

    #[test]
    fn test_signing_hash_ignores_signature() {
        let tx = sample_tx();
        let mut signed = tx.clone();
        signed.signature = EcdsaSignature::new([1; 32], [2; 32], 27);
        assert_eq!(tx.signing_hash(), signed.signing_hash());
        assert_ne!(tx.hash(), signed.hash());
    }

    #[test]
    fn test_hash_depends_on_every_field() {
        let base = sample_tx();
        let mut other = base.clone();
        other.nonce += 1;
        assert_ne!(base.hash(), other.hash());
        let mut other = base.clone();
        other.to = None;
        assert_ne!(base.hash(), other.hash());
    }

    #[test]
    fn test_max_cost() {
        assert_eq!(sample_tx().max_cost(), Some(U256::from(100_005)));
        let mut tx = sample_tx();
        tx.gas_price = U256::MAX;
        assert_eq!(tx.max_cost(), None);
    }

    #[test]
    fn test_reverted_outcome_decodes_reason() {
        let outcome = ExecutionOutcome::reverted(encode_revert_reason("paused"), 30_000);
        assert!(!outcome.success);
        assert_eq!(outcome.failure_reason(), "paused");

        let bare = ExecutionOutcome::reverted(Bytes::new(), 21_000);
        assert_eq!(bare.failure_reason(), "execution reverted");
    }

    #[test]
    fn test_seal_sets_hash() {
        let ctx = BlockContext {
            number: 1,
            hash: Hash::ZERO,
            parent_hash: Hash::ZERO,
            coinbase: Address::ZERO,
            state_root: Hash::new([7; 32]),
            gas_limit: BLOCK_GAS_LIMIT,
            timestamp: 10,
            chain_id: 1337,
        };
        let sealed = ctx.clone().seal(&[]);
        assert!(!sealed.hash.is_zero());
        assert_ne!(sealed.hash, ctx.seal(&[Hash::new([1; 32])]).hash);
    }

    #[test]
    fn test_account_with_storage_skips_zero() {
        let acct = Account::default().with_storage(StorageKey::default(), StorageValue::ZERO);
        assert!(acct.storage.is_empty());
    }
}
