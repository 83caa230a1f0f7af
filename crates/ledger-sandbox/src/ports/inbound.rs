//! # Inbound Ports
//!
//! The backend surface offered to callers.

use crate::domain::value_objects::{Address, Bytes, Hash, U256};
use crate::errors::BackendError;
use crate::signer::SigningAccount;

/// Account queries, live submission and sandboxed simulation.
///
/// Every method runs to completion on the caller's thread.
pub trait LedgerBackend: Send + Sync {
    /// Balance at the best block.
    ///
    /// # Errors
    ///
    /// `StateUnavailable` if the head's root is no longer readable.
    fn get_balance(&self, address: &Address) -> Result<U256, BackendError>;

    /// Nonce at the best block.
    ///
    /// # Errors
    ///
    /// `StateUnavailable`.
    fn get_nonce(&self, address: &Address) -> Result<u64, BackendError>;

    /// Code at the best block.
    ///
    /// # Errors
    ///
    /// `StateUnavailable`.
    fn get_code(&self, address: &Address) -> Result<Bytes, BackendError>;

    /// Whether the account exists at the best block. Never fails.
    fn address_exists(&self, address: &Address) -> bool;

    /// Height of the best block.
    fn get_current_block_number(&self) -> u64;

    /// Signs and queues a transaction; returns its hash without waiting.
    ///
    /// # Errors
    ///
    /// `SigningFailed`, or `EngineFault` if the pool refuses it.
    fn submit(
        &self,
        account: &SigningAccount,
        target: &Address,
        value: U256,
        payload: Bytes,
        nonce: u64,
        gas_limit: u64,
    ) -> Result<Hash, BackendError>;

    /// Simulates a call at the best block and returns its return data.
    ///
    /// # Errors
    ///
    /// `CallFailed` on revert or halt, `EngineFault` on engine failure.
    fn constant_call(
        &self,
        sender: &Address,
        target: &Address,
        value: U256,
        payload: Bytes,
    ) -> Result<Bytes, BackendError>;

    /// Gas observed when simulating the call at the best block.
    ///
    /// # Errors
    ///
    /// `CallFailed`, `EngineFault`.
    fn estimate_gas(
        &self,
        sender: &Address,
        target: &Address,
        value: U256,
        payload: Bytes,
    ) -> Result<u64, BackendError>;

    /// Current gas price.
    fn get_gas_price(&self) -> U256;
}
