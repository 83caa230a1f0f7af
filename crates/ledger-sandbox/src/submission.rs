//! # Live Submission
//!
//! Signs a real transaction and hands it to the pending pool. No snapshot is
//! opened and no balance is checked here: the engine validates the request
//! when it processes the pool.

use crate::domain::entities::TransactionRequest;
use crate::domain::value_objects::{Address, Bytes, EcdsaSignature, Hash, U256};
use crate::errors::BackendError;
use crate::ports::outbound::{GasPriceOracle, TransactionPool};
use crate::signer::SigningAccount;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

/// Signing front door to a [`TransactionPool`].
#[derive(Clone)]
pub struct LiveSubmission {
    pool: Arc<dyn TransactionPool>,
    oracle: Arc<dyn GasPriceOracle>,
}

impl LiveSubmission {
    /// Creates a submitter over `pool`, pricing with `oracle`.
    #[must_use]
    pub fn new(pool: Arc<dyn TransactionPool>, oracle: Arc<dyn GasPriceOracle>) -> Self {
        Self { pool, oracle }
    }

    /// Signs and queues the transaction. Returns its hash without waiting for
    /// inclusion.
    ///
    /// # Errors
    ///
    /// - `SigningFailed` if the key cannot sign.
    /// - `EngineFault` if the pool rejects the request.
    #[instrument(
        skip(self, account, value, payload),
        fields(sender = ?account.address(), payload_len = payload.len())
    )]
    pub fn submit(
        &self,
        account: &SigningAccount,
        target: &Address,
        value: U256,
        payload: Bytes,
        nonce: u64,
        gas_limit: u64,
    ) -> Result<Hash, BackendError> {
        let mut tx = TransactionRequest {
            sender: account.address(),
            to: Some(*target),
            value,
            payload,
            nonce,
            gas_limit,
            gas_price: self.oracle.gas_price(),
            signature: EcdsaSignature::PLACEHOLDER,
        };
        tx.signature = account.sign_hash(&tx.signing_hash())?;

        let tx_hash = self.pool.submit_transaction(tx)?;
        info!(?tx_hash, "transaction submitted");
        Ok(tx_hash)
    }
}

impl fmt::Debug for LiveSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSubmission")
            .field("pending", &self.pool.pending_count())
            .finish_non_exhaustive()
    }
}
