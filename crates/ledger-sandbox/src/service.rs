//! # Sandbox Backend
//!
//! [`LedgerBackend`] over any ledger engine that implements the outbound
//! ports. Collaborators are injected at construction; nothing here reaches
//! for global state.

use crate::config::BackendConfig;
use crate::domain::entities::{BlockContext, TransactionStatus};
use crate::domain::value_objects::{Address, Bytes, Hash, StorageKey, StorageValue, U256};
use crate::errors::{BackendError, StateError};
use crate::events::ChainEvent;
use crate::evm::EvmEngine;
use crate::execution::EngineAdapter;
use crate::ports::inbound::LedgerBackend;
use crate::ports::outbound::{
    ChainReader, EventSource, ExecutionEngine, GasPriceOracle, StateRepository, StateView,
    TransactionPool,
};
use crate::signer::SigningAccount;
use crate::simulator::{CallSimulator, GasEstimator};
use crate::snapshot::SnapshotManager;
use crate::submission::LiveSubmission;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{instrument, warn};

/// Everything the backend needs from the wrapped engine.
pub trait LedgerChain:
    ChainReader + StateRepository + TransactionPool + GasPriceOracle + EventSource + 'static
{
}

impl<T> LedgerChain for T where
    T: ChainReader + StateRepository + TransactionPool + GasPriceOracle + EventSource + 'static
{
}

/// The backend callers hold.
pub struct SandboxBackend<C: LedgerChain> {
    chain: Arc<C>,
    simulator: CallSimulator,
    estimator: GasEstimator,
    submission: LiveSubmission,
    config: BackendConfig,
}

impl<C: LedgerChain> SandboxBackend<C> {
    /// Backend over `chain`, simulating with the bundled EVM.
    #[must_use]
    pub fn new(chain: Arc<C>, config: BackendConfig) -> Self {
        let engine = Arc::new(EvmEngine::new(config.max_execution_steps));
        Self::with_engine(chain, engine, config)
    }

    /// Backend over `chain`, simulating with `engine`.
    #[must_use]
    pub fn with_engine(
        chain: Arc<C>,
        engine: Arc<dyn ExecutionEngine>,
        config: BackendConfig,
    ) -> Self {
        let snapshots = SnapshotManager::new(chain.clone());
        let adapter = EngineAdapter::new(engine, config.max_payload_size);
        let simulator = CallSimulator::new(snapshots, adapter, config.simulation_gas_limit);
        let estimator = GasEstimator::new(simulator.clone(), chain.clone());
        let submission = LiveSubmission::new(chain.clone(), chain.clone());

        Self {
            chain,
            simulator,
            estimator,
            submission,
            config,
        }
    }

    /// The wrapped engine.
    #[must_use]
    pub fn chain(&self) -> &Arc<C> {
        &self.chain
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Snapshot manager used for simulations.
    #[must_use]
    pub fn snapshot_manager(&self) -> &SnapshotManager {
        self.simulator.snapshot_manager()
    }

    /// Simulates a call against the state after block `block_number`.
    ///
    /// # Errors
    ///
    /// - `BlockNotFound` for an unknown height.
    /// - `StateUnavailable` if that block's root was pruned.
    /// - `CallFailed` and `EngineFault` as for
    ///   [`LedgerBackend::constant_call`].
    pub fn constant_call_at(
        &self,
        block_number: u64,
        sender: &Address,
        target: &Address,
        value: U256,
        payload: Bytes,
    ) -> Result<Bytes, BackendError> {
        let block = self.block(block_number)?;
        self.simulator.call(sender, target, value, payload, &block)
    }

    /// Storage slot at the best block.
    ///
    /// # Errors
    ///
    /// `StateUnavailable`.
    pub fn get_storage_at(
        &self,
        address: &Address,
        key: &StorageKey,
    ) -> Result<StorageValue, BackendError> {
        Ok(self.live_view()?.storage_at(address, key)?)
    }

    /// Where a submitted transaction stands.
    #[must_use]
    pub fn transaction_status(&self, tx_hash: &Hash) -> TransactionStatus {
        self.chain.transaction_status(tx_hash)
    }

    /// Subscribes to chain events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.chain.subscribe()
    }

    fn block(&self, number: u64) -> Result<BlockContext, BackendError> {
        self.chain
            .block_by_number(number)
            .ok_or(BackendError::BlockNotFound { number })
    }

    fn live_view(&self) -> Result<Arc<dyn StateView>, StateError> {
        let root = self.chain.best_block().state_root;
        self.chain.view_at(&root)
    }
}

impl<C: LedgerChain> LedgerBackend for SandboxBackend<C> {
    fn get_balance(&self, address: &Address) -> Result<U256, BackendError> {
        Ok(self.live_view()?.balance_of(address)?)
    }

    fn get_nonce(&self, address: &Address) -> Result<u64, BackendError> {
        Ok(self.live_view()?.nonce_of(address)?)
    }

    fn get_code(&self, address: &Address) -> Result<Bytes, BackendError> {
        Ok(self.live_view()?.code_of(address)?)
    }

    fn address_exists(&self, address: &Address) -> bool {
        match self.live_view().and_then(|view| view.exists(address)) {
            Ok(exists) => exists,
            Err(err) => {
                warn!(?address, error = %err, "existence check failed, reporting absent");
                false
            }
        }
    }

    fn get_current_block_number(&self) -> u64 {
        self.chain.best_block().number
    }

    #[instrument(skip(self, account, value, payload))]
    fn submit(
        &self,
        account: &SigningAccount,
        target: &Address,
        value: U256,
        payload: Bytes,
        nonce: u64,
        gas_limit: u64,
    ) -> Result<Hash, BackendError> {
        self.submission
            .submit(account, target, value, payload, nonce, gas_limit)
    }

    #[instrument(skip(self, value, payload))]
    fn constant_call(
        &self,
        sender: &Address,
        target: &Address,
        value: U256,
        payload: Bytes,
    ) -> Result<Bytes, BackendError> {
        let best = self.chain.best_block();
        self.simulator.call(sender, target, value, payload, &best)
    }

    #[instrument(skip(self, value, payload))]
    fn estimate_gas(
        &self,
        sender: &Address,
        target: &Address,
        value: U256,
        payload: Bytes,
    ) -> Result<u64, BackendError> {
        self.estimator.estimate_gas(sender, target, value, payload)
    }

    fn get_gas_price(&self) -> U256 {
        self.chain.gas_price()
    }
}

impl<C: LedgerChain> std::fmt::Debug for SandboxBackend<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxBackend")
            .field("simulator", &self.simulator)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
