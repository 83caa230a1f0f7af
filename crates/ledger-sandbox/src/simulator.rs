//! # Call Simulator and Gas Estimator
//!
//! Every simulation forks state at a block's root through a
//! [`RollbackGuard`](crate::snapshot::RollbackGuard), runs the request with
//! `local_only = true`, and drops the guard before the outcome or error is
//! returned. Nothing the engine writes survives the call.

use crate::domain::entities::{BlockContext, ExecutionOutcome, TransactionRequest};
use crate::domain::value_objects::{Address, Bytes, EcdsaSignature, U256};
use crate::errors::BackendError;
use crate::execution::EngineAdapter;
use crate::ports::outbound::ChainReader;
use crate::snapshot::SnapshotManager;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Correlation id of one simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SimulationId(Uuid);

impl SimulationId {
    /// Fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SimulationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SimulationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runs read-only calls against historical state.
#[derive(Clone, Debug)]
pub struct CallSimulator {
    snapshots: SnapshotManager,
    adapter: EngineAdapter,
    gas_limit: u64,
}

impl CallSimulator {
    /// `gas_limit` is the allowance every simulated request carries.
    #[must_use]
    pub fn new(snapshots: SnapshotManager, adapter: EngineAdapter, gas_limit: u64) -> Self {
        Self {
            snapshots,
            adapter,
            gas_limit,
        }
    }

    /// Snapshot manager the simulator forks from.
    #[must_use]
    pub fn snapshot_manager(&self) -> &SnapshotManager {
        &self.snapshots
    }

    /// Runs the call in `block` and returns the raw outcome.
    ///
    /// Reverts and halts come back as `Ok` with `success == false`.
    ///
    /// # Errors
    ///
    /// - `InvalidRoot` / `StateUnavailable` if the block's root cannot be
    ///   opened.
    /// - `MalformedTransaction`, `ContextInitFailed`, `EngineFault` from the
    ///   adapter. The snapshot is rolled back before any of these return.
    #[instrument(
        skip(self, value, payload, block),
        fields(
            simulation_id = %SimulationId::new(),
            block = block.number,
            payload_len = payload.len(),
        )
    )]
    pub fn simulate_call(
        &self,
        sender: &Address,
        target: &Address,
        value: U256,
        payload: Bytes,
        block: &BlockContext,
    ) -> Result<ExecutionOutcome, BackendError> {
        let tx = self.synthetic_request(*sender, *target, value, payload);

        let mut guard = self.snapshots.open_scoped(&block.state_root)?;
        let snapshot_id = guard.id();
        let result = self.adapter.run(&tx, &mut guard, block, true);
        guard.release();

        let outcome = result?;
        debug!(
            %snapshot_id,
            success = outcome.success,
            gas_used = outcome.gas_used,
            "simulation finished"
        );
        Ok(outcome)
    }

    /// Runs the call and returns its return data.
    ///
    /// # Errors
    ///
    /// `CallFailed` when the call reverts or halts, plus everything
    /// [`CallSimulator::simulate_call`] returns.
    pub fn call(
        &self,
        sender: &Address,
        target: &Address,
        value: U256,
        payload: Bytes,
        block: &BlockContext,
    ) -> Result<Bytes, BackendError> {
        let outcome = self.simulate_call(sender, target, value, payload, block)?;
        into_return_data(outcome)
    }

    fn synthetic_request(
        &self,
        sender: Address,
        target: Address,
        value: U256,
        payload: Bytes,
    ) -> TransactionRequest {
        TransactionRequest {
            sender,
            to: Some(target),
            value,
            payload,
            nonce: 0,
            gas_limit: self.gas_limit,
            gas_price: U256::zero(),
            signature: EcdsaSignature::PLACEHOLDER,
        }
    }
}

fn into_return_data(outcome: ExecutionOutcome) -> Result<Bytes, BackendError> {
    if outcome.success {
        Ok(outcome.return_data)
    } else {
        Err(BackendError::CallFailed {
            reason: outcome.failure_reason(),
        })
    }
}

/// Reports the gas a call consumes at the best block.
///
/// The figure is the consumption observed under the simulator's maximal
/// allowance. Callers add their own margin.
#[derive(Clone)]
pub struct GasEstimator {
    simulator: CallSimulator,
    chain: Arc<dyn ChainReader>,
}

impl GasEstimator {
    /// Estimator over `simulator`, tracking `chain`'s best block.
    #[must_use]
    pub fn new(simulator: CallSimulator, chain: Arc<dyn ChainReader>) -> Self {
        Self { simulator, chain }
    }

    /// Gas used by the call at the best block.
    ///
    /// # Errors
    ///
    /// `CallFailed` if the call does not succeed, plus everything
    /// [`CallSimulator::simulate_call`] returns.
    pub fn estimate_gas(
        &self,
        sender: &Address,
        target: &Address,
        value: U256,
        payload: Bytes,
    ) -> Result<u64, BackendError> {
        let best = self.chain.best_block();
        let outcome = self
            .simulator
            .simulate_call(sender, target, value, payload, &best)?;
        if !outcome.success {
            return Err(BackendError::CallFailed {
                reason: outcome.failure_reason(),
            });
        }
        Ok(outcome.gas_used)
    }
}

impl fmt::Debug for GasEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GasEstimator")
            .field("simulator", &self.simulator)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
