//! # Execution Engine Adapter
//!
//! Runs one [`TransactionRequest`] against an [`ExecutionState`] in four
//! steps: validate, init context, execute, finalize.
//!
//! Validation and context-init failures abort with [`ExecutionError`] and
//! produce no outcome. Reverts and exceptional halts are not errors: they
//! come back as an unsuccessful [`ExecutionOutcome`]. Engine faults and
//! engine panics revert the frame's writes and become
//! [`ExecutionError::EngineFault`].
//!
//! `local_only` runs (simulations) skip fee deduction, nonce replay
//! protection and signature presence checks.

use crate::domain::entities::{BlockContext, ExecutionOutcome, TransactionRequest};
use crate::domain::services::intrinsic_gas;
use crate::domain::value_objects::{Address, Bytes, U256};
use crate::errors::{ExecutionError, StateError};
use crate::evm::gas::capped_refund;
use crate::ports::outbound::{CallFrame, ExecutionEngine, ExecutionState, FrameOutcome, FrameStatus};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Reason reported when a local call cannot cover its value transfer.
pub const INSUFFICIENT_TRANSFER_BALANCE: &str = "insufficient balance for transfer";

/// Bridges transaction requests to an [`ExecutionEngine`].
#[derive(Clone)]
pub struct EngineAdapter {
    engine: Arc<dyn ExecutionEngine>,
    max_payload_size: usize,
}

impl EngineAdapter {
    /// Creates an adapter over `engine`.
    #[must_use]
    pub fn new(engine: Arc<dyn ExecutionEngine>, max_payload_size: usize) -> Self {
        Self {
            engine,
            max_payload_size,
        }
    }

    /// Executes `tx` in `block` against `state`.
    ///
    /// # Errors
    ///
    /// - `MalformedTransaction` when the request fails validation.
    /// - `ContextInitFailed` on nonce, gas-limit or balance checks, or when
    ///   the state cannot be read.
    /// - `EngineFault` when the engine fails or panics.
    #[instrument(
        skip(self, tx, state, block),
        fields(sender = ?tx.sender, block = block.number, gas_limit = tx.gas_limit)
    )]
    pub fn run(
        &self,
        tx: &TransactionRequest,
        state: &mut dyn ExecutionState,
        block: &BlockContext,
        local_only: bool,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let (target, intrinsic) = self.validate(tx, local_only)?;
        init_context(tx, state, block, local_only)?;

        let outcome = match self.execute(tx, target, state, block, intrinsic)? {
            Executed::Transfer { success: true } => {
                ExecutionOutcome::success(Bytes::new(), intrinsic, Vec::new())
            }
            Executed::Transfer { success: false } => {
                ExecutionOutcome::halted(INSUFFICIENT_TRANSFER_BALANCE, intrinsic)
            }
            Executed::Frame(frame) => assemble(frame, intrinsic),
        };

        if !local_only {
            settle_fees(tx, state, block, outcome.gas_used)?;
        }

        debug!(
            success = outcome.success,
            gas_used = outcome.gas_used,
            local_only,
            "transaction executed"
        );
        Ok(outcome)
    }

    fn validate(
        &self,
        tx: &TransactionRequest,
        local_only: bool,
    ) -> Result<(Address, u64), ExecutionError> {
        let malformed = ExecutionError::MalformedTransaction;

        if tx.gas_limit == 0 {
            return Err(malformed("gas limit is zero".into()));
        }
        if tx.payload.len() > self.max_payload_size {
            return Err(malformed(format!(
                "payload of {} bytes exceeds {} bytes",
                tx.payload.len(),
                self.max_payload_size
            )));
        }
        let intrinsic = intrinsic_gas(tx.payload.as_slice());
        if tx.gas_limit < intrinsic {
            return Err(malformed(format!(
                "gas limit {} below intrinsic gas {intrinsic}",
                tx.gas_limit
            )));
        }
        let Some(target) = tx.to else {
            return Err(malformed("contract creation is not supported".into()));
        };
        if !local_only && tx.signature.is_placeholder() {
            return Err(malformed("missing signature".into()));
        }
        Ok((target, intrinsic))
    }

    fn execute(
        &self,
        tx: &TransactionRequest,
        target: Address,
        state: &mut dyn ExecutionState,
        block: &BlockContext,
        intrinsic: u64,
    ) -> Result<Executed, ExecutionError> {
        let checkpoint = state.checkpoint();

        if !state
            .transfer(&tx.sender, &target, tx.value)
            .map_err(engine_fault)?
        {
            return Ok(Executed::Transfer { success: false });
        }

        let code = state.code(&target).map_err(engine_fault)?;
        if code.is_empty() {
            return Ok(Executed::Transfer { success: true });
        }

        let frame = CallFrame {
            origin: tx.sender,
            caller: tx.sender,
            address: target,
            value: tx.value,
            input: tx.payload.clone(),
            code,
            gas_limit: tx.gas_limit - intrinsic,
            gas_price: tx.gas_price,
            block: block.clone(),
            is_static: false,
        };

        let engine = &self.engine;
        let result = panic::catch_unwind(AssertUnwindSafe(|| engine.execute(&frame, &mut *state)));

        match result {
            Ok(Ok(outcome)) => {
                if outcome.status != FrameStatus::Success {
                    state.revert_to(checkpoint);
                }
                Ok(Executed::Frame(outcome))
            }
            Ok(Err(vm)) => {
                state.revert_to(checkpoint);
                error!(contract = ?target, error = %vm, "engine fault");
                Err(ExecutionError::EngineFault(vm.to_string()))
            }
            Err(payload) => {
                state.revert_to(checkpoint);
                let message = panic_message(payload.as_ref());
                error!(contract = ?target, panic = %message, "engine panicked");
                Err(ExecutionError::EngineFault(format!(
                    "engine panicked: {message}"
                )))
            }
        }
    }
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("max_payload_size", &self.max_payload_size)
            .finish_non_exhaustive()
    }
}

enum Executed {
    /// No code ran; only the value transfer.
    Transfer { success: bool },
    Frame(FrameOutcome),
}

fn init_context(
    tx: &TransactionRequest,
    state: &mut dyn ExecutionState,
    block: &BlockContext,
    local_only: bool,
) -> Result<(), ExecutionError> {
    let init_failed = |e: StateError| ExecutionError::ContextInitFailed(e.to_string());

    // Touch the sender so unreadable state fails here rather than mid-frame.
    let balance = state.balance(&tx.sender).map_err(init_failed)?;
    let nonce = state.nonce(&tx.sender).map_err(init_failed)?;
    if local_only {
        return Ok(());
    }

    if tx.nonce != nonce {
        return Err(ExecutionError::ContextInitFailed(format!(
            "nonce mismatch: expected {nonce}, got {}",
            tx.nonce
        )));
    }
    if tx.gas_limit > block.gas_limit {
        return Err(ExecutionError::ContextInitFailed(format!(
            "gas limit {} exceeds block gas limit {}",
            tx.gas_limit, block.gas_limit
        )));
    }
    let max_cost = tx.max_cost().ok_or_else(|| {
        ExecutionError::ContextInitFailed("insufficient balance: cost overflows".into())
    })?;
    if balance < max_cost {
        return Err(ExecutionError::ContextInitFailed(format!(
            "insufficient balance: have {balance}, need {max_cost}"
        )));
    }

    let upfront = U256::from(tx.gas_limit) * tx.gas_price;
    state
        .set_balance(&tx.sender, balance - upfront)
        .map_err(init_failed)?;
    state.set_nonce(&tx.sender, nonce + 1).map_err(init_failed)?;
    Ok(())
}

fn assemble(frame: FrameOutcome, intrinsic: u64) -> ExecutionOutcome {
    let gas_used = intrinsic + frame.gas_used;
    match frame.status {
        FrameStatus::Success => {
            let refund = capped_refund(gas_used, frame.gas_refund);
            ExecutionOutcome::success(frame.output, gas_used - refund, frame.logs)
        }
        FrameStatus::Revert => ExecutionOutcome::reverted(frame.output, gas_used),
        FrameStatus::Halt(reason) => ExecutionOutcome::halted(reason, gas_used),
    }
}

/// Refunds unused gas to the sender and pays the coinbase.
fn settle_fees(
    tx: &TransactionRequest,
    state: &mut dyn ExecutionState,
    block: &BlockContext,
    gas_used: u64,
) -> Result<(), ExecutionError> {
    let unused = U256::from(tx.gas_limit.saturating_sub(gas_used)) * tx.gas_price;
    let fee = U256::from(gas_used) * tx.gas_price;

    let sender_balance = state.balance(&tx.sender).map_err(engine_fault)?;
    state
        .set_balance(&tx.sender, sender_balance.saturating_add(unused))
        .map_err(engine_fault)?;
    if !fee.is_zero() {
        let coinbase_balance = state.balance(&block.coinbase).map_err(engine_fault)?;
        state
            .set_balance(&block.coinbase, coinbase_balance.saturating_add(fee))
            .map_err(engine_fault)?;
    }
    Ok(())
}

fn engine_fault(err: StateError) -> ExecutionError {
    ExecutionError::EngineFault(err.to_string())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::chain::StateStore;
    use crate::domain::entities::{Account, BLOCK_GAS_LIMIT};
    use crate::domain::services::encode_revert_reason;
    use crate::domain::value_objects::{EcdsaSignature, Hash};
    use crate::errors::VmError;
    use crate::evm::EvmEngine;
    use crate::snapshot::{SnapshotManager, TrackingSnapshot};
    use std::collections::BTreeMap;

    const SENDER: Address = Address::from_low_u8(0xa1);
    const CONTRACT: Address = Address::from_low_u8(0xcc);
    const COINBASE: Address = Address::from_low_u8(0xfe);

    struct PanickingEngine;

    impl ExecutionEngine for PanickingEngine {
        fn execute(
            &self,
            _frame: &CallFrame,
            state: &mut dyn ExecutionState,
        ) -> Result<FrameOutcome, VmError> {
            state.set_balance(&CONTRACT, U256::from(1))?;
            panic!("interpreter bug");
        }
    }

    struct FaultingEngine;

    impl ExecutionEngine for FaultingEngine {
        fn execute(
            &self,
            _frame: &CallFrame,
            _state: &mut dyn ExecutionState,
        ) -> Result<FrameOutcome, VmError> {
            Err(VmError::Internal("corrupt frame".into()))
        }
    }

    fn block() -> BlockContext {
        BlockContext {
            number: 1,
            hash: Hash::ZERO,
            parent_hash: Hash::ZERO,
            coinbase: COINBASE,
            state_root: Hash::ZERO,
            gas_limit: BLOCK_GAS_LIMIT,
            timestamp: 1,
            chain_id: 1337,
        }
    }

    fn snapshot(code: &[u8]) -> (SnapshotManager, TrackingSnapshot) {
        let store = Arc::new(StateStore::new(4));
        let mut accounts = BTreeMap::new();
        accounts.insert(SENDER, Account::with_balance(U256::from(1_000_000)));
        accounts.insert(CONTRACT, Account::with_code(Bytes::from_slice(code)));
        let root = store.insert_genesis(accounts);
        let manager = SnapshotManager::new(store);
        let snap = manager.open_tracking(&root).unwrap();
        (manager, snap)
    }

    fn call(payload: Vec<u8>, gas_limit: u64) -> TransactionRequest {
        TransactionRequest {
            sender: SENDER,
            to: Some(CONTRACT),
            value: U256::zero(),
            payload: Bytes::from_vec(payload),
            nonce: 0,
            gas_limit,
            gas_price: U256::one(),
            signature: EcdsaSignature::PLACEHOLDER,
        }
    }

    fn adapter(engine: Arc<dyn ExecutionEngine>) -> EngineAdapter {
        EngineAdapter::new(engine, 1024)
    }

    #[test]
    fn test_validation_rejects_bad_requests() {
        let (_m, mut snap) = snapshot(&[]);
        let adapter = adapter(Arc::new(EvmEngine::default()));

        let zero_gas = call(Vec::new(), 0);
        assert!(matches!(
            adapter.run(&zero_gas, &mut snap, &block(), true),
            Err(ExecutionError::MalformedTransaction(_))
        ));

        let below_intrinsic = call(vec![1, 2, 3], 21_000);
        assert!(matches!(
            adapter.run(&below_intrinsic, &mut snap, &block(), true),
            Err(ExecutionError::MalformedTransaction(_))
        ));

        let oversized = call(vec![1; 2048], 10_000_000);
        assert!(matches!(
            adapter.run(&oversized, &mut snap, &block(), true),
            Err(ExecutionError::MalformedTransaction(_))
        ));

        let mut create = call(Vec::new(), 100_000);
        create.to = None;
        assert!(matches!(
            adapter.run(&create, &mut snap, &block(), true),
            Err(ExecutionError::MalformedTransaction(_))
        ));

        let unsigned = call(Vec::new(), 100_000);
        assert!(matches!(
            adapter.run(&unsigned, &mut snap, &block(), false),
            Err(ExecutionError::MalformedTransaction(_))
        ));
    }

    #[test]
    fn test_live_context_checks() {
        let (_m, mut snap) = snapshot(&[]);
        let adapter = adapter(Arc::new(EvmEngine::default()));
        let signed = |mut tx: TransactionRequest| {
            tx.signature = EcdsaSignature::new([1; 32], [1; 32], 27);
            tx
        };

        let mut wrong_nonce = signed(call(Vec::new(), 21_000));
        wrong_nonce.nonce = 5;
        assert!(matches!(
            adapter.run(&wrong_nonce, &mut snap, &block(), false),
            Err(ExecutionError::ContextInitFailed(msg)) if msg.contains("nonce")
        ));

        let over_block = signed(call(Vec::new(), BLOCK_GAS_LIMIT + 1));
        assert!(matches!(
            adapter.run(&over_block, &mut snap, &block(), false),
            Err(ExecutionError::ContextInitFailed(_))
        ));

        let mut too_expensive = signed(call(Vec::new(), 21_000));
        too_expensive.gas_price = U256::from(1_000);
        assert!(matches!(
            adapter.run(&too_expensive, &mut snap, &block(), false),
            Err(ExecutionError::ContextInitFailed(msg)) if msg.contains("insufficient balance")
        ));
        assert_eq!(snap.journal_len(), 0);
    }

    #[test]
    fn test_live_run_charges_fees_and_bumps_nonce() {
        let (_m, mut snap) = snapshot(&[]);
        let adapter = adapter(Arc::new(EvmEngine::default()));
        let mut tx = call(Vec::new(), 50_000);
        tx.gas_price = U256::from(2);
        tx.value = U256::from(10);
        tx.signature = EcdsaSignature::new([1; 32], [1; 32], 27);

        let outcome = adapter.run(&tx, &mut snap, &block(), false).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.gas_used, 21_000);
        assert_eq!(
            snap.balance(&SENDER).unwrap(),
            U256::from(1_000_000 - 10 - 21_000 * 2)
        );
        assert_eq!(snap.balance(&COINBASE).unwrap(), U256::from(42_000));
        assert_eq!(snap.nonce(&SENDER).unwrap(), 1);
    }

    #[test]
    fn test_local_run_leaves_fees_and_nonce_alone() {
        // PUSH1 0 PUSH1 0 RETURN
        let (_m, mut snap) = snapshot(&[0x60, 0, 0x60, 0, 0xF3]);
        let adapter = adapter(Arc::new(EvmEngine::default()));
        let mut tx = call(Vec::new(), 100_000);
        tx.nonce = 99;
        let outcome = adapter.run(&tx, &mut snap, &block(), true).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.gas_used, 21_000 + 6);
        assert_eq!(snap.journal_len(), 0);
    }

    #[test]
    fn test_local_transfer_without_funds_is_unsuccessful_outcome() {
        let (_m, mut snap) = snapshot(&[]);
        let adapter = adapter(Arc::new(EvmEngine::default()));
        let mut tx = call(Vec::new(), 21_000);
        tx.value = U256::from(2_000_000);
        let outcome = adapter.run(&tx, &mut snap, &block(), true).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.failure_reason(), INSUFFICIENT_TRANSFER_BALANCE);
    }

    #[test]
    fn test_revert_reason_is_decoded() {
        let reason = encode_revert_reason("paused");
        // Copy revert data into memory via CODECOPY, then REVERT.
        let len = u8::try_from(reason.len()).unwrap();
        let mut code = vec![0x60, len, 0x60, 12, 0x60, 0, 0x39, 0x60, len, 0x60, 0, 0xFD];
        code.extend_from_slice(reason.as_slice());
        let (_m, mut snap) = snapshot(&code);
        let adapter = adapter(Arc::new(EvmEngine::default()));

        let outcome = adapter.run(&call(Vec::new(), 100_000), &mut snap, &block(), true).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.revert_reason.as_deref(), Some("paused"));
    }

    #[test]
    fn test_engine_panic_becomes_fault_and_reverts() {
        let (_m, mut snap) = snapshot(&[0x00]);
        let adapter = adapter(Arc::new(PanickingEngine));
        let result = adapter.run(&call(Vec::new(), 100_000), &mut snap, &block(), true);
        assert!(matches!(
            result,
            Err(ExecutionError::EngineFault(msg)) if msg.contains("interpreter bug")
        ));
        assert_eq!(snap.journal_len(), 0);
    }

    #[test]
    fn test_engine_error_becomes_fault() {
        let (_m, mut snap) = snapshot(&[0x00]);
        let adapter = adapter(Arc::new(FaultingEngine));
        assert!(matches!(
            adapter.run(&call(Vec::new(), 100_000), &mut snap, &block(), true),
            Err(ExecutionError::EngineFault(_))
        ));
    }

    #[test]
    fn test_refund_is_capped_at_a_fifth() {
        let frame = FrameOutcome {
            status: FrameStatus::Success,
            output: Bytes::new(),
            gas_used: 5_000,
            gas_refund: 100_000,
            logs: Vec::new(),
        };
        let outcome = assemble(frame, 21_000);
        assert_eq!(outcome.gas_used, 26_000 - 5_200);
    }
}
