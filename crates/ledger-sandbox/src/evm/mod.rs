//! # Reference EVM
//!
//! Single-frame bytecode engine behind [`ExecutionEngine`].
//!
//! | Module | Role |
//! |--------|------|
//! | `interpreter` | Fetch/decode/execute loop |
//! | `opcodes` | Instruction decoding |
//! | `gas` | Static costs and dynamic pricing rules |
//! | `memory` | Word-aligned frame memory, 16 MiB cap |
//! | `stack` | 1024-word operand stack |
//!
//! Message calls and contract creation are out of scope: those opcodes fault
//! with `VmError::Unsupported` and surface as engine faults.

pub mod gas;
pub mod interpreter;
pub mod memory;
pub mod opcodes;
pub mod stack;

pub use interpreter::Interpreter;
pub use memory::Memory;
pub use opcodes::Opcode;
pub use stack::Stack;

use crate::domain::value_objects::Bytes;
use crate::errors::VmError;
use crate::ports::outbound::{CallFrame, ExecutionEngine, ExecutionState, FrameOutcome, FrameStatus};
use tracing::trace;

/// Default interpreter step budget.
pub const DEFAULT_MAX_STEPS: u64 = 10_000_000;

/// Bundled [`ExecutionEngine`].
#[derive(Clone, Copy, Debug)]
pub struct EvmEngine {
    max_steps: u64,
}

impl EvmEngine {
    /// Engine with a step budget per frame.
    #[must_use]
    pub fn new(max_steps: u64) -> Self {
        Self { max_steps }
    }
}

impl Default for EvmEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS)
    }
}

impl ExecutionEngine for EvmEngine {
    fn execute(
        &self,
        frame: &CallFrame,
        state: &mut dyn ExecutionState,
    ) -> Result<FrameOutcome, VmError> {
        let checkpoint = state.checkpoint();
        let result = Interpreter::new(frame, &mut *state, self.max_steps).run();

        match result {
            Ok(outcome) => {
                if outcome.status != FrameStatus::Success {
                    state.revert_to(checkpoint);
                }
                trace!(
                    address = ?frame.address,
                    status = ?outcome.status,
                    gas_used = outcome.gas_used,
                    "frame finished"
                );
                Ok(outcome)
            }
            Err(err) if err.is_fault() => {
                state.revert_to(checkpoint);
                Err(err)
            }
            Err(halt) => {
                state.revert_to(checkpoint);
                trace!(address = ?frame.address, reason = %halt, "frame halted");
                Ok(FrameOutcome {
                    status: FrameStatus::Halt(halt.to_string()),
                    output: Bytes::new(),
                    gas_used: frame.gas_limit,
                    gas_refund: 0,
                    logs: Vec::new(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::chain::StateStore;
    use crate::domain::entities::{Account, BlockContext, BLOCK_GAS_LIMIT};
    use crate::domain::value_objects::{Address, Hash, StorageKey, U256};
    use crate::snapshot::SnapshotManager;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const CONTRACT: Address = Address::from_low_u8(0xcc);

    fn frame(code: Vec<u8>, gas_limit: u64) -> CallFrame {
        CallFrame {
            origin: Address::from_low_u8(1),
            caller: Address::from_low_u8(1),
            address: CONTRACT,
            value: U256::zero(),
            input: Bytes::new(),
            code: Bytes::from_vec(code),
            gas_limit,
            gas_price: U256::one(),
            block: BlockContext {
                number: 7,
                hash: Hash::ZERO,
                parent_hash: Hash::ZERO,
                coinbase: Address::ZERO,
                state_root: Hash::ZERO,
                gas_limit: BLOCK_GAS_LIMIT,
                timestamp: 1_700_000_000,
                chain_id: 1337,
            },
            is_static: false,
        }
    }

    fn run(code: Vec<u8>, gas_limit: u64) -> (Result<FrameOutcome, VmError>, usize) {
        let store = Arc::new(StateStore::new(4));
        let mut accounts = BTreeMap::new();
        accounts.insert(CONTRACT, Account::with_code(Bytes::from_vec(code.clone())));
        let root = store.insert_genesis(accounts);
        let manager = SnapshotManager::new(store);
        let mut snap = manager.open_tracking(&root).unwrap();
        let result = EvmEngine::default().execute(&frame(code, gas_limit), &mut snap);
        (result, snap.journal_len())
    }

    #[test]
    fn test_return_word() {
        // PUSH1 42 PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
        let code = vec![0x60, 42, 0x60, 0, 0x52, 0x60, 32, 0x60, 0, 0xF3];
        let (result, _) = run(code, 100_000);
        let outcome = result.unwrap();
        assert_eq!(outcome.status, FrameStatus::Success);
        assert_eq!(U256::from_big_endian(outcome.output.as_slice()), U256::from(42));
        // 4 pushes + MSTORE + 1 word of memory
        assert_eq!(outcome.gas_used, 4 * 3 + 3 + 3);
    }

    #[test]
    fn test_sstore_is_journaled_and_charged() {
        // PUSH1 1 PUSH1 0 SSTORE STOP
        let code = vec![0x60, 1, 0x60, 0, 0x55, 0x00];
        let (result, journal) = run(code, 100_000);
        let outcome = result.unwrap();
        assert_eq!(outcome.gas_used, 3 + 3 + 2100 + 20_000);
        assert!(journal > 0);
    }

    #[test]
    fn test_rewriting_a_slot_is_priced_against_its_original_value() {
        // PUSH1 1 PUSH1 0 SSTORE PUSH1 2 PUSH1 0 SSTORE STOP
        let code = vec![0x60, 1, 0x60, 0, 0x55, 0x60, 2, 0x60, 0, 0x55, 0x00];
        let outcome = run(code, 100_000).0.unwrap();
        assert_eq!(outcome.gas_used, 6 + 2100 + 20_000 + 6 + 100);
        assert_eq!(outcome.gas_refund, 0);
    }

    #[test]
    fn test_set_then_clear_refunds_the_set() {
        // PUSH1 1 PUSH1 0 SSTORE PUSH1 0 PUSH1 0 SSTORE STOP
        let code = vec![0x60, 1, 0x60, 0, 0x55, 0x60, 0, 0x60, 0, 0x55, 0x00];
        let outcome = run(code, 100_000).0.unwrap();
        assert_eq!(outcome.gas_used, 6 + 2100 + 20_000 + 6 + 100);
        assert_eq!(outcome.gas_refund, 19_900);
    }

    #[test]
    fn test_revert_undoes_writes() {
        // PUSH1 1 PUSH1 0 SSTORE PUSH1 0 PUSH1 0 REVERT
        let code = vec![0x60, 1, 0x60, 0, 0x55, 0x60, 0, 0x60, 0, 0xFD];
        let (result, journal) = run(code, 100_000);
        assert_eq!(result.unwrap().status, FrameStatus::Revert);
        assert_eq!(journal, 0);
    }

    #[test]
    fn test_out_of_gas_consumes_frame_gas() {
        let code = vec![0x60, 1, 0x60, 0, 0x55, 0x00];
        let (result, journal) = run(code, 10_000);
        let outcome = result.unwrap();
        assert_eq!(outcome.status, FrameStatus::Halt("out of gas".into()));
        assert_eq!(outcome.gas_used, 10_000);
        assert_eq!(journal, 0);
    }

    #[test]
    fn test_invalid_jump_halts() {
        // PUSH1 3 JUMP STOP
        let (result, _) = run(vec![0x60, 3, 0x56, 0x00], 100_000);
        assert!(matches!(result.unwrap().status, FrameStatus::Halt(_)));
    }

    #[test]
    fn test_infinite_loop_hits_step_limit() {
        // JUMPDEST PUSH1 0 JUMP
        let code = vec![0x5B, 0x60, 0, 0x56];
        let store = Arc::new(StateStore::new(4));
        let root = store.insert_genesis(BTreeMap::new());
        let manager = SnapshotManager::new(store);
        let mut snap = manager.open_tracking(&root).unwrap();
        let outcome = EvmEngine::new(1_000)
            .execute(&frame(code, u64::MAX / 2), &mut snap)
            .unwrap();
        assert_eq!(outcome.status, FrameStatus::Halt("step limit exceeded: 1000".into()));
    }

    #[test]
    fn test_call_opcode_is_a_fault() {
        let (result, _) = run(vec![0xF1], 100_000);
        assert_eq!(result.unwrap_err(), VmError::Unsupported(0xF1));
    }

    #[test]
    fn test_sload_reads_snapshot() {
        let store = Arc::new(StateStore::new(4));
        // PUSH1 5 SLOAD PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
        let code = vec![0x60, 5, 0x54, 0x60, 0, 0x52, 0x60, 32, 0x60, 0, 0xF3];
        let mut accounts = BTreeMap::new();
        accounts.insert(
            CONTRACT,
            Account::with_code(Bytes::from_vec(code.clone())).with_storage(
                StorageKey::from_u256(U256::from(5)),
                crate::domain::value_objects::StorageValue::from_u256(U256::from(99)),
            ),
        );
        let root = store.insert_genesis(accounts);
        let manager = SnapshotManager::new(store);
        let mut snap = manager.open_tracking(&root).unwrap();
        let outcome = EvmEngine::default()
            .execute(&frame(code, 100_000), &mut snap)
            .unwrap();
        assert_eq!(U256::from_big_endian(outcome.output.as_slice()), U256::from(99));
    }

    #[test]
    fn test_static_frame_rejects_sstore() {
        let store = Arc::new(StateStore::new(4));
        let root = store.insert_genesis(BTreeMap::new());
        let manager = SnapshotManager::new(store);
        let mut snap = manager.open_tracking(&root).unwrap();
        let mut f = frame(vec![0x60, 1, 0x60, 0, 0x55], 100_000);
        f.is_static = true;
        let outcome = EvmEngine::default().execute(&f, &mut snap).unwrap();
        assert_eq!(
            outcome.status,
            FrameStatus::Halt("write operation in static context".into())
        );
    }
}
