//! End-to-end properties of the sandboxed simulation layer over the in-memory
//! chain and the bundled EVM.

use ledger_sandbox::contract::selector;
use ledger_sandbox::errors::VmError;
use ledger_sandbox::ports::outbound::{CallFrame, FrameOutcome};
use ledger_sandbox::prelude::*;
use ledger_sandbox::snapshot::SnapshotStatus;
use std::sync::Arc;

const STORE: Address = Address::from_low_u8(0xc0);
const REVERTER: Address = Address::from_low_u8(0xc1);
const NOWHERE: Address = Address::from_low_u8(0xd0);

/// `get()` returns the constant 42, `set(uint256)` writes slot 0 and returns
/// the previous value, `value()` returns slot 0.
fn store_code() -> Vec<u8> {
    let mut code = vec![0x60, 0x00, 0x35, 0x60, 0xE0, 0x1C];
    for (signature, dest) in [("get()", 40u8), ("set(uint256)", 51), ("value()", 69)] {
        code.extend_from_slice(&[0x80, 0x63]);
        code.extend_from_slice(&selector(signature));
        code.extend_from_slice(&[0x14, 0x60, dest, 0x57]);
    }
    code.extend_from_slice(&[0x60, 0x00, 0x80, 0xFD]);
    // 40: get
    code.extend_from_slice(&[0x5B, 0x60, 42, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xF3]);
    // 51: set
    code.extend_from_slice(&[
        0x5B, 0x60, 0x00, 0x54, 0x60, 0x00, 0x52, 0x60, 0x04, 0x35, 0x60, 0x00, 0x55, 0x60, 0x20,
        0x60, 0x00, 0xF3,
    ]);
    // 69: value
    code.extend_from_slice(&[
        0x5B, 0x60, 0x00, 0x54, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xF3,
    ]);
    code
}

fn get_payload() -> Bytes {
    Bytes::from_slice(&selector("get()"))
}

fn value_payload() -> Bytes {
    Bytes::from_slice(&selector("value()"))
}

fn word(data: &Bytes) -> U256 {
    assert_eq!(data.len(), 32);
    U256::from_big_endian(data.as_slice())
}

fn set_payload(value: u64) -> Bytes {
    let mut data = selector("set(uint256)").to_vec();
    let mut word = [0u8; 32];
    U256::from(value).to_big_endian(&mut word);
    data.extend_from_slice(&word);
    Bytes::from_vec(data)
}

struct Harness {
    backend: SandboxBackend<InMemoryChain>,
    alice: SigningAccount,
}

fn harness_with(engine: Option<Arc<dyn ExecutionEngine>>) -> Harness {
    let alice = SigningAccount::random();
    let config = BackendConfig::default();
    let genesis = Genesis::new()
        .with_account(alice.address(), Account::with_balance(U256::from(1000)))
        .with_account(STORE, Account::with_code(Bytes::from_vec(store_code())))
        .with_account(
            REVERTER,
            Account::with_code(Bytes::from_slice(&[0x60, 0x00, 0x80, 0xFD])),
        );
    let chain = Arc::new(InMemoryChain::new(&config, genesis));
    let backend = match engine {
        Some(engine) => SandboxBackend::with_engine(chain, engine, config),
        None => SandboxBackend::new(chain, config),
    };
    Harness { backend, alice }
}

fn harness() -> Harness {
    harness_with(None)
}

/// Everything observable about the accounts the tests touch.
fn fingerprint(h: &Harness) -> Vec<(U256, u64, Bytes, StorageValue)> {
    [h.alice.address(), STORE, REVERTER, NOWHERE]
        .iter()
        .map(|a| {
            (
                h.backend.get_balance(a).unwrap(),
                h.backend.get_nonce(a).unwrap(),
                h.backend.get_code(a).unwrap(),
                h.backend.get_storage_at(a, &StorageKey::ZERO).unwrap(),
            )
        })
        .collect()
}

struct FaultAfterWrite;

impl ExecutionEngine for FaultAfterWrite {
    fn execute(
        &self,
        frame: &CallFrame,
        state: &mut dyn ExecutionState,
    ) -> Result<FrameOutcome, VmError> {
        state.set_storage(
            &frame.address,
            StorageKey::ZERO,
            StorageValue::from_u256(U256::from(0xdead)),
        )?;
        Err(VmError::Unsupported(0xF1))
    }
}

#[test]
fn simulations_leave_live_state_identical() {
    let h = harness();
    let root = h.backend.chain().best_block().state_root;
    let before = fingerprint(&h);
    let sender = h.alice.address();

    // success with a storage write
    h.backend
        .constant_call(&sender, &STORE, U256::zero(), set_payload(9))
        .unwrap();
    // success with a value transfer
    h.backend
        .constant_call(&sender, &NOWHERE, U256::from(600), Bytes::new())
        .unwrap();
    // revert
    let err = h
        .backend
        .constant_call(&sender, &REVERTER, U256::zero(), Bytes::new())
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ExecutionSemantic);

    assert_eq!(fingerprint(&h), before);
    assert_eq!(h.backend.chain().best_block().state_root, root);
    assert_eq!(h.backend.snapshot_manager().open_count(), 0);
}

#[test]
fn engine_fault_rolls_back_before_propagating() {
    let h = harness_with(Some(Arc::new(FaultAfterWrite)));
    let before = fingerprint(&h);

    let err = h
        .backend
        .constant_call(&h.alice.address(), &STORE, U256::zero(), get_payload())
        .unwrap_err();
    assert!(matches!(err, BackendError::EngineFault(_)));

    let err = h
        .backend
        .estimate_gas(&h.alice.address(), &STORE, U256::zero(), get_payload())
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::EngineFault);

    assert_eq!(fingerprint(&h), before);
    assert_eq!(h.backend.snapshot_manager().open_count(), 0);
}

#[test]
fn rollback_is_idempotent() {
    let h = harness();
    let root = h.backend.chain().best_block().state_root;
    let mut snapshot = h.backend.snapshot_manager().open_tracking(&root).unwrap();
    snapshot
        .set_balance(&h.alice.address(), U256::from(1))
        .unwrap();

    snapshot.rollback();
    snapshot.rollback();
    assert_eq!(snapshot.status(), SnapshotStatus::RolledBack);
    assert_eq!(snapshot.pending_accounts(), 0);
    assert_eq!(h.backend.get_balance(&h.alice.address()).unwrap(), U256::from(1000));
}

#[test]
fn second_commit_is_already_finalized() {
    let h = harness();
    let root = h.backend.chain().best_block().state_root;
    let mut snapshot = h.backend.snapshot_manager().open_tracking(&root).unwrap();
    snapshot.set_nonce(&NOWHERE, 3).unwrap();
    snapshot.commit().unwrap();
    let err: BackendError = snapshot.commit().unwrap_err().into();
    assert_eq!(err, BackendError::AlreadyFinalized);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_simulations_match_sequential_results() {
    let h = Arc::new(harness());
    let sender = h.alice.address();
    let block_number = h.backend.chain().best_block().number;

    // Writers store 7 and return what the slot held before; readers load it.
    let write = move |h: &Harness| {
        h.backend
            .constant_call(&sender, &STORE, U256::zero(), set_payload(7))
            .unwrap()
    };
    let read = move |h: &Harness| {
        h.backend
            .constant_call_at(block_number, &sender, &STORE, U256::zero(), value_payload())
            .unwrap()
    };

    let sequential = (write(&*h), read(&*h));
    assert!(word(&sequential.0).is_zero());
    assert!(word(&sequential.1).is_zero());

    let mut tasks = Vec::new();
    for i in 0..32 {
        let h = Arc::clone(&h);
        tasks.push(tokio::task::spawn_blocking(move || {
            if i % 2 == 0 {
                (true, write(&*h))
            } else {
                (false, read(&*h))
            }
        }));
    }
    for task in tasks {
        let (is_write, out) = task.await.unwrap();
        let expected = if is_write { &sequential.0 } else { &sequential.1 };
        assert_eq!(&out, expected, "slot 0 leaked between simulations");
    }

    assert_eq!(h.backend.snapshot_manager().open_count(), 0);
    assert!(h
        .backend
        .get_storage_at(&STORE, &StorageKey::ZERO)
        .unwrap()
        .is_zero());
}

#[test]
fn estimate_without_writes_is_cheaper_than_with_writes() {
    let h = harness();
    let sender = h.alice.address();
    let read = h
        .backend
        .estimate_gas(&sender, &STORE, U256::zero(), get_payload())
        .unwrap();
    let write = h
        .backend
        .estimate_gas(&sender, &STORE, U256::zero(), set_payload(1))
        .unwrap();
    assert!(read < write, "read {read} should be below write {write}");
    assert!(write > 20_000);
}

#[test]
fn submit_with_insufficient_balance_still_returns_hash() {
    let h = harness();
    let hash = h
        .backend
        .submit(
            &h.alice,
            &NOWHERE,
            U256::from(1_000_000),
            Bytes::new(),
            0,
            21_000,
        )
        .unwrap();
    assert_eq!(h.backend.transaction_status(&hash), TransactionStatus::Pending);

    h.backend.chain().mine_block().unwrap();
    match h.backend.transaction_status(&hash) {
        TransactionStatus::Dropped { reason } => {
            assert!(reason.contains("insufficient balance"), "{reason}");
        }
        other => panic!("expected drop, got {other:?}"),
    }
    assert_eq!(h.backend.get_balance(&h.alice.address()).unwrap(), U256::from(1000));
}

#[test]
fn constant_get_returns_42_and_keeps_balance() {
    let h = harness();
    let out = h
        .backend
        .constant_call(&h.alice.address(), &STORE, U256::zero(), get_payload())
        .unwrap();
    assert_eq!(out.len(), 32);
    assert_eq!(U256::from_big_endian(out.as_slice()), U256::from(42));
    assert_eq!(h.backend.get_balance(&h.alice.address()).unwrap(), U256::from(1000));
}

#[test]
fn repeated_estimates_agree() {
    let h = harness();
    let sender = h.alice.address();
    let first = h
        .backend
        .estimate_gas(&sender, &STORE, U256::zero(), set_payload(3))
        .unwrap();
    let second = h
        .backend
        .estimate_gas(&sender, &STORE, U256::zero(), set_payload(3))
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn call_to_empty_account_returns_empty_data() {
    let h = harness();
    let out = h
        .backend
        .constant_call(&h.alice.address(), &NOWHERE, U256::zero(), Bytes::new())
        .unwrap();
    assert!(out.is_empty());
    assert!(!h.backend.address_exists(&NOWHERE));
}
