//! # Ledger Sandbox - Sandboxed Simulation Backend
//!
//! ## Purpose
//!
//! A backend over a ledger execution engine: account queries, signed
//! transaction submission, and read-only simulation of contract calls and
//! gas estimation against a point-in-time state snapshot. Simulations never
//! mutate live state, whether the call succeeds, reverts or the engine
//! faults.
//!
//! ## Components
//!
//! | Component | Location | Role |
//! |-----------|----------|------|
//! | StateView | `ports/outbound.rs` | Read-only accounts at one root |
//! | Snapshot Manager | `snapshot/` | Copy-on-write overlays, commit/rollback |
//! | Engine Adapter | `execution.rs` | validate → init → execute → finalize |
//! | Call Simulator | `simulator.rs` | Scoped snapshot, always rolled back |
//! | Gas Estimator | `simulator.rs` | Observed consumption at the best block |
//! | Live Submission | `submission.rs` | Sign and queue, no snapshot |
//! | Backend | `service.rs` | `LedgerBackend` over injected ports |
//! | Contract layer | `contract.rs` | ABI codec and typed handles |
//! | Reference chain | `adapters/chain.rs` | In-memory ledger, pool, mining |
//! | Reference EVM | `evm/` | Single-frame interpreter |
//!
//! ## Rollback Guarantees
//!
//! | Exit path | Mechanism |
//! |-----------|-----------|
//! | Success, revert, halt | `RollbackGuard::release` |
//! | `?` early return | `RollbackGuard` drop |
//! | Engine panic | `catch_unwind` in the adapter, then guard drop |
//!
//! ## Usage Example
//!
//! ```ignore
//! use ledger_sandbox::prelude::*;
//!
//! let config = BackendConfig::from_env();
//! let chain = Arc::new(InMemoryChain::new(&config, genesis));
//! let backend = SandboxBackend::new(chain, config);
//!
//! let data = backend.constant_call(&caller, &contract, U256::zero(), payload)?;
//! let gas = backend.estimate_gas(&caller, &contract, U256::zero(), payload)?;
//! ```

// Crate-level lints
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_arguments)]

// =============================================================================
// MODULES
// =============================================================================

pub mod adapters;
pub mod config;
pub mod contract;
pub mod domain;
pub mod errors;
pub mod events;
pub mod evm;
pub mod execution;
pub mod ports;
pub mod service;
pub mod signer;
pub mod simulator;
pub mod snapshot;
pub mod submission;
pub mod telemetry;

// =============================================================================
// PRELUDE
// =============================================================================

/// Convenient re-exports for common usage.
pub mod prelude {
    // Domain
    pub use crate::domain::entities::{
        Account, BlockContext, ExecutionOutcome, Log, TransactionReceipt, TransactionRequest,
        TransactionStatus,
    };
    pub use crate::domain::value_objects::{
        Address, Bytes, EcdsaSignature, Hash, StorageKey, StorageValue, U256,
    };

    // Ports
    pub use crate::ports::inbound::LedgerBackend;
    pub use crate::ports::outbound::{
        ChainReader, EventSource, ExecutionEngine, ExecutionState, GasPriceOracle,
        StateRepository, StateView, TransactionPool,
    };

    // Core
    pub use crate::execution::EngineAdapter;
    pub use crate::simulator::{CallSimulator, GasEstimator, SimulationId};
    pub use crate::snapshot::{RollbackGuard, SnapshotId, SnapshotManager, TrackingSnapshot};
    pub use crate::submission::LiveSubmission;

    // Backend
    pub use crate::config::{BackendConfig, LogConfig};
    pub use crate::contract::{AbiCodec, AbiType, AbiValue, ContractHandle, StaticAbi};
    pub use crate::errors::{BackendError, ErrorCategory};
    pub use crate::events::ChainEvent;
    pub use crate::service::{LedgerChain, SandboxBackend};
    pub use crate::signer::SigningAccount;

    // Reference implementations
    pub use crate::adapters::chain::{Genesis, InMemoryChain, StateStore};
    pub use crate::evm::EvmEngine;
}

// =============================================================================
// CRATE INFO
// =============================================================================

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
