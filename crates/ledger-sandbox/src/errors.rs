//! # Error Types
//!
//! Layered error taxonomy. Lower layers (`StateError`, `VmError`) are folded
//! into [`BackendError`], the only error type callers of the backend see.

use crate::domain::value_objects::Hash;
use thiserror::Error;

// =============================================================================
// STATE ERRORS
// =============================================================================

/// Errors from the state repository and its views.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The root existed but has been pruned.
    #[error("state unavailable: root {root:?} has been pruned")]
    Unavailable {
        /// Pruned root.
        root: Hash,
    },

    /// The root was never known to the repository.
    #[error("invalid state root: {root:?}")]
    InvalidRoot {
        /// Unknown root.
        root: Hash,
    },

    /// No block at this height.
    #[error("block not found: height {number}")]
    BlockNotFound {
        /// Requested height.
        number: u64,
    },

    /// Write attempted on a committed or rolled-back snapshot.
    #[error("snapshot already finalized")]
    SnapshotFinalized,
}

// =============================================================================
// SNAPSHOT ERRORS
// =============================================================================

/// Errors from terminal snapshot operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// `commit` called on a snapshot that was already committed or rolled back.
    #[error("snapshot already finalized")]
    AlreadyFinalized,

    /// The parent repository refused the change set.
    #[error("state error: {0}")]
    State(#[from] StateError),
}

// =============================================================================
// VM ERRORS
// =============================================================================

/// Errors raised inside the interpreter.
///
/// Most variants are exceptional halts: the frame fails, consumes its gas and
/// the transaction still produces an outcome. [`VmError::is_fault`] picks out
/// the ones the engine cannot turn into an outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    /// Execution ran out of gas.
    #[error("out of gas")]
    OutOfGas,

    /// Stack overflow (>1024 items).
    #[error("stack overflow")]
    StackOverflow,

    /// Pop from an empty stack.
    #[error("stack underflow")]
    StackUnderflow,

    /// Undefined opcode.
    #[error("invalid opcode: 0x{0:02X}")]
    InvalidOpcode(u8),

    /// Jump to a non-JUMPDEST position.
    #[error("invalid jump destination: {0}")]
    InvalidJump(usize),

    /// Memory expansion past the configured cap.
    #[error("memory limit exceeded: {requested} > {max} bytes")]
    MemoryLimitExceeded {
        /// Requested size in bytes.
        requested: usize,
        /// Cap in bytes.
        max: usize,
    },

    /// RETURNDATACOPY past the end of the return buffer.
    #[error("return data out of bounds: offset {offset}, size {size}, available {available}")]
    ReturnDataOutOfBounds {
        /// Copy offset.
        offset: usize,
        /// Copy length.
        size: usize,
        /// Buffer length.
        available: usize,
    },

    /// SSTORE or LOG inside a static frame.
    #[error("write operation in static context")]
    WriteInStaticContext,

    /// Interpreter step budget exhausted.
    #[error("step limit exceeded: {0}")]
    StepLimitExceeded(u64),

    /// Opcode recognised but not implemented by this engine.
    #[error("unsupported opcode: 0x{0:02X}")]
    Unsupported(u8),

    /// The execution state failed underneath the interpreter.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Internal invariant broken.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VmError {
    /// Returns true if the error cannot be expressed as a failed outcome.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::Unsupported(_) | Self::State(_) | Self::Internal(_)
        )
    }
}

// =============================================================================
// EXECUTION ERRORS
// =============================================================================

/// Aborts raised by the engine adapter. No outcome exists when these occur.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The request failed well-formedness checks.
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    /// Context could not be initialised against the snapshot and block.
    #[error("context init failed: {0}")]
    ContextInitFailed(String),

    /// Unrecoverable engine failure during execution.
    #[error("engine fault: {0}")]
    EngineFault(String),
}

// =============================================================================
// SIGNING & POOL ERRORS
// =============================================================================

/// Errors from key handling and signature recovery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// Private key bytes are not a valid secp256k1 scalar.
    #[error("invalid private key")]
    InvalidKey,

    /// The signer rejected the digest.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Public key recovery failed.
    #[error("signature recovery failed: {0}")]
    RecoveryFailed(String),
}

/// Errors from the pending transaction pool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Pool is at capacity.
    #[error("transaction pool full (capacity {capacity})")]
    PoolFull {
        /// Configured capacity.
        capacity: usize,
    },

    /// Same transaction hash already pending.
    #[error("transaction already known: {0:?}")]
    AlreadyKnown(Hash),
}

// =============================================================================
// BACKEND ERRORS
// =============================================================================

/// Coarse classification used for retry decisions and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or pruned state; retry against another root.
    StateAccess,
    /// Caller mistake; do not retry.
    MalformedInput,
    /// Revert or halt reported as an unsuccessful outcome.
    ExecutionSemantic,
    /// Engine failure for this call.
    EngineFault,
}

/// Caller-facing backend error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The referenced root was pruned.
    #[error("state unavailable at root {root:?}")]
    StateUnavailable {
        /// Pruned root.
        root: Hash,
    },

    /// The referenced root is unknown.
    #[error("invalid state root {root:?}")]
    InvalidRoot {
        /// Unknown root.
        root: Hash,
    },

    /// No block at the requested height.
    #[error("block not found: height {number}")]
    BlockNotFound {
        /// Requested height.
        number: u64,
    },

    /// Request failed validation.
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    /// The account key could not sign.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Context init aborted the transaction.
    #[error("context init failed: {0}")]
    ContextInitFailed(String),

    /// The call ran to completion but did not succeed.
    #[error("call failed: {reason}")]
    CallFailed {
        /// Decoded revert reason or halt description.
        reason: String,
    },

    /// Unrecoverable engine failure.
    #[error("engine fault: {0}")]
    EngineFault(String),

    /// Second terminal operation on a snapshot.
    #[error("snapshot already finalized")]
    AlreadyFinalized,

    /// Argument encoding or result decoding failed.
    #[error("abi error: {0}")]
    Abi(String),
}

impl BackendError {
    /// Category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::StateUnavailable { .. } | Self::InvalidRoot { .. } | Self::BlockNotFound { .. } => {
                ErrorCategory::StateAccess
            }
            Self::MalformedTransaction(_)
            | Self::SigningFailed(_)
            | Self::ContextInitFailed(_)
            | Self::AlreadyFinalized
            | Self::Abi(_) => ErrorCategory::MalformedInput,
            Self::CallFailed { .. } => ErrorCategory::ExecutionSemantic,
            Self::EngineFault(_) => ErrorCategory::EngineFault,
        }
    }

    /// State-access errors may succeed against a different root.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::StateAccess
    }
}

impl From<StateError> for BackendError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Unavailable { root } => Self::StateUnavailable { root },
            StateError::InvalidRoot { root } => Self::InvalidRoot { root },
            StateError::BlockNotFound { number } => Self::BlockNotFound { number },
            StateError::SnapshotFinalized => Self::AlreadyFinalized,
        }
    }
}

impl From<SnapshotError> for BackendError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::AlreadyFinalized => Self::AlreadyFinalized,
            SnapshotError::State(state) => state.into(),
        }
    }
}

impl From<ExecutionError> for BackendError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::MalformedTransaction(msg) => Self::MalformedTransaction(msg),
            ExecutionError::ContextInitFailed(msg) => Self::ContextInitFailed(msg),
            ExecutionError::EngineFault(msg) => Self::EngineFault(msg),
        }
    }
}

impl From<SigningError> for BackendError {
    fn from(err: SigningError) -> Self {
        Self::SigningFailed(err.to_string())
    }
}

impl From<PoolError> for BackendError {
    fn from(err: PoolError) -> Self {
        Self::EngineFault(format!("pool rejected transaction: {err}"))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_error_fault_split() {
        assert!(!VmError::OutOfGas.is_fault());
        assert!(!VmError::InvalidOpcode(0xef).is_fault());
        assert!(VmError::Unsupported(0xf1).is_fault());
        assert!(VmError::State(StateError::SnapshotFinalized).is_fault());
    }

    #[test]
    fn test_state_errors_map_to_retryable_backend_errors() {
        let root = Hash::new([9; 32]);
        let err: BackendError = StateError::Unavailable { root }.into();
        assert_eq!(err, BackendError::StateUnavailable { root });
        assert!(err.is_retryable());

        let err: BackendError = StateError::InvalidRoot { root }.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_execution_errors_keep_their_kind() {
        let err: BackendError = ExecutionError::EngineFault("boom".into()).into();
        assert_eq!(err.category(), ErrorCategory::EngineFault);
        assert!(!err.is_retryable());

        let err: BackendError = ExecutionError::MalformedTransaction("gas".into()).into();
        assert_eq!(err.category(), ErrorCategory::MalformedInput);
    }

    #[test]
    fn test_snapshot_error_conversion() {
        let err: BackendError = SnapshotError::AlreadyFinalized.into();
        assert_eq!(err, BackendError::AlreadyFinalized);
    }

    #[test]
    fn test_pool_rejection_is_engine_fault() {
        let err: BackendError = PoolError::PoolFull { capacity: 1 }.into();
        assert!(matches!(err, BackendError::EngineFault(_)));
    }

    #[test]
    fn test_error_display() {
        let err = BackendError::CallFailed {
            reason: "not owner".into(),
        };
        assert_eq!(err.to_string(), "call failed: not owner");
        assert_eq!(VmError::InvalidOpcode(0x0c).to_string(), "invalid opcode: 0x0C");
    }
}
