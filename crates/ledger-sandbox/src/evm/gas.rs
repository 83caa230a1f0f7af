//! # Gas Schedule
//!
//! Static opcode costs plus the dynamic rules the interpreter needs:
//! EXP exponent bytes, hashing and copy words, LOG topics and data, and
//! SSTORE net-metered pricing against the slot's original value with
//! cold-slot surcharge (EIP-2200/2929/3529).

use crate::domain::value_objects::U256;

/// Gas cost constants.
pub mod costs {
    /// Base cost (`ADDRESS`, `POP`, ...).
    pub const BASE: u64 = 2;
    /// Very low cost (`ADD`, `PUSH`, ...).
    pub const VERY_LOW: u64 = 3;
    /// Low cost (`MUL`, `DIV`, ...).
    pub const LOW: u64 = 5;
    /// Mid cost (`ADDMOD`, `JUMP`).
    pub const MID: u64 = 8;
    /// High cost (`JUMPI`).
    pub const HIGH: u64 = 10;
    /// `JUMPDEST`.
    pub const JUMPDEST: u64 = 1;

    /// Per-word copy cost.
    pub const COPY: u64 = 3;
    /// Per-word memory expansion cost (linear part).
    pub const MEMORY: u64 = 3;
    /// Quadratic memory cost divisor.
    pub const QUADRATIC_DIVISOR: u64 = 512;

    /// First read of a slot in a transaction.
    pub const COLD_SLOAD: u64 = 2100;
    /// Subsequent reads.
    pub const WARM_SLOAD: u64 = 100;
    /// First touch of another account.
    pub const COLD_ACCOUNT_ACCESS: u64 = 2600;
    /// Subsequent touches.
    pub const WARM_ACCOUNT_ACCESS: u64 = 100;

    /// SSTORE turning a zero slot non-zero.
    pub const SSTORE_SET: u64 = 20_000;
    /// SSTORE changing a non-zero slot.
    pub const SSTORE_RESET: u64 = 2900;
    /// Refund for clearing a slot.
    pub const SSTORE_CLEAR_REFUND: i64 = 4800;
    /// Refund for restoring a slot that was zero before the transaction.
    pub const SSTORE_SET_REFUND: i64 = 19_900;
    /// Refund for restoring a slot that was non-zero before the transaction.
    pub const SSTORE_RESET_REFUND: i64 = 2800;
    /// Refunds are capped at `gas_used / MAX_REFUND_QUOTIENT`.
    pub const MAX_REFUND_QUOTIENT: u64 = 5;

    /// `KECCAK256` base.
    pub const KECCAK256: u64 = 30;
    /// `KECCAK256` per word.
    pub const KECCAK256_WORD: u64 = 6;
    /// `EXP` base.
    pub const EXP: u64 = 10;
    /// `EXP` per exponent byte.
    pub const EXP_BYTE: u64 = 50;
    /// `BLOCKHASH`.
    pub const BLOCKHASH: u64 = 20;

    /// `LOG` base.
    pub const LOG: u64 = 375;
    /// Per topic.
    pub const LOG_TOPIC: u64 = 375;
    /// Per data byte.
    pub const LOG_DATA: u64 = 8;
}

/// EXP: base plus 50 per significant exponent byte.
#[must_use]
pub fn exp_gas_cost(exponent: U256) -> u64 {
    if exponent.is_zero() {
        return costs::EXP;
    }
    let byte_size = (256 - u64::from(exponent.leading_zeros())).div_ceil(8);
    costs::EXP + costs::EXP_BYTE * byte_size
}

/// KECCAK256 over `size` bytes.
#[must_use]
pub fn keccak256_gas_cost(size: usize) -> u64 {
    costs::KECCAK256 + costs::KECCAK256_WORD * size.div_ceil(32) as u64
}

/// CALLDATACOPY / CODECOPY / RETURNDATACOPY dynamic part.
#[must_use]
pub fn copy_gas_cost(size: usize) -> u64 {
    costs::COPY * size.div_ceil(32) as u64
}

/// LOGn dynamic part.
#[must_use]
pub fn log_gas_cost(data_size: usize, topics: usize) -> u64 {
    costs::LOG + costs::LOG_TOPIC * topics as u64 + costs::LOG_DATA * data_size as u64
}

/// Total cost of holding `words` words of memory.
#[must_use]
pub fn memory_cost(words: u64) -> u64 {
    costs::MEMORY
        .saturating_mul(words)
        .saturating_add(words.saturating_mul(words) / costs::QUADRATIC_DIVISOR)
}

/// SSTORE charge and refund delta for writing `new` over `current`, where
/// `original` is the slot value when the transaction started.
///
/// Returns `(gas, refund)`. The refund may be negative when a later write
/// undoes an earlier clear.
#[must_use]
pub fn sstore_gas_cost(original: U256, current: U256, new: U256, is_cold: bool) -> (u64, i64) {
    let access = if is_cold { costs::COLD_SLOAD } else { 0 };
    if current == new {
        return (access + costs::WARM_SLOAD, 0);
    }
    if original == current {
        if original.is_zero() {
            return (access + costs::SSTORE_SET, 0);
        }
        let refund = if new.is_zero() {
            costs::SSTORE_CLEAR_REFUND
        } else {
            0
        };
        return (access + costs::SSTORE_RESET, refund);
    }

    // Dirty slot: already written earlier in this transaction.
    let mut refund = 0;
    if !original.is_zero() {
        if current.is_zero() {
            refund -= costs::SSTORE_CLEAR_REFUND;
        } else if new.is_zero() {
            refund += costs::SSTORE_CLEAR_REFUND;
        }
    }
    if original == new {
        refund += if original.is_zero() {
            costs::SSTORE_SET_REFUND
        } else {
            costs::SSTORE_RESET_REFUND
        };
    }
    (access + costs::WARM_SLOAD, refund)
}

/// Refund actually granted: at most a fifth of the gas used.
#[must_use]
pub fn capped_refund(gas_used: u64, refund: u64) -> u64 {
    refund.min(gas_used / costs::MAX_REFUND_QUOTIENT)
}

/// Static costs; dynamic opcodes carry 0 here and are priced inline.
#[rustfmt::skip]
pub const OPCODE_GAS: [u64; 256] = {
    let mut table = [0u64; 256];

    table[0x01] = costs::VERY_LOW;      // ADD
    table[0x02] = costs::LOW;           // MUL
    table[0x03] = costs::VERY_LOW;      // SUB
    table[0x04] = costs::LOW;           // DIV
    table[0x05] = costs::LOW;           // SDIV
    table[0x06] = costs::LOW;           // MOD
    table[0x07] = costs::LOW;           // SMOD
    table[0x08] = costs::MID;           // ADDMOD
    table[0x09] = costs::MID;           // MULMOD
    table[0x0B] = costs::LOW;           // SIGNEXTEND

    let mut i = 0x10;
    while i <= 0x1D {
        table[i] = costs::VERY_LOW;     // LT..SAR
        i += 1;
    }

    table[0x30] = costs::BASE;          // ADDRESS
    table[0x32] = costs::BASE;          // ORIGIN
    table[0x33] = costs::BASE;          // CALLER
    table[0x34] = costs::BASE;          // CALLVALUE
    table[0x35] = costs::VERY_LOW;      // CALLDATALOAD
    table[0x36] = costs::BASE;          // CALLDATASIZE
    table[0x37] = costs::VERY_LOW;      // CALLDATACOPY
    table[0x38] = costs::BASE;          // CODESIZE
    table[0x39] = costs::VERY_LOW;      // CODECOPY
    table[0x3A] = costs::BASE;          // GASPRICE
    table[0x3D] = costs::BASE;          // RETURNDATASIZE
    table[0x3E] = costs::VERY_LOW;      // RETURNDATACOPY

    table[0x40] = costs::BLOCKHASH;     // BLOCKHASH
    table[0x41] = costs::BASE;          // COINBASE
    table[0x42] = costs::BASE;          // TIMESTAMP
    table[0x43] = costs::BASE;          // NUMBER
    table[0x44] = costs::BASE;          // PREVRANDAO
    table[0x45] = costs::BASE;          // GASLIMIT
    table[0x46] = costs::BASE;          // CHAINID
    table[0x47] = costs::LOW;           // SELFBALANCE
    table[0x48] = costs::BASE;          // BASEFEE

    table[0x50] = costs::BASE;          // POP
    table[0x51] = costs::VERY_LOW;      // MLOAD
    table[0x52] = costs::VERY_LOW;      // MSTORE
    table[0x53] = costs::VERY_LOW;      // MSTORE8
    table[0x56] = costs::MID;           // JUMP
    table[0x57] = costs::HIGH;          // JUMPI
    table[0x58] = costs::BASE;          // PC
    table[0x59] = costs::BASE;          // MSIZE
    table[0x5A] = costs::BASE;          // GAS
    table[0x5B] = costs::JUMPDEST;      // JUMPDEST
    table[0x5F] = costs::BASE;          // PUSH0

    i = 0x60;
    while i <= 0x9F {
        table[i] = costs::VERY_LOW;     // PUSH1..SWAP16
        i += 1;
    }

    table
};
