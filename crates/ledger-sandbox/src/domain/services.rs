//! # Domain Services
//!
//! Stateless helpers: hashing, intrinsic gas, revert-reason decoding.

use crate::domain::value_objects::{Bytes, Hash, U256};
use sha3::{Digest, Keccak256};

/// Base cost of any transaction.
pub const TX_BASE_GAS: u64 = 21_000;
/// Calldata cost per zero byte.
pub const TX_DATA_ZERO_GAS: u64 = 4;
/// Calldata cost per non-zero byte.
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;

/// Selector of `Error(string)`.
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Keccak-256 digest.
#[must_use]
pub fn keccak256(data: &[u8]) -> Hash {
    let digest = Keccak256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash::new(out)
}

/// Gas charged before any bytecode runs: base cost plus calldata.
#[must_use]
pub fn intrinsic_gas(payload: &[u8]) -> u64 {
    let zeros = payload.iter().filter(|b| **b == 0).count() as u64;
    let non_zeros = payload.len() as u64 - zeros;
    TX_BASE_GAS + zeros * TX_DATA_ZERO_GAS + non_zeros * TX_DATA_NON_ZERO_GAS
}

/// Extracts the message from `Error(string)` return data.
///
/// Layout: selector (4) | offset (32) | length (32) | utf-8 bytes.
#[must_use]
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 68 || data[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    let len_word = U256::from_big_endian(&data[36..68]);
    if len_word > U256::from(data.len()) {
        return None;
    }
    let len = len_word.low_u64() as usize;
    let body = data.get(68..68 + len)?;
    String::from_utf8(body.to_vec()).ok()
}

/// ABI-encodes `Error(string)` revert data. Used by fixtures and tests.
#[must_use]
pub fn encode_revert_reason(reason: &str) -> Bytes {
    let mut out = ERROR_STRING_SELECTOR.to_vec();
    let mut word = [0u8; 32];
    U256::from(32).to_big_endian(&mut word);
    out.extend_from_slice(&word);
    U256::from(reason.len()).to_big_endian(&mut word);
    out.extend_from_slice(&word);
    out.extend_from_slice(reason.as_bytes());
    let pad = (32 - reason.len() % 32) % 32;
    out.extend(std::iter::repeat(0u8).take(pad));
    Bytes::from_vec(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_empty() {
        assert_eq!(
            hex::encode(keccak256(&[]).0),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_intrinsic_gas_counts_zero_and_non_zero_bytes() {
        assert_eq!(intrinsic_gas(&[]), 21_000);
        assert_eq!(intrinsic_gas(&[0, 0, 1]), 21_000 + 4 + 4 + 16);
    }

    #[test]
    fn test_revert_reason_roundtrip() {
        let data = encode_revert_reason("not enough funds");
        assert_eq!(
            decode_revert_reason(data.as_slice()).as_deref(),
            Some("not enough funds")
        );
    }

    #[test]
    fn test_revert_reason_rejects_garbage() {
        assert_eq!(decode_revert_reason(&[0u8; 10]), None);
        let mut data = encode_revert_reason("x").into_vec();
        data[0] = 0xff;
        assert_eq!(decode_revert_reason(&data), None);
    }
}
