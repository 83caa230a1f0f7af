//! # Signing Accounts
//!
//! secp256k1 keys for the live submission path, and sender recovery used by
//! the chain to verify pending transactions.
//!
//! Signatures are recoverable, low-S normalised, and carry `v = 27 + recid`.
//! Addresses are the last 20 bytes of Keccak-256 over the uncompressed public
//! key without its `0x04` prefix.

use crate::domain::services::keccak256;
use crate::domain::value_objects::{Address, EcdsaSignature, Hash};
use crate::errors::SigningError;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use std::fmt;

/// A private key and the address it controls.
#[derive(Clone)]
pub struct SigningAccount {
    key: SigningKey,
    address: Address,
}

impl SigningAccount {
    /// Loads a 32-byte private key.
    ///
    /// # Errors
    ///
    /// `SigningError::InvalidKey` if the bytes are not a valid scalar.
    pub fn from_private_key(bytes: &[u8]) -> Result<Self, SigningError> {
        let key = SigningKey::from_slice(bytes).map_err(|_| SigningError::InvalidKey)?;
        Ok(Self::from_signing_key(key))
    }

    /// Generates a fresh random key.
    #[must_use]
    pub fn random() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand::thread_rng()))
    }

    fn from_signing_key(key: SigningKey) -> Self {
        let address = address_from_pubkey(key.verifying_key());
        Self { key, address }
    }

    /// Address controlled by this key.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs a 32-byte digest.
    ///
    /// # Errors
    ///
    /// `SigningError::SigningFailed` if the backend rejects the digest.
    pub fn sign_hash(&self, hash: &Hash) -> Result<EcdsaSignature, SigningError> {
        let (sig, recid) = self
            .key
            .sign_prehash_recoverable(hash.as_bytes())
            .map_err(|e| SigningError::SigningFailed(e.to_string()))?;

        // Low-S form flips the parity of R's y coordinate.
        let (sig, recid) = match sig.normalize_s() {
            Some(normalized) => (
                normalized,
                RecoveryId::new(!recid.is_y_odd(), recid.is_x_reduced()),
            ),
            None => (sig, recid),
        };

        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(EcdsaSignature::new(r, s, 27 + recid.to_byte()))
    }
}

impl fmt::Debug for SigningAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningAccount")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Recovers the address that produced `signature` over `hash`.
///
/// # Errors
///
/// `SigningError::RecoveryFailed` for malformed signatures, including the
/// simulation placeholder.
pub fn recover_signer(hash: &Hash, signature: &EcdsaSignature) -> Result<Address, SigningError> {
    let recid = RecoveryId::from_byte(signature.recovery_id()).ok_or_else(|| {
        SigningError::RecoveryFailed(format!("invalid recovery id {}", signature.v))
    })?;

    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&signature.r);
    bytes[32..].copy_from_slice(&signature.s);
    let sig = Signature::from_slice(&bytes)
        .map_err(|e| SigningError::RecoveryFailed(e.to_string()))?;

    let key = VerifyingKey::recover_from_prehash(hash.as_bytes(), &sig, recid)
        .map_err(|e| SigningError::RecoveryFailed(e.to_string()))?;
    Ok(address_from_pubkey(&key))
}

fn address_from_pubkey(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest.as_bytes()[12..]);
    Address::new(address)
}
