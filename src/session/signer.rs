// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Identity signing.
//!
//! The engine never holds the caller's long-lived key; signing a session
//! challenge is delegated to an external identity (a wallet) through the
//! [`IdentitySigner`] seam. [`LocalSigner`] is the in-process
//! implementation used by tests and non-custodial tooling.

use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use super::error::SignerError;
use crate::models::Address;

/// External identity capable of signing challenge messages.
///
/// Signing is interactive and one-shot: a rejection or cancellation
/// aborts the ceremony that requested it.
#[async_trait]
pub trait IdentitySigner: Send + Sync {
    /// Address of the signing identity.
    fn address(&self) -> Address;

    /// Sign a message, returning a 65-byte recoverable signature
    /// (`r || s || recovery_id`) over its SHA-256 digest.
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// Recover the signing address from a message and a 65-byte recoverable
/// signature. Returns `None` when the signature does not parse or does
/// not recover to a valid key.
pub fn recover_address(message: &[u8], signature: &[u8]) -> Option<Address> {
    if signature.len() != 65 {
        return None;
    }
    let digest = Sha256::digest(message);
    let recovery_id = RecoveryId::from_byte(signature[64])?;
    let signature = Signature::from_slice(&signature[..64]).ok()?;
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id).ok()?;
    Some(Address::from_verifying_key(&key))
}

/// In-process secp256k1 signer.
pub struct LocalSigner {
    key: SigningKey,
}

impl LocalSigner {
    /// Generate a fresh random identity.
    pub fn random() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Build a signer from 32 raw key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        let key = SigningKey::from_slice(bytes)
            .map_err(|e| SignerError::Rejected(format!("invalid key material: {e}")))?;
        Ok(Self { key })
    }

    pub fn public_key(&self) -> k256::PublicKey {
        self.key.verifying_key().into()
    }
}

#[async_trait]
impl IdentitySigner for LocalSigner {
    fn address(&self) -> Address {
        Address::from_verifying_key(self.key.verifying_key())
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        let digest = Sha256::digest(message);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| SignerError::Rejected(e.to_string()))?;
        let mut out = signature.to_bytes().to_vec();
        out.push(recovery_id.to_byte());
        Ok(out)
    }
}
