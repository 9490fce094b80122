// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Share sealing.
//!
//! Each key share is sealed to exactly one key server: an ephemeral
//! secp256k1 key agrees with the server's static public key, the shared
//! secret is expanded with HKDF-SHA256 bound to the (object, server)
//! context, and the share is AES-256-GCM encrypted under the result.
//! Only the addressed server can unseal its share.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use k256::ecdh::EphemeralSecret;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroize;

use super::ThresholdError;
use crate::models::ObjectId;

const HKDF_INFO: &[u8] = b"credvault share sealing v1";

/// A share encrypted to one recipient's public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    /// Compressed SEC1 encoding of the ephemeral public key (33 bytes).
    pub ephemeral_key: Vec<u8>,
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}

/// KDF context binding a sealed share to one object and one server.
pub fn sealing_context(object_id: &ObjectId, server_id: &str) -> Vec<u8> {
    let mut context = object_id.to_bytes().to_vec();
    context.extend_from_slice(server_id.as_bytes());
    context
}

fn derive_key(shared_secret: &[u8], context: &[u8]) -> Result<[u8; 32], ThresholdError> {
    let hkdf = Hkdf::<Sha256>::new(Some(context), shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .map_err(|_| ThresholdError::Sealing("key derivation failed".to_string()))?;
    Ok(key)
}

/// Seal `plaintext` to `recipient` under `context`.
pub fn seal(
    recipient: &PublicKey,
    context: &[u8],
    plaintext: &[u8],
) -> Result<SealedBox, ThresholdError> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_key = ephemeral
        .public_key()
        .to_encoded_point(true)
        .as_bytes()
        .to_vec();
    let shared = ephemeral.diffie_hellman(recipient);
    let mut key = derive_key(shared.raw_secret_bytes(), context)?;

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| ThresholdError::Sealing("cipher construction failed".to_string()));
    key.zeroize();
    let cipher = cipher?;

    let nonce: [u8; 12] = rand::random();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| ThresholdError::Sealing("share encryption failed".to_string()))?;

    Ok(SealedBox {
        ephemeral_key,
        nonce,
        ciphertext,
    })
}

/// Unseal a box addressed to `secret` under `context`.
pub fn unseal(
    secret: &k256::SecretKey,
    context: &[u8],
    sealed: &SealedBox,
) -> Result<Vec<u8>, ThresholdError> {
    let ephemeral = PublicKey::from_sec1_bytes(&sealed.ephemeral_key)
        .map_err(|_| ThresholdError::Sealing("malformed ephemeral key".to_string()))?;
    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_affine());
    let mut key = derive_key(shared.raw_secret_bytes(), context)?;

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| ThresholdError::Sealing("cipher construction failed".to_string()));
    key.zeroize();
    let cipher = cipher?;

    cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
        .map_err(|_| ThresholdError::Sealing("share does not unseal for this server".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Vec<u8> {
        sealing_context(&ObjectId::from_bytes([5u8; 32]), "server-1")
    }

    #[test]
    fn seal_unseal_round_trip() {
        let server = k256::SecretKey::random(&mut OsRng);
        let share = b"\x01share material";
        let sealed = seal(&server.public_key(), &context(), share).unwrap();
        let opened = unseal(&server, &context(), &sealed).unwrap();
        assert_eq!(opened, share);
    }

    #[test]
    fn wrong_recipient_cannot_unseal() {
        let server = k256::SecretKey::random(&mut OsRng);
        let other = k256::SecretKey::random(&mut OsRng);
        let sealed = seal(&server.public_key(), &context(), b"share").unwrap();
        assert!(matches!(
            unseal(&other, &context(), &sealed),
            Err(ThresholdError::Sealing(_))
        ));
    }

    #[test]
    fn wrong_context_cannot_unseal() {
        let server = k256::SecretKey::random(&mut OsRng);
        let sealed = seal(&server.public_key(), &context(), b"share").unwrap();
        let other_context = sealing_context(&ObjectId::from_bytes([6u8; 32]), "server-1");
        assert!(matches!(
            unseal(&server, &other_context, &sealed),
            Err(ThresholdError::Sealing(_))
        ));
    }
}
