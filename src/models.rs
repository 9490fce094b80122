// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! # Core Data Models
//!
//! Identifiers and records shared across the engine.
//!
//! ## Identifier Types
//!
//! All on-chain identifiers ([`PolicyId`], [`CapId`], [`BlobId`],
//! [`ObjectId`]) and caller [`Address`]es are 32-byte values rendered as
//! `0x`-prefixed hex. Addresses are derived from secp256k1 public keys.
//!
//! ## Credential
//!
//! The plaintext credential record. It exists only transiently inside a
//! write or read ceremony: `Debug` redacts the secret and the memory is
//! zeroized on drop.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Error returned when an identifier string is not `0x` + 64 hex chars.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed identifier {0:?}: expected 0x-prefixed 32-byte hex")]
pub struct IdParseError(pub String);

fn decode_hex_id(s: &str) -> Result<[u8; 32], IdParseError> {
    let hex_part = s
        .strip_prefix("0x")
        .ok_or_else(|| IdParseError(s.to_string()))?;
    if hex_part.len() != 64 {
        return Err(IdParseError(s.to_string()));
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(hex_part, &mut out).map_err(|_| IdParseError(s.to_string()))?;
    Ok(out)
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name([u8; 32]);

        impl $name {
            /// Parse a `0x`-prefixed 32-byte hex identifier.
            pub fn parse(s: &str) -> Result<Self, IdParseError> {
                decode_hex_id(s).map(Self)
            }

            /// Wrap a raw 32-byte identifier.
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Raw 32-byte payload.
            pub fn to_bytes(&self) -> [u8; 32] {
                self.0
            }

            /// `0x`-prefixed hex rendering.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "(0x{})"), hex::encode(self.0))
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_hex()
            }
        }
    };
}

hex_id! {
    /// Identifier of an on-chain access policy object.
    PolicyId
}

hex_id! {
    /// Identifier of the administrative capability bound to one policy.
    CapId
}

hex_id! {
    /// Content-derived identifier of a stored blob (`sha256` of content).
    BlobId
}

hex_id! {
    /// Full identifier of one encrypted object, embedded in its header.
    ObjectId
}

hex_id! {
    /// Caller address, derived from a secp256k1 public key.
    Address
}

impl Address {
    /// Derive the address for a public key: `sha256(compressed SEC1 point)`.
    pub fn from_public_key(key: &k256::PublicKey) -> Self {
        use k256::elliptic_curve::sec1::ToEncodedPoint;

        let point = key.to_encoded_point(true);
        Self(Sha256::digest(point.as_bytes()).into())
    }

    /// Derive the address for an ECDSA verifying key.
    pub fn from_verifying_key(key: &k256::ecdsa::VerifyingKey) -> Self {
        use k256::elliptic_curve::sec1::ToEncodedPoint;

        let point = key.to_encoded_point(true);
        Self(Sha256::digest(point.as_bytes()).into())
    }
}

// =============================================================================
// Credential
// =============================================================================

/// A plaintext credential record.
///
/// Serialized to bytes immediately before encryption and never persisted
/// in the clear. The secret is redacted from `Debug` output and the whole
/// record is zeroized when dropped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    /// Service the credential belongs to (e.g. `mail`).
    pub service_name: String,
    /// Account name within the service.
    pub username: String,
    /// The secret itself.
    pub secret: String,
}

impl Credential {
    pub fn new(
        service_name: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// Serialize to the byte form that gets encrypted.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Reconstruct a credential from decrypted bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("service_name", &self.service_name)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_parse_and_display_round_trip() {
        let hex = format!("0x{}", "ab".repeat(32));
        let id = PolicyId::parse(&hex).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert_eq!(id.to_string(), hex);
    }

    #[test]
    fn id_parse_rejects_bad_input() {
        assert!(PolicyId::parse("ab".repeat(32).as_str()).is_err()); // missing 0x
        assert!(PolicyId::parse("0x1234").is_err()); // too short
        assert!(PolicyId::parse(&format!("0x{}", "zz".repeat(32))).is_err()); // not hex
    }

    #[test]
    fn id_serde_uses_hex_string() {
        let id = BlobId::from_bytes([7u8; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "07".repeat(32)));
        let back: BlobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn address_derivation_is_deterministic() {
        let secret = k256::SecretKey::random(&mut rand::rngs::OsRng);
        let public = secret.public_key();
        assert_eq!(
            Address::from_public_key(&public),
            Address::from_public_key(&public)
        );
    }

    #[test]
    fn credential_bytes_round_trip() {
        let cred = Credential::new("mail", "alice", "secret1");
        let bytes = cred.to_bytes().unwrap();
        let back = Credential::from_bytes(&bytes).unwrap();
        assert_eq!(back, cred);
    }

    #[test]
    fn credential_debug_redacts_secret() {
        let cred = Credential::new("mail", "alice", "secret1");
        let rendered = format!("{cred:?}");
        assert!(!rendered.contains("secret1"));
        assert!(rendered.contains("alice"));
    }
}
