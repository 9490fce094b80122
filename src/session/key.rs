// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Session key state machine.
//!
//! A key is created `Unsigned`, bound to one address and one policy scope,
//! and becomes `Signed` once the caller's identity signs the challenge
//! message. Expiry is terminal and enforced at the point of use: an
//! imported key that has expired decodes fine but fails on first use.

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::SessionError;
use super::signer::recover_address;
use crate::models::{Address, PolicyId};

/// Upper bound on the session TTL, in minutes.
pub const MAX_TTL_MINUTES: i64 = 30;

/// An ephemeral authorization key scoped to one address and one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    address: Address,
    policy_scope: PolicyId,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    /// Hex-encoded 65-byte recoverable signature, present once Signed.
    signature: Option<String>,
    #[serde(skip)]
    challenge_pending: bool,
}

impl SessionKey {
    /// Create a fresh `Unsigned` key with the given TTL in minutes.
    pub fn new(
        address: Address,
        policy_scope: PolicyId,
        ttl_minutes: i64,
    ) -> Result<Self, SessionError> {
        if !(1..=MAX_TTL_MINUTES).contains(&ttl_minutes) {
            return Err(SessionError::InvalidTtl {
                got: ttl_minutes,
                max: MAX_TTL_MINUTES,
            });
        }
        let created_at = Utc::now();
        Ok(Self {
            address,
            policy_scope,
            created_at,
            expires_at: created_at + Duration::minutes(ttl_minutes),
            signature: None,
            challenge_pending: false,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn policy_scope(&self) -> PolicyId {
        self.policy_scope
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    fn check_live(&self) -> Result<(), SessionError> {
        if self.is_expired() {
            return Err(SessionError::Expired(self.expires_at));
        }
        Ok(())
    }

    /// The message the caller's identity must sign.
    ///
    /// Deterministic over address, scope, and expiry. Issuing a challenge
    /// marks a signature request outstanding; only `apply_signature`
    /// resolves it, and at most one may be outstanding at a time.
    pub fn challenge_message(&mut self) -> Result<Vec<u8>, SessionError> {
        self.check_live()?;
        if self.challenge_pending {
            return Err(SessionError::ChallengePending);
        }
        self.challenge_pending = true;
        Ok(challenge_bytes(
            &self.address,
            &self.policy_scope,
            &self.expires_at,
        ))
    }

    /// Resolve the outstanding challenge: `Unsigned` -> `Signed`.
    pub fn apply_signature(&mut self, signature: &[u8]) -> Result<(), SessionError> {
        self.check_live()?;
        let message = challenge_bytes(&self.address, &self.policy_scope, &self.expires_at);
        match recover_address(&message, signature) {
            Some(signer) if signer == self.address => {
                self.signature = Some(hex::encode(signature));
                self.challenge_pending = false;
                Ok(())
            }
            _ => Err(SessionError::InvalidSignature(self.address)),
        }
    }

    /// The proof presented to key servers. Requires `Signed` and live.
    pub fn token(&self) -> Result<SessionToken, SessionError> {
        self.check_live()?;
        let signature = self
            .signature
            .clone()
            .ok_or(SessionError::NotSigned)?;
        Ok(SessionToken {
            address: self.address,
            policy_scope: self.policy_scope,
            created_at: self.created_at,
            expires_at: self.expires_at,
            signature,
        })
    }

    /// Serialize to a flat string. Preserves address, scope, expiry, and
    /// signature; an expired key still serializes.
    pub fn export(&self) -> String {
        // Serialization of this struct cannot fail: every field is a
        // plain string, timestamp, or option thereof.
        let json = serde_json::to_vec(self).unwrap_or_default();
        Base64::encode_string(&json)
    }

    /// Decode a previously exported key. Expiry is deliberately not
    /// checked here; it is enforced when the key is next used.
    pub fn import(encoded: &str) -> Result<Self, SessionError> {
        let json = Base64::decode_vec(encoded)
            .map_err(|e| SessionError::Malformed(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| SessionError::Malformed(e.to_string()))
    }

    /// Force the key one second past its expiry.
    #[cfg(test)]
    pub(crate) fn expire_now(&mut self) {
        self.expires_at = Utc::now() - Duration::seconds(1);
    }
}

/// The serialized proof sent to key servers: the signed challenge fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub address: Address,
    pub policy_scope: PolicyId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Hex-encoded 65-byte recoverable signature over the challenge.
    pub signature: String,
}

impl SessionToken {
    /// Flat string encoding for transport.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        Base64::encode_string(&json)
    }

    /// Decode a transported token. Expiry is checked by `verify`.
    pub fn decode(encoded: &str) -> Result<Self, SessionError> {
        let json = Base64::decode_vec(encoded)
            .map_err(|e| SessionError::Malformed(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| SessionError::Malformed(e.to_string()))
    }

    /// Server-side validation: live TTL and a signature that recovers to
    /// the claimed address.
    pub fn verify(&self) -> Result<(), SessionError> {
        if Utc::now() >= self.expires_at {
            return Err(SessionError::Expired(self.expires_at));
        }
        let signature = hex::decode(&self.signature)
            .map_err(|e| SessionError::Malformed(e.to_string()))?;
        let message = challenge_bytes(&self.address, &self.policy_scope, &self.expires_at);
        match recover_address(&message, &signature) {
            Some(signer) if signer == self.address => Ok(()),
            _ => Err(SessionError::InvalidSignature(self.address)),
        }
    }
}

/// Deterministic challenge binding address, scope, and expiry.
fn challenge_bytes(
    address: &Address,
    policy_scope: &PolicyId,
    expires_at: &DateTime<Utc>,
) -> Vec<u8> {
    format!(
        "credvault session key\naddress: {address}\nscope: {policy_scope}\nexpires: {}",
        expires_at.timestamp()
    )
    .into_bytes()
}
