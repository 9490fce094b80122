// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Session and signer errors.

use chrono::{DateTime, Utc};

use crate::models::Address;

/// Errors raised by session key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The key's TTL has elapsed. Terminal; every operation on an expired
    /// key fails with this, regardless of its signature state.
    #[error("session key expired at {0}")]
    Expired(DateTime<Utc>),

    /// The supplied signature does not verify against the key's address.
    #[error("signature does not verify against address {0}")]
    InvalidSignature(Address),

    /// A signing challenge is already outstanding for this key.
    #[error("a signature request is already outstanding for this session key")]
    ChallengePending,

    /// The operation requires a signed key.
    #[error("session key has not been signed")]
    NotSigned,

    /// TTL outside the accepted range.
    #[error("session TTL must be between 1 and {max} minutes, got {got}")]
    InvalidTtl { got: i64, max: i64 },

    /// A serialized key or token could not be decoded.
    #[error("malformed session key encoding: {0}")]
    Malformed(String),
}

/// Errors surfaced by the external identity signer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// The signer refused or the user cancelled the request.
    #[error("signing rejected: {0}")]
    Rejected(String),

    /// The signer could not be reached.
    #[error("signer unavailable: {0}")]
    Unavailable(String),
}
