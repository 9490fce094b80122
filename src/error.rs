// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Crate-level error taxonomy.
//!
//! [`VaultError`] aggregates the per-component errors and adds the two
//! orchestration-level states: a certified-but-unpublished blob
//! ([`VaultError::PublishPending`], retryable without re-upload) and a
//! policy with no published pointer. [`VaultError::remediation`] keeps
//! "no access" and "try again" distinguishable for callers, since the
//! correct user remediation differs.

use crate::blobstore::BlobError;
use crate::ledger::LedgerError;
use crate::models::{BlobId, PolicyId};
use crate::session::{SessionError, SignerError};
use crate::threshold::ThresholdError;

/// What the caller should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// The policy denies the caller; retrying cannot help. Access must
    /// be granted on-chain first.
    NoAccess,
    /// Transient or partial failure; the operation may be retried.
    Retry,
    /// Neither: a bug, a malformed input, or a rejected request.
    Fatal,
}

/// Top-level error of the credential lifecycle engine.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Threshold(#[from] ThresholdError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    /// Credential (de)serialization failed.
    #[error("credential encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    /// The blob is certified durable but its pointer was not published.
    /// Retry only the publish step; the upload needs no repeating.
    #[error("blob {blob_id} is certified but its pointer is not published; retry the publish step")]
    PublishPending {
        blob_id: BlobId,
        #[source]
        source: LedgerError,
    },

    /// The policy exists but has no published credential yet.
    #[error("no credential published under policy {0}")]
    NothingPublished(PolicyId),
}

impl VaultError {
    /// Classify the failure for user-visible reporting. Policy denial
    /// and transient unavailability are never merged.
    pub fn remediation(&self) -> Remediation {
        match self {
            VaultError::Threshold(err @ ThresholdError::NoAccess { .. }) => {
                if err.access_denied() {
                    Remediation::NoAccess
                } else {
                    Remediation::Retry
                }
            }
            VaultError::Ledger(LedgerError::Denied(_)) => Remediation::NoAccess,
            VaultError::Ledger(LedgerError::Network(_)) => Remediation::Retry,
            VaultError::Blob(BlobError::InsufficientRedundancy { .. }) => Remediation::Retry,
            VaultError::Session(SessionError::Expired(_)) => Remediation::Retry,
            VaultError::Signer(SignerError::Unavailable(_)) => Remediation::Retry,
            VaultError::PublishPending { .. } => Remediation::Retry,
            _ => Remediation::Fatal,
        }
    }
}
