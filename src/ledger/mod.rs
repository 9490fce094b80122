// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Authority (ledger) seam.
//!
//! The on-chain side of the protocol is an opaque transaction-execution
//! service. This module defines the transactions the engine issues, the
//! effects it awaits, the read-only authorization intent, and the
//! [`Authority`] trait every ledger backend implements. The contract's
//! internal state machine is out of scope; only the call shapes are.

pub mod memory;
pub mod schema;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::InMemoryAuthority;
pub use schema::{AccessPolicy, BlobRecord, BlobState, CapToken, RawObject, SchemaError};

use crate::blobstore::{BlobDescriptor, NodeConfirmation};
use crate::models::{Address, BlobId, CapId, ObjectId, PolicyId};

/// Gas budget attached to every administrative transaction.
pub const DEFAULT_GAS_BUDGET: u64 = 10_000_000;

/// The state-mutating calls the engine issues to the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Create a fresh access policy plus its administrative cap.
    CreatePolicy { name: String },
    /// Add `member` to the policy's allow list. Requires the cap.
    GrantAccess {
        policy_id: PolicyId,
        cap_id: CapId,
        member: Address,
    },
    /// Remove `member` from the policy's allow list. Requires the cap.
    RevokeAccess {
        policy_id: PolicyId,
        cap_id: CapId,
        member: Address,
    },
    /// Overwrite the policy's current blob pointer. Requires the cap.
    PublishPointer {
        policy_id: PolicyId,
        cap_id: CapId,
        blob_id: BlobId,
    },
    /// Declare intent to store a blob: Unregistered -> Registered.
    RegisterBlob {
        descriptor: BlobDescriptor,
        epochs: u32,
    },
    /// Finalize durability once enough node confirmations exist:
    /// Registered -> Certified.
    CertifyBlob {
        blob_id: BlobId,
        confirmations: Vec<NodeConfirmation>,
    },
}

/// A transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub kind: TransactionKind,
    pub gas_budget: u64,
}

/// Read-only, side-effect-free call proving the caller may obtain the
/// decryption key for `full_object_id` under `policy_id`. Key servers
/// re-simulate it against current policy state before releasing shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationIntent {
    pub caller: Address,
    pub policy_id: PolicyId,
    pub full_object_id: ObjectId,
}

/// Kinds of objects a transaction can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Policy,
    Cap,
    BlobRecord,
}

/// One object created by a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedObject {
    pub kind: ObjectKind,
    pub id: String,
}

/// Finality notification for a submitted transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TxEffects {
    pub digest: String,
    pub success: bool,
    pub error: Option<String>,
    pub created: Vec<CreatedObject>,
}

impl TxEffects {
    /// Id of the first created object of `kind`, if any.
    pub fn created_id(&self, kind: ObjectKind) -> Option<&str> {
        self.created
            .iter()
            .find(|obj| obj.kind == kind)
            .map(|obj| obj.id.as_str())
    }

    /// Convert failed effects into a typed rejection.
    pub fn into_result(self) -> Result<TxEffects, LedgerError> {
        if self.success {
            Ok(self)
        } else {
            let reason = self
                .error
                .clone()
                .unwrap_or_else(|| "transaction aborted".to_string());
            Err(LedgerError::Rejected(reason))
        }
    }
}

/// Errors surfaced by the authority seam.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    /// The policy evaluated the caller as unauthorized. Never retried.
    #[error("access denied by policy {0}")]
    Denied(String),

    /// The referenced object does not exist on the ledger.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The transaction executed and aborted.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The call was rejected locally before submission.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A returned object did not match its declared schema.
    #[error("object schema violation: {0}")]
    Schema(#[from] SchemaError),

    /// Transport failure talking to the ledger.
    #[error("ledger unreachable: {0}")]
    Network(String),
}

/// The transaction-execution service behind the engine.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Submit a transaction and await its finality notification.
    async fn execute(&self, tx: Transaction) -> Result<TxEffects, LedgerError>;

    /// Dry-run an authorization intent against current policy state.
    /// `Ok(())` means the caller is authorized right now.
    async fn simulate(&self, intent: &AuthorizationIntent) -> Result<(), LedgerError>;

    /// Fetch one object by its `0x`-hex id.
    async fn get_object(&self, id: &str) -> Result<RawObject, LedgerError>;

    /// List the objects of `kind` owned by `owner`.
    async fn owned_objects(&self, owner: &Address, kind: &str)
        -> Result<Vec<RawObject>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_id_finds_by_kind() {
        let effects = TxEffects {
            digest: "0xabc".to_string(),
            success: true,
            error: None,
            created: vec![
                CreatedObject {
                    kind: ObjectKind::Policy,
                    id: "0x01".to_string(),
                },
                CreatedObject {
                    kind: ObjectKind::Cap,
                    id: "0x02".to_string(),
                },
            ],
        };
        assert_eq!(effects.created_id(ObjectKind::Cap), Some("0x02"));
        assert_eq!(effects.created_id(ObjectKind::BlobRecord), None);
    }

    #[test]
    fn failed_effects_become_rejections() {
        let effects = TxEffects {
            digest: "0xabc".to_string(),
            success: false,
            error: Some("cap not held by sender".to_string()),
            created: vec![],
        };
        let err = effects.into_result().unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(reason) if reason.contains("cap")));
    }
}
