// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! In-memory authority.
//!
//! A self-contained ledger backend implementing the full transaction
//! surface the engine issues. Used by tests and local development; the
//! rules it enforces (cap custody, allow-list evaluation, the blob
//! register/certify state machine) mirror the on-chain contract.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::schema::{BLOB_KIND, CAP_KIND, POLICY_KIND, SCHEMA_VERSION};
use super::{
    Authority, AuthorizationIntent, CreatedObject, LedgerError, ObjectKind, RawObject,
    Transaction, TransactionKind, TxEffects,
};
use crate::blobstore::BlobDescriptor;
use crate::models::{Address, BlobId, CapId, PolicyId};

#[derive(Debug, Clone)]
struct PolicyEntry {
    name: String,
    owner: Address,
    allow_list: BTreeSet<Address>,
    current_blob: Option<BlobId>,
}

#[derive(Debug, Clone)]
struct CapEntry {
    policy_id: PolicyId,
    owner: Address,
}

#[derive(Debug, Clone)]
struct BlobEntry {
    descriptor: BlobDescriptor,
    epochs: u32,
    certified: bool,
}

#[derive(Default)]
struct State {
    policies: HashMap<PolicyId, PolicyEntry>,
    caps: HashMap<CapId, CapEntry>,
    blobs: HashMap<BlobId, BlobEntry>,
    tx_seq: u64,
}

/// Ledger backend backed by process memory.
#[derive(Default)]
pub struct InMemoryAuthority {
    state: Mutex<State>,
}

fn mint_id() -> [u8; 32] {
    Sha256::digest(Uuid::new_v4().as_bytes()).into()
}

fn rejected(digest: String, reason: impl Into<String>) -> TxEffects {
    TxEffects {
        digest,
        success: false,
        error: Some(reason.into()),
        created: vec![],
    }
}

fn committed(digest: String, created: Vec<CreatedObject>) -> TxEffects {
    TxEffects {
        digest,
        success: true,
        error: None,
        created,
    }
}

impl InMemoryAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `cap_id` exists, governs `policy_id`, and is held by
    /// `sender`. Returns the rejection reason on failure.
    fn check_cap(
        state: &State,
        policy_id: &PolicyId,
        cap_id: &CapId,
        sender: &Address,
    ) -> Option<&'static str> {
        if !state.policies.contains_key(policy_id) {
            return Some("policy does not exist");
        }
        match state.caps.get(cap_id) {
            None => Some("cap does not exist"),
            Some(cap) if cap.policy_id != *policy_id => Some("cap does not govern this policy"),
            Some(cap) if cap.owner != *sender => Some("cap not held by sender"),
            Some(_) => None,
        }
    }

    fn apply(&self, tx: Transaction) -> TxEffects {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.tx_seq += 1;
        let digest = format!(
            "0x{}",
            hex::encode(Sha256::digest(state.tx_seq.to_be_bytes()))
        );

        match tx.kind {
            TransactionKind::CreatePolicy { name } => {
                if name.trim().is_empty() {
                    return rejected(digest, "policy name must not be empty");
                }
                let policy_id = PolicyId::from_bytes(mint_id());
                let cap_id = CapId::from_bytes(mint_id());
                state.policies.insert(
                    policy_id,
                    PolicyEntry {
                        name,
                        owner: tx.sender,
                        allow_list: BTreeSet::new(),
                        current_blob: None,
                    },
                );
                state.caps.insert(
                    cap_id,
                    CapEntry {
                        policy_id,
                        owner: tx.sender,
                    },
                );
                tracing::debug!(%policy_id, %cap_id, "policy created");
                committed(
                    digest,
                    vec![
                        CreatedObject {
                            kind: ObjectKind::Policy,
                            id: policy_id.to_hex(),
                        },
                        CreatedObject {
                            kind: ObjectKind::Cap,
                            id: cap_id.to_hex(),
                        },
                    ],
                )
            }

            TransactionKind::GrantAccess {
                policy_id,
                cap_id,
                member,
            } => {
                if let Some(reason) = Self::check_cap(&state, &policy_id, &cap_id, &tx.sender) {
                    return rejected(digest, reason);
                }
                if let Some(policy) = state.policies.get_mut(&policy_id) {
                    policy.allow_list.insert(member);
                }
                committed(digest, vec![])
            }

            TransactionKind::RevokeAccess {
                policy_id,
                cap_id,
                member,
            } => {
                if let Some(reason) = Self::check_cap(&state, &policy_id, &cap_id, &tx.sender) {
                    return rejected(digest, reason);
                }
                if let Some(policy) = state.policies.get_mut(&policy_id) {
                    policy.allow_list.remove(&member);
                }
                committed(digest, vec![])
            }

            TransactionKind::PublishPointer {
                policy_id,
                cap_id,
                blob_id,
            } => {
                if let Some(reason) = Self::check_cap(&state, &policy_id, &cap_id, &tx.sender) {
                    return rejected(digest, reason);
                }
                if let Some(policy) = state.policies.get_mut(&policy_id) {
                    policy.current_blob = Some(blob_id);
                }
                committed(digest, vec![])
            }

            TransactionKind::RegisterBlob { descriptor, epochs } => {
                let blob_id = descriptor.blob_id;
                match state.blobs.get_mut(&blob_id) {
                    // Identical content re-registered: idempotent. A
                    // certified blob never reverts.
                    Some(entry) if entry.certified => committed(digest, vec![]),
                    Some(entry) => {
                        entry.epochs = entry.epochs.max(epochs);
                        committed(digest, vec![])
                    }
                    None => {
                        state.blobs.insert(
                            blob_id,
                            BlobEntry {
                                descriptor,
                                epochs,
                                certified: false,
                            },
                        );
                        committed(
                            digest,
                            vec![CreatedObject {
                                kind: ObjectKind::BlobRecord,
                                id: blob_id.to_hex(),
                            }],
                        )
                    }
                }
            }

            TransactionKind::CertifyBlob {
                blob_id,
                confirmations,
            } => {
                let Some(entry) = state.blobs.get_mut(&blob_id) else {
                    return rejected(digest, "blob is not registered");
                };
                if entry.certified {
                    return committed(digest, vec![]);
                }
                let distinct: BTreeSet<u8> = confirmations
                    .iter()
                    .filter(|c| c.blob_id == blob_id)
                    .map(|c| c.shard_index)
                    .collect();
                let required = entry.descriptor.reconstruction_threshold as usize;
                if distinct.len() < required {
                    return rejected(
                        digest,
                        format!(
                            "insufficient confirmations: {} of {required}",
                            distinct.len()
                        ),
                    );
                }
                entry.certified = true;
                tracing::debug!(%blob_id, "blob certified");
                committed(digest, vec![])
            }
        }
    }

    fn raw_policy(id: PolicyId, entry: &PolicyEntry) -> RawObject {
        RawObject {
            id: id.to_hex(),
            kind: POLICY_KIND.to_string(),
            version: SCHEMA_VERSION,
            fields: json!({
                "name": &entry.name,
                "owner": entry.owner.to_hex(),
                "allow_list": entry.allow_list.iter().map(|a| a.to_hex()).collect::<Vec<_>>(),
                "current_blob": entry.current_blob.map(|b| b.to_hex()),
            }),
        }
    }

    fn raw_cap(id: CapId, entry: &CapEntry) -> RawObject {
        RawObject {
            id: id.to_hex(),
            kind: CAP_KIND.to_string(),
            version: SCHEMA_VERSION,
            fields: json!({
                "policy_id": entry.policy_id.to_hex(),
                "owner": entry.owner.to_hex(),
            }),
        }
    }

    fn raw_blob(id: BlobId, entry: &BlobEntry) -> RawObject {
        RawObject {
            id: id.to_hex(),
            kind: BLOB_KIND.to_string(),
            version: SCHEMA_VERSION,
            fields: json!({
                "state": if entry.certified { "certified" } else { "registered" },
                "epochs": entry.epochs,
                "descriptor": &entry.descriptor,
            }),
        }
    }
}

#[async_trait]
impl Authority for InMemoryAuthority {
    async fn execute(&self, tx: Transaction) -> Result<TxEffects, LedgerError> {
        Ok(self.apply(tx))
    }

    async fn simulate(&self, intent: &AuthorizationIntent) -> Result<(), LedgerError> {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let policy = state
            .policies
            .get(&intent.policy_id)
            .ok_or_else(|| LedgerError::NotFound(intent.policy_id.to_hex()))?;
        if intent.caller == policy.owner || policy.allow_list.contains(&intent.caller) {
            Ok(())
        } else {
            Err(LedgerError::Denied(intent.policy_id.to_hex()))
        }
    }

    async fn get_object(&self, id: &str) -> Result<RawObject, LedgerError> {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Ok(policy_id) = PolicyId::parse(id) {
            if let Some(entry) = state.policies.get(&policy_id) {
                return Ok(Self::raw_policy(policy_id, entry));
            }
            if let Some(entry) = state.caps.get(&CapId::from_bytes(policy_id.to_bytes())) {
                return Ok(Self::raw_cap(CapId::from_bytes(policy_id.to_bytes()), entry));
            }
            if let Some(entry) = state.blobs.get(&BlobId::from_bytes(policy_id.to_bytes())) {
                return Ok(Self::raw_blob(
                    BlobId::from_bytes(policy_id.to_bytes()),
                    entry,
                ));
            }
        }
        Err(LedgerError::NotFound(id.to_string()))
    }

    async fn owned_objects(
        &self,
        owner: &Address,
        kind: &str,
    ) -> Result<Vec<RawObject>, LedgerError> {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut objects = Vec::new();
        match kind {
            CAP_KIND => {
                for (id, entry) in &state.caps {
                    if entry.owner == *owner {
                        objects.push(Self::raw_cap(*id, entry));
                    }
                }
            }
            POLICY_KIND => {
                for (id, entry) in &state.policies {
                    if entry.owner == *owner {
                        objects.push(Self::raw_policy(*id, entry));
                    }
                }
            }
            other => {
                return Err(LedgerError::InvalidArgument(format!(
                    "cannot list objects of kind {other:?}"
                )))
            }
        }
        Ok(objects)
    }
}
