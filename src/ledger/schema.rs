// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Versioned schemas for on-chain objects.
//!
//! Ledger queries return loosely shaped [`RawObject`]s; everything the
//! engine consumes goes through a fixed, versioned parser that fails with
//! a typed [`SchemaError`] instead of silently producing missing fields.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blobstore::BlobDescriptor;
use crate::models::{Address, BlobId, CapId, PolicyId};

/// Object kind tag for access policies.
pub const POLICY_KIND: &str = "access_policy";

/// Object kind tag for administrative caps.
pub const CAP_KIND: &str = "policy_cap";

/// Object kind tag for blob storage records.
pub const BLOB_KIND: &str = "blob_record";

/// Schema version this engine understands.
pub const SCHEMA_VERSION: u64 = 1;

/// An untyped object as returned by the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObject {
    /// `0x`-hex object id.
    pub id: String,
    /// Object kind tag.
    pub kind: String,
    /// Schema version of `fields`.
    pub version: u64,
    /// Kind-specific payload.
    pub fields: Value,
}

/// Typed schema violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("expected a {expected} object, found {found}")]
    UnexpectedKind { expected: &'static str, found: String },

    #[error("unsupported {kind} schema version {version}")]
    UnsupportedVersion { kind: &'static str, version: u64 },

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has the wrong type, expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field `{field}` is malformed: {reason}")]
    MalformedField {
        field: &'static str,
        reason: String,
    },
}

/// An on-chain access policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    pub policy_id: PolicyId,
    pub name: String,
    pub owner: Address,
    pub allow_list: BTreeSet<Address>,
    /// Latest published blob pointer; rewritten, never deleted.
    pub current_blob: Option<BlobId>,
}

impl AccessPolicy {
    /// Whether `caller` may decrypt ciphertext bound to this policy.
    /// The owner is always implicitly authorized.
    pub fn authorizes(&self, caller: &Address) -> bool {
        *caller == self.owner || self.allow_list.contains(caller)
    }
}

/// The administrative capability for one policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapToken {
    pub cap_id: CapId,
    pub policy_id: PolicyId,
    pub owner: Address,
}

/// Durability state of a blob on the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobState {
    /// Intent declared, durability not yet certified.
    Registered,
    /// Certified durable and publicly readable. Terminal.
    Certified,
}

/// The authority-side record tracking one blob.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRecord {
    pub blob_id: BlobId,
    pub state: BlobState,
    pub descriptor: BlobDescriptor,
    pub epochs: u32,
}

fn check_envelope(
    obj: &RawObject,
    kind: &'static str,
) -> Result<(), SchemaError> {
    if obj.kind != kind {
        return Err(SchemaError::UnexpectedKind {
            expected: kind,
            found: obj.kind.clone(),
        });
    }
    if obj.version != SCHEMA_VERSION {
        return Err(SchemaError::UnsupportedVersion {
            kind,
            version: obj.version,
        });
    }
    Ok(())
}

fn str_field<'a>(fields: &'a Value, name: &'static str) -> Result<&'a str, SchemaError> {
    let value = fields
        .get(name)
        .ok_or(SchemaError::MissingField(name))?;
    value.as_str().ok_or(SchemaError::WrongType {
        field: name,
        expected: "string",
    })
}

fn u64_field(fields: &Value, name: &'static str) -> Result<u64, SchemaError> {
    let value = fields
        .get(name)
        .ok_or(SchemaError::MissingField(name))?;
    value.as_u64().ok_or(SchemaError::WrongType {
        field: name,
        expected: "unsigned integer",
    })
}

fn address_field(fields: &Value, name: &'static str) -> Result<Address, SchemaError> {
    Address::parse(str_field(fields, name)?).map_err(|e| SchemaError::MalformedField {
        field: name,
        reason: e.to_string(),
    })
}

/// Parse an [`AccessPolicy`] from a raw ledger object.
pub fn parse_policy(obj: &RawObject) -> Result<AccessPolicy, SchemaError> {
    check_envelope(obj, POLICY_KIND)?;

    let policy_id = PolicyId::parse(&obj.id).map_err(|e| SchemaError::MalformedField {
        field: "id",
        reason: e.to_string(),
    })?;
    let name = str_field(&obj.fields, "name")?.to_string();
    let owner = address_field(&obj.fields, "owner")?;

    let raw_list = obj
        .fields
        .get("allow_list")
        .ok_or(SchemaError::MissingField("allow_list"))?
        .as_array()
        .ok_or(SchemaError::WrongType {
            field: "allow_list",
            expected: "array of addresses",
        })?;
    let mut allow_list = BTreeSet::new();
    for entry in raw_list {
        let text = entry.as_str().ok_or(SchemaError::WrongType {
            field: "allow_list",
            expected: "array of addresses",
        })?;
        let address = Address::parse(text).map_err(|e| SchemaError::MalformedField {
            field: "allow_list",
            reason: e.to_string(),
        })?;
        allow_list.insert(address);
    }

    let current_blob = match obj.fields.get("current_blob") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let text = value.as_str().ok_or(SchemaError::WrongType {
                field: "current_blob",
                expected: "string or null",
            })?;
            Some(BlobId::parse(text).map_err(|e| SchemaError::MalformedField {
                field: "current_blob",
                reason: e.to_string(),
            })?)
        }
    };

    Ok(AccessPolicy {
        policy_id,
        name,
        owner,
        allow_list,
        current_blob,
    })
}

/// Parse a [`CapToken`] from a raw ledger object.
pub fn parse_cap(obj: &RawObject) -> Result<CapToken, SchemaError> {
    check_envelope(obj, CAP_KIND)?;

    let cap_id = CapId::parse(&obj.id).map_err(|e| SchemaError::MalformedField {
        field: "id",
        reason: e.to_string(),
    })?;
    let policy_id =
        PolicyId::parse(str_field(&obj.fields, "policy_id")?).map_err(|e| {
            SchemaError::MalformedField {
                field: "policy_id",
                reason: e.to_string(),
            }
        })?;
    let owner = address_field(&obj.fields, "owner")?;

    Ok(CapToken {
        cap_id,
        policy_id,
        owner,
    })
}

/// Parse a [`BlobRecord`] from a raw ledger object.
pub fn parse_blob_record(obj: &RawObject) -> Result<BlobRecord, SchemaError> {
    check_envelope(obj, BLOB_KIND)?;

    let blob_id = BlobId::parse(&obj.id).map_err(|e| SchemaError::MalformedField {
        field: "id",
        reason: e.to_string(),
    })?;
    let state = match str_field(&obj.fields, "state")? {
        "registered" => BlobState::Registered,
        "certified" => BlobState::Certified,
        other => {
            return Err(SchemaError::MalformedField {
                field: "state",
                reason: format!("unknown state {other:?}"),
            })
        }
    };
    let epochs = u64_field(&obj.fields, "epochs")? as u32;
    let descriptor_value = obj
        .fields
        .get("descriptor")
        .ok_or(SchemaError::MissingField("descriptor"))?;
    let descriptor: BlobDescriptor = serde_json::from_value(descriptor_value.clone())
        .map_err(|e| SchemaError::MalformedField {
            field: "descriptor",
            reason: e.to_string(),
        })?;

    Ok(BlobRecord {
        blob_id,
        state,
        descriptor,
        epochs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy_object() -> RawObject {
        RawObject {
            id: format!("0x{}", "11".repeat(32)),
            kind: POLICY_KIND.to_string(),
            version: SCHEMA_VERSION,
            fields: json!({
                "name": "mail",
                "owner": format!("0x{}", "22".repeat(32)),
                "allow_list": [format!("0x{}", "33".repeat(32))],
                "current_blob": null,
            }),
        }
    }

    #[test]
    fn parses_well_formed_policy() {
        let policy = parse_policy(&policy_object()).unwrap();
        assert_eq!(policy.name, "mail");
        assert_eq!(policy.allow_list.len(), 1);
        assert!(policy.current_blob.is_none());

        let owner = Address::parse(&format!("0x{}", "22".repeat(32))).unwrap();
        let member = Address::parse(&format!("0x{}", "33".repeat(32))).unwrap();
        let stranger = Address::parse(&format!("0x{}", "44".repeat(32))).unwrap();
        assert!(policy.authorizes(&owner));
        assert!(policy.authorizes(&member));
        assert!(!policy.authorizes(&stranger));
    }

    #[test]
    fn missing_field_is_typed() {
        let mut obj = policy_object();
        obj.fields.as_object_mut().unwrap().remove("owner");
        assert_eq!(
            parse_policy(&obj).unwrap_err(),
            SchemaError::MissingField("owner")
        );
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let mut obj = policy_object();
        obj.kind = CAP_KIND.to_string();
        assert!(matches!(
            parse_policy(&obj).unwrap_err(),
            SchemaError::UnexpectedKind { .. }
        ));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut obj = policy_object();
        obj.version = SCHEMA_VERSION + 1;
        assert!(matches!(
            parse_policy(&obj).unwrap_err(),
            SchemaError::UnsupportedVersion { .. }
        ));
    }

    #[test]
    fn malformed_address_is_typed() {
        let mut obj = policy_object();
        obj.fields["owner"] = json!("not-an-address");
        assert!(matches!(
            parse_policy(&obj).unwrap_err(),
            SchemaError::MalformedField { field: "owner", .. }
        ));
    }

    #[test]
    fn parses_cap() {
        let obj = RawObject {
            id: format!("0x{}", "aa".repeat(32)),
            kind: CAP_KIND.to_string(),
            version: SCHEMA_VERSION,
            fields: json!({
                "policy_id": format!("0x{}", "11".repeat(32)),
                "owner": format!("0x{}", "22".repeat(32)),
            }),
        };
        let cap = parse_cap(&obj).unwrap();
        assert_eq!(cap.policy_id.to_hex(), format!("0x{}", "11".repeat(32)));
    }
}
