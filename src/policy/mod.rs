// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Policy gate transaction builders.
//!
//! Builds the administrative transactions (create policy, grant/revoke
//! access, publish pointer) and the read-only authorization intent. All
//! operations are fire-and-submit: this component never executes
//! anything, and cap custody is validated by the authority, not locally.

use crate::ledger::{AuthorizationIntent, LedgerError, Transaction, TransactionKind, DEFAULT_GAS_BUDGET};
use crate::models::{Address, BlobId, CapId, ObjectId, PolicyId};

/// Builder for policy-gate transactions, bound to one sender address.
#[derive(Debug, Clone)]
pub struct PolicyGateClient {
    sender: Address,
    gas_budget: u64,
}

impl PolicyGateClient {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            gas_budget: DEFAULT_GAS_BUDGET,
        }
    }

    /// Override the default gas budget.
    pub fn with_gas_budget(mut self, gas_budget: u64) -> Self {
        self.gas_budget = gas_budget;
        self
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    fn transaction(&self, kind: TransactionKind) -> Transaction {
        Transaction {
            sender: self.sender,
            kind,
            gas_budget: self.gas_budget,
        }
    }

    /// Create a fresh policy + cap pair owned by the sender, with an
    /// empty allow list. The name is the only locally validated input.
    pub fn build_create_policy(&self, name: &str) -> Result<Transaction, LedgerError> {
        if name.trim().is_empty() {
            return Err(LedgerError::InvalidArgument(
                "policy name must not be empty".to_string(),
            ));
        }
        Ok(self.transaction(TransactionKind::CreatePolicy {
            name: name.to_string(),
        }))
    }

    /// Add `member` to the policy's allow list.
    pub fn build_grant_access(
        &self,
        policy_id: PolicyId,
        cap_id: CapId,
        member: Address,
    ) -> Transaction {
        self.transaction(TransactionKind::GrantAccess {
            policy_id,
            cap_id,
            member,
        })
    }

    /// Remove `member` from the policy's allow list.
    pub fn build_revoke_access(
        &self,
        policy_id: PolicyId,
        cap_id: CapId,
        member: Address,
    ) -> Transaction {
        self.transaction(TransactionKind::RevokeAccess {
            policy_id,
            cap_id,
            member,
        })
    }

    /// Overwrite the policy's current blob pointer.
    pub fn build_publish_pointer(
        &self,
        policy_id: PolicyId,
        cap_id: CapId,
        blob_id: BlobId,
    ) -> Transaction {
        self.transaction(TransactionKind::PublishPointer {
            policy_id,
            cap_id,
            blob_id,
        })
    }

    /// Read-only intent proving the sender may decrypt `full_object_id`
    /// under `policy_id`. Must simulate successfully on the authority for
    /// key servers to release shares.
    pub fn build_authorization_call(
        &self,
        policy_id: PolicyId,
        full_object_id: ObjectId,
    ) -> AuthorizationIntent {
        AuthorizationIntent {
            caller: self.sender,
            policy_id,
            full_object_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> PolicyGateClient {
        PolicyGateClient::new(Address::from_bytes([1u8; 32]))
    }

    #[test]
    fn create_policy_rejects_empty_name() {
        assert!(matches!(
            gate().build_create_policy("   "),
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn builders_bind_sender_and_gas_budget() {
        let gate = gate().with_gas_budget(42);
        let tx = gate.build_create_policy("mail").unwrap();
        assert_eq!(tx.sender, gate.sender());
        assert_eq!(tx.gas_budget, 42);
    }

    #[test]
    fn publish_builds_pointer_overwrite() {
        let policy_id = PolicyId::from_bytes([1u8; 32]);
        let cap_id = CapId::from_bytes([2u8; 32]);
        let blob_id = BlobId::from_bytes([3u8; 32]);
        let tx = gate().build_publish_pointer(policy_id, cap_id, blob_id);
        assert!(matches!(
            tx.kind,
            TransactionKind::PublishPointer { blob_id: b, .. } if b == blob_id
        ));
    }

    #[test]
    fn authorization_call_is_bound_to_sender() {
        let gate = gate();
        let intent = gate.build_authorization_call(
            PolicyId::from_bytes([1u8; 32]),
            ObjectId::from_bytes([4u8; 32]),
        );
        assert_eq!(intent.caller, gate.sender());
    }
}
