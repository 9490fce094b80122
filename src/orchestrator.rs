// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Credential orchestrator.
//!
//! Composes the session, policy gate, threshold crypto, and blob store
//! clients into the two end-to-end flows:
//!
//! - **Write**: serialize -> encrypt -> encode -> register -> distribute
//!   -> certify -> publish pointer.
//! - **Read**: resolve pointer -> fetch blob -> authorize -> decrypt.
//!
//! Every ceremony runs against an explicit [`Session`] created by the
//! caller and dropped when the ceremony ends; there are no process-wide
//! singletons. A write that certifies the blob but fails to publish the
//! pointer surfaces as [`VaultError::PublishPending`], and
//! [`CredentialOrchestrator::retry_publish`] completes it without
//! re-uploading anything.

use std::sync::Arc;

use uuid::Uuid;

use crate::blobstore::BlobStoreClient;
use crate::config::ProtocolConfig;
use crate::error::VaultError;
use crate::ledger::{schema, Authority, BlobState, LedgerError, ObjectKind};
use crate::models::{Address, BlobId, CapId, Credential, PolicyId};
use crate::policy::PolicyGateClient;
use crate::session::{IdentitySigner, SessionKey, SessionKeyCache};
use crate::threshold::{EncryptedObject, ThresholdCryptoClient};

/// Per-ceremony state: one identity, one ceremony id for tracing.
///
/// Create a session for each write or read ceremony and drop it when the
/// ceremony ends.
pub struct Session {
    id: Uuid,
    signer: Arc<dyn IdentitySigner>,
}

impl Session {
    pub fn new(signer: Arc<dyn IdentitySigner>) -> Self {
        Self {
            id: Uuid::new_v4(),
            signer,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn signer(&self) -> &dyn IdentitySigner {
        self.signer.as_ref()
    }
}

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub blob_id: BlobId,
    /// Digest of the pointer-publish transaction.
    pub publish_digest: String,
}

/// The root API of the engine.
pub struct CredentialOrchestrator {
    authority: Arc<dyn Authority>,
    threshold: ThresholdCryptoClient,
    blobs: BlobStoreClient,
    session_keys: SessionKeyCache,
    config: ProtocolConfig,
}

impl CredentialOrchestrator {
    pub fn new(
        authority: Arc<dyn Authority>,
        threshold: ThresholdCryptoClient,
        blobs: BlobStoreClient,
        config: ProtocolConfig,
    ) -> Self {
        let session_keys = SessionKeyCache::new(config.session_cache_capacity);
        Self {
            authority,
            threshold,
            blobs,
            session_keys,
            config,
        }
    }

    // =========================================================================
    // Admin flows
    // =========================================================================

    /// Create a fresh access policy owned by the session identity.
    /// Returns the policy id and the administrative cap id.
    pub async fn create_policy(
        &self,
        session: &Session,
        name: &str,
    ) -> Result<(PolicyId, CapId), VaultError> {
        let gate = PolicyGateClient::new(session.address());
        let effects = self
            .authority
            .execute(gate.build_create_policy(name)?)
            .await?
            .into_result()?;

        let policy_id = effects
            .created_id(ObjectKind::Policy)
            .and_then(|id| PolicyId::parse(id).ok())
            .ok_or_else(|| {
                LedgerError::Rejected("authority returned no policy object".to_string())
            })?;
        let cap_id = effects
            .created_id(ObjectKind::Cap)
            .and_then(|id| CapId::parse(id).ok())
            .ok_or_else(|| LedgerError::Rejected("authority returned no cap object".to_string()))?;

        tracing::info!(ceremony = %session.id(), %policy_id, "policy created");
        Ok((policy_id, cap_id))
    }

    /// Add `member` to the policy's allow list.
    pub async fn grant_access(
        &self,
        session: &Session,
        policy_id: PolicyId,
        cap_id: CapId,
        member: Address,
    ) -> Result<(), VaultError> {
        let gate = PolicyGateClient::new(session.address());
        self.authority
            .execute(gate.build_grant_access(policy_id, cap_id, member))
            .await?
            .into_result()?;
        tracing::info!(ceremony = %session.id(), %policy_id, %member, "access granted");
        Ok(())
    }

    /// Remove `member` from the policy's allow list.
    pub async fn revoke_access(
        &self,
        session: &Session,
        policy_id: PolicyId,
        cap_id: CapId,
        member: Address,
    ) -> Result<(), VaultError> {
        let gate = PolicyGateClient::new(session.address());
        self.authority
            .execute(gate.build_revoke_access(policy_id, cap_id, member))
            .await?
            .into_result()?;
        tracing::info!(ceremony = %session.id(), %policy_id, %member, "access revoked");
        Ok(())
    }

    /// List the policies administered by the session identity: every
    /// owned cap joined with its policy.
    pub async fn list_policies(
        &self,
        session: &Session,
    ) -> Result<Vec<(schema::CapToken, schema::AccessPolicy)>, VaultError> {
        let raw_caps = self
            .authority
            .owned_objects(&session.address(), schema::CAP_KIND)
            .await?;
        let mut entries = Vec::with_capacity(raw_caps.len());
        for raw in &raw_caps {
            let cap = schema::parse_cap(raw).map_err(LedgerError::Schema)?;
            let raw_policy = self.authority.get_object(&cap.policy_id.to_hex()).await?;
            let policy = schema::parse_policy(&raw_policy).map_err(LedgerError::Schema)?;
            entries.push((cap, policy));
        }
        Ok(entries)
    }

    // =========================================================================
    // Write flow
    // =========================================================================

    /// Encrypt and durably store a credential, then publish its pointer
    /// under the policy. Returns once the pointer publish is
    /// ledger-confirmed.
    pub async fn write(
        &self,
        session: &Session,
        policy_id: PolicyId,
        cap_id: CapId,
        credential: &Credential,
    ) -> Result<WriteReceipt, VaultError> {
        tracing::info!(ceremony = %session.id(), %policy_id, "credential write started");

        let plaintext = credential.to_bytes()?;
        let object = self
            .threshold
            .encrypt(&policy_id, self.config.default_threshold, &plaintext)?;
        let encoded = self.blobs.encode(&object.to_bytes())?;
        let blob_id = encoded.descriptor.blob_id;

        // Registration must be ledger-confirmed before any shard moves.
        self.authority
            .execute(
                self.blobs
                    .register_intent(&session.address(), &encoded.descriptor, self.config.default_epochs),
            )
            .await?
            .into_result()?;

        // Identical content already certified: skip the upload entirely.
        if self.blob_state(&blob_id).await? == BlobState::Certified {
            tracing::debug!(%blob_id, "blob already certified, skipping distribution");
        } else {
            let confirmations = self.blobs.distribute_shards(&encoded).await;
            let certify =
                self.blobs
                    .certify(&session.address(), &encoded.descriptor, confirmations)?;
            self.authority.execute(certify).await?.into_result()?;
            tracing::debug!(%blob_id, "blob certified");
        }

        self.publish(session, policy_id, cap_id, blob_id).await
    }

    /// Re-run only the pointer publish for an already-certified blob.
    /// The companion to [`VaultError::PublishPending`]; nothing is
    /// re-encrypted or re-uploaded.
    pub async fn retry_publish(
        &self,
        session: &Session,
        policy_id: PolicyId,
        cap_id: CapId,
        blob_id: BlobId,
    ) -> Result<WriteReceipt, VaultError> {
        if self.blob_state(&blob_id).await? != BlobState::Certified {
            return Err(VaultError::Blob(crate::blobstore::BlobError::NotFound(
                blob_id,
            )));
        }
        self.publish(session, policy_id, cap_id, blob_id).await
    }

    async fn publish(
        &self,
        session: &Session,
        policy_id: PolicyId,
        cap_id: CapId,
        blob_id: BlobId,
    ) -> Result<WriteReceipt, VaultError> {
        let gate = PolicyGateClient::new(session.address());
        let outcome = self
            .authority
            .execute(gate.build_publish_pointer(policy_id, cap_id, blob_id))
            .await
            .and_then(|effects| effects.into_result());
        match outcome {
            Ok(effects) => {
                tracing::info!(ceremony = %session.id(), %policy_id, %blob_id, "pointer published");
                Ok(WriteReceipt {
                    blob_id,
                    publish_digest: effects.digest,
                })
            }
            Err(source) => {
                tracing::warn!(
                    ceremony = %session.id(),
                    %blob_id,
                    %source,
                    "blob durable but pointer publish failed"
                );
                Err(VaultError::PublishPending { blob_id, source })
            }
        }
    }

    async fn blob_state(&self, blob_id: &BlobId) -> Result<BlobState, VaultError> {
        let raw = self.authority.get_object(&blob_id.to_hex()).await?;
        let record = schema::parse_blob_record(&raw).map_err(LedgerError::Schema)?;
        Ok(record.state)
    }

    // =========================================================================
    // Read flow
    // =========================================================================

    /// Recover the credential currently published under `policy_id`.
    /// Only succeeds when the session identity is the policy owner or on
    /// its allow list, as re-checked by every key server.
    pub async fn read(
        &self,
        session: &Session,
        policy_id: PolicyId,
    ) -> Result<Credential, VaultError> {
        tracing::info!(ceremony = %session.id(), %policy_id, "credential read started");

        let raw = self.authority.get_object(&policy_id.to_hex()).await?;
        let policy = schema::parse_policy(&raw).map_err(LedgerError::Schema)?;
        let blob_id = policy
            .current_blob
            .ok_or(VaultError::NothingPublished(policy_id))?;

        let blob_bytes = self.blobs.fetch(&blob_id).await?;
        let object = EncryptedObject::parse(&blob_bytes)?;

        let session_key = self.session_key_for(session, policy_id).await?;
        let gate = PolicyGateClient::new(session.address());
        let intent = gate.build_authorization_call(policy_id, object.header.full_object_id);

        let plaintext = self.threshold.decrypt(&object, &session_key, &intent).await?;
        Ok(Credential::from_bytes(&plaintext)?)
    }

    /// Reuse a cached session key for `(address, scope)` within its TTL,
    /// or run a fresh challenge/sign ceremony against the session's
    /// identity signer.
    async fn session_key_for(
        &self,
        session: &Session,
        scope: PolicyId,
    ) -> Result<SessionKey, VaultError> {
        if let Some(key) = self.session_keys.get(&session.address(), &scope) {
            tracing::debug!(ceremony = %session.id(), "reusing cached session key");
            return Ok(key);
        }

        let mut key = SessionKey::new(
            session.address(),
            scope,
            self.config.session_ttl_minutes,
        )?;
        let message = key.challenge_message()?;
        let signature = session.signer().sign_message(&message).await?;
        key.apply_signature(&signature)?;
        self.session_keys.put(key.clone());
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::blobstore::{EncodingConfig, LocalStorageNode, NodeId, StorageNode};
    use crate::config::RetryPolicy;
    use crate::error::Remediation;
    use crate::ledger::{
        AuthorizationIntent, InMemoryAuthority, RawObject, Transaction, TransactionKind, TxEffects,
    };
    use crate::session::{LocalSigner, SignerError};
    use crate::threshold::{KeyServer, LocalKeyServer, ServerId};

    /// Authority wrapper that fails the next `fail_publishes` pointer
    /// publishes with a network error.
    struct FlakyAuthority {
        inner: Arc<InMemoryAuthority>,
        fail_publishes: AtomicU32,
    }

    #[async_trait]
    impl Authority for FlakyAuthority {
        async fn execute(&self, tx: Transaction) -> Result<TxEffects, LedgerError> {
            if matches!(tx.kind, TransactionKind::PublishPointer { .. })
                && self
                    .fail_publishes
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(LedgerError::Network("connection reset".to_string()));
            }
            self.inner.execute(tx).await
        }

        async fn simulate(&self, intent: &AuthorizationIntent) -> Result<(), LedgerError> {
            self.inner.simulate(intent).await
        }

        async fn get_object(&self, id: &str) -> Result<RawObject, LedgerError> {
            self.inner.get_object(id).await
        }

        async fn owned_objects(
            &self,
            owner: &Address,
            kind: &str,
        ) -> Result<Vec<RawObject>, LedgerError> {
            self.inner.owned_objects(owner, kind).await
        }
    }

    /// Signer wrapper counting how many challenges were actually signed.
    struct CountingSigner {
        inner: LocalSigner,
        signs: AtomicUsize,
    }

    #[async_trait]
    impl IdentitySigner for CountingSigner {
        fn address(&self) -> Address {
            self.inner.address()
        }

        async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
            self.signs.fetch_add(1, Ordering::SeqCst);
            self.inner.sign_message(message).await
        }
    }

    struct TestBed {
        orchestrator: CredentialOrchestrator,
        nodes: Vec<Arc<LocalStorageNode>>,
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(500),
            budget: 1,
            delay: Duration::from_millis(5),
        }
    }

    fn testbed(authority: Arc<dyn Authority>) -> TestBed {
        let servers: Vec<Arc<dyn KeyServer>> = (0..3)
            .map(|i| {
                Arc::new(LocalKeyServer::new(
                    ServerId::new(format!("ks-{i}")),
                    authority.clone(),
                )) as Arc<dyn KeyServer>
            })
            .collect();
        let threshold = ThresholdCryptoClient::new(servers, retry());

        let nodes: Vec<Arc<LocalStorageNode>> = (0..4)
            .map(|i| Arc::new(LocalStorageNode::new(NodeId::new(format!("sn-{i}")))))
            .collect();
        let dyn_nodes: Vec<Arc<dyn StorageNode>> = nodes
            .iter()
            .map(|n| n.clone() as Arc<dyn StorageNode>)
            .collect();
        let blobs = BlobStoreClient::new(
            authority.clone(),
            dyn_nodes,
            EncodingConfig::new(4, 2, 1024).unwrap(),
            retry(),
        )
        .unwrap();

        let orchestrator =
            CredentialOrchestrator::new(authority, threshold, blobs, ProtocolConfig::default());
        TestBed {
            orchestrator,
            nodes,
        }
    }

    fn credential() -> Credential {
        Credential::new("mail", "alice", "secret1")
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn total_puts(nodes: &[Arc<LocalStorageNode>]) -> usize {
        nodes.iter().map(|n| n.put_count()).sum()
    }

    #[tokio::test]
    async fn full_lifecycle_with_allow_list_grant() {
        init_tracing();
        let bed = testbed(Arc::new(InMemoryAuthority::new()));
        let owner = Session::new(Arc::new(LocalSigner::random()));

        // Owner O creates policy P and writes the credential.
        let (policy_id, cap_id) = bed.orchestrator.create_policy(&owner, "mail").await.unwrap();
        let receipt = bed
            .orchestrator
            .write(&owner, policy_id, cap_id, &credential())
            .await
            .unwrap();

        // Owner reads back the original record.
        let read_back = bed.orchestrator.read(&owner, policy_id).await.unwrap();
        assert_eq!(read_back, credential());

        // Address X is not on the allow list: no access, reported as
        // denial rather than unavailability.
        let outsider = Session::new(Arc::new(LocalSigner::random()));
        let err = bed.orchestrator.read(&outsider, policy_id).await.unwrap_err();
        assert_eq!(err.remediation(), Remediation::NoAccess);

        // Owner grants X; the same stored ciphertext becomes readable.
        bed.orchestrator
            .grant_access(&owner, policy_id, cap_id, outsider.address())
            .await
            .unwrap();
        let recovered = bed.orchestrator.read(&outsider, policy_id).await.unwrap();
        assert_eq!(recovered, credential());

        // Revoking closes access again.
        bed.orchestrator
            .revoke_access(&owner, policy_id, cap_id, outsider.address())
            .await
            .unwrap();
        let err = bed.orchestrator.read(&outsider, policy_id).await.unwrap_err();
        assert_eq!(err.remediation(), Remediation::NoAccess);

        // The published pointer matches the written blob.
        let listed = bed.orchestrator.list_policies(&owner).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1.current_blob, Some(receipt.blob_id));
    }

    #[tokio::test]
    async fn read_before_any_write_reports_nothing_published() {
        let bed = testbed(Arc::new(InMemoryAuthority::new()));
        let owner = Session::new(Arc::new(LocalSigner::random()));
        let (policy_id, _cap_id) = bed.orchestrator.create_policy(&owner, "mail").await.unwrap();

        assert!(matches!(
            bed.orchestrator.read(&owner, policy_id).await,
            Err(VaultError::NothingPublished(p)) if p == policy_id
        ));
    }

    #[tokio::test]
    async fn orphaned_blob_recovers_with_publish_retry_only() {
        let inner = Arc::new(InMemoryAuthority::new());
        let authority = Arc::new(FlakyAuthority {
            inner,
            fail_publishes: AtomicU32::new(1),
        });
        let bed = testbed(authority);
        let owner = Session::new(Arc::new(LocalSigner::random()));
        let (policy_id, cap_id) = bed.orchestrator.create_policy(&owner, "mail").await.unwrap();

        // Certification succeeds, publish fails: distinct retryable error.
        let err = bed
            .orchestrator
            .write(&owner, policy_id, cap_id, &credential())
            .await
            .unwrap_err();
        assert_eq!(err.remediation(), Remediation::Retry);
        let VaultError::PublishPending { blob_id, .. } = err else {
            panic!("expected PublishPending, got {err:?}");
        };
        let uploads_after_write = total_puts(&bed.nodes);
        assert!(uploads_after_write > 0);

        // Retrying only the publish step succeeds without re-uploading.
        let receipt = bed
            .orchestrator
            .retry_publish(&owner, policy_id, cap_id, blob_id)
            .await
            .unwrap();
        assert_eq!(receipt.blob_id, blob_id);
        assert_eq!(total_puts(&bed.nodes), uploads_after_write);

        let read_back = bed.orchestrator.read(&owner, policy_id).await.unwrap();
        assert_eq!(read_back, credential());
    }

    #[tokio::test]
    async fn retry_publish_requires_a_certified_blob() {
        let bed = testbed(Arc::new(InMemoryAuthority::new()));
        let owner = Session::new(Arc::new(LocalSigner::random()));
        let (policy_id, cap_id) = bed.orchestrator.create_policy(&owner, "mail").await.unwrap();

        assert!(matches!(
            bed.orchestrator
                .retry_publish(&owner, policy_id, cap_id, BlobId::from_bytes([9u8; 32]))
                .await,
            Err(VaultError::Ledger(LedgerError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn session_key_is_reused_across_reads_within_ttl() {
        let bed = testbed(Arc::new(InMemoryAuthority::new()));
        let signer = Arc::new(CountingSigner {
            inner: LocalSigner::random(),
            signs: AtomicUsize::new(0),
        });
        let owner = Session::new(signer.clone());
        let (policy_id, cap_id) = bed.orchestrator.create_policy(&owner, "mail").await.unwrap();
        bed.orchestrator
            .write(&owner, policy_id, cap_id, &credential())
            .await
            .unwrap();

        bed.orchestrator.read(&owner, policy_id).await.unwrap();
        bed.orchestrator.read(&owner, policy_id).await.unwrap();
        assert_eq!(signer.signs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn updating_a_credential_overwrites_the_pointer() {
        let bed = testbed(Arc::new(InMemoryAuthority::new()));
        let owner = Session::new(Arc::new(LocalSigner::random()));
        let (policy_id, cap_id) = bed.orchestrator.create_policy(&owner, "mail").await.unwrap();

        bed.orchestrator
            .write(&owner, policy_id, cap_id, &credential())
            .await
            .unwrap();
        let updated = Credential::new("mail", "alice", "rotated-secret");
        bed.orchestrator
            .write(&owner, policy_id, cap_id, &updated)
            .await
            .unwrap();

        let read_back = bed.orchestrator.read(&owner, policy_id).await.unwrap();
        assert_eq!(read_back, updated);
    }
}
