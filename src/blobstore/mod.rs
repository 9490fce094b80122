// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Blob store client.
//!
//! Write path: encode into shards, declare intent on the authority
//! (Registered), distribute shards to their nodes, then certify once
//! enough signed confirmations exist (Certified, terminal). A blob whose
//! certification never completes stays registered-but-uncertified until
//! its epochs lapse. Read path: resolve the on-chain record, collect a
//! threshold of digest-verified shards, reassemble.

pub mod encode;
pub mod nodes;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use sha2::{Digest, Sha256};

pub use encode::{BlobDescriptor, EncodedBlob, EncodingConfig, ShardAssignment};
pub use nodes::{HttpStorageNode, LocalStorageNode, NodeConfirmation, NodeError, NodeId, StorageNode};

use crate::config::RetryPolicy;
use crate::ledger::{
    schema, Authority, BlobState, LedgerError, Transaction, TransactionKind, DEFAULT_GAS_BUDGET,
};
use crate::models::{Address, BlobId};

/// Errors raised by the blob store client.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// Too few confirmations to certify. The blob stays registered but
    /// uncertified; the caller must re-distribute or abandon it.
    #[error("insufficient shard confirmations: {confirmed} of {required}")]
    InsufficientRedundancy { confirmed: usize, required: usize },

    /// No certified record, or no sufficient shard set, for this blob.
    #[error("blob not found: {0}")]
    NotFound(BlobId),

    /// The reconstructed content was empty.
    #[error("blob reconstructed empty")]
    EmptyBlob,

    /// A shard or the reconstructed content failed its integrity check.
    #[error("blob integrity check failed: {0}")]
    IntegrityMismatch(String),

    /// Encoding or reconstruction failed.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// The authority could not resolve the blob record.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Client for the erasure-coded blob store.
pub struct BlobStoreClient {
    authority: Arc<dyn Authority>,
    nodes: Vec<Arc<dyn StorageNode>>,
    encoding: EncodingConfig,
    retry: RetryPolicy,
}

impl BlobStoreClient {
    pub fn new(
        authority: Arc<dyn Authority>,
        nodes: Vec<Arc<dyn StorageNode>>,
        encoding: EncodingConfig,
        retry: RetryPolicy,
    ) -> Result<Self, BlobError> {
        if nodes.is_empty() {
            return Err(BlobError::Encoding(
                "at least one storage node is required".to_string(),
            ));
        }
        Ok(Self {
            authority,
            nodes,
            encoding,
            retry,
        })
    }

    /// Deterministic, content-addressed encoding over the configured
    /// node set.
    pub fn encode(&self, content: &[u8]) -> Result<EncodedBlob, BlobError> {
        let node_ids: Vec<NodeId> = self.nodes.iter().map(|n| n.id().clone()).collect();
        encode::encode(content, &self.encoding, &node_ids)
    }

    /// Build the on-chain declaration of intent to store. Establishes
    /// the registered-but-uncertified state; idempotent for an existing
    /// blob id.
    pub fn register_intent(
        &self,
        sender: &Address,
        descriptor: &BlobDescriptor,
        epochs: u32,
    ) -> Transaction {
        Transaction {
            sender: *sender,
            kind: TransactionKind::RegisterBlob {
                descriptor: descriptor.clone(),
                epochs,
            },
            gas_budget: DEFAULT_GAS_BUDGET,
        }
    }

    /// Send every shard to its assigned node in parallel. Per-node
    /// failures are absorbed and logged; the return value is whatever
    /// confirmations were obtainable within the timeout/retry budget.
    pub async fn distribute_shards(&self, encoded: &EncodedBlob) -> Vec<NodeConfirmation> {
        let blob_id = encoded.descriptor.blob_id;
        let mut pending = FuturesUnordered::new();
        for assignment in &encoded.descriptor.shards {
            let index = usize::from(assignment.index);
            let Some(shard) = encoded.shards.get(index) else {
                tracing::warn!(%blob_id, index, "descriptor references a missing shard");
                continue;
            };
            match self.node_by_id(&assignment.node_id) {
                Some(node) => {
                    pending.push(self.put_with_retry(
                        node,
                        blob_id,
                        assignment.index,
                        shard.clone(),
                    ));
                }
                None => {
                    tracing::warn!(
                        node = %assignment.node_id,
                        "shard assigned to an unconfigured storage node"
                    );
                }
            }
        }

        let mut confirmations = Vec::new();
        while let Some((index, outcome)) = pending.next().await {
            match outcome {
                Ok(confirmation) => confirmations.push(confirmation),
                Err(error) => {
                    tracing::warn!(%blob_id, index, %error, "shard write failed");
                }
            }
        }
        confirmations
    }

    /// Build the certification transaction once enough distinct, validly
    /// signed confirmations exist. Fails with
    /// [`BlobError::InsufficientRedundancy`] below the reconstruction
    /// threshold.
    pub fn certify(
        &self,
        sender: &Address,
        descriptor: &BlobDescriptor,
        confirmations: Vec<NodeConfirmation>,
    ) -> Result<Transaction, BlobError> {
        let mut seen = BTreeSet::new();
        let mut valid = Vec::new();
        for confirmation in confirmations {
            if confirmation.blob_id != descriptor.blob_id {
                continue;
            }
            let Some(node) = self.node_by_id(&confirmation.node_id) else {
                continue;
            };
            if !confirmation.verify(node.public_key()) {
                tracing::warn!(
                    node = %confirmation.node_id,
                    "dropping confirmation with an invalid signature"
                );
                continue;
            }
            if seen.insert(confirmation.shard_index) {
                valid.push(confirmation);
            }
        }

        let required = usize::from(descriptor.reconstruction_threshold);
        if valid.len() < required {
            return Err(BlobError::InsufficientRedundancy {
                confirmed: valid.len(),
                required,
            });
        }

        Ok(Transaction {
            sender: *sender,
            kind: TransactionKind::CertifyBlob {
                blob_id: descriptor.blob_id,
                confirmations: valid,
            },
            gas_budget: DEFAULT_GAS_BUDGET,
        })
    }

    /// Fetch and reassemble a certified blob by id.
    pub async fn fetch(&self, blob_id: &BlobId) -> Result<Vec<u8>, BlobError> {
        let raw = self
            .authority
            .get_object(&blob_id.to_hex())
            .await
            .map_err(|e| match e {
                LedgerError::NotFound(_) => BlobError::NotFound(*blob_id),
                other => BlobError::Ledger(other),
            })?;
        let record = schema::parse_blob_record(&raw).map_err(LedgerError::Schema)?;
        if record.state != BlobState::Certified {
            return Err(BlobError::NotFound(*blob_id));
        }
        let descriptor = record.descriptor;
        let required = usize::from(descriptor.reconstruction_threshold);
        let digests: BTreeMap<u8, &str> = descriptor
            .shards
            .iter()
            .map(|a| (a.index, a.digest.as_str()))
            .collect();

        let mut pending = FuturesUnordered::new();
        for assignment in &descriptor.shards {
            match self.node_by_id(&assignment.node_id) {
                Some(node) => {
                    pending.push(self.get_with_retry(node, *blob_id, assignment.index));
                }
                None => {
                    tracing::warn!(
                        node = %assignment.node_id,
                        "shard assigned to an unconfigured storage node"
                    );
                }
            }
        }

        let mut shards: Vec<(u8, Vec<u8>)> = Vec::with_capacity(required);
        let mut indexes = BTreeSet::new();
        while let Some((index, outcome)) = pending.next().await {
            match outcome {
                Ok(bytes) => {
                    // A shard that fails its digest counts as a node
                    // failure, not as quorum progress.
                    let expected = digests.get(&index).copied().unwrap_or_default();
                    if hex::encode(Sha256::digest(&bytes)) != expected {
                        tracing::warn!(%blob_id, index, "shard failed its digest check");
                        continue;
                    }
                    if indexes.insert(index) {
                        shards.push((index, bytes));
                        if shards.len() >= required {
                            break;
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(%blob_id, index, %error, "shard read failed");
                }
            }
        }
        drop(pending);

        if shards.len() < required {
            return Err(BlobError::NotFound(*blob_id));
        }

        let content = encode::reassemble(&descriptor, &shards)?;
        if content.is_empty() {
            return Err(BlobError::EmptyBlob);
        }
        Ok(content)
    }

    fn node_by_id(&self, id: &NodeId) -> Option<Arc<dyn StorageNode>> {
        self.nodes.iter().find(|n| n.id() == id).cloned()
    }

    async fn put_with_retry(
        &self,
        node: Arc<dyn StorageNode>,
        blob_id: BlobId,
        index: u8,
        shard: Vec<u8>,
    ) -> (u8, Result<NodeConfirmation, NodeError>) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = tokio::time::timeout(
                self.retry.timeout,
                node.put_shard(&blob_id, index, &shard),
            )
            .await;
            match outcome {
                Ok(Ok(confirmation)) => return (index, Ok(confirmation)),
                Ok(Err(rejected @ NodeError::Rejected(_))) => return (index, Err(rejected)),
                Ok(Err(NodeError::NotFound)) => return (index, Err(NodeError::NotFound)),
                Ok(Err(NodeError::Unavailable(reason))) if attempt <= self.retry.budget => {
                    tracing::debug!(node = %node.id(), %reason, attempt, "retrying shard write");
                }
                Ok(Err(unavailable)) => return (index, Err(unavailable)),
                Err(_) if attempt <= self.retry.budget => {
                    tracing::debug!(node = %node.id(), attempt, "shard write timed out, retrying");
                }
                Err(_) => {
                    return (
                        index,
                        Err(NodeError::Unavailable("timed out".to_string())),
                    )
                }
            }
            tokio::time::sleep(self.retry.delay).await;
        }
    }

    async fn get_with_retry(
        &self,
        node: Arc<dyn StorageNode>,
        blob_id: BlobId,
        index: u8,
    ) -> (u8, Result<Vec<u8>, NodeError>) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome =
                tokio::time::timeout(self.retry.timeout, node.get_shard(&blob_id, index)).await;
            match outcome {
                Ok(Ok(bytes)) => return (index, Ok(bytes)),
                Ok(Err(NodeError::NotFound)) => return (index, Err(NodeError::NotFound)),
                Ok(Err(rejected @ NodeError::Rejected(_))) => return (index, Err(rejected)),
                Ok(Err(NodeError::Unavailable(reason))) if attempt <= self.retry.budget => {
                    tracing::debug!(node = %node.id(), %reason, attempt, "retrying shard read");
                }
                Ok(Err(unavailable)) => return (index, Err(unavailable)),
                Err(_) if attempt <= self.retry.budget => {
                    tracing::debug!(node = %node.id(), attempt, "shard read timed out, retrying");
                }
                Err(_) => {
                    return (
                        index,
                        Err(NodeError::Unavailable("timed out".to_string())),
                    )
                }
            }
            tokio::time::sleep(self.retry.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::ledger::InMemoryAuthority;

    struct TestBed {
        authority: Arc<InMemoryAuthority>,
        nodes: Vec<Arc<LocalStorageNode>>,
        client: BlobStoreClient,
        owner: Address,
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(500),
            budget: 1,
            delay: Duration::from_millis(5),
        }
    }

    fn testbed(node_count: usize, threshold: u8) -> TestBed {
        let authority = Arc::new(InMemoryAuthority::new());
        let nodes: Vec<Arc<LocalStorageNode>> = (0..node_count)
            .map(|i| Arc::new(LocalStorageNode::new(NodeId::new(format!("sn-{i}")))))
            .collect();
        let dyn_nodes: Vec<Arc<dyn StorageNode>> = nodes
            .iter()
            .map(|n| n.clone() as Arc<dyn StorageNode>)
            .collect();
        let handle: Arc<dyn Authority> = authority.clone();
        let client = BlobStoreClient::new(
            handle,
            dyn_nodes,
            EncodingConfig::new(node_count as u8, threshold, 16).unwrap(),
            retry(),
        )
        .unwrap();
        TestBed {
            authority,
            nodes,
            client,
            owner: Address::from_bytes([1u8; 32]),
        }
    }

    async fn register(bed: &TestBed, encoded: &EncodedBlob) {
        bed.authority
            .execute(bed.client.register_intent(&bed.owner, &encoded.descriptor, 1))
            .await
            .unwrap()
            .into_result()
            .unwrap();
    }

    #[tokio::test]
    async fn two_phase_write_then_fetch() {
        let bed = testbed(4, 2);
        let content = b"an encrypted credential payload";
        let encoded = bed.client.encode(content).unwrap();

        register(&bed, &encoded).await;
        let confirmations = bed.client.distribute_shards(&encoded).await;
        assert_eq!(confirmations.len(), 4);

        let certify = bed
            .client
            .certify(&bed.owner, &encoded.descriptor, confirmations)
            .unwrap();
        bed.authority
            .execute(certify)
            .await
            .unwrap()
            .into_result()
            .unwrap();

        let fetched = bed.client.fetch(&encoded.descriptor.blob_id).await.unwrap();
        assert_eq!(fetched, content);
    }

    #[tokio::test]
    async fn uncertified_blob_is_not_readable() {
        let bed = testbed(4, 2);
        let encoded = bed.client.encode(b"payload").unwrap();
        register(&bed, &encoded).await;
        bed.client.distribute_shards(&encoded).await;

        assert!(matches!(
            bed.client.fetch(&encoded.descriptor.blob_id).await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn write_survives_one_node_outage() {
        let bed = testbed(4, 2);
        bed.nodes[3].set_online(false);
        let encoded = bed.client.encode(b"payload").unwrap();

        register(&bed, &encoded).await;
        let confirmations = bed.client.distribute_shards(&encoded).await;
        assert_eq!(confirmations.len(), 3);

        assert!(bed
            .client
            .certify(&bed.owner, &encoded.descriptor, confirmations)
            .is_ok());
    }

    #[tokio::test]
    async fn certify_below_threshold_is_insufficient_redundancy() {
        let bed = testbed(4, 3);
        for node in &bed.nodes[1..] {
            node.set_online(false);
        }
        let encoded = bed.client.encode(b"payload").unwrap();

        register(&bed, &encoded).await;
        let confirmations = bed.client.distribute_shards(&encoded).await;
        assert_eq!(confirmations.len(), 1);

        let err = bed
            .client
            .certify(&bed.owner, &encoded.descriptor, confirmations)
            .unwrap_err();
        assert!(matches!(
            err,
            BlobError::InsufficientRedundancy {
                confirmed: 1,
                required: 3
            }
        ));
    }

    #[tokio::test]
    async fn certify_drops_forged_confirmations() {
        let bed = testbed(3, 3);
        let encoded = bed.client.encode(b"payload").unwrap();
        register(&bed, &encoded).await;
        let mut confirmations = bed.client.distribute_shards(&encoded).await;

        // Re-sign one confirmation claim with the wrong node identity.
        confirmations[0].signature = confirmations[1].signature.clone();

        let err = bed
            .client
            .certify(&bed.owner, &encoded.descriptor, confirmations)
            .unwrap_err();
        assert!(matches!(err, BlobError::InsufficientRedundancy { .. }));
    }

    #[tokio::test]
    async fn fetch_tolerates_outages_up_to_threshold() {
        let bed = testbed(4, 2);
        let content = b"payload that must stay readable";
        let encoded = bed.client.encode(content).unwrap();
        register(&bed, &encoded).await;
        let confirmations = bed.client.distribute_shards(&encoded).await;
        let certify = bed
            .client
            .certify(&bed.owner, &encoded.descriptor, confirmations)
            .unwrap();
        bed.authority
            .execute(certify)
            .await
            .unwrap()
            .into_result()
            .unwrap();

        // Two of four nodes down: threshold 2 still reachable.
        bed.nodes[0].set_online(false);
        bed.nodes[1].set_online(false);
        let fetched = bed.client.fetch(&encoded.descriptor.blob_id).await.unwrap();
        assert_eq!(fetched, content);

        // Third outage breaks the quorum.
        bed.nodes[2].set_online(false);
        assert!(matches!(
            bed.client.fetch(&encoded.descriptor.blob_id).await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reregistering_certified_blob_is_idempotent() {
        let bed = testbed(4, 2);
        let encoded = bed.client.encode(b"payload").unwrap();
        register(&bed, &encoded).await;
        let confirmations = bed.client.distribute_shards(&encoded).await;
        let certify = bed
            .client
            .certify(&bed.owner, &encoded.descriptor, confirmations)
            .unwrap();
        bed.authority
            .execute(certify)
            .await
            .unwrap()
            .into_result()
            .unwrap();

        // Second registration of identical content: same blob id, no new
        // record, certification untouched.
        let again = bed.client.encode(b"payload").unwrap();
        assert_eq!(again.descriptor.blob_id, encoded.descriptor.blob_id);
        let effects = bed
            .authority
            .execute(bed.client.register_intent(&bed.owner, &again.descriptor, 1))
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert!(effects.created.is_empty());
        assert!(bed.client.fetch(&encoded.descriptor.blob_id).await.is_ok());
    }

    #[tokio::test]
    async fn fetch_unknown_blob_is_not_found() {
        let bed = testbed(3, 2);
        assert!(matches!(
            bed.client.fetch(&BlobId::from_bytes([9u8; 32])).await,
            Err(BlobError::NotFound(_))
        ));
    }
}
