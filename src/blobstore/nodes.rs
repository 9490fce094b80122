// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Storage node seam.
//!
//! A storage node holds shards and acknowledges each durable write with
//! a signed [`NodeConfirmation`]. The engine speaks only the client side:
//! [`HttpStorageNode`] is the production transport, [`LocalStorageNode`]
//! the in-process implementation used by tests and local development.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::{Address, BlobId};
use crate::session::{recover_address, IdentitySigner, LocalSigner};

/// Stable identifier of one storage node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signed acknowledgment that one shard was durably received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfirmation {
    pub node_id: NodeId,
    pub blob_id: BlobId,
    pub shard_index: u8,
    /// Hex-encoded 65-byte recoverable signature over the receipt.
    pub signature: String,
}

impl NodeConfirmation {
    /// The receipt message a node signs.
    pub fn message_bytes(node_id: &NodeId, blob_id: &BlobId, shard_index: u8) -> Vec<u8> {
        format!("credvault shard receipt\nnode: {node_id}\nblob: {blob_id}\nshard: {shard_index}")
            .into_bytes()
    }

    /// Verify the signature against the node's configured public key.
    pub fn verify(&self, public_key: &k256::PublicKey) -> bool {
        let Ok(signature) = hex::decode(&self.signature) else {
            return false;
        };
        let message = Self::message_bytes(&self.node_id, &self.blob_id, self.shard_index);
        recover_address(&message, &signature) == Some(Address::from_public_key(public_key))
    }
}

/// Why a shard operation failed on one node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// The node does not hold the requested shard.
    #[error("shard not found")]
    NotFound,

    /// The node refused the request.
    #[error("node rejected the request: {0}")]
    Rejected(String),

    /// The node could not be reached or failed transiently.
    #[error("node unavailable: {0}")]
    Unavailable(String),
}

/// Client-side view of one storage node.
#[async_trait]
pub trait StorageNode: Send + Sync {
    fn id(&self) -> &NodeId;

    /// Public key confirmations are verified against.
    fn public_key(&self) -> &k256::PublicKey;

    /// Store one shard. Idempotent: re-putting the same shard returns a
    /// fresh confirmation without duplicating the allocation.
    async fn put_shard(
        &self,
        blob_id: &BlobId,
        shard_index: u8,
        shard: &[u8],
    ) -> Result<NodeConfirmation, NodeError>;

    /// Retrieve one shard.
    async fn get_shard(&self, blob_id: &BlobId, shard_index: u8) -> Result<Vec<u8>, NodeError>;
}

// =============================================================================
// HTTP transport
// =============================================================================

#[derive(Serialize, Deserialize)]
struct ConfirmationBody {
    signature: String,
}

/// Storage node reached over HTTPS.
pub struct HttpStorageNode {
    id: NodeId,
    endpoint: Url,
    public_key: k256::PublicKey,
    client: reqwest::Client,
}

impl HttpStorageNode {
    pub fn new(id: NodeId, endpoint: Url, public_key: k256::PublicKey, timeout: Duration) -> Self {
        Self {
            id,
            endpoint,
            public_key,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    fn shard_url(&self, blob_id: &BlobId, shard_index: u8) -> Result<Url, NodeError> {
        self.endpoint
            .join(&format!("v1/blobs/{blob_id}/shards/{shard_index}"))
            .map_err(|e| NodeError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl StorageNode for HttpStorageNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn public_key(&self) -> &k256::PublicKey {
        &self.public_key
    }

    async fn put_shard(
        &self,
        blob_id: &BlobId,
        shard_index: u8,
        shard: &[u8],
    ) -> Result<NodeConfirmation, NodeError> {
        let url = self.shard_url(blob_id, shard_index)?;
        let response = self
            .client
            .put(url)
            .body(shard.to_vec())
            .send()
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::Rejected(format!("HTTP {status}")));
        }
        let body: ConfirmationBody = response
            .json()
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;
        Ok(NodeConfirmation {
            node_id: self.id.clone(),
            blob_id: *blob_id,
            shard_index,
            signature: body.signature,
        })
    }

    async fn get_shard(&self, blob_id: &BlobId, shard_index: u8) -> Result<Vec<u8>, NodeError> {
        let url = self.shard_url(blob_id, shard_index)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(NodeError::NotFound);
        }
        if !status.is_success() {
            return Err(NodeError::Unavailable(format!("HTTP {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// =============================================================================
// In-process implementation
// =============================================================================

/// Storage node backed by process memory.
///
/// The `online` toggle simulates outages; the put counter lets tests
/// assert that retried flows do not re-upload shards.
pub struct LocalStorageNode {
    id: NodeId,
    signer: LocalSigner,
    public_key: k256::PublicKey,
    shards: Mutex<HashMap<(BlobId, u8), Vec<u8>>>,
    online: AtomicBool,
    puts: AtomicUsize,
}

impl LocalStorageNode {
    pub fn new(id: NodeId) -> Self {
        let signer = LocalSigner::random();
        let public_key = signer.public_key();
        Self {
            id,
            signer,
            public_key,
            shards: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            puts: AtomicUsize::new(0),
        }
    }

    /// Simulate an outage (or recovery) of this node.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of shard writes accepted so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageNode for LocalStorageNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn public_key(&self) -> &k256::PublicKey {
        &self.public_key
    }

    async fn put_shard(
        &self,
        blob_id: &BlobId,
        shard_index: u8,
        shard: &[u8],
    ) -> Result<NodeConfirmation, NodeError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(NodeError::Unavailable("node offline".to_string()));
        }
        match self.shards.lock() {
            Ok(mut shards) => {
                shards.insert((*blob_id, shard_index), shard.to_vec());
            }
            Err(_) => return Err(NodeError::Unavailable("storage poisoned".to_string())),
        }
        self.puts.fetch_add(1, Ordering::SeqCst);

        let message = NodeConfirmation::message_bytes(&self.id, blob_id, shard_index);
        let signature = self
            .signer
            .sign_message(&message)
            .await
            .map_err(|e| NodeError::Rejected(e.to_string()))?;
        Ok(NodeConfirmation {
            node_id: self.id.clone(),
            blob_id: *blob_id,
            shard_index,
            signature: hex::encode(signature),
        })
    }

    async fn get_shard(&self, blob_id: &BlobId, shard_index: u8) -> Result<Vec<u8>, NodeError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(NodeError::Unavailable("node offline".to_string()));
        }
        let shards = self
            .shards
            .lock()
            .map_err(|_| NodeError::Unavailable("storage poisoned".to_string()))?;
        shards
            .get(&(*blob_id, shard_index))
            .cloned()
            .ok_or(NodeError::NotFound)
    }
}
