// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Blob encoding.
//!
//! Content is chunked and every chunk split into `shard_count` threshold
//! shares; shard `i` concatenates share `i` of every chunk, so any
//! `reconstruction_threshold` shards rebuild the content. The share
//! stream is seeded from the content hash, making encoding fully
//! deterministic: identical content yields identical shards, digests,
//! and root hash. Every shard is content-sized, which suits the
//! credential-sized payloads this store carries.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sharks::{Share, Sharks};

use super::nodes::NodeId;
use super::BlobError;
use crate::models::BlobId;

/// Parameters of the redundancy scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// Total shards produced (`n`).
    pub shard_count: u8,
    /// Shards sufficient to reconstruct (`t`).
    pub reconstruction_threshold: u8,
    /// Chunk size in bytes.
    pub chunk_size: u32,
}

impl EncodingConfig {
    pub fn new(
        shard_count: u8,
        reconstruction_threshold: u8,
        chunk_size: u32,
    ) -> Result<Self, BlobError> {
        if shard_count == 0 || reconstruction_threshold == 0 || chunk_size == 0 {
            return Err(BlobError::Encoding(
                "shard count, threshold, and chunk size must be positive".to_string(),
            ));
        }
        if reconstruction_threshold > shard_count {
            return Err(BlobError::Encoding(format!(
                "reconstruction threshold {reconstruction_threshold} exceeds shard count {shard_count}"
            )));
        }
        Ok(Self {
            shard_count,
            reconstruction_threshold,
            chunk_size,
        })
    }
}

/// Placement and integrity commitment for one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAssignment {
    pub index: u8,
    pub node_id: NodeId,
    /// Hex SHA-256 of the shard bytes.
    pub digest: String,
}

/// Content-derived commitment and shard layout of one encoded blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub blob_id: BlobId,
    /// Hex SHA-256 over the blob id and all shard digests.
    pub root_hash: String,
    pub size: u64,
    pub chunk_size: u32,
    pub reconstruction_threshold: u8,
    pub shards: Vec<ShardAssignment>,
}

/// A descriptor together with the shard payloads it commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlob {
    pub descriptor: BlobDescriptor,
    /// Shard payloads, indexed by shard index.
    pub shards: Vec<Vec<u8>>,
}

/// Encode `content` into shards assigned round-robin over `nodes`.
///
/// Pure and deterministic; the same content always produces the same
/// blob id, shards, and root hash.
pub fn encode(
    content: &[u8],
    config: &EncodingConfig,
    nodes: &[NodeId],
) -> Result<EncodedBlob, BlobError> {
    if content.is_empty() {
        return Err(BlobError::EmptyBlob);
    }
    if nodes.is_empty() {
        return Err(BlobError::Encoding(
            "at least one storage node is required".to_string(),
        ));
    }

    let content_hash: [u8; 32] = Sha256::digest(content).into();
    let blob_id = BlobId::from_bytes(content_hash);
    let mut rng = ChaCha20Rng::from_seed(content_hash);

    let n = usize::from(config.shard_count);
    let chunk_size = config.chunk_size as usize;
    let sharks = Sharks(config.reconstruction_threshold);

    let mut shards: Vec<Vec<u8>> = vec![Vec::with_capacity(content.len() + 16); n];
    for chunk in content.chunks(chunk_size) {
        let chunk_shares: Vec<Share> = sharks.dealer_rng(chunk, &mut rng).take(n).collect();
        for (shard, share) in shards.iter_mut().zip(&chunk_shares) {
            shard.extend_from_slice(&Vec::from(share));
        }
    }

    let mut root = Sha256::new();
    root.update(blob_id.to_bytes());
    let mut assignments = Vec::with_capacity(n);
    for (index, shard) in shards.iter().enumerate() {
        let digest: [u8; 32] = Sha256::digest(shard).into();
        root.update(digest);
        assignments.push(ShardAssignment {
            index: index as u8,
            node_id: nodes[index % nodes.len()].clone(),
            digest: hex::encode(digest),
        });
    }

    Ok(EncodedBlob {
        descriptor: BlobDescriptor {
            blob_id,
            root_hash: hex::encode(root.finalize()),
            size: content.len() as u64,
            chunk_size: config.chunk_size,
            reconstruction_threshold: config.reconstruction_threshold,
            shards: assignments,
        },
        shards,
    })
}

/// Rebuild content from at least `reconstruction_threshold` shards.
///
/// Shard digests and the reconstructed content hash are both verified;
/// any mismatch fails with [`BlobError::IntegrityMismatch`].
pub fn reassemble(
    descriptor: &BlobDescriptor,
    shards: &[(u8, Vec<u8>)],
) -> Result<Vec<u8>, BlobError> {
    let digests: BTreeMap<u8, &str> = descriptor
        .shards
        .iter()
        .map(|a| (a.index, a.digest.as_str()))
        .collect();

    // Deduplicate by index and verify each shard against its commitment.
    let mut verified: BTreeMap<u8, &[u8]> = BTreeMap::new();
    for (index, bytes) in shards {
        let expected = digests.get(index).ok_or_else(|| {
            BlobError::IntegrityMismatch(format!("unknown shard index {index}"))
        })?;
        let digest = hex::encode(Sha256::digest(bytes));
        if digest != *expected {
            return Err(BlobError::IntegrityMismatch(format!(
                "shard {index} does not match its digest"
            )));
        }
        verified.entry(*index).or_insert(bytes.as_slice());
    }

    let required = usize::from(descriptor.reconstruction_threshold);
    if verified.len() < required {
        return Err(BlobError::Encoding(format!(
            "insufficient shards: have {}, need {required}",
            verified.len()
        )));
    }

    let chunk_size = descriptor.chunk_size as usize;
    let size = descriptor.size as usize;
    let sharks = Sharks(descriptor.reconstruction_threshold);

    let mut content = Vec::with_capacity(size);
    let mut offset = 0usize;
    let mut remaining = size;
    while remaining > 0 {
        let chunk_len = remaining.min(chunk_size);
        let mut chunk_shares = Vec::with_capacity(verified.len());
        for (index, bytes) in &verified {
            let slice = bytes.get(offset..offset + chunk_len + 1).ok_or_else(|| {
                BlobError::IntegrityMismatch(format!("shard {index} is truncated"))
            })?;
            let share = Share::try_from(slice).map_err(|e| {
                BlobError::IntegrityMismatch(format!("shard {index} is unusable: {e}"))
            })?;
            chunk_shares.push(share);
        }
        let chunk = sharks
            .recover(chunk_shares.as_slice())
            .map_err(|e| BlobError::Encoding(format!("chunk recovery failed: {e}")))?;
        content.extend_from_slice(&chunk);
        offset += chunk_len + 1;
        remaining -= chunk_len;
    }

    let content_hash: [u8; 32] = Sha256::digest(&content).into();
    if BlobId::from_bytes(content_hash) != descriptor.blob_id {
        return Err(BlobError::IntegrityMismatch(
            "reconstructed content does not match blob id".to_string(),
        ));
    }
    Ok(content)
}
