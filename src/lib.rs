// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Credvault - Secure Credential Lifecycle Engine
//!
//! Client-side protocol engine that turns a plaintext credential into a
//! policy-bound ciphertext, persists it durably across independent
//! storage nodes, and reconstructs it only for callers an on-chain
//! access policy authorizes.
//!
//! ## Modules
//!
//! - `session` - Ephemeral session keys (challenge/sign lifecycle, cache)
//! - `policy` - Policy gate transaction builders
//! - `threshold` - Threshold encryption and quorum key recovery
//! - `blobstore` - Erasure-coded blob storage with two-phase commit
//! - `ledger` - Authority seam, schemas, in-memory backend
//! - `orchestrator` - End-to-end write/read/admin flows

pub mod blobstore;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod session;
pub mod threshold;

pub use config::ProtocolConfig;
pub use error::{Remediation, VaultError};
pub use models::{Address, BlobId, CapId, Credential, ObjectId, PolicyId};
pub use orchestrator::{CredentialOrchestrator, Session, WriteReceipt};
