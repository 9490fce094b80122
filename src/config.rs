// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! # Protocol Configuration
//!
//! Tuning knobs for the credential lifecycle engine. Defaults mirror the
//! networks the engine was built against; every value can be overridden
//! through the environment.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `CREDVAULT_SESSION_TTL_MIN` | Session key lifetime in minutes (1-30) | `10` |
//! | `CREDVAULT_THRESHOLD` | Key shares required to decrypt | `2` |
//! | `CREDVAULT_EPOCHS` | Storage epochs per blob registration | `1` |
//! | `CREDVAULT_KEY_SERVER_TIMEOUT_MS` | Per-request key server timeout | `10000` |
//! | `CREDVAULT_STORAGE_NODE_TIMEOUT_MS` | Per-request storage node timeout | `60000` |
//! | `CREDVAULT_RETRY_BUDGET` | Retries per node before it counts as down | `2` |
//! | `CREDVAULT_CHUNK_SIZE` | Blob encoding chunk size in bytes | `1024` |

use std::env;
use std::time::Duration;

/// Environment variable for the session key TTL in minutes.
pub const SESSION_TTL_ENV: &str = "CREDVAULT_SESSION_TTL_MIN";

/// Environment variable for the decryption threshold.
pub const THRESHOLD_ENV: &str = "CREDVAULT_THRESHOLD";

/// Environment variable for the storage epoch count.
pub const EPOCHS_ENV: &str = "CREDVAULT_EPOCHS";

/// Environment variable for the key server timeout (milliseconds).
pub const KEY_SERVER_TIMEOUT_ENV: &str = "CREDVAULT_KEY_SERVER_TIMEOUT_MS";

/// Environment variable for the storage node timeout (milliseconds).
pub const STORAGE_NODE_TIMEOUT_ENV: &str = "CREDVAULT_STORAGE_NODE_TIMEOUT_MS";

/// Environment variable for the per-node retry budget.
pub const RETRY_BUDGET_ENV: &str = "CREDVAULT_RETRY_BUDGET";

/// Environment variable for the blob encoding chunk size (bytes).
pub const CHUNK_SIZE_ENV: &str = "CREDVAULT_CHUNK_SIZE";

/// Timeout and retry budget applied to one class of network peers.
///
/// A request that times out or fails with a transport error is retried up
/// to `budget` times with `delay` between attempts; after that the peer
/// counts as unavailable for quorum accounting. Denials are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first failed attempt.
    pub budget: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

/// Engine-wide protocol configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Session key lifetime in minutes (1-30).
    pub session_ttl_minutes: i64,
    /// Capacity of the `(address, scope)` session key cache.
    pub session_cache_capacity: usize,
    /// Key shares required to reconstruct a decryption key.
    pub default_threshold: u8,
    /// Storage epochs requested when registering a blob.
    pub default_epochs: u32,
    /// Blob encoding chunk size in bytes.
    pub chunk_size: usize,
    /// Timeout/retry policy for key server requests.
    pub key_servers: RetryPolicy,
    /// Timeout/retry policy for storage node requests.
    pub storage_nodes: RetryPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            session_ttl_minutes: 10,
            session_cache_capacity: 16,
            default_threshold: 2,
            default_epochs: 1,
            chunk_size: 1024,
            key_servers: RetryPolicy {
                timeout: Duration::from_secs(10),
                budget: 2,
                delay: Duration::from_millis(200),
            },
            storage_nodes: RetryPolicy {
                timeout: Duration::from_secs(60),
                budget: 2,
                delay: Duration::from_millis(200),
            },
        }
    }
}

impl ProtocolConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults for unset or unparseable variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ttl) = parse_var(&lookup, SESSION_TTL_ENV) {
            config.session_ttl_minutes = ttl;
        }
        if let Some(threshold) = parse_var(&lookup, THRESHOLD_ENV) {
            config.default_threshold = threshold;
        }
        if let Some(epochs) = parse_var(&lookup, EPOCHS_ENV) {
            config.default_epochs = epochs;
        }
        if let Some(chunk) = parse_var(&lookup, CHUNK_SIZE_ENV) {
            config.chunk_size = chunk;
        }
        if let Some(ms) = parse_var(&lookup, KEY_SERVER_TIMEOUT_ENV) {
            config.key_servers.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, STORAGE_NODE_TIMEOUT_ENV) {
            config.storage_nodes.timeout = Duration::from_millis(ms);
        }
        if let Some(budget) = parse_var(&lookup, RETRY_BUDGET_ENV) {
            config.key_servers.budget = budget;
            config.storage_nodes.budget = budget;
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    lookup(key).and_then(|value| value.parse().ok())
}
