// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! LRU cache for session key reuse.
//!
//! A signed session key may be reused for further reads within its TTL
//! when the caller address and policy scope match exactly. The cache is
//! the only reuse path; expiry is enforced on every lookup, never
//! trusted from the stored entry.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use super::key::SessionKey;
use crate::models::{Address, PolicyId};

/// In-process cache of signed session keys, keyed `(address, scope)`.
pub struct SessionKeyCache {
    cache: Mutex<LruCache<(Address, PolicyId), SessionKey>>,
}

impl SessionKeyCache {
    /// Create a cache holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()),
            )),
        }
    }

    /// Get a reusable key for `(address, scope)`.
    ///
    /// Returns `None` for missing, unsigned, or expired entries; expired
    /// entries are evicted on the spot.
    pub fn get(&self, address: &Address, scope: &PolicyId) -> Option<SessionKey> {
        let key = (*address, *scope);
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(&key) {
            if entry.is_signed() && !entry.is_expired() {
                return Some(entry.clone());
            }
            // Expired or never signed - remove it
            cache.pop(&key);
        }
        None
    }

    /// Store a signed key for later reuse. Unsigned keys are ignored.
    pub fn put(&self, key: SessionKey) {
        if !key.is_signed() || key.is_expired() {
            return;
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.put((key.address(), key.policy_scope()), key);
        }
    }

    /// Drop any cached key for `(address, scope)`.
    pub fn invalidate(&self, address: &Address, scope: &PolicyId) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(&(*address, *scope));
        }
    }
}
