// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Key server seam.
//!
//! A key server holds the unsealing key for its shares and releases one
//! share per request, after independently re-verifying the caller's
//! session token and simulating the authorization intent against current
//! policy state. The engine only speaks the client side of this
//! protocol; [`HttpKeyServer`] is the production transport and
//! [`LocalKeyServer`] the in-process implementation used by tests and
//! local development.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use url::Url;

use super::header::SealedShare;
use super::sealing::{sealing_context, unseal};
use crate::ledger::{Authority, AuthorizationIntent, LedgerError};
use crate::models::{ObjectId, PolicyId};
use crate::session::SessionToken;

/// Stable identifier of one key server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One share-release request.
#[derive(Debug, Clone)]
pub struct ShareRequest {
    pub policy_id: PolicyId,
    pub full_object_id: ObjectId,
    pub sealed_share: SealedShare,
    pub session_token: SessionToken,
    pub intent: AuthorizationIntent,
}

/// Why a share was not released.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShareFetchError {
    /// The server evaluated the request as unauthorized. Terminal; never
    /// retried.
    #[error("share denied: {0}")]
    Denied(String),

    /// The server could not be reached or failed transiently.
    #[error("key server unavailable: {0}")]
    Unavailable(String),
}

/// Client-side view of one key server.
#[async_trait]
pub trait KeyServer: Send + Sync {
    fn id(&self) -> &ServerId;

    /// Static public key shares are sealed to.
    fn public_key(&self) -> &k256::PublicKey;

    /// Request release of the share addressed to this server. On success
    /// the returned bytes are the plaintext share.
    async fn fetch_share(&self, request: &ShareRequest) -> Result<Vec<u8>, ShareFetchError>;
}

// =============================================================================
// HTTP transport
// =============================================================================

#[derive(Serialize, Deserialize)]
struct ShareRequestBody {
    policy_id: String,
    caller: String,
    session_token: String,
    ephemeral_key: String,
    nonce: String,
    sealed_share: String,
}

#[derive(Serialize, Deserialize)]
struct ShareResponseBody {
    share: String,
}

/// Key server reached over HTTPS.
pub struct HttpKeyServer {
    id: ServerId,
    endpoint: Url,
    public_key: k256::PublicKey,
    client: reqwest::Client,
}

impl HttpKeyServer {
    pub fn new(
        id: ServerId,
        endpoint: Url,
        public_key: k256::PublicKey,
        timeout: Duration,
    ) -> Self {
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
}

#[async_trait]
impl KeyServer for HttpKeyServer {
    fn id(&self) -> &ServerId {
        &self.id
    }

    fn public_key(&self) -> &k256::PublicKey {
        &self.public_key
    }

    async fn fetch_share(&self, request: &ShareRequest) -> Result<Vec<u8>, ShareFetchError> {
        let url = self
            .endpoint
            .join(&format!("v1/shares/{}", request.full_object_id))
            .map_err(|e| ShareFetchError::Unavailable(e.to_string()))?;

        let body = ShareRequestBody {
            policy_id: request.policy_id.to_hex(),
            caller: request.intent.caller.to_hex(),
            session_token: request.session_token.encode(),
            ephemeral_key: Base64::encode_string(&request.sealed_share.sealed.ephemeral_key),
            nonce: Base64::encode_string(&request.sealed_share.sealed.nonce),
            sealed_share: Base64::encode_string(&request.sealed_share.sealed.ciphertext),
        };

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ShareFetchError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED
        {
            let reason = response.text().await.unwrap_or_default();
            return Err(ShareFetchError::Denied(format!("HTTP {status}: {reason}")));
        }
        if !status.is_success() {
            return Err(ShareFetchError::Unavailable(format!("HTTP {status}")));
        }

        let body: ShareResponseBody = response
            .json()
            .await
            .map_err(|e| ShareFetchError::Unavailable(e.to_string()))?;
        Base64::decode_vec(&body.share)
            .map_err(|e| ShareFetchError::Unavailable(format!("undecodable share: {e}")))
    }
}

// =============================================================================
// In-process implementation
// =============================================================================

/// Key server running in-process against an [`Authority`] handle.
///
/// Performs the same checks a production server performs: session token
/// verification, caller/scope binding, and authorization simulation
/// against current policy state, in that order. The `online` toggle
/// simulates outages.
pub struct LocalKeyServer {
    id: ServerId,
    secret: k256::SecretKey,
    public_key: k256::PublicKey,
    authority: Arc<dyn Authority>,
    online: AtomicBool,
}

impl LocalKeyServer {
    pub fn new(id: ServerId, authority: Arc<dyn Authority>) -> Self {
        let secret = k256::SecretKey::random(&mut OsRng);
        let public_key = secret.public_key();
        Self {
            id,
            secret,
            public_key,
            authority,
            online: AtomicBool::new(true),
        }
    }

    /// Simulate an outage (or recovery) of this server.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyServer for LocalKeyServer {
    fn id(&self) -> &ServerId {
        &self.id
    }

    fn public_key(&self) -> &k256::PublicKey {
        &self.public_key
    }

    async fn fetch_share(&self, request: &ShareRequest) -> Result<Vec<u8>, ShareFetchError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(ShareFetchError::Unavailable("server offline".to_string()));
        }

        // The session token must verify on its own and must be bound to
        // the same caller and scope as the intent it accompanies.
        request
            .session_token
            .verify()
            .map_err(|e| ShareFetchError::Denied(e.to_string()))?;
        if request.session_token.address != request.intent.caller {
            return Err(ShareFetchError::Denied(
                "session key does not match caller".to_string(),
            ));
        }
        if request.session_token.policy_scope != request.intent.policy_id {
            return Err(ShareFetchError::Denied(
                "session key scope does not match policy".to_string(),
            ));
        }

        // Re-check authorization against current policy state. The share
        // is released only when the simulation succeeds.
        self.authority
            .simulate(&request.intent)
            .await
            .map_err(|e| match e {
                LedgerError::Denied(_) | LedgerError::NotFound(_) => {
                    ShareFetchError::Denied(e.to_string())
                }
                other => ShareFetchError::Unavailable(other.to_string()),
            })?;

        let context = sealing_context(&request.full_object_id, self.id.as_str());
        unseal(&self.secret, &context, &request.sealed_share.sealed)
            .map_err(|e| ShareFetchError::Denied(e.to_string()))
    }
}
