// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Credvault Contributors

//! Threshold encryption client.
//!
//! Encrypts plaintext into a policy-bound ciphertext whose symmetric key
//! is split across `n` independent key servers, any `t` of which suffice
//! to decrypt. No single server, nor fewer than `t`, can reconstruct the
//! key. On read, share release is gated server-side by simulating the
//! caller's authorization intent against current policy state.

pub mod header;
pub mod sealing;
pub mod servers;

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use futures::stream::{FuturesUnordered, StreamExt};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sharks::{Share, Sharks};
use zeroize::Zeroize;

pub use header::{CipherHeader, EncryptedObject, SealedShare};
pub use servers::{
    HttpKeyServer, KeyServer, LocalKeyServer, ServerId, ShareFetchError, ShareRequest,
};

use crate::config::RetryPolicy;
use crate::ledger::AuthorizationIntent;
use crate::models::{ObjectId, PolicyId};
use crate::session::{SessionError, SessionKey};

/// Errors raised by threshold encryption and quorum decryption.
#[derive(Debug, thiserror::Error)]
pub enum ThresholdError {
    /// `threshold` must satisfy `1 <= t <= n`.
    #[error("threshold {threshold} out of range for {servers} key servers")]
    InvalidThreshold { threshold: u8, servers: usize },

    /// The ciphertext header could not be parsed. Raised before any
    /// server is contacted.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Fewer than `required` shares could be collected. `denied` and
    /// `unreachable` split the shortfall for diagnostics; both outcomes
    /// are terminal.
    #[error(
        "no access to decryption keys: {denied} denied, {unreachable} unreachable, {required} required"
    )]
    NoAccess {
        denied: usize,
        unreachable: usize,
        required: usize,
    },

    /// The authorization intent does not cover this ciphertext.
    #[error("authorization intent does not cover this ciphertext")]
    IntentMismatch,

    /// Key material handling failed (sealing, derivation, recombination).
    #[error("share sealing failed: {0}")]
    Sealing(String),

    /// The recombined key did not authenticate the ciphertext.
    #[error("ciphertext authentication failed")]
    DecryptionFailed,

    /// The presented session key was unusable.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ThresholdError {
    /// Whether the failure was a policy denial (as opposed to server
    /// availability). Callers surface these differently: denial is not
    /// retryable.
    pub fn access_denied(&self) -> bool {
        matches!(self, Self::NoAccess { denied, .. } if *denied > 0)
    }
}

/// Derive the content encryption key from the DEK, bound to the policy.
fn content_key(dek: &[u8; 32], policy_id: &PolicyId) -> Result<[u8; 32], ThresholdError> {
    let mut mac = <Hmac::<Sha256> as Mac>::new_from_slice(dek)
        .map_err(|_| ThresholdError::Sealing("content key derivation failed".to_string()))?;
    mac.update(&policy_id.to_bytes());
    Ok(mac.finalize().into_bytes().into())
}

/// Client for the threshold encryption protocol.
pub struct ThresholdCryptoClient {
    servers: Vec<Arc<dyn KeyServer>>,
    retry: RetryPolicy,
}

impl ThresholdCryptoClient {
    pub fn new(servers: Vec<Arc<dyn KeyServer>>, retry: RetryPolicy) -> Self {
        Self { servers, retry }
    }

    /// Number of configured key servers (`n`).
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Encrypt `plaintext` under `policy_id` with decryption threshold
    /// `threshold`. Entirely local: the DEK is split with Shamir secret
    /// sharing and each share sealed to one key server's public key; no
    /// key material survives in the client after this returns.
    pub fn encrypt(
        &self,
        policy_id: &PolicyId,
        threshold: u8,
        plaintext: &[u8],
    ) -> Result<EncryptedObject, ThresholdError> {
        let n = self.servers.len();
        if threshold == 0 || usize::from(threshold) > n || n > usize::from(u8::MAX) {
            return Err(ThresholdError::InvalidThreshold {
                threshold,
                servers: n,
            });
        }

        let mut dek = [0u8; 32];
        OsRng.fill_bytes(&mut dek);

        // Fresh, unguessable full object id bound to the policy.
        let mut tag = [0u8; 16];
        OsRng.fill_bytes(&mut tag);
        let mut hasher = Sha256::new();
        hasher.update(policy_id.to_bytes());
        hasher.update(tag);
        let full_object_id = ObjectId::from_bytes(hasher.finalize().into());

        let mut key = content_key(&dek, policy_id)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| ThresholdError::Sealing("cipher construction failed".to_string()));
        key.zeroize();
        let cipher = cipher?;

        let nonce: [u8; 12] = rand::random();
        let aad = full_object_id.to_bytes();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| ThresholdError::Sealing("content encryption failed".to_string()))?;

        let dealer_shares: Vec<Share> = Sharks(threshold).dealer(&dek).take(n).collect();
        dek.zeroize();

        let mut shares = Vec::with_capacity(n);
        for (server, share) in self.servers.iter().zip(dealer_shares) {
            let share_bytes = Vec::from(&share);
            let context = sealing::sealing_context(&full_object_id, server.id().as_str());
            let sealed = sealing::seal(server.public_key(), &context, &share_bytes)?;
            shares.push(SealedShare {
                server_id: server.id().clone(),
                sealed,
            });
        }

        Ok(EncryptedObject {
            header: CipherHeader {
                policy_id: *policy_id,
                full_object_id,
                threshold,
                nonce,
                shares,
            },
            ciphertext,
        })
    }

    /// Decrypt by collecting `t` shares from the key servers.
    ///
    /// All servers are queried concurrently; each independently verifies
    /// the session token and simulates the authorization intent before
    /// releasing its share. Requests still in flight once `t` shares
    /// arrive are abandoned. Denials are terminal; transient failures
    /// retry within the configured budget and then count against
    /// availability.
    pub async fn decrypt(
        &self,
        object: &EncryptedObject,
        session_key: &SessionKey,
        intent: &AuthorizationIntent,
    ) -> Result<Vec<u8>, ThresholdError> {
        let header = &object.header;
        if intent.policy_id != header.policy_id
            || intent.full_object_id != header.full_object_id
        {
            return Err(ThresholdError::IntentMismatch);
        }
        let token = session_key.token()?;
        let required = usize::from(header.threshold);

        let mut denied = 0usize;
        let mut unreachable = 0usize;

        let mut pending = FuturesUnordered::new();
        for sealed in &header.shares {
            match self.servers.iter().find(|s| *s.id() == sealed.server_id) {
                Some(server) => {
                    let request = ShareRequest {
                        policy_id: header.policy_id,
                        full_object_id: header.full_object_id,
                        sealed_share: sealed.clone(),
                        session_token: token.clone(),
                        intent: intent.clone(),
                    };
                    pending.push(self.fetch_with_retry(server.clone(), request));
                }
                None => {
                    unreachable += 1;
                    tracing::warn!(
                        server = %sealed.server_id,
                        "sealed share references an unconfigured key server"
                    );
                }
            }
        }

        let mut shares: Vec<Share> = Vec::with_capacity(required);
        while let Some(outcome) = pending.next().await {
            match outcome {
                Ok(bytes) => match Share::try_from(bytes.as_slice()) {
                    Ok(share) => {
                        shares.push(share);
                        if shares.len() >= required {
                            break;
                        }
                    }
                    Err(_) => {
                        unreachable += 1;
                        tracing::warn!("key server returned an unusable share");
                    }
                },
                Err(ShareFetchError::Denied(reason)) => {
                    denied += 1;
                    tracing::warn!(%reason, "key server denied share release");
                }
                Err(ShareFetchError::Unavailable(reason)) => {
                    unreachable += 1;
                    tracing::warn!(%reason, "key server unavailable");
                }
            }
        }
        // Outstanding requests are abandoned here.
        drop(pending);

        if shares.len() < required {
            return Err(ThresholdError::NoAccess {
                denied,
                unreachable,
                required,
            });
        }

        let dek_bytes = Sharks(header.threshold)
            .recover(shares.as_slice())
            .map_err(|e| ThresholdError::Sealing(format!("share recombination failed: {e}")))?;
        let mut dek = [0u8; 32];
        if dek_bytes.len() != dek.len() {
            return Err(ThresholdError::Sealing(
                "recombined key has the wrong length".to_string(),
            ));
        }
        dek.copy_from_slice(&dek_bytes);

        let mut key = content_key(&dek, &header.policy_id)?;
        dek.zeroize();
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| ThresholdError::Sealing("cipher construction failed".to_string()));
        key.zeroize();
        let cipher = cipher?;

        let aad = header.full_object_id.to_bytes();
        cipher
            .decrypt(
                Nonce::from_slice(&header.nonce),
                Payload {
                    msg: &object.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| ThresholdError::DecryptionFailed)
    }

    /// One server's fetch with per-attempt timeout and bounded retry.
    /// Denials short-circuit; only transient failures are retried.
    async fn fetch_with_retry(
        &self,
        server: Arc<dyn KeyServer>,
        request: ShareRequest,
    ) -> Result<Vec<u8>, ShareFetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome =
                tokio::time::timeout(self.retry.timeout, server.fetch_share(&request)).await;
            match outcome {
                Ok(Ok(share)) => return Ok(share),
                Ok(Err(denied @ ShareFetchError::Denied(_))) => return Err(denied),
                Ok(Err(ShareFetchError::Unavailable(reason))) => {
                    if attempt > self.retry.budget {
                        return Err(ShareFetchError::Unavailable(reason));
                    }
                    tracing::debug!(server = %server.id(), %reason, attempt, "retrying key server");
                }
                Err(_) => {
                    if attempt > self.retry.budget {
                        return Err(ShareFetchError::Unavailable("timed out".to_string()));
                    }
                    tracing::debug!(server = %server.id(), attempt, "key server timed out, retrying");
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

    use crate::ledger::{Authority, InMemoryAuthority, ObjectKind};
    use crate::models::{Address, CapId};
    use crate::policy::PolicyGateClient;
    use crate::session::{IdentitySigner, LocalSigner};

    struct TestBed {
        authority: Arc<InMemoryAuthority>,
        servers: Vec<Arc<LocalKeyServer>>,
        client: ThresholdCryptoClient,
        owner: LocalSigner,
        policy_id: PolicyId,
        cap_id: CapId,
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(500),
            budget: 1,
            delay: Duration::from_millis(5),
        }
    }

    async fn testbed(n: usize) -> TestBed {
        let authority = Arc::new(InMemoryAuthority::new());
        let owner = LocalSigner::random();
        let gate = PolicyGateClient::new(owner.address());
        let effects = authority
            .execute(gate.build_create_policy("mail").unwrap())
            .await
            .unwrap()
            .into_result()
            .unwrap();
        let policy_id =
            PolicyId::parse(effects.created_id(ObjectKind::Policy).unwrap()).unwrap();
        let cap_id = CapId::parse(effects.created_id(ObjectKind::Cap).unwrap()).unwrap();

        let servers: Vec<Arc<LocalKeyServer>> = (0..n)
            .map(|i| {
                let handle: Arc<dyn Authority> = authority.clone();
                Arc::new(LocalKeyServer::new(ServerId::new(format!("ks-{i}")), handle))
            })
            .collect();
        let dyn_servers: Vec<Arc<dyn KeyServer>> = servers
            .iter()
            .map(|s| s.clone() as Arc<dyn KeyServer>)
            .collect();
        let client = ThresholdCryptoClient::new(dyn_servers, retry());

        TestBed {
            authority,
            servers,
            client,
            owner,
            policy_id,
            cap_id,
        }
    }

    async fn session_key(signer: &LocalSigner, scope: PolicyId) -> SessionKey {
        let mut key = SessionKey::new(signer.address(), scope, 10).unwrap();
        let message = key.challenge_message().unwrap();
        let signature = signer.sign_message(&message).await.unwrap();
        key.apply_signature(&signature).unwrap();
        key
    }

    fn intent_for(caller: Address, object: &EncryptedObject) -> AuthorizationIntent {
        AuthorizationIntent {
            caller,
            policy_id: object.header.policy_id,
            full_object_id: object.header.full_object_id,
        }
    }

    #[tokio::test]
    async fn round_trip_for_authorized_owner() {
        let bed = testbed(3).await;
        let plaintext = b"svc:mail, user:alice, pass:secret1";
        let object = bed.client.encrypt(&bed.policy_id, 2, plaintext).unwrap();

        let key = session_key(&bed.owner, bed.policy_id).await;
        let intent = intent_for(bed.owner.address(), &object);
        let decrypted = bed.client.decrypt(&object, &key, &intent).await.unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[tokio::test]
    async fn threshold_out_of_range_is_rejected() {
        let bed = testbed(3).await;
        for t in [0u8, 4u8] {
            assert!(matches!(
                bed.client.encrypt(&bed.policy_id, t, b"data"),
                Err(ThresholdError::InvalidThreshold { threshold, servers: 3 }) if threshold == t
            ));
        }
    }

    #[tokio::test]
    async fn quorum_floor_holds_with_one_grant() {
        let bed = testbed(3).await;
        let object = bed.client.encrypt(&bed.policy_id, 2, b"data").unwrap();

        // Two of three servers down: one grant is below the threshold.
        bed.servers[0].set_online(false);
        bed.servers[1].set_online(false);

        let key = session_key(&bed.owner, bed.policy_id).await;
        let intent = intent_for(bed.owner.address(), &object);
        let err = bed.client.decrypt(&object, &key, &intent).await.unwrap_err();
        match err {
            ThresholdError::NoAccess {
                denied,
                unreachable,
                required,
            } => {
                assert_eq!(denied, 0);
                assert_eq!(unreachable, 2);
                assert_eq!(required, 2);
            }
            other => panic!("expected NoAccess, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unauthorized_caller_is_denied_by_every_server() {
        let bed = testbed(3).await;
        let object = bed.client.encrypt(&bed.policy_id, 2, b"data").unwrap();

        let stranger = LocalSigner::random();
        let key = session_key(&stranger, bed.policy_id).await;
        let intent = intent_for(stranger.address(), &object);
        let err = bed.client.decrypt(&object, &key, &intent).await.unwrap_err();
        assert!(err.access_denied());
        match err {
            ThresholdError::NoAccess { denied, .. } => assert_eq!(denied, 3),
            other => panic!("expected NoAccess, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn granting_access_unlocks_existing_ciphertext() {
        let bed = testbed(3).await;
        let plaintext = b"svc:mail, user:alice, pass:secret1";
        let object = bed.client.encrypt(&bed.policy_id, 2, plaintext).unwrap();

        let member = LocalSigner::random();
        let key = session_key(&member, bed.policy_id).await;
        let intent = intent_for(member.address(), &object);
        assert!(bed
            .client
            .decrypt(&object, &key, &intent)
            .await
            .unwrap_err()
            .access_denied());

        let gate = PolicyGateClient::new(bed.owner.address());
        bed.authority
            .execute(gate.build_grant_access(bed.policy_id, bed.cap_id, member.address()))
            .await
            .unwrap()
            .into_result()
            .unwrap();

        // Same stored ciphertext, no re-encryption.
        let decrypted = bed.client.decrypt(&object, &key, &intent).await.unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[tokio::test]
    async fn expired_session_key_is_rejected_before_fan_out() {
        let bed = testbed(3).await;
        let object = bed.client.encrypt(&bed.policy_id, 2, b"data").unwrap();

        let mut key = session_key(&bed.owner, bed.policy_id).await;
        key.expire_now();
        let intent = intent_for(bed.owner.address(), &object);
        assert!(matches!(
            bed.client.decrypt(&object, &key, &intent).await,
            Err(ThresholdError::Session(SessionError::Expired(_)))
        ));
    }

    #[tokio::test]
    async fn mismatched_intent_is_rejected() {
        let bed = testbed(3).await;
        let object = bed.client.encrypt(&bed.policy_id, 2, b"data").unwrap();

        let key = session_key(&bed.owner, bed.policy_id).await;
        let mut intent = intent_for(bed.owner.address(), &object);
        intent.full_object_id = ObjectId::from_bytes([9u8; 32]);
        assert!(matches!(
            bed.client.decrypt(&object, &key, &intent).await,
            Err(ThresholdError::IntentMismatch)
        ));
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails_authentication() {
        let bed = testbed(3).await;
        let object = bed.client.encrypt(&bed.policy_id, 2, b"data").unwrap();
        let mut bytes = object.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = EncryptedObject::parse(&bytes).unwrap();

        let key = session_key(&bed.owner, bed.policy_id).await;
        let intent = intent_for(bed.owner.address(), &tampered);
        assert!(matches!(
            bed.client.decrypt(&tampered, &key, &intent).await,
            Err(ThresholdError::DecryptionFailed)
        ));
    }
}
