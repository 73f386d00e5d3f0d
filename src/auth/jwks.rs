// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Realm signing-key cache (JWKS).
//!
//! ## Behaviour
//!
//! - Keys are fetched lazily, on the first lookup
//! - Every fetch replaces the whole key set; readers keep the generation
//!   they started with
//! - A generation is served for `cache_ttl`; after that the next lookup
//!   refetches, falling back to the stale key if the provider is down
//! - An unknown `kid` triggers a refetch, at most once per
//!   `min_refresh_interval`
//! - A failed fetch suppresses further fetches for `min_refresh_interval`;
//!   lookups in that window serve the stale key or repeat the failure
//! - Concurrent misses may each refetch; the last writer wins
//!
//! ## Usage
//!
//! Built by [`AuthorizationGateway`](super::AuthorizationGateway) from the
//! realm certs URL and injected into the token verifier.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::error::AuthError;

/// Default key-set TTL (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default minimum spacing between refetches caused by unknown key ids.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// A public key published by the identity provider.
#[derive(Clone)]
pub struct SigningKey {
    /// `kid` of the JWK
    pub key_id: String,
    /// Verification key
    pub decoding_key: DecodingKey,
    /// Algorithm tokens signed with this key must declare
    pub algorithm: Algorithm,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// One fetched generation of the key set.
struct KeySet {
    keys: HashMap<String, Arc<SigningKey>>,
    fetched_at: Instant,
}

impl KeySet {
    fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys.get(kid).cloned()
    }
}

/// Last failed fetch, kept for the backoff window.
struct FailedFetch {
    at: Instant,
    error: AuthError,
}

/// JWKS document as served; keys are converted one by one so a single
/// unsupported entry does not poison the whole set.
#[derive(Deserialize)]
struct RawKeySet {
    keys: Vec<serde_json::Value>,
}

/// Process-wide cache of realm signing keys.
#[derive(Clone)]
pub struct KeySetCache {
    /// Realm certs endpoint
    certs_url: String,
    /// Generation TTL
    cache_ttl: Duration,
    /// Minimum age of a generation before an unknown kid refetches
    min_refresh_interval: Duration,
    /// Current generation
    generation: Arc<RwLock<Option<Arc<KeySet>>>>,
    /// Most recent fetch failure, cleared by the next successful fetch
    last_failure: Arc<RwLock<Option<FailedFetch>>>,
    /// HTTP client (carries the outbound timeout)
    client: reqwest::Client,
}

impl KeySetCache {
    /// Create a cache for the given certs endpoint.
    ///
    /// # Arguments
    /// - `certs_url`: e.g. `https://sso.example.com/realms/memcrypt/protocol/openid-connect/certs`
    /// - `client`: shared HTTP client, expected to carry a request timeout
    pub fn new(certs_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            certs_url: certs_url.into(),
            cache_ttl: DEFAULT_CACHE_TTL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            generation: Arc::new(RwLock::new(None)),
            last_failure: Arc::new(RwLock::new(None)),
            client,
        }
    }

    /// Create with custom cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Create with a custom minimum refetch interval for unknown key ids.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Get the certs URL.
    pub fn certs_url(&self) -> &str {
        &self.certs_url
    }

    /// Look up the signing key for `kid`.
    ///
    /// Fails with [`AuthError::KeyNotFound`] when the provider does not
    /// publish `kid`, and [`AuthError::UpstreamUnavailable`] when the key set
    /// could not be fetched.
    pub async fn get_key(&self, kid: &str) -> Result<Arc<SigningKey>, AuthError> {
        let current = self.generation.read().await.clone();

        if let Some(set) = current {
            let age = set.fetched_at.elapsed();
            match set.get(kid) {
                Some(key) if age < self.cache_ttl => return Ok(key),
                Some(stale) => {
                    if self.recent_failure().await.is_some() {
                        debug!(kid, "Key set refresh backing off, serving stale generation");
                        return Ok(stale);
                    }
                    return match self.refresh_generation().await {
                        Ok(next) => next.get(kid).ok_or(AuthError::KeyNotFound),
                        Err(err) => {
                            warn!(
                                kid,
                                error = ?err,
                                "JWKS refresh failed, serving key from stale generation"
                            );
                            Ok(stale)
                        }
                    };
                }
                None if age < self.min_refresh_interval => {
                    debug!(kid, "Unknown kid, key set refreshed too recently to refetch");
                    return Err(AuthError::KeyNotFound);
                }
                None => {}
            }
        }

        if let Some(err) = self.recent_failure().await {
            debug!(kid, "Key set refresh backing off after failed fetch");
            return Err(err);
        }

        self.refresh_generation()
            .await?
            .get(kid)
            .ok_or(AuthError::KeyNotFound)
    }

    /// Force a refetch, replacing the cached generation.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        self.refresh_generation().await.map(|_| ())
    }

    /// Refetch only when no generation is within its TTL, honouring the
    /// backoff after a failed fetch.
    pub async fn refresh_if_stale(&self) -> Result<(), AuthError> {
        if self.is_cached().await {
            return Ok(());
        }
        if let Some(err) = self.recent_failure().await {
            return Err(err);
        }
        self.refresh().await
    }

    /// Check if a generation is cached and within its TTL.
    pub async fn is_cached(&self) -> bool {
        self.generation
            .read()
            .await
            .as_ref()
            .is_some_and(|set| set.fetched_at.elapsed() < self.cache_ttl)
    }

    async fn refresh_generation(&self) -> Result<Arc<KeySet>, AuthError> {
        let keys = match self.fetch_keys().await {
            Ok(keys) => keys,
            Err(error) => {
                *self.last_failure.write().await = Some(FailedFetch {
                    at: Instant::now(),
                    error: error.clone(),
                });
                return Err(error);
            }
        };
        info!(url = %self.certs_url, keys = keys.len(), "Fetched realm signing keys");

        let next = Arc::new(KeySet {
            keys,
            fetched_at: Instant::now(),
        });
        *self.generation.write().await = Some(Arc::clone(&next));
        self.last_failure.write().await.take();
        Ok(next)
    }

    /// The last fetch error, if it happened within `min_refresh_interval`.
    async fn recent_failure(&self) -> Option<AuthError> {
        self.last_failure
            .read()
            .await
            .as_ref()
            .filter(|failed| failed.at.elapsed() < self.min_refresh_interval)
            .map(|failed| failed.error.clone())
    }

    /// Fetch the key set from the certs endpoint.
    async fn fetch_keys(&self) -> Result<HashMap<String, Arc<SigningKey>>, AuthError> {
        let response = self
            .client
            .get(&self.certs_url)
            .send()
            .await
            .map_err(|e| AuthError::upstream(format!("JWKS request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::upstream(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let raw: RawKeySet = response
            .json()
            .await
            .map_err(|e| AuthError::upstream(format!("JWKS body is not a key set: {e}")))?;

        let mut keys = HashMap::with_capacity(raw.keys.len());
        for value in raw.keys {
            let jwk: Jwk = match serde_json::from_value(value) {
                Ok(jwk) => jwk,
                Err(e) => {
                    debug!(error = %e, "Skipping unparseable JWK");
                    continue;
                }
            };
            match jwk_to_signing_key(&jwk) {
                Some(key) => {
                    keys.insert(key.key_id.clone(), Arc::new(key));
                }
                None => debug!(kid = ?jwk.common.key_id, "Skipping non-signing JWK"),
            }
        }
        Ok(keys)
    }
}

/// Convert a JWK to a signing key, if it is a usable signature key with a kid.
fn jwk_to_signing_key(jwk: &Jwk) -> Option<SigningKey> {
    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return None;
    }
    let key_id = jwk.common.key_id.clone()?;

    let (decoding_key, algorithm) = match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok()?;
            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                Some(KeyAlgorithm::PS256) => Algorithm::PS256,
                Some(KeyAlgorithm::PS384) => Algorithm::PS384,
                Some(KeyAlgorithm::PS512) => Algorithm::PS512,
                _ => Algorithm::RS256, // Default for RSA
            };
            (key, alg)
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y).ok()?;
            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::ES384) => Algorithm::ES384,
                _ => Algorithm::ES256, // Default for EC
            };
            (key, alg)
        }
        _ => return None,
    };

    Some(SigningKey {
        key_id,
        decoding_key,
        algorithm,
    })
}
