// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Organization API key resolution.
//!
//! Devices and agents authenticate with a pre-shared organization key
//! instead of a user token. The key is the organization id; it is valid when
//! the realm admin API knows an organization by that id. The admin API is
//! called with a service-account token obtained by client-credentials grant.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use super::claims::Principal;
use super::error::AuthError;

/// Service-account tokens are dropped this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60);

/// Service-account credentials for the client-credentials grant.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Exchanges organization keys for principals via the realm admin API.
#[derive(Clone)]
pub struct OrgKeyResolver {
    /// Realm token endpoint
    token_url: String,
    /// `.../admin/realms/{realm}/organizations`
    organizations_url: Url,
    credentials: ClientCredentials,
    client: reqwest::Client,
    machine_token: Arc<RwLock<Option<CachedToken>>>,
}

impl OrgKeyResolver {
    /// Create a resolver.
    ///
    /// # Arguments
    /// - `token_url`: realm `protocol/openid-connect/token` endpoint
    /// - `organizations_url`: realm admin organizations collection
    /// - `credentials`: service-account client allowed to view organizations
    /// - `client`: shared HTTP client, expected to carry a request timeout
    pub fn new(
        token_url: impl Into<String>,
        organizations_url: Url,
        credentials: ClientCredentials,
        client: reqwest::Client,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            organizations_url,
            credentials,
            client,
            machine_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Validate `org_key` and return the organization principal.
    ///
    /// A 2xx lookup accepts the key; any other status rejects it with
    /// [`AuthError::InvalidOrgKey`]. Failing to obtain the service-account
    /// token or to reach the admin API is [`AuthError::UpstreamUnavailable`].
    pub async fn resolve(&self, org_key: &str) -> Result<Principal, AuthError> {
        let org_key = org_key.trim();
        if org_key.is_empty() {
            return Err(AuthError::InvalidOrgKey);
        }

        let token = self.machine_token().await?;
        let url = self.organization_url(org_key)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::upstream(format!("organization lookup failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(Principal::for_org_key(org_key));
        }

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            // Service-account token refused; fetch a fresh one next time.
            self.machine_token.write().await.take();
            warn!(status = %status, "Admin API refused service-account token");
        }
        debug!(status = %status, "Organization key rejected");
        Err(AuthError::InvalidOrgKey)
    }

    /// Admin URL for one organization; the key is encoded as a single path segment.
    fn organization_url(&self, org_key: &str) -> Result<Url, AuthError> {
        let mut url = self.organizations_url.clone();
        url.path_segments_mut()
            .map_err(|_| AuthError::upstream("organizations URL cannot take path segments"))?
            .pop_if_empty()
            .push(org_key);
        Ok(url)
    }

    /// Cached service-account access token, fetched when absent or near expiry.
    async fn machine_token(&self) -> Result<String, AuthError> {
        if let Some(cached) = self.machine_token.read().await.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.access_token.clone());
            }
        }

        let fresh = self.fetch_machine_token().await?;
        let lifetime = fresh
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let refresh_at = Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN);

        *self.machine_token.write().await = Some(CachedToken {
            access_token: fresh.access_token.clone(),
            refresh_at,
        });
        Ok(fresh.access_token)
    }

    async fn fetch_machine_token(&self) -> Result<OAuthTokenResponse, AuthError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::upstream(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            warn!(
                status = %response.status(),
                client_id = %self.credentials.client_id,
                "Service-account token request rejected"
            );
            return Err(AuthError::upstream(format!(
                "HTTP {} from token endpoint",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::upstream(format!("token response is invalid: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::CredentialKind;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN_PATH: &str = "/realms/test/protocol/openid-connect/token";
    const ORGS_PATH: &str = "/admin/realms/test/organizations";

    fn resolver_for(server: &MockServer) -> OrgKeyResolver {
        OrgKeyResolver::new(
            format!("{}{TOKEN_PATH}", server.uri()),
            Url::parse(&format!("{}{ORGS_PATH}", server.uri())).unwrap(),
            ClientCredentials {
                client_id: "console-backend".to_string(),
                client_secret: "s3cret".to_string(),
            },
            reqwest::Client::new(),
        )
    }

    async fn mount_token(server: &MockServer, expires_in: u64) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=console-backend"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "machine-token",
                "expires_in": expires_in,
                "token_type": "Bearer"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn known_organization_resolves() {
        let server = MockServer::start().await;
        mount_token(&server, 300).await;
        Mock::given(method("GET"))
            .and(path(format!("{ORGS_PATH}/org-42")))
            .and(header("authorization", "Bearer machine-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "org-42" })))
            .mount(&server)
            .await;

        let principal = resolver_for(&server).resolve("org-42").await.unwrap();
        assert_eq!(principal.organization_id, "org-42");
        assert!(principal.roles.is_empty());
        assert_eq!(principal.credential_kind, CredentialKind::OrgApiKey);
    }

    #[tokio::test]
    async fn unknown_organization_is_invalid_org_key() {
        let server = MockServer::start().await;
        mount_token(&server, 300).await;
        Mock::given(method("GET"))
            .and(path(format!("{ORGS_PATH}/org-42")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert_eq!(
            resolver_for(&server).resolve("org-42").await.unwrap_err(),
            AuthError::InvalidOrgKey
        );
    }

    #[tokio::test]
    async fn blank_key_is_rejected_without_upstream_calls() {
        let server = MockServer::start().await;
        assert_eq!(
            resolver_for(&server).resolve("   ").await.unwrap_err(),
            AuthError::InvalidOrgKey
        );
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn token_endpoint_failure_is_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({ "error": "unauthorized_client" })),
            )
            .mount(&server)
            .await;

        let err = resolver_for(&server).resolve("org-42").await.unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn every_non_success_lookup_is_invalid_org_key() {
        for status in [400, 401, 403, 404, 409, 500, 502, 503] {
            let server = MockServer::start().await;
            mount_token(&server, 300).await;
            Mock::given(method("GET"))
                .and(path(format!("{ORGS_PATH}/org-42")))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = resolver_for(&server).resolve("org-42").await.unwrap_err();
            assert_eq!(err, AuthError::InvalidOrgKey, "HTTP {status}");
            assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn unreachable_admin_api_is_upstream_unavailable() {
        let resolver = OrgKeyResolver::new(
            "http://127.0.0.1:9/token",
            Url::parse("http://127.0.0.1:9/admin/realms/test/organizations").unwrap(),
            ClientCredentials {
                client_id: "console-backend".to_string(),
                client_secret: "s3cret".to_string(),
            },
            reqwest::Client::new(),
        );
        let err = resolver.resolve("org-42").await.unwrap_err();
        assert!(err.is_server_fault());
    }

    #[tokio::test]
    async fn machine_token_is_reused_until_near_expiry() {
        let server = MockServer::start().await;
        mount_token(&server, 300).await;
        Mock::given(method("GET"))
            .and(path(format!("{ORGS_PATH}/org-42")))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let resolver = resolver_for(&server);

        resolver.resolve("org-42").await.unwrap();
        resolver.resolve("org-42").await.unwrap();

        let token_calls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == TOKEN_PATH)
            .count();
        assert_eq!(token_calls, 1);
    }

    #[tokio::test]
    async fn short_lived_machine_token_is_refetched() {
        let server = MockServer::start().await;
        // Lifetime below the expiry margin: never reused.
        mount_token(&server, 10).await;
        Mock::given(method("GET"))
            .and(path(format!("{ORGS_PATH}/org-42")))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let resolver = resolver_for(&server);

        resolver.resolve("org-42").await.unwrap();
        resolver.resolve("org-42").await.unwrap();

        let token_calls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == TOKEN_PATH)
            .count();
        assert_eq!(token_calls, 2);
    }

    #[tokio::test]
    async fn refused_machine_token_is_dropped() {
        let server = MockServer::start().await;
        mount_token(&server, 300).await;
        Mock::given(method("GET"))
            .and(path(format!("{ORGS_PATH}/org-42")))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{ORGS_PATH}/org-42")))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let resolver = resolver_for(&server);

        assert_eq!(
            resolver.resolve("org-42").await.unwrap_err(),
            AuthError::InvalidOrgKey
        );
        assert!(resolver.resolve("org-42").await.is_ok());

        let token_calls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == TOKEN_PATH)
            .count();
        assert_eq!(token_calls, 2);
    }

    #[tokio::test]
    async fn org_key_is_a_single_encoded_segment() {
        let server = MockServer::start().await;
        mount_token(&server, 300).await;
        Mock::given(method("GET"))
            .and(path(format!("{ORGS_PATH}/a%2F..%2Fusers")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert_eq!(
            resolver_for(&server).resolve("a/../users").await.unwrap_err(),
            AuthError::InvalidOrgKey
        );
        let lookups: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == "GET")
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(lookups, vec![format!("{ORGS_PATH}/a%2F..%2Fusers")]);
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let creds = ClientCredentials {
            client_id: "console-backend".to_string(),
            client_secret: "s3cret".to_string(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("console-backend"));
        assert!(!rendered.contains("s3cret"));
    }
}
