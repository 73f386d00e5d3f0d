// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The per-request authentication and authorization decision.
//!
//! ```text
//! request ─► classify ─► public? ──────────────────────────► Forward(None)
//!               │
//!               ▼
//!         extract credential ─► Bearer ─► TokenVerifier  ─┐
//!                             └► OrgKey ─► OrgKeyResolver ─┤
//!                                                          ▼
//!                                  authorize(roles table) ─► Forward(Some(principal))
//! ```
//!
//! Every failure along the way is terminal and becomes `Reject(error)`.

use axum::http::{header, HeaderMap, HeaderName, Method};
use tracing::{debug, error, info, warn};

use super::claims::Principal;
use super::error::AuthError;
use super::org_key::OrgKeyResolver;
use super::roles;
use super::rules::AccessPolicy;
use super::verifier::TokenVerifier;

/// Default header carrying an organization key.
pub const DEFAULT_ORG_KEY_HEADER: &str = "x-org-key";

/// A credential found on an inbound request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Compact JWT from `Authorization: Bearer`.
    Bearer(String),
    /// Pre-shared organization key.
    OrgKey(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::OrgKey(_) => f.write_str("OrgKey(<redacted>)"),
        }
    }
}

/// Result of [`AuthorizationGateway::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Pass the request on. `None` for public paths.
    Forward(Option<Principal>),
    /// Stop the request with this error.
    Reject(AuthError),
}

/// Composition root for request authentication.
#[derive(Clone)]
pub struct AuthorizationGateway {
    verifier: TokenVerifier,
    org_keys: Option<OrgKeyResolver>,
    org_key_header: HeaderName,
    policy: AccessPolicy,
    expected_issuer: String,
    expected_authorized_party: String,
}

impl AuthorizationGateway {
    /// Create a gateway that accepts bearer tokens only.
    ///
    /// # Arguments
    /// - `expected_issuer`: exact `iss`, e.g. `https://sso.example.com/realms/memcrypt`
    /// - `expected_authorized_party`: exact `azp` (frontend client id)
    pub fn new(
        verifier: TokenVerifier,
        policy: AccessPolicy,
        expected_issuer: impl Into<String>,
        expected_authorized_party: impl Into<String>,
    ) -> Self {
        Self {
            verifier,
            org_keys: None,
            org_key_header: HeaderName::from_static(DEFAULT_ORG_KEY_HEADER),
            policy,
            expected_issuer: expected_issuer.into(),
            expected_authorized_party: expected_authorized_party.into(),
        }
    }

    /// Also accept organization keys presented in `header`.
    pub fn with_org_keys(mut self, resolver: OrgKeyResolver, header: HeaderName) -> Self {
        self.org_keys = Some(resolver);
        self.org_key_header = header;
        self
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn accepts_org_keys(&self) -> bool {
        self.org_keys.is_some()
    }

    /// True when `path` bypasses authentication.
    pub fn is_public(&self, path: &str) -> bool {
        self.policy.public_paths.contains(path)
    }

    /// Pick the credential to verify.
    ///
    /// A bearer token wins over an organization key. An `Authorization`
    /// header with another scheme is ignored when an organization key is
    /// present and rejected otherwise.
    pub fn extract_credential(&self, headers: &HeaderMap) -> Result<Credential, AuthError> {
        let authorization = headers.get(header::AUTHORIZATION);

        if let Some(value) = authorization {
            let bearer = value
                .to_str()
                .ok()
                .and_then(|v| v.split_once(' '))
                .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
                .map(|(_, token)| token.trim())
                .filter(|token| !token.is_empty());
            if let Some(token) = bearer {
                return Ok(Credential::Bearer(token.to_string()));
            }
        }

        if self.org_keys.is_some() {
            if let Some(value) = headers.get(&self.org_key_header) {
                let key = value.to_str().map_err(|_| AuthError::InvalidOrgKey)?;
                return Ok(Credential::OrgKey(key.to_string()));
            }
        }

        match authorization {
            Some(_) => Err(AuthError::InvalidAuthHeader),
            None => Err(AuthError::MissingCredential),
        }
    }

    /// Turn a credential into a principal.
    pub async fn authenticate(&self, credential: &Credential) -> Result<Principal, AuthError> {
        match credential {
            Credential::Bearer(token) => {
                self.verifier
                    .verify(token, &self.expected_issuer, &self.expected_authorized_party)
                    .await
            }
            Credential::OrgKey(key) => match &self.org_keys {
                Some(resolver) => resolver.resolve(key).await,
                None => Err(AuthError::MissingCredential),
            },
        }
    }

    /// Check the principal against the role table.
    pub fn authorize(
        &self,
        principal: &Principal,
        method: &Method,
        path: &str,
    ) -> Result<(), AuthError> {
        let required = self.policy.role_table.required_roles(path, method);
        if roles::satisfies(&principal.roles, required) {
            Ok(())
        } else {
            Err(AuthError::InsufficientRole)
        }
    }

    /// Decide on one request.
    pub async fn decide(&self, method: &Method, path: &str, headers: &HeaderMap) -> Outcome {
        if self.is_public(path) {
            debug!(%method, path, "Public path");
            return Outcome::Forward(None);
        }

        match self.resolve(method, path, headers).await {
            Ok(principal) => Outcome::Forward(Some(principal)),
            Err(err) => {
                log_rejection(method, path, &err);
                Outcome::Reject(err)
            }
        }
    }

    async fn resolve(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
    ) -> Result<Principal, AuthError> {
        let credential = self.extract_credential(headers)?;
        let principal = self.authenticate(&credential).await?;
        self.authorize(&principal, method, path)?;
        Ok(principal)
    }
}

fn log_rejection(method: &Method, path: &str, err: &AuthError) {
    match err {
        AuthError::UpstreamUnavailable { detail } => {
            error!(
                %method,
                path,
                code = err.error_code(),
                detail = %detail,
                "Identity provider unavailable"
            )
        }
        AuthError::BadSignature => {
            warn!(%method, path, code = err.error_code(), "Request rejected")
        }
        _ => info!(%method, path, code = err.error_code(), "Request rejected"),
    }
}
