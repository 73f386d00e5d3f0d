// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer-token claims and the authenticated principal.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::roles::RoleSet;

/// Where the organization id and realm roles live inside a token payload.
///
/// Keycloak puts realm roles under `realm_access.roles`; the organization
/// claim is added by a realm mapper and its name varies per deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimNames {
    /// Top-level claim carrying the organization id.
    pub organization: String,
    /// Dotted path to the realm role array.
    pub roles: String,
}

impl Default for ClaimNames {
    fn default() -> Self {
        Self {
            organization: "org_id".to_string(),
            roles: "realm_access.roles".to_string(),
        }
    }
}

/// Claims read from a verified token payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// `iss`
    pub issuer: Option<String>,
    /// `azp`
    pub authorized_party: Option<String>,
    /// `sub`
    pub subject: Option<String>,
    /// `preferred_username`
    pub preferred_username: Option<String>,
    /// Provider-specific organization claim
    pub organization_id: Option<String>,
    /// Realm roles
    pub realm_roles: RoleSet,
    /// `exp`
    pub expiry: Option<DateTime<Utc>>,
}

impl TokenClaims {
    /// Read claims out of a decoded JSON payload.
    ///
    /// Absent or mistyped optional claims come back as `None` or empty;
    /// the verifier decides which of them are fatal.
    pub fn from_payload(payload: &Value, names: &ClaimNames) -> Self {
        let string_claim = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_owned);

        let realm_roles = names
            .roles
            .split('.')
            .try_fold(payload, |node, key| node.get(key))
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let expiry = payload
            .get("exp")
            .and_then(Value::as_i64)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        Self {
            issuer: string_claim("iss"),
            authorized_party: string_claim("azp"),
            subject: string_claim("sub"),
            preferred_username: string_claim("preferred_username"),
            organization_id: string_claim(&names.organization).filter(|org| !org.is_empty()),
            realm_roles,
            expiry,
        }
    }
}

/// How a principal proved its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Signed realm token from a human operator.
    BearerToken,
    /// Pre-shared organization key from a device or agent.
    OrgApiKey,
}

/// The caller, as resolved by the gateway.
///
/// Produced by both credential schemes. Organization-key principals carry
/// no roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Principal {
    /// Organization the caller acts for; empty when the token carries none.
    pub organization_id: String,
    /// Realm roles granted to the caller.
    #[schema(value_type = Vec<String>)]
    pub roles: RoleSet,
    /// `preferred_username`, for bearer-token callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Token subject, for bearer-token callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Token expiry, for bearer-token callers whose token carries `exp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Credential scheme used.
    pub credential_kind: CredentialKind,
}

impl Principal {
    /// Create from verified token claims.
    pub fn from_claims(claims: TokenClaims) -> Self {
        Self {
            organization_id: claims.organization_id.unwrap_or_default(),
            roles: claims.realm_roles,
            username: claims.preferred_username,
            subject: claims.subject,
            expires_at: claims.expiry,
            credential_kind: CredentialKind::BearerToken,
        }
    }

    /// Create for a validated organization key. The key is the organization id.
    pub fn for_org_key(org_key: impl Into<String>) -> Self {
        Self {
            organization_id: org_key.into(),
            roles: RoleSet::new(),
            username: None,
            subject: None,
            expires_at: None,
            credential_kind: CredentialKind::OrgApiKey,
        }
    }

    /// Check if the principal holds `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}
