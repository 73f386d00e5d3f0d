// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the application. Configuration is loaded from the environment
//! once at startup; any error stops the process before it binds a socket.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DEPLOYMENT` | Policy preset (`console` or `agentbinary`) | `console` |
//! | `KEYCLOAK_URL` | Internal identity provider base URL | Required |
//! | `KEYCLOAK_PUBLIC_URL` | Public base URL, as it appears in `iss` | `KEYCLOAK_URL` |
//! | `KEYCLOAK_REALM` | Realm name | Required |
//! | `KEYCLOAK_CLIENT_ID` | Expected `azp` claim | Required |
//! | `KEYCLOAK_ADMIN_CLIENT_ID` | Service account for organization lookups | Optional |
//! | `KEYCLOAK_ADMIN_CLIENT_SECRET` | Service account secret | Optional |
//! | `ORG_KEY_HEADER` | Header carrying organization keys | `X-Org-Key` |
//! | `AUTH_PUBLIC_PATHS` | Public paths, replaces the preset; health stays public | Preset |
//! | `AUTH_ROLE_RULES` | JSON role table, replaces the preset | Preset |
//! | `ORG_CLAIM` | Organization claim name | `org_id` |
//! | `ROLES_CLAIM` | Dotted path to the roles array | `realm_access.roles` |
//! | `JWKS_CACHE_TTL_SECS` | Key set lifetime | `300` |
//! | `JWKS_MIN_REFRESH_SECS` | Minimum gap between refetches (unknown `kid`, failed fetch) | `30` |
//! | `IDP_TIMEOUT_SECS` | Timeout for every identity provider call | `10` |
//! | `TLS_CERT_PATH` | PEM certificate chain; enables HTTPS with `TLS_KEY_PATH` | Optional |
//! | `TLS_KEY_PATH` | PEM private key | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//!
//! Organization-key authentication is enabled only when both admin client
//! variables are set.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use axum::http::{HeaderName, Method};
use url::Url;

use crate::auth::claims::ClaimNames;
use crate::auth::gateway::DEFAULT_ORG_KEY_HEADER;
use crate::auth::jwks::{DEFAULT_CACHE_TTL, DEFAULT_MIN_REFRESH_INTERVAL};
use crate::auth::org_key::ClientCredentials;
use crate::auth::roles::PLATFORM_ADMIN;
use crate::auth::rules::{AccessPolicy, PathRule, PolicyError, PublicPathSet, RoleTable};

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const DEPLOYMENT_ENV: &str = "DEPLOYMENT";
pub const KEYCLOAK_URL_ENV: &str = "KEYCLOAK_URL";
pub const KEYCLOAK_PUBLIC_URL_ENV: &str = "KEYCLOAK_PUBLIC_URL";
pub const KEYCLOAK_REALM_ENV: &str = "KEYCLOAK_REALM";
pub const KEYCLOAK_CLIENT_ID_ENV: &str = "KEYCLOAK_CLIENT_ID";
pub const KEYCLOAK_ADMIN_CLIENT_ID_ENV: &str = "KEYCLOAK_ADMIN_CLIENT_ID";
pub const KEYCLOAK_ADMIN_CLIENT_SECRET_ENV: &str = "KEYCLOAK_ADMIN_CLIENT_SECRET";
pub const ORG_KEY_HEADER_ENV: &str = "ORG_KEY_HEADER";
pub const AUTH_PUBLIC_PATHS_ENV: &str = "AUTH_PUBLIC_PATHS";
pub const AUTH_ROLE_RULES_ENV: &str = "AUTH_ROLE_RULES";
pub const ORG_CLAIM_ENV: &str = "ORG_CLAIM";
pub const ROLES_CLAIM_ENV: &str = "ROLES_CLAIM";
pub const JWKS_CACHE_TTL_ENV: &str = "JWKS_CACHE_TTL_SECS";
pub const JWKS_MIN_REFRESH_ENV: &str = "JWKS_MIN_REFRESH_SECS";
pub const IDP_TIMEOUT_ENV: &str = "IDP_TIMEOUT_SECS";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";

/// Environment variable name for the log output format.
///
/// `json` emits one JSON object per line; anything else uses the
/// human-readable formatter.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_IDP_TIMEOUT: Duration = Duration::from_secs(10);

/// Host endpoints that never require credentials.
pub const HEALTH_PATHS: [&str; 3] = ["/health", "/health/live", "/health/ready"];

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("AUTH_ROLE_RULES is invalid: {0}")]
    RoleRules(#[from] PolicyError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

fn invalid(var: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.to_string(),
    }
}

/// Which backend's access policy to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// Agent binary distribution service.
    AgentBinary,
    /// Operator console API.
    Console,
}

impl Deployment {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentBinary => "agentbinary",
            Self::Console => "console",
        }
    }

    /// Root under which the API and its documents live.
    pub fn service_root(&self) -> &'static str {
        match self {
            Self::AgentBinary => "/agentbinary",
            Self::Console => "/console",
        }
    }

    /// Versioned API prefix.
    pub fn api_prefix(&self) -> &'static str {
        match self {
            Self::AgentBinary => "/agentbinary/v1.0",
            Self::Console => "/console/v1.0",
        }
    }

    pub fn openapi_path(&self) -> String {
        format!("{}/openapi.json", self.service_root())
    }

    pub fn docs_path(&self) -> String {
        format!("{}/docs", self.service_root())
    }

    /// Preset public paths, health endpoints included.
    pub fn public_paths(&self) -> PublicPathSet {
        let mut paths = PublicPathSet::new(HEALTH_PATHS);
        paths.insert("/");
        paths.insert(&self.docs_path());
        paths.insert(&self.openapi_path());
        if *self == Self::AgentBinary {
            paths.insert(&format!("{}/heartbeat", self.api_prefix()));
        }
        paths
    }

    /// Preset role table.
    pub fn role_table(&self) -> RoleTable {
        match self {
            Self::AgentBinary => RoleTable::new(vec![
                PathRule::new(self.api_prefix(), Method::POST, [PLATFORM_ADMIN]),
                PathRule::new(self.api_prefix(), Method::DELETE, [PLATFORM_ADMIN]),
            ]),
            Self::Console => RoleTable::default(),
        }
    }
}

impl FromStr for Deployment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agentbinary" | "agent-binary" => Ok(Self::AgentBinary),
            "console" => Ok(Self::Console),
            other => Err(invalid(
                DEPLOYMENT_ENV,
                format!("unknown deployment {other:?}"),
            )),
        }
    }
}

/// Identity provider endpoints and client identity.
#[derive(Debug, Clone)]
pub struct IdentityProviderConfig {
    /// Base URL used for outbound calls.
    pub base_url: Url,
    /// Base URL as seen by token holders.
    pub public_url: Url,
    pub realm: String,
    /// Expected `azp`.
    pub client_id: String,
    /// Service account for organization lookups.
    pub admin_credentials: Option<ClientCredentials>,
}

impl IdentityProviderConfig {
    pub fn certs_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/certs",
            trimmed(&self.base_url),
            self.realm
        )
    }

    pub fn token_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            trimmed(&self.base_url),
            self.realm
        )
    }

    pub fn organizations_url(&self) -> Result<Url, ConfigError> {
        let raw = format!(
            "{}/admin/realms/{}/organizations",
            trimmed(&self.base_url),
            self.realm
        );
        Url::parse(&raw).map_err(|e| invalid(KEYCLOAK_URL_ENV, e))
    }

    /// Exact `iss` value of realm tokens.
    pub fn expected_issuer(&self) -> String {
        format!("{}/realms/{}", trimmed(&self.public_url), self.realm)
    }
}

fn trimmed(url: &Url) -> &str {
    url.as_str().trim_end_matches('/')
}

/// Certificate and key for HTTPS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub deployment: Deployment,
    pub identity_provider: IdentityProviderConfig,
    pub org_key_header: HeaderName,
    pub public_paths: PublicPathSet,
    pub role_table: RoleTable,
    pub claim_names: ClaimNames,
    pub jwks_cache_ttl: Duration,
    pub jwks_min_refresh_interval: Duration,
    pub idp_timeout: Duration,
    pub tls: Option<TlsPaths>,
}

impl GatewayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any name → value lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let deployment = match get(DEPLOYMENT_ENV) {
            Some(value) => value.parse()?,
            None => Deployment::Console,
        };

        let base_url = parse_url(KEYCLOAK_URL_ENV, &require(KEYCLOAK_URL_ENV)?)?;
        let public_url = match get(KEYCLOAK_PUBLIC_URL_ENV) {
            Some(value) => parse_url(KEYCLOAK_PUBLIC_URL_ENV, &value)?,
            None => base_url.clone(),
        };

        let admin_credentials = match (
            get(KEYCLOAK_ADMIN_CLIENT_ID_ENV),
            get(KEYCLOAK_ADMIN_CLIENT_SECRET_ENV),
        ) {
            (Some(client_id), Some(client_secret)) => Some(ClientCredentials {
                client_id,
                client_secret,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(KEYCLOAK_ADMIN_CLIENT_SECRET_ENV)),
            (None, Some(_)) => return Err(ConfigError::Missing(KEYCLOAK_ADMIN_CLIENT_ID_ENV)),
        };

        let identity_provider = IdentityProviderConfig {
            base_url,
            public_url,
            realm: require(KEYCLOAK_REALM_ENV)?,
            client_id: require(KEYCLOAK_CLIENT_ID_ENV)?,
            admin_credentials,
        };

        let org_key_header = get(ORG_KEY_HEADER_ENV)
            .unwrap_or_else(|| DEFAULT_ORG_KEY_HEADER.to_string());
        let org_key_header = HeaderName::from_bytes(org_key_header.trim().as_bytes())
            .map_err(|e| invalid(ORG_KEY_HEADER_ENV, e))?;

        let public_paths = match get(AUTH_PUBLIC_PATHS_ENV) {
            Some(list) => {
                let mut paths = PublicPathSet::new(HEALTH_PATHS);
                for path in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    paths.insert(path);
                }
                paths
            }
            None => deployment.public_paths(),
        };

        let role_table = match get(AUTH_ROLE_RULES_ENV) {
            Some(json) => RoleTable::from_json(&json)?,
            None => deployment.role_table(),
        };

        let defaults = ClaimNames::default();
        let claim_names = ClaimNames {
            organization: get(ORG_CLAIM_ENV).unwrap_or(defaults.organization),
            roles: get(ROLES_CLAIM_ENV).unwrap_or(defaults.roles),
        };

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(TLS_KEY_PATH_ENV)),
            (None, Some(_)) => return Err(ConfigError::Missing(TLS_CERT_PATH_ENV)),
        };

        let idp_timeout = secs_or(IDP_TIMEOUT_ENV, get(IDP_TIMEOUT_ENV), DEFAULT_IDP_TIMEOUT)?;
        if idp_timeout.is_zero() {
            return Err(invalid(IDP_TIMEOUT_ENV, "must be greater than zero"));
        }

        Ok(Self {
            host: get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(PORT_ENV, get(PORT_ENV), DEFAULT_PORT)?,
            deployment,
            identity_provider,
            org_key_header,
            public_paths,
            role_table,
            claim_names,
            jwks_cache_ttl: secs_or(
                JWKS_CACHE_TTL_ENV,
                get(JWKS_CACHE_TTL_ENV),
                DEFAULT_CACHE_TTL,
            )?,
            jwks_min_refresh_interval: secs_or(
                JWKS_MIN_REFRESH_ENV,
                get(JWKS_MIN_REFRESH_ENV),
                DEFAULT_MIN_REFRESH_INTERVAL,
            )?,
            idp_timeout,
            tls,
        })
    }

    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| invalid(HOST_ENV, e))
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(self.public_paths.clone(), self.role_table.clone())
    }
}

fn parse_url(var: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim()).map_err(|e| invalid(var, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(var, format!("unsupported scheme {other:?}"))),
    }
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v.trim().parse().map_err(|e| invalid(var, e)),
        None => Ok(default),
    }
}

fn secs_or(
    var: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(var, value, default.as_secs()).map(Duration::from_secs)
}
