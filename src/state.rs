// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{AuthorizationGateway, KeySetCache, OrgKeyResolver, TokenVerifier};
use crate::config::{ConfigError, Deployment, GatewayConfig};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<AuthorizationGateway>,
    pub deployment: Deployment,
}

impl AppState {
    pub fn new(gateway: AuthorizationGateway, deployment: Deployment) -> Self {
        Self {
            gateway: Arc::new(gateway),
            deployment,
        }
    }

    /// Wire the gateway from configuration.
    ///
    /// All identity provider calls share one HTTP client with the configured
    /// timeout. Organization keys are accepted only when admin credentials
    /// are configured.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.idp_timeout)
            .build()?;
        let idp = &config.identity_provider;

        let keys = KeySetCache::new(idp.certs_url(), client.clone())
            .with_cache_ttl(config.jwks_cache_ttl)
            .with_min_refresh_interval(config.jwks_min_refresh_interval);
        let verifier =
            TokenVerifier::new(Arc::new(keys)).with_claim_names(config.claim_names.clone());

        let mut gateway = AuthorizationGateway::new(
            verifier,
            config.access_policy(),
            idp.expected_issuer(),
            idp.client_id.clone(),
        );

        if let Some(credentials) = &idp.admin_credentials {
            let resolver = OrgKeyResolver::new(
                idp.token_url(),
                idp.organizations_url()?,
                credentials.clone(),
                client,
            );
            gateway = gateway.with_org_keys(resolver, config.org_key_header.clone());
        }

        Ok(Self::new(gateway, config.deployment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        KEYCLOAK_ADMIN_CLIENT_ID_ENV, KEYCLOAK_ADMIN_CLIENT_SECRET_ENV, KEYCLOAK_CLIENT_ID_ENV,
        KEYCLOAK_REALM_ENV, KEYCLOAK_URL_ENV,
    };

    fn config(with_admin: bool) -> GatewayConfig {
        GatewayConfig::from_lookup(|name| match name {
            KEYCLOAK_URL_ENV => Some("http://keycloak:8080".to_string()),
            KEYCLOAK_REALM_ENV => Some("memcrypt".to_string()),
            KEYCLOAK_CLIENT_ID_ENV => Some("console-frontend".to_string()),
            KEYCLOAK_ADMIN_CLIENT_ID_ENV if with_admin => Some("console-backend".to_string()),
            KEYCLOAK_ADMIN_CLIENT_SECRET_ENV if with_admin => Some("s3cret".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn org_keys_follow_admin_credentials() {
        let state = AppState::from_config(&config(false)).unwrap();
        assert!(!state.gateway.accepts_org_keys());

        let state = AppState::from_config(&config(true)).unwrap();
        assert!(state.gateway.accepts_org_keys());
        assert_eq!(
            state.gateway.verifier().key_cache().certs_url(),
            "http://keycloak:8080/realms/memcrypt/protocol/openid-connect/certs"
        );
    }
}
