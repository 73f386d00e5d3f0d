// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer-token verification.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. compact structure (three non-empty segments)
//! 2. header `kid`
//! 3. signing key lookup
//! 4. signature over `header.payload`
//! 5. payload decoding and `exp`
//! 6. `iss`
//! 7. `azp`
//!
//! Claims are never read before the signature has verified.

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Validation};

use super::claims::{ClaimNames, Principal, TokenClaims};
use super::error::AuthError;
use super::jwks::KeySetCache;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Verifies realm-issued bearer tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    keys: Arc<KeySetCache>,
    claim_names: ClaimNames,
}

impl TokenVerifier {
    /// Create a verifier backed by `keys`.
    pub fn new(keys: Arc<KeySetCache>) -> Self {
        Self {
            keys,
            claim_names: ClaimNames::default(),
        }
    }

    /// Use custom organization and role claim names.
    pub fn with_claim_names(mut self, claim_names: ClaimNames) -> Self {
        self.claim_names = claim_names;
        self
    }

    /// The key cache this verifier reads from.
    pub fn key_cache(&self) -> &Arc<KeySetCache> {
        &self.keys
    }

    /// Verify `raw_token` and build the caller's principal.
    ///
    /// # Arguments
    /// - `expected_issuer`: exact `iss` value, e.g. `https://sso.example.com/realms/memcrypt`
    /// - `expected_authorized_party`: exact `azp` value (client id)
    pub async fn verify(
        &self,
        raw_token: &str,
        expected_issuer: &str,
        expected_authorized_party: &str,
    ) -> Result<Principal, AuthError> {
        // 1. Structure
        let segments: Vec<&str> = raw_token.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(AuthError::MalformedToken);
        }

        // 2. Header kid
        let header = decode_header(raw_token).map_err(|_| AuthError::MalformedToken)?;
        let kid = header.kid.ok_or(AuthError::MalformedToken)?;

        // 3. Key
        let key = self.keys.get_key(&kid).await?;

        // 4 + 5. Signature, then payload and expiry
        let mut validation = Validation::new(key.algorithm);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token_data = decode::<serde_json::Value>(raw_token, &key.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    AuthError::BadSignature
                }
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::MalformedToken,
            })?;

        let claims = TokenClaims::from_payload(&token_data.claims, &self.claim_names);

        // 6. Issuer
        if claims.issuer.as_deref() != Some(expected_issuer) {
            return Err(AuthError::IssuerMismatch);
        }

        // 7. Authorized party
        if claims.authorized_party.as_deref() != Some(expected_authorized_party) {
            return Err(AuthError::AudienceMismatch);
        }

        Ok(Principal::from_claims(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::CredentialKind;
    use crate::auth::roles::PLATFORM_ADMIN;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CERTS_PATH: &str = "/realms/test/protocol/openid-connect/certs";
    const ISSUER: &str = "https://sso.example.com/realms/test";
    const CLIENT: &str = "console-frontend";

    fn public_jwk(kid: &str) -> serde_json::Value {
        let mut jwk: serde_json::Value = serde_json::from_str(include_str!(
            "../../tests/fixtures/signing_key.public.json"
        ))
        .unwrap();
        jwk["kid"] = json!(kid);
        jwk
    }

    fn sign_with(pem: &[u8], kid: Option<&str>, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_owned);
        encode(&header, claims, &EncodingKey::from_rsa_pem(pem).unwrap()).unwrap()
    }

    fn sign(kid: &str, claims: &serde_json::Value) -> String {
        sign_with(
            include_bytes!("../../tests/fixtures/signing_key.pem"),
            Some(kid),
            claims,
        )
    }

    fn good_claims() -> serde_json::Value {
        json!({
            "iss": ISSUER,
            "azp": CLIENT,
            "sub": "user-1",
            "preferred_username": "alice",
            "org_id": "org-42",
            "exp": chrono::Utc::now().timestamp() + 3600,
            "realm_access": { "roles": [PLATFORM_ADMIN] }
        })
    }

    async fn verifier_with(keys: Vec<serde_json::Value>) -> (TokenVerifier, MockServer) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .mount(&server)
            .await;
        let certs_url = format!("{}{CERTS_PATH}", server.uri());
        let cache = KeySetCache::new(certs_url, reqwest::Client::new());
        (TokenVerifier::new(Arc::new(cache)), server)
    }

    #[tokio::test]
    async fn valid_token_yields_principal() {
        let (verifier, _server) = verifier_with(vec![public_jwk("k1")]).await;
        let claims = good_claims();
        let token = sign("k1", &claims);

        let principal = verifier.verify(&token, ISSUER, CLIENT).await.unwrap();
        assert_eq!(principal.organization_id, "org-42");
        assert_eq!(principal.username.as_deref(), Some("alice"));
        assert_eq!(principal.subject.as_deref(), Some("user-1"));
        assert!(principal.has_role(PLATFORM_ADMIN));
        assert_eq!(principal.credential_kind, CredentialKind::BearerToken);
        assert_eq!(principal.expires_at.map(|t| t.timestamp()), claims["exp"].as_i64());
    }

    #[tokio::test]
    async fn verify_is_idempotent() {
        let (verifier, _server) = verifier_with(vec![public_jwk("k1")]).await;
        let token = sign("k1", &good_claims());

        let first = verifier.verify(&token, ISSUER, CLIENT).await.unwrap();
        let second = verifier.verify(&token, ISSUER, CLIENT).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn structurally_invalid_tokens_are_malformed() {
        let (verifier, server) = verifier_with(vec![public_jwk("k1")]).await;
        for token in ["", "abc", "a.b", "a..c", "a.b.c.d", ".b.c", "a.b."] {
            assert_eq!(
                verifier.verify(token, ISSUER, CLIENT).await.unwrap_err(),
                AuthError::MalformedToken,
                "{token:?}"
            );
        }
        // Structure is checked before any key fetch.
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn header_without_kid_is_malformed() {
        let (verifier, _server) = verifier_with(vec![public_jwk("k1")]).await;
        let token = sign_with(
            include_bytes!("../../tests/fixtures/signing_key.pem"),
            None,
            &good_claims(),
        );
        assert_eq!(
            verifier.verify(&token, ISSUER, CLIENT).await.unwrap_err(),
            AuthError::MalformedToken
        );
    }

    #[tokio::test]
    async fn unknown_kid_is_key_not_found_not_bad_signature() {
        let (verifier, _server) = verifier_with(vec![public_jwk("k2")]).await;
        let token = sign_with(
            include_bytes!("../../tests/fixtures/rogue_key.pem"),
            Some("k1"),
            &good_claims(),
        );
        assert_eq!(
            verifier.verify(&token, ISSUER, CLIENT).await.unwrap_err(),
            AuthError::KeyNotFound
        );
    }

    #[tokio::test]
    async fn foreign_key_under_known_kid_is_bad_signature() {
        let (verifier, _server) = verifier_with(vec![public_jwk("k1")]).await;
        let token = sign_with(
            include_bytes!("../../tests/fixtures/rogue_key.pem"),
            Some("k1"),
            &good_claims(),
        );
        assert_eq!(
            verifier.verify(&token, ISSUER, CLIENT).await.unwrap_err(),
            AuthError::BadSignature
        );
    }

    #[tokio::test]
    async fn tampered_payload_is_bad_signature() {
        let (verifier, _server) = verifier_with(vec![public_jwk("k1")]).await;
        let token = sign("k1", &good_claims());
        let parts: Vec<&str> = token.split('.').collect();

        // Garbage claims, and claims that would otherwise fail iss/azp.
        let forged_payloads = [
            json!({ "iss": ISSUER, "azp": CLIENT, "realm_access": { "roles": ["EVERYTHING"] } }),
            json!({ "iss": "https://evil.example.com", "azp": "other" }),
        ];
        for payload in forged_payloads {
            let forged = URL_SAFE_NO_PAD.encode(payload.to_string());
            let tampered = format!("{}.{}.{}", parts[0], forged, parts[2]);
            assert_eq!(
                verifier.verify(&tampered, ISSUER, CLIENT).await.unwrap_err(),
                AuthError::BadSignature
            );
        }

        let not_json = format!("{}.{}.{}", parts[0], URL_SAFE_NO_PAD.encode("not json"), parts[2]);
        assert_eq!(
            verifier.verify(&not_json, ISSUER, CLIENT).await.unwrap_err(),
            AuthError::BadSignature
        );
    }

    #[tokio::test]
    async fn wrong_issuer_is_issuer_mismatch_even_with_right_azp() {
        let (verifier, _server) = verifier_with(vec![public_jwk("k1")]).await;
        let mut claims = good_claims();
        claims["iss"] = json!("https://sso.example.com/realms/other");
        let token = sign("k1", &claims);

        assert_eq!(
            verifier.verify(&token, ISSUER, CLIENT).await.unwrap_err(),
            AuthError::IssuerMismatch
        );
    }

    #[tokio::test]
    async fn missing_issuer_is_issuer_mismatch() {
        let (verifier, _server) = verifier_with(vec![public_jwk("k1")]).await;
        let mut claims = good_claims();
        claims.as_object_mut().unwrap().remove("iss");
        let token = sign("k1", &claims);

        assert_eq!(
            verifier.verify(&token, ISSUER, CLIENT).await.unwrap_err(),
            AuthError::IssuerMismatch
        );
    }

    #[tokio::test]
    async fn issuer_is_checked_before_authorized_party() {
        let (verifier, _server) = verifier_with(vec![public_jwk("k1")]).await;
        let mut claims = good_claims();
        claims["iss"] = json!("https://evil.example.com");
        claims["azp"] = json!("someone-else");
        let token = sign("k1", &claims);

        assert_eq!(
            verifier.verify(&token, ISSUER, CLIENT).await.unwrap_err(),
            AuthError::IssuerMismatch
        );
    }

    #[tokio::test]
    async fn wrong_authorized_party_is_audience_mismatch() {
        let (verifier, _server) = verifier_with(vec![public_jwk("k1")]).await;
        let mut claims = good_claims();
        claims["azp"] = json!("agent-portal");
        let token = sign("k1", &claims);

        assert_eq!(
            verifier.verify(&token, ISSUER, CLIENT).await.unwrap_err(),
            AuthError::AudienceMismatch
        );
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let (verifier, _server) = verifier_with(vec![public_jwk("k1")]).await;
        let mut claims = good_claims();
        claims["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
        let token = sign("k1", &claims);

        assert_eq!(
            verifier.verify(&token, ISSUER, CLIENT).await.unwrap_err(),
            AuthError::TokenExpired
        );
    }

    #[tokio::test]
    async fn token_without_exp_is_accepted() {
        let (verifier, _server) = verifier_with(vec![public_jwk("k1")]).await;
        let mut claims = good_claims();
        claims.as_object_mut().unwrap().remove("exp");
        let token = sign("k1", &claims);

        assert!(verifier.verify(&token, ISSUER, CLIENT).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_key_endpoint_is_upstream_unavailable() {
        let cache = KeySetCache::new("http://127.0.0.1:9/certs", reqwest::Client::new());
        let verifier = TokenVerifier::new(Arc::new(cache));
        let token = sign("k1", &good_claims());

        let err = verifier.verify(&token, ISSUER, CLIENT).await.unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable { .. }));
    }
}
