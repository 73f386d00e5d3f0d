// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication and authorization errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Every way the gateway can refuse a request.
///
/// Messages are fixed strings. Upstream failure details are kept in
/// [`AuthError::UpstreamUnavailable`] for logging only and never reach the
/// response body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Neither a bearer token nor an organization key was presented
    #[error("Authentication credentials were not provided")]
    MissingCredential,
    /// Authorization header present but not a usable `Bearer` credential
    #[error("Invalid authorization header format (expected 'Bearer <token>')")]
    InvalidAuthHeader,
    /// Token is structurally invalid
    #[error("Token is malformed")]
    MalformedToken,
    /// Token references a key id that is not in the realm key set
    #[error("Invalid token: signing key not found")]
    KeyNotFound,
    /// Signature does not verify against the referenced key
    #[error("Invalid token signature")]
    BadSignature,
    /// Token `exp` is in the past
    #[error("Token has expired")]
    TokenExpired,
    /// Token `iss` is not the configured realm issuer
    #[error("Invalid token issuer")]
    IssuerMismatch,
    /// Token `azp` is not the configured client
    #[error("Token not intended for this client")]
    AudienceMismatch,
    /// Organization key was rejected by the identity provider
    #[error("Invalid organization key")]
    InvalidOrgKey,
    /// Identity provider could not be reached or answered with an error
    #[error("Authentication service unavailable")]
    UpstreamUnavailable {
        /// Cause, for server-side logs.
        detail: String,
    },
    /// Caller is authenticated but holds none of the required roles
    #[error("Permission denied. Required role not found.")]
    InsufficientRole,
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    pub(crate) fn upstream(detail: impl Into<String>) -> Self {
        AuthError::UpstreamUnavailable {
            detail: detail.into(),
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::KeyNotFound => "key_not_found",
            AuthError::BadSignature => "bad_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::InvalidOrgKey => "invalid_org_key",
            AuthError::UpstreamUnavailable { .. } => "upstream_unavailable",
            AuthError::InsufficientRole => "insufficient_role",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InsufficientRole => StatusCode::FORBIDDEN,
            AuthError::UpstreamUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// True for failures caused by the identity provider rather than the caller.
    pub fn is_server_fault(&self) -> bool {
        matches!(self, AuthError::UpstreamUnavailable { .. })
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn missing_credential_returns_401() {
        let response = AuthError::MissingCredential.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error_code"], "missing_credential");
    }

    #[tokio::test]
    async fn insufficient_role_returns_403() {
        let response = AuthError::InsufficientRole.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn upstream_detail_is_not_exposed() {
        let err = AuthError::upstream("connect error: 10.0.0.5:8443 refused; body=<html>");
        assert!(err.is_server_fault());

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert!(!body.contains("10.0.0.5"));
        assert!(body.contains("Authentication service unavailable"));
        assert!(body.contains("upstream_unavailable"));
    }

    #[test]
    fn credential_failures_are_401() {
        for err in [
            AuthError::InvalidAuthHeader,
            AuthError::MalformedToken,
            AuthError::KeyNotFound,
            AuthError::BadSignature,
            AuthError::TokenExpired,
            AuthError::IssuerMismatch,
            AuthError::AudienceMismatch,
            AuthError::InvalidOrgKey,
        ] {
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED, "{err:?}");
            assert!(!err.is_server_fault());
        }
    }
}
