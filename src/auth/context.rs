// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request-scoped authentication context and its Axum extractors.
//!
//! The gateway middleware stores a [`RequestContext`] in the request
//! extensions. Handlers read the caller from there and nowhere else:
//!
//! ```rust,ignore
//! async fn list_devices(CurrentOrganization(org_id): CurrentOrganization) -> impl IntoResponse {
//!     // org_id is the organization the gateway resolved for this request
//! }
//! ```

use axum::{extract::FromRequestParts, http::request::Parts};

use super::claims::Principal;
use super::error::AuthError;
use super::roles::RoleSet;

/// Who is calling, for the lifetime of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    principal: Option<Principal>,
    current_organization: Option<String>,
}

impl RequestContext {
    /// Context for a request that matched a public path.
    pub fn anonymous() -> Self {
        Self {
            principal: None,
            current_organization: None,
        }
    }

    /// Context for an authenticated request.
    pub fn authenticated(principal: Principal) -> Self {
        Self {
            current_organization: Some(principal.organization_id.clone()),
            principal: Some(principal),
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    /// Organization the request is scoped to; `None` on public paths.
    pub fn current_organization(&self) -> Option<&str> {
        self.current_organization.as_deref()
    }

    /// Roles of the caller; empty on public paths.
    pub fn roles(&self) -> &RoleSet {
        static NONE: RoleSet = RoleSet::new();
        self.principal.as_ref().map(|p| &p.roles).unwrap_or(&NONE)
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or(AuthError::MissingCredential)
    }
}

/// Extractor for an authenticated caller.
///
/// Rejects with 401 on public paths, where no principal was resolved.
pub struct Authenticated(pub Principal);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = RequestContext::from_request_parts(parts, state).await?;
        context
            .principal
            .map(Authenticated)
            .ok_or(AuthError::MissingCredential)
    }
}

/// Extractor for the organization the request is scoped to.
pub struct CurrentOrganization(pub String);

impl<S> FromRequestParts<S> for CurrentOrganization
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = RequestContext::from_request_parts(parts, state).await?;
        context
            .current_organization
            .map(CurrentOrganization)
            .ok_or(AuthError::MissingCredential)
    }
}
