// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Caller introspection endpoints.

use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{Authenticated, CurrentOrganization, Principal};
use crate::error::{ApiError, ErrorResponse};

/// Organization the request is scoped to.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrganizationResponse {
    pub organization_id: String,
}

/// Return the authenticated caller.
#[utoipa::path(
    get,
    path = "/session",
    tag = "Session",
    responses(
        (status = 200, description = "Resolved principal", body = Principal),
        (status = 401, description = "Missing or invalid credential"),
        (status = 500, description = "Identity provider unavailable")
    )
)]
pub async fn session(Authenticated(principal): Authenticated) -> Json<Principal> {
    Json(principal)
}

/// Return the caller's organization.
///
/// Bearer tokens without an organization claim get 404.
#[utoipa::path(
    get,
    path = "/organization",
    tag = "Session",
    responses(
        (status = 200, description = "Current organization", body = OrganizationResponse),
        (status = 401, description = "Missing or invalid credential"),
        (
            status = 404,
            description = "Caller is not bound to an organization",
            body = ErrorResponse
        )
    )
)]
pub async fn organization(
    CurrentOrganization(organization_id): CurrentOrganization,
) -> Result<Json<OrganizationResponse>, ApiError> {
    if organization_id.is_empty() {
        return Err(ApiError::no_organization());
    }
    Ok(Json(OrganizationResponse { organization_id }))
}
