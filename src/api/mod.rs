// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{http::Uri, middleware::from_fn_with_state, routing::get, Router};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

use crate::{
    auth::{middleware::gateway_middleware, CredentialKind, Principal},
    config::Deployment,
    error::{ApiError, ErrorResponse},
    state::AppState,
};

pub mod docs;
pub mod health;
pub mod session;

/// Build the service router.
///
/// Every route, the fallback included, runs behind the gateway; health,
/// docs, and the index are public through the access policy.
pub fn router(state: AppState) -> Router {
    let deployment = state.deployment;

    let api_routes = Router::new()
        .route("/session", get(session::session))
        .route("/organization", get(session::organization));

    Router::new()
        .route("/", get(docs::index))
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route(&deployment.openapi_path(), get(docs::openapi_json))
        .route(&deployment.docs_path(), get(docs::docs))
        .nest(deployment.api_prefix(), api_routes)
        .fallback(not_found)
        .layer(from_fn_with_state(state.gateway.clone(), gateway_middleware))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("No route for {}", uri.path()))
}

/// OpenAPI document with the session endpoints under the deployment prefix.
pub fn openapi(deployment: Deployment) -> utoipa::openapi::OpenApi {
    ApiDoc::openapi().nest(deployment.api_prefix(), SessionDoc::openapi())
}

#[derive(OpenApi)]
#[openapi(
    paths(health::health, health::liveness, health::readiness),
    components(schemas(health::ReadyResponse, health::HealthChecks, health::HealthResponse)),
    tags((name = "Health", description = "Liveness and readiness probes"))
)]
struct ApiDoc;

#[derive(OpenApi)]
#[openapi(
    paths(session::session, session::organization),
    components(schemas(
        Principal,
        CredentialKind,
        session::OrganizationResponse,
        ErrorResponse
    )),
    tags((name = "Session", description = "The authenticated caller"))
)]
struct SessionDoc;
