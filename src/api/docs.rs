// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::State,
    response::{IntoResponse, Redirect},
    Json,
};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub deployment: &'static str,
    pub api_prefix: &'static str,
    pub openapi: String,
}

pub async fn index(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        deployment: state.deployment.name(),
        api_prefix: state.deployment.api_prefix(),
        openapi: state.deployment.openapi_path(),
    })
}

pub async fn openapi_json(State(state): State<AppState>) -> impl IntoResponse {
    Json(super::openapi(state.deployment))
}

/// No bundled UI; point clients at the raw document.
pub async fn docs(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&state.deployment.openapi_path())
}
