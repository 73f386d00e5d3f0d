// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Gateway middleware for Axum.
//!
//! Runs [`AuthorizationGateway::decide`] before every handler. Forwarded
//! requests carry a [`RequestContext`] in their extensions; rejected ones
//! never reach the handler.
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/console/v1.0/devices", get(list_devices))
//!     .layer(axum::middleware::from_fn_with_state(gateway.clone(), gateway_middleware));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::context::RequestContext;
use super::gateway::{AuthorizationGateway, Outcome};

/// Authenticate and authorize one request.
pub async fn gateway_middleware(
    State(gateway): State<Arc<AuthorizationGateway>>,
    request: Request,
    next: Next,
) -> Response {
    // The body is not `Sync`; only the head is borrowed across the decision.
    let (mut parts, body) = request.into_parts();
    let outcome = gateway
        .decide(&parts.method, parts.uri.path(), &parts.headers)
        .await;

    let context = match outcome {
        Outcome::Forward(Some(principal)) => RequestContext::authenticated(principal),
        Outcome::Forward(None) => RequestContext::anonymous(),
        Outcome::Reject(err) => return err.into_response(),
    };

    parts.extensions.insert(context);
    next.run(Request::from_parts(parts, body)).await
}
