// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Console Gateway - Authentication & Authorization Gateway
//!
//! This crate authenticates every inbound request against a Keycloak-style
//! realm, either with a signed bearer token or with a pre-shared
//! organization key, and enforces path/method role requirements before
//! the request reaches a handler.
//!
//! ## Modules
//!
//! - `api` - HTTP host service (Axum): health, OpenAPI, session endpoints
//! - `auth` - Key cache, token verification, organization keys, gateway
//! - `config` - Environment configuration and deployment presets

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod state;
