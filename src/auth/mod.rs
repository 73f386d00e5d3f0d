// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Request authentication and authorization against a Keycloak-style realm.
//!
//! ## Auth Flow
//!
//! 1. Operators sign in through the frontend and send
//!    `Authorization: Bearer <realm JWT>`
//! 2. Devices and agents send their organization key in `X-Org-Key`
//! 3. The gateway:
//!    - skips public paths
//!    - verifies bearer tokens against the realm JWKS (signature, expiry,
//!      issuer, authorized party)
//!    - exchanges organization keys through the realm admin API
//!    - checks the resolved roles against the path/method role table
//! 4. Handlers read the caller from [`RequestContext`]
//!
//! ## Security
//!
//! - Every failure is terminal; nothing is forwarded unverified
//! - Claims are only read after the signature verifies
//! - JWKS is cached with TTL and refetched on unknown `kid` at a bounded rate
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod context;
pub mod error;
pub mod gateway;
pub mod jwks;
pub mod middleware;
pub mod org_key;
pub mod roles;
pub mod rules;
pub mod verifier;

pub use claims::{ClaimNames, CredentialKind, Principal};
pub use context::{Authenticated, CurrentOrganization, RequestContext};
pub use error::AuthError;
pub use gateway::{AuthorizationGateway, Credential, Outcome};
pub use jwks::KeySetCache;
pub use org_key::{ClientCredentials, OrgKeyResolver};
pub use rules::{AccessPolicy, PathRule, PublicPathSet, RoleTable};
pub use verifier::TokenVerifier;
