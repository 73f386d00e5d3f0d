// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Declarative access policy: public paths and path/method role rules.

use std::collections::{BTreeMap, BTreeSet};

use axum::http::Method;

use super::roles::RoleSet;

/// Errors from parsing a role table.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("role table is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid HTTP method in role table: {0:?}")]
    InvalidMethod(String),

    #[error("role table prefix must start with '/': {0:?}")]
    InvalidPrefix(String),
}

/// Roles required for requests under `path_prefix` with `method`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub path_prefix: String,
    pub method: Method,
    pub required_roles: RoleSet,
}

impl PathRule {
    pub fn new<I, S>(path_prefix: impl Into<String>, method: Method, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path_prefix: path_prefix.into(),
            method,
            required_roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

/// Paths that bypass authentication entirely.
///
/// Matching is exact after stripping trailing slashes from both sides, so
/// `/docs` and `/docs/` are the same entry. No prefix matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicPathSet {
    paths: BTreeSet<String>,
}

impl PublicPathSet {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| normalize(p.as_ref()).to_string())
                .collect(),
        }
    }

    /// Add a path.
    pub fn insert(&mut self, path: &str) {
        self.paths.insert(normalize(path).to_string());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(normalize(path))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn normalize(path: &str) -> &str {
    path.trim_end_matches('/')
}

/// Path/method → required-roles table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleTable {
    rules: Vec<PathRule>,
}

impl RoleTable {
    pub fn new(rules: Vec<PathRule>) -> Self {
        Self { rules }
    }

    /// Parse the `{ "<prefix>": { "<METHOD>": ["ROLE", ...] } }` form.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let raw: BTreeMap<String, BTreeMap<String, Vec<String>>> = serde_json::from_str(json)?;

        let mut rules = Vec::new();
        for (prefix, methods) in raw {
            if !prefix.starts_with('/') {
                return Err(PolicyError::InvalidPrefix(prefix));
            }
            for (method, roles) in methods {
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| PolicyError::InvalidMethod(method.clone()))?;
                rules.push(PathRule::new(prefix.clone(), method, roles));
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[PathRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Roles required for `(path, method)`.
    ///
    /// Among rules for `method` whose prefix starts `path`, the longest prefix
    /// wins. No match means no role requirement (empty set).
    pub fn required_roles(&self, path: &str, method: &Method) -> &RoleSet {
        static NONE: RoleSet = RoleSet::new();

        self.rules
            .iter()
            .filter(|rule| rule.method == *method && path.starts_with(&rule.path_prefix))
            .max_by_key(|rule| rule.path_prefix.len())
            .map(|rule| &rule.required_roles)
            .unwrap_or(&NONE)
    }
}

/// Everything the gateway needs to decide on a request besides credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub public_paths: PublicPathSet,
    pub role_table: RoleTable,
}

impl AccessPolicy {
    pub fn new(public_paths: PublicPathSet, role_table: RoleTable) -> Self {
        Self {
            public_paths,
            role_table,
        }
    }
}
