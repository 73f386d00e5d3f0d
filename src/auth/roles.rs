// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Realm roles used for authorization.

use std::collections::BTreeSet;

/// Realm role granting platform-wide administration.
pub const PLATFORM_ADMIN: &str = "PLATFORM_ADMIN";

/// Realm role granting administration of the caller's own organization.
pub const ORG_ADMIN: &str = "ORG_ADMIN";

/// A set of realm role names.
///
/// Role names are opaque strings issued by the identity provider and are
/// compared case-sensitively.
pub type RoleSet = BTreeSet<String>;

/// Build a [`RoleSet`] from string slices.
pub fn role_set<I, S>(roles: I) -> RoleSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    roles.into_iter().map(Into::into).collect()
}

/// Check `held` against `required`.
///
/// An empty requirement always passes. Otherwise at least one required role
/// must be held.
pub fn satisfies(held: &RoleSet, required: &RoleSet) -> bool {
    required.is_empty() || !required.is_disjoint(held)
}
