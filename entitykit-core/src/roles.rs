//! C4 — the role evaluator.
//!
//! Maps `(user role, entity, requested mode letter, requested view)` to an
//! allow/deny decision, the way `crudkit_rs`'s `AuthExtractor` trait gates
//! resource access before an entity operation runs.

use crate::meta::Meta;
use indexmap::IndexMap;

/// A single `role:mode` or `role:mode:view` entry from a [`Meta`]'s `roles` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEntry {
    pub role: String,
    pub mode: String,
    pub view: String,
}

/// Why a `role:mode[:view]` string failed to parse.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleEntryParseError(pub String);

impl std::fmt::Display for RoleEntryParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid role entry '{}': expected 'role:mode' or 'role:mode:view'", self.0)
    }
}

impl std::str::FromStr for RoleEntry {
    type Err = RoleEntryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let role = parts.next().filter(|p| !p.is_empty());
        let mode = parts.next().filter(|p| !p.is_empty());
        let (role, mode) = match (role, mode) {
            (Some(r), Some(m)) => (r, m),
            _ => return Err(RoleEntryParseError(s.to_string())),
        };
        let view = parts.next().unwrap_or("*");
        Ok(RoleEntry {
            role: role.to_string(),
            mode: mode.to_string(),
            view: view.to_string(),
        })
    }
}

/// Registry of known role names, each optionally flagged `root` (sees
/// everything, bypasses per-entity `roles` matching).
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: IndexMap<String, bool>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, root: bool) {
        self.roles.insert(name.into(), root);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    pub fn is_root(&self, name: &str) -> bool {
        self.roles.get(name).copied().unwrap_or(false)
    }
}

/// The outcome of a role check: the mode letters and view tag the caller is
/// actually permitted, or an outright denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub mode: String,
    pub view: String,
}

impl Access {
    fn deny() -> Self {
        Access {
            mode: String::new(),
            view: String::new(),
        }
    }

    pub fn is_denied(&self) -> bool {
        self.mode.is_empty() && self.view.is_empty()
    }

    /// Whether `mode_letter` is granted and `requested_view` is within the
    /// granted view (spec §4.4's final decision rule).
    pub fn allows(&self, mode_letter: char, requested_view: &str) -> bool {
        self.mode.contains(mode_letter) && (self.view == "*" || self.view.contains(requested_view))
    }
}

/// Resolve the effective `(mode, view)` for `user_role` against `meta`,
/// per spec §4.4.
pub fn evaluate(meta: &Meta, roles: &RoleRegistry, user_role: Option<&str>) -> Access {
    if meta.roles.is_empty() {
        return Access {
            mode: meta.mode.clone(),
            view: "*".to_string(),
        };
    }

    let Some(user_role) = user_role else {
        return Access::deny();
    };

    if !roles.is_registered(user_role) {
        return Access::deny();
    }

    if roles.is_root(user_role) {
        return Access {
            mode: meta.mode.clone(),
            view: "*".to_string(),
        };
    }

    for entry in &meta.roles {
        if entry.role != user_role {
            continue;
        }
        let mode = if entry.mode == "*" {
            meta.mode.clone()
        } else {
            entry.mode.clone()
        };
        return Access {
            mode,
            view: entry.view.clone(),
        };
    }

    Access::deny()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertr::prelude::*;

    #[test]
    fn parses_role_mode_and_optional_view() {
        let with_view: RoleEntry = "admin:cru:edit".parse().unwrap();
        assert_that(with_view.role.clone()).is_equal_to("admin".to_string());
        assert_that(with_view.mode.clone()).is_equal_to("cru".to_string());
        assert_that(with_view.view.clone()).is_equal_to("edit".to_string());

        let without_view: RoleEntry = "user:r".parse().unwrap();
        assert_that(without_view.view).is_equal_to("*".to_string());
    }

    #[test]
    fn rejects_malformed_entries() {
        assert_that("no-colon-here".parse::<RoleEntry>().is_err()).is_true();
        assert_that(":cru".parse::<RoleEntry>().is_err()).is_true();
    }
}
