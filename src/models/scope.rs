//! Effective query scope derived from a role and an admin's "view as" selection.

use serde::{Deserialize, Serialize};

use super::{Identity, Role};

/// Which records a session may read or write.
///
/// `fetch_all` is true only for an admin without a selection; in that case
/// `target_user_id` is always `None` so it can never reach a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<String>,
    pub fetch_all: bool,
}

impl ScopeSpec {
    /// Scope limited to exactly one team member.
    pub fn member(user_id: impl Into<String>) -> Self {
        Self {
            target_user_id: Some(user_id.into()),
            fetch_all: false,
        }
    }

    /// Scope spanning every member of the team.
    pub fn all() -> Self {
        Self {
            target_user_id: None,
            fetch_all: true,
        }
    }

    /// Short label used in logs and cache diagnostics.
    pub fn label(&self) -> String {
        match (&self.target_user_id, self.fetch_all) {
            (_, true) => "ALL_USERS".to_string(),
            (Some(id), false) => format!("SINGLE_USER({})", id),
            (None, false) => "UNSCOPED".to_string(),
        }
    }
}

/// Derive the effective scope for `identity` given the current selection.
///
/// Users are always confined to themselves regardless of `selection`.
pub fn derive_scope(identity: &Identity, selection: Option<&str>) -> ScopeSpec {
    match identity.role {
        Role::User => ScopeSpec::member(identity.id.as_str()),
        Role::Admin => match selection {
            None => ScopeSpec::all(),
            Some(target) => ScopeSpec::member(target),
        },
    }
}
