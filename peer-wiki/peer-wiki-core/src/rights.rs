//! Path-based access rules attached to users.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Manage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RightRule {
    /// `read`, `write`, `manage` or `admin`, compared case-insensitively.
    pub role: String,
    pub path: String,
    #[serde(default)]
    pub exact: bool,
    #[serde(default)]
    pub deny: bool,
}

impl RightRule {
    pub fn allow(role: &str, path: &str) -> Self {
        Self {
            role: role.to_string(),
            path: path.to_string(),
            exact: false,
            deny: false,
        }
    }

    pub fn deny(role: &str, path: &str) -> Self {
        Self {
            deny: true,
            ..Self::allow(role, path)
        }
    }

    fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case("admin")
    }

    fn covers(&self, action: Action) -> bool {
        let role = self.role.to_ascii_lowercase();
        match action {
            Action::Read => matches!(role.as_str(), "read" | "write" | "manage"),
            Action::Write => matches!(role.as_str(), "write" | "manage"),
            Action::Manage => role == "manage",
        }
    }

    fn matches(&self, path: &str) -> bool {
        if self.exact {
            path == self.path
        } else {
            path.starts_with(&self.path)
        }
    }
}

pub struct Rights;

impl Rights {
    /// `path` is a URL path with a leading slash, e.g. `/guide/intro`.
    /// Exact rules win over prefix rules, then longer prefixes over shorter
    /// ones; the first remaining rule decides.
    pub fn check(path: &str, rules: &[RightRule], action: Action) -> bool {
        if rules.iter().any(|r| r.is_admin() && !r.deny) {
            return true;
        }
        let mut candidates: Vec<&RightRule> = rules
            .iter()
            .filter(|r| r.covers(action) && r.matches(path))
            .collect();
        candidates.sort_by(|a, b| {
            b.exact
                .cmp(&a.exact)
                .then_with(|| b.path.len().cmp(&a.path.len()))
        });
        candidates.first().is_some_and(|r| !r.deny)
    }

    /// Same as [`Rights::check`] for an entry id.
    pub fn check_entry(id: &str, rules: &[RightRule], action: Action) -> bool {
        Self::check(&format!("/{id}"), rules, action)
    }
}
