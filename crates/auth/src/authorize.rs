//! Declarative route authorization.
//!
//! A [`RouteTable`] is an ordered list of path-prefix rules; the first match
//! decides. Paths no rule matches require an authenticated caller and
//! nothing more.
//!
//! - No IO
//! - No panics

use serde::Serialize;

use lms_core::Role;

use crate::roles::{Authority, authority_for};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    PermitAll,
    Authenticated,
    AnyAuthority(Vec<Authority>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    prefix: &'static str,
    requirement: Requirement,
}

impl RouteRule {
    pub fn new(prefix: &'static str, requirement: Requirement) -> Self {
        Self {
            prefix,
            requirement,
        }
    }

    /// `/health` matches `/health` and `/health/...`, not `/healthz`.
    fn matches(&self, path: &str) -> bool {
        if self.prefix.ends_with('/') {
            return path.starts_with(self.prefix) || path == self.prefix.trim_end_matches('/');
        }
        match path.strip_prefix(self.prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Permit,
    /// No principal on a protected path (401).
    Unauthenticated,
    /// Principal lacks every accepted authority (403).
    Forbidden,
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// The gateway's route rules.
    pub fn default_rules() -> Self {
        let any_of = |roles: &[Role]| {
            Requirement::AnyAuthority(roles.iter().copied().map(authority_for).collect())
        };
        Self::new(vec![
            RouteRule::new("/health", Requirement::PermitAll),
            RouteRule::new("/api/v1/admin/", any_of(&[Role::Admin])),
            RouteRule::new(
                "/api/v1/parent/",
                any_of(&[Role::Admin, Role::DecidingGuardian, Role::NonDecidingGuardian]),
            ),
            RouteRule::new("/api/v1/child/", any_of(&[Role::Admin, Role::Dependent])),
        ])
    }

    pub fn requirement_for(&self, path: &str) -> &Requirement {
        const FALLBACK: &Requirement = &Requirement::Authenticated;
        self.rules
            .iter()
            .find(|r| r.matches(path))
            .map(|r| &r.requirement)
            .unwrap_or(FALLBACK)
    }

    /// `authorities` is `None` for an unauthenticated request.
    pub fn evaluate(&self, path: &str, authorities: Option<&[Authority]>) -> AccessDecision {
        match (self.requirement_for(path), authorities) {
            (Requirement::PermitAll, _) => AccessDecision::Permit,
            (_, None) => AccessDecision::Unauthenticated,
            (Requirement::Authenticated, Some(_)) => AccessDecision::Permit,
            (Requirement::AnyAuthority(accepted), Some(held)) => {
                if held.iter().any(|a| accepted.contains(a)) {
                    AccessDecision::Permit
                } else {
                    AccessDecision::Forbidden
                }
            }
        }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::default_rules()
    }
}
