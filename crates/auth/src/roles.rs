use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use lms_core::Role;

/// Authority string matched by route rules (`ROLE_<wire name>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Authority(Cow<'static, str>);

impl Authority {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Authority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Total mapping from role to authority.
pub fn authority_for(role: Role) -> Authority {
    let name = match role {
        Role::Admin => "ROLE_ADMIN",
        Role::DecidingGuardian => "ROLE_DECIDING_PARENT",
        Role::NonDecidingGuardian => "ROLE_NON_DECIDING_PARENT",
        Role::Dependent => "ROLE_CHILD",
    };
    Authority::new(name)
}
