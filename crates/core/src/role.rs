//! Roles and guardian types.
//!
//! The wire names (`CHILD`, `DECIDING_PARENT`, ...) are what the identity
//! provider puts in tokens and what the authority strings are built from.
//! Parsing is case-sensitive.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The role held by an account. Every account has exactly one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ADMIN")]
    Admin,
    #[serde(rename = "DECIDING_PARENT")]
    DecidingGuardian,
    #[serde(rename = "NON_DECIDING_PARENT")]
    NonDecidingGuardian,
    #[serde(rename = "CHILD")]
    Dependent,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Admin,
        Role::DecidingGuardian,
        Role::NonDecidingGuardian,
        Role::Dependent,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::DecidingGuardian => "DECIDING_PARENT",
            Role::NonDecidingGuardian => "NON_DECIDING_PARENT",
            Role::Dependent => "CHILD",
        }
    }

    pub fn is_guardian(self) -> bool {
        matches!(self, Role::DecidingGuardian | Role::NonDecidingGuardian)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.wire_name() == s)
            .ok_or_else(|| DomainError::unknown_role(s))
    }
}

/// Whether a guardian may make decisions on behalf of their dependents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardianType {
    Deciding,
    NonDeciding,
}

impl GuardianType {
    pub fn as_str(self) -> &'static str {
        match self {
            GuardianType::Deciding => "DECIDING",
            GuardianType::NonDeciding => "NON_DECIDING",
        }
    }

    /// Interpret the guardian `type` claim. Only `NON_DECIDING`
    /// (any case) is non-deciding; anything else, including absence, is deciding.
    pub fn from_claim(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("NON_DECIDING") => GuardianType::NonDeciding,
            _ => GuardianType::Deciding,
        }
    }

    /// Guardian type implied by a guardian role; `None` for other roles.
    pub fn for_role(role: Role) -> Option<Self> {
        match role {
            Role::DecidingGuardian => Some(GuardianType::Deciding),
            Role::NonDecidingGuardian => Some(GuardianType::NonDeciding),
            Role::Admin | Role::Dependent => None,
        }
    }
}

impl FromStr for GuardianType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DECIDING" => Ok(GuardianType::Deciding),
            "NON_DECIDING" => Ok(GuardianType::NonDeciding),
            other => Err(DomainError::validation(format!("unknown guardian type: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wire_names_parse_back() {
        for role in Role::ALL {
            assert_eq!(role.wire_name().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn parsing_is_case_sensitive() {
        assert!("child".parse::<Role>().is_err());
        assert!("Deciding_Parent".parse::<Role>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Role::NonDecidingGuardian).unwrap();
        assert_eq!(json, "\"NON_DECIDING_PARENT\"");
        let role: Role = serde_json::from_str("\"CHILD\"").unwrap();
        assert_eq!(role, Role::Dependent);
    }

    #[test]
    fn guardian_type_claim_is_lenient() {
        assert_eq!(GuardianType::from_claim(Some("non_deciding")), GuardianType::NonDeciding);
        assert_eq!(GuardianType::from_claim(Some("NON_DECIDING")), GuardianType::NonDeciding);
        assert_eq!(GuardianType::from_claim(Some("DECIDING")), GuardianType::Deciding);
        assert_eq!(GuardianType::from_claim(Some("whatever")), GuardianType::Deciding);
        assert_eq!(GuardianType::from_claim(None), GuardianType::Deciding);
    }

    #[test]
    fn only_guardian_roles_imply_a_type() {
        assert_eq!(GuardianType::for_role(Role::NonDecidingGuardian), Some(GuardianType::NonDeciding));
        assert_eq!(GuardianType::for_role(Role::Dependent), None);
        assert_eq!(GuardianType::for_role(Role::Admin), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 500, ..ProptestConfig::default() })]

        #[test]
        fn unknown_names_never_parse(s in "[A-Za-z_]{0,24}") {
            let known = Role::ALL.iter().any(|r| r.wire_name() == s);
            prop_assert_eq!(s.parse::<Role>().is_ok(), known);
        }
    }
}
