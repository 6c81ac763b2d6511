//! Identity records: accounts and the guardian/dependent profiles they link to.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{AccountId, DependentId, GuardianId};
use crate::role::{GuardianType, Role};

/// An entry of the persisted role catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub role: Role,
    pub description: String,
}

impl RoleRecord {
    pub fn new(role: Role) -> Self {
        let description = match role {
            Role::Admin => "Platform administrator",
            Role::DecidingGuardian => "Guardian with decision rights",
            Role::NonDecidingGuardian => "Guardian without decision rights",
            Role::Dependent => "Dependent learner",
        };
        Self {
            role,
            description: description.to_string(),
        }
    }
}

/// The profile an account is linked to. Never both.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ProfileLink {
    None,
    Guardian(GuardianId),
    Dependent(DependentId),
}

/// A local login account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    username: String,
    email: Option<String>,
    #[serde(skip_serializing)]
    password_hash: Option<String>,
    role: Role,
    active: bool,
    profile: ProfileLink,
}

impl Account {
    /// Create a federated account (no local credential).
    pub fn new(
        username: impl Into<String>,
        email: Option<String>,
        role: Role,
        profile: ProfileLink,
    ) -> DomainResult<Self> {
        let username = username.into();
        if username.trim().is_empty() {
            return Err(DomainError::validation("username must not be blank"));
        }
        let email = email.filter(|e| !e.trim().is_empty());
        Self::check_profile(role, profile)?;

        Ok(Self {
            id: AccountId::new(),
            username,
            email,
            password_hash: None,
            role,
            active: true,
            profile,
        })
    }

    /// Rebuild an account from storage without re-running creation rules.
    pub fn restore(
        id: AccountId,
        username: String,
        email: Option<String>,
        password_hash: Option<String>,
        role: Role,
        active: bool,
        profile: ProfileLink,
    ) -> Self {
        Self {
            id,
            username,
            email,
            password_hash,
            role,
            active,
            profile,
        }
    }

    fn check_profile(role: Role, profile: ProfileLink) -> DomainResult<()> {
        match (role, profile) {
            (Role::Dependent, ProfileLink::Guardian(_)) => Err(DomainError::invariant(
                "dependent account cannot link a guardian profile",
            )),
            (r, ProfileLink::Dependent(_)) if r != Role::Dependent => Err(DomainError::invariant(
                "only dependent accounts link a dependent profile",
            )),
            _ => Ok(()),
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn profile(&self) -> ProfileLink {
        self.profile
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}

/// A guardian profile federated from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardian {
    pub id: GuardianId,
    pub external_id: i64,
    pub name: Option<String>,
    pub login_name: String,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub guardian_type: GuardianType,
}

impl Guardian {
    pub fn new(external_id: i64, login_name: impl Into<String>) -> DomainResult<Self> {
        let login_name = login_name.into();
        if login_name.trim().is_empty() {
            return Err(DomainError::validation("guardian login name must not be blank"));
        }
        Ok(Self {
            id: GuardianId::new(),
            external_id,
            name: None,
            login_name,
            email: None,
            gender: None,
            guardian_type: GuardianType::Deciding,
        })
    }
}

/// A dependent profile. Always owned by exactly one guardian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependent {
    pub id: DependentId,
    pub external_id: i64,
    pub guardian_id: GuardianId,
    pub name: Option<String>,
    pub login_name: String,
    pub case_number: Option<String>,
    pub gender: Option<String>,
}

impl Dependent {
    pub fn new(
        external_id: i64,
        login_name: impl Into<String>,
        guardian_id: GuardianId,
    ) -> DomainResult<Self> {
        let login_name = login_name.into();
        if login_name.trim().is_empty() {
            return Err(DomainError::validation("dependent login name must not be blank"));
        }
        Ok(Self {
            id: DependentId::new(),
            external_id,
            guardian_id,
            name: None,
            login_name,
            case_number: None,
            gender: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_rejects_blank_username() {
        let err = Account::new("  ", None, Role::Dependent, ProfileLink::None).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn dependent_account_cannot_link_guardian() {
        let err = Account::new(
            "kid",
            None,
            Role::Dependent,
            ProfileLink::Guardian(GuardianId::new()),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn guardian_account_cannot_link_dependent() {
        let err = Account::new(
            "parent",
            Some("p@example.com".into()),
            Role::DecidingGuardian,
            ProfileLink::Dependent(DependentId::new()),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn new_account_is_active_without_credential() {
        let account = Account::new("parent", Some(String::new()), Role::DecidingGuardian, ProfileLink::None)
            .unwrap();
        assert!(account.is_active());
        assert_eq!(account.password_hash(), None);
        assert_eq!(account.email(), None, "blank email normalizes to none");
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let account = Account::restore(
            AccountId::new(),
            "superadmin".into(),
            None,
            Some("$2b$hash".into()),
            Role::Admin,
            true,
            ProfileLink::None,
        );
        let json = serde_json::to_value(&account).unwrap();
        assert!(json.get("password_hash").is_none());
    }
}
