//! Response views. Never carry password hashes.

use serde::Serialize;

use lms_auth::{Authority, TokenKind};
use lms_core::{
    Account, AccountId, Dependent, DependentId, Guardian, GuardianId, GuardianType, ProfileLink,
    Role,
};

use crate::context::PrincipalContext;

#[derive(Debug, Serialize)]
pub struct PrincipalView {
    pub account_id: AccountId,
    pub username: String,
    pub role: Role,
    pub authorities: Vec<Authority>,
    pub profile: ProfileLink,
    pub origin: TokenKind,
}

impl From<&PrincipalContext> for PrincipalView {
    fn from(p: &PrincipalContext) -> Self {
        Self {
            account_id: p.account_id(),
            username: p.username().to_string(),
            role: p.role(),
            authorities: p.authorities().to_vec(),
            profile: p.profile(),
            origin: p.origin(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountView {
    pub id: AccountId,
    pub username: String,
    pub email: Option<String>,
    pub role: Role,
    pub active: bool,
    pub profile: ProfileLink,
}

impl From<&Account> for AccountView {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id(),
            username: a.username().to_string(),
            email: a.email().map(str::to_string),
            role: a.role(),
            active: a.is_active(),
            profile: a.profile(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GuardianView {
    pub id: GuardianId,
    pub external_id: i64,
    pub login_name: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub guardian_type: GuardianType,
}

impl From<Guardian> for GuardianView {
    fn from(g: Guardian) -> Self {
        Self {
            id: g.id,
            external_id: g.external_id,
            login_name: g.login_name,
            name: g.name,
            email: g.email,
            gender: g.gender,
            guardian_type: g.guardian_type,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DependentView {
    pub id: DependentId,
    pub external_id: i64,
    pub login_name: String,
    pub name: Option<String>,
    pub case_number: Option<String>,
    pub gender: Option<String>,
}

impl From<Dependent> for DependentView {
    fn from(d: Dependent) -> Self {
        Self {
            id: d.id,
            external_id: d.external_id,
            login_name: d.login_name,
            name: d.name,
            case_number: d.case_number,
            gender: d.gender,
        }
    }
}

/// A dependent with the guardian it belongs to.
#[derive(Debug, Serialize)]
pub struct DependentProfileView {
    pub dependent: DependentView,
    pub guardian: Option<GuardianView>,
}
