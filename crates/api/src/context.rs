use lms_auth::{Authority, TokenKind, authority_for};
use lms_core::{Account, AccountId, ProfileLink, Role};

/// Principal context for a request (resolved account + authorities).
///
/// Inserted by the authentication filter into the request's extensions and
/// dropped with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    account_id: AccountId,
    username: String,
    role: Role,
    authorities: Vec<Authority>,
    profile: ProfileLink,
    origin: TokenKind,
}

impl PrincipalContext {
    pub fn from_account(account: &Account, origin: TokenKind) -> Self {
        Self {
            account_id: account.id(),
            username: account.username().to_string(),
            role: account.role(),
            authorities: vec![authority_for(account.role())],
            profile: account.profile(),
            origin,
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn authorities(&self) -> &[Authority] {
        &self.authorities
    }

    pub fn profile(&self) -> ProfileLink {
        self.profile
    }

    pub fn origin(&self) -> TokenKind {
        self.origin
    }
}
