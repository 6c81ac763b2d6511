use thiserror::Error;

/// Why a presented token was not accepted.
///
/// `Display` strings are the reasons reported to callers in the 401 body.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Token expired")]
    TokenExpired,

    /// Malformed token or bad signature.
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token missing required claims")]
    MissingRequiredClaim(String),

    #[error("Role not found: {0}")]
    UnknownRole(String),

    /// Internal token whose account no longer exists.
    #[error("User not found for internal token")]
    PrincipalLookupFailure(String),

    #[error("Account disabled")]
    AccountDisabled(String),

    /// Claimed login belongs to an account linked to another profile.
    #[error("Account conflict")]
    AccountConflict(String),
}

impl AuthError {
    pub fn missing(claim: impl Into<String>) -> Self {
        Self::MissingRequiredClaim(claim.into())
    }

    /// Detail for logs; never sent to the caller.
    pub fn detail(&self) -> Option<&str> {
        match self {
            AuthError::MissingRequiredClaim(d)
            | AuthError::UnknownRole(d)
            | AuthError::PrincipalLookupFailure(d)
            | AuthError::AccountDisabled(d)
            | AuthError::AccountConflict(d) => Some(d),
            AuthError::TokenExpired | AuthError::InvalidToken => None,
        }
    }
}
