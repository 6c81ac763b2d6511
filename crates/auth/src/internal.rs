//! Internal (administrative) token recognition.
//!
//! Internal and external tokens share one structure and one secret. The only
//! discriminator is the verified subject: it equals the reserved internal
//! principal name or it does not. No other claim is consulted, so an external
//! token carrying that exact subject is treated as internal.

use serde::Serialize;

use crate::verifier::VerifiedClaims;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Internal,
    External,
}

#[derive(Debug, Clone)]
pub struct InternalTokenRecognizer {
    reserved_principal: String,
}

impl InternalTokenRecognizer {
    pub fn new(reserved_principal: impl Into<String>) -> Self {
        Self {
            reserved_principal: reserved_principal.into(),
        }
    }

    pub fn reserved_principal(&self) -> &str {
        &self.reserved_principal
    }

    pub fn is_internal(&self, claims: &VerifiedClaims) -> bool {
        claims.subject() == self.reserved_principal
    }

    pub fn classify(&self, claims: &VerifiedClaims) -> TokenKind {
        if self.is_internal(claims) {
            TokenKind::Internal
        } else {
            TokenKind::External
        }
    }
}
