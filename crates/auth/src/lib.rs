//! `lms-auth`: token verification and authorization, decoupled from HTTP and storage.
//!
//! Flow for one token: [`TokenVerifier`] checks signature and expiry,
//! [`InternalTokenRecognizer`] picks the internal or external path, and on the
//! external path [`ClaimExtractor`] produces a [`NormalizedTokenPayload`].
//! [`RouteTable`] turns the resolved authorities into an access decision.

pub mod authorize;
pub mod claims;
pub mod error;
pub mod internal;
pub mod roles;
pub mod verifier;

pub use authorize::{AccessDecision, Requirement, RouteRule, RouteTable};
pub use claims::{ClaimExtractor, DependentClaims, GuardianClaims, NormalizedTokenPayload};
pub use error::AuthError;
pub use internal::{InternalTokenRecognizer, TokenKind};
pub use roles::{Authority, authority_for};
pub use verifier::{HmacTokenVerifier, TokenSecret, TokenVerifier, VerifiedClaims};
