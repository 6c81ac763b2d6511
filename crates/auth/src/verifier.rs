//! Signature and expiry verification for compact HMAC-signed tokens.
//!
//! One shared secret is configured at process start and injected as a
//! [`TokenSecret`]. The verifier accepts HS256/HS384/HS512, requires `sub`
//! and `exp`, and applies zero leeway.
//!
//! Expiry is checked twice:
//! - before the signature, on an unverified decode, so an expired token is
//!   reported as [`AuthError::TokenExpired`] whatever its signature;
//! - after the verified decode, explicitly against `now` (`exp <= now` is
//!   expired), independent of the library's own check.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::{Map, Value};

use crate::error::AuthError;

const ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// The process-wide HMAC secret. Immutable once built.
#[derive(Clone)]
pub struct TokenSecret(Arc<[u8]>);

impl TokenSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenSecret(<{} bytes>)", self.0.len())
    }
}

/// Claims of a token whose signature and expiry have been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims {
    subject: String,
    expires_at: DateTime<Utc>,
    claims: Map<String, Value>,
}

impl VerifiedClaims {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn into_claims(self) -> Map<String, Value> {
        self.claims
    }
}

/// Token signature/expiry verification contract.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedClaims, AuthError>;
}

impl<V: TokenVerifier + ?Sized> TokenVerifier for Arc<V> {
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedClaims, AuthError> {
        (**self).verify(token, now)
    }
}

/// HMAC verifier over a shared [`TokenSecret`].
pub struct HmacTokenVerifier {
    key: DecodingKey,
    validation: Validation,
    probe: Validation,
}

impl HmacTokenVerifier {
    pub fn new(secret: &TokenSecret) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = ALGORITHMS.to_vec();
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let mut probe = Validation::new(Algorithm::HS256);
        probe.algorithms = ALGORITHMS.to_vec();
        probe.insecure_disable_signature_validation();
        probe.validate_exp = false;
        probe.validate_aud = false;
        probe.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            probe,
        }
    }

    /// Unverified look at `exp`. Only ever used to report expiry early.
    fn expired_before_signature_check(&self, token: &str, now: DateTime<Utc>) -> bool {
        let unverified = match decode::<Map<String, Value>>(token, &DecodingKey::from_secret(&[]), &self.probe) {
            Ok(data) => data.claims,
            Err(_) => return false,
        };
        matches!(expiry_of(&unverified), Some(exp) if exp <= now.timestamp())
    }
}

impl TokenVerifier for HmacTokenVerifier {
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedClaims, AuthError> {
        if self.expired_before_signature_check(token, now) {
            return Err(AuthError::TokenExpired);
        }

        let data = decode::<Map<String, Value>>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "token decode failed");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::MissingRequiredClaim(claim) => AuthError::missing(claim.clone()),
                _ => AuthError::InvalidToken,
            }
        })?;
        let claims = data.claims;

        let exp = expiry_of(&claims).ok_or_else(|| AuthError::missing("exp"))?;
        if exp <= now.timestamp() {
            return Err(AuthError::TokenExpired);
        }
        let expires_at = DateTime::from_timestamp(exp, 0).ok_or(AuthError::InvalidToken)?;

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AuthError::missing("sub"))?
            .to_string();

        Ok(VerifiedClaims {
            subject,
            expires_at,
            claims,
        })
    }
}

fn expiry_of(claims: &Map<String, Value>) -> Option<i64> {
    let exp = claims.get("exp")?;
    exp.as_i64().or_else(|| exp.as_f64().map(|f| f.floor() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const SECRET: &[u8] = b"an-hmac-secret-that-is-long-enough-for-tests";

    fn sign(claims: &Value, secret: &[u8], alg: Algorithm) -> String {
        encode(&Header::new(alg), claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn verifier() -> HmacTokenVerifier {
        HmacTokenVerifier::new(&TokenSecret::new(SECRET))
    }

    #[test]
    fn accepts_valid_token_and_keeps_all_claims() {
        let now = Utc::now();
        let exp = (now + Duration::minutes(5)).timestamp();
        let token = sign(
            &json!({"sub": "abhi123", "exp": exp, "role": "CHILD"}),
            SECRET,
            Algorithm::HS256,
        );

        let verified = verifier().verify(&token, now).unwrap();
        assert_eq!(verified.subject(), "abhi123");
        assert_eq!(verified.expires_at().timestamp(), exp);
        assert_eq!(verified.get("role"), Some(&json!("CHILD")));
    }

    #[test]
    fn accepts_other_hmac_strengths() {
        let now = Utc::now();
        let exp = (now + Duration::minutes(5)).timestamp();
        for alg in [Algorithm::HS384, Algorithm::HS512] {
            let token = sign(&json!({"sub": "a", "exp": exp}), SECRET, alg);
            assert!(verifier().verify(&token, now).is_ok(), "{alg:?}");
        }
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let now = Utc::now();
        let exp = (now + Duration::minutes(5)).timestamp();
        let token = sign(&json!({"sub": "a", "exp": exp}), b"some-other-secret", Algorithm::HS256);
        assert_eq!(verifier().verify(&token, now), Err(AuthError::InvalidToken));
    }

    #[test]
    fn expired_wins_over_bad_signature() {
        let now = Utc::now();
        let exp = (now - Duration::seconds(1)).timestamp();
        let token = sign(&json!({"sub": "a", "exp": exp}), b"some-other-secret", Algorithm::HS256);
        assert_eq!(verifier().verify(&token, now), Err(AuthError::TokenExpired));
    }

    #[test]
    fn expiry_boundary_counts_as_expired() {
        let now = Utc::now();
        let token = sign(&json!({"sub": "a", "exp": now.timestamp()}), SECRET, Algorithm::HS256);
        assert_eq!(verifier().verify(&token, now), Err(AuthError::TokenExpired));
    }

    #[test]
    fn missing_subject_or_expiry_is_reported() {
        let now = Utc::now();
        let exp = (now + Duration::minutes(5)).timestamp();

        let no_sub = sign(&json!({"exp": exp}), SECRET, Algorithm::HS256);
        assert!(matches!(
            verifier().verify(&no_sub, now),
            Err(AuthError::MissingRequiredClaim(_))
        ));

        let no_exp = sign(&json!({"sub": "a"}), SECRET, Algorithm::HS256);
        assert!(matches!(
            verifier().verify(&no_exp, now),
            Err(AuthError::MissingRequiredClaim(_))
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        let now = Utc::now();
        assert_eq!(verifier().verify("not.a.token", now), Err(AuthError::InvalidToken));
        assert_eq!(verifier().verify("", now), Err(AuthError::InvalidToken));
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = TokenSecret::new("super-secret");
        assert_eq!(format!("{secret:?}"), "TokenSecret(<12 bytes>)");
    }
}
