//! External claim extraction.
//!
//! Federated tokens come in two historical shapes:
//!
//! - a flat `role` string plus nested `child` / `parent` objects;
//! - a `roles` list claim (JSON array, or one comma-separated string).
//!
//! Nested objects are parsed here, once, into [`GuardianClaims`] and
//! [`DependentClaims`]. Ids are accepted as JSON numbers or numeric strings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use lms_core::{GuardianType, Role};

use crate::error::AuthError;
use crate::verifier::VerifiedClaims;

/// Guardian attributes from the `parent` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardianClaims {
    pub id: i64,
    pub user_name: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    /// Raw `type` claim; see [`GuardianClaims::guardian_type`].
    pub kind: Option<String>,
}

impl GuardianClaims {
    pub fn from_claim(value: &Value) -> Result<Self, AuthError> {
        let obj = as_object(value, "parent")?;
        Ok(Self {
            id: external_id(obj, "parent.id")?,
            user_name: text(obj, "userName").ok_or_else(|| AuthError::missing("parent.userName"))?,
            name: text(obj, "name"),
            email: text(obj, "email"),
            gender: text(obj, "gender"),
            kind: text(obj, "type"),
        })
    }

    pub fn guardian_type(&self) -> GuardianType {
        GuardianType::from_claim(self.kind.as_deref())
    }
}

/// Dependent attributes from the `child` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependentClaims {
    pub id: i64,
    pub user_name: String,
    pub name: Option<String>,
    pub case_number: Option<String>,
    pub gender: Option<String>,
}

impl DependentClaims {
    pub fn from_claim(value: &Value) -> Result<Self, AuthError> {
        let obj = as_object(value, "child")?;
        Ok(Self {
            id: external_id(obj, "child.id")?,
            user_name: text(obj, "userName").ok_or_else(|| AuthError::missing("child.userName"))?,
            name: text(obj, "name"),
            case_number: text(obj, "caseNumber"),
            gender: text(obj, "gender"),
        })
    }
}

/// Per-request view of an external token, ready for identity resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTokenPayload {
    /// Dependent id when present, else guardian id.
    pub identity_id: i64,
    pub subject: String,
    pub role: Role,
    pub email: Option<String>,
    pub guardian: Option<GuardianClaims>,
    pub dependent: Option<DependentClaims>,
    pub claims: Map<String, Value>,
    pub expires_at: DateTime<Utc>,
}

impl NormalizedTokenPayload {
    /// Gender preferring the dependent's, as profiles are shown per caller.
    pub fn gender(&self) -> Option<&str> {
        self.dependent
            .as_ref()
            .and_then(|d| d.gender.as_deref())
            .or_else(|| self.guardian.as_ref().and_then(|g| g.gender.as_deref()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ClaimExtractor;

impl ClaimExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, verified: VerifiedClaims) -> Result<NormalizedTokenPayload, AuthError> {
        let subject = verified.subject().to_string();
        let expires_at = verified.expires_at();
        let claims = verified.into_claims();

        let role = role_of(&claims)?;
        if role == Role::Admin {
            return Err(AuthError::UnknownRole(role.wire_name().to_string()));
        }

        let dependent = present(&claims, "child")
            .map(DependentClaims::from_claim)
            .transpose()?;
        let guardian = present(&claims, "parent")
            .map(GuardianClaims::from_claim)
            .transpose()?;

        if guardian.is_none() {
            return Err(AuthError::missing("parent"));
        }
        if role == Role::Dependent && dependent.is_none() {
            return Err(AuthError::missing("child"));
        }

        let identity_id = dependent
            .as_ref()
            .map(|d| d.id)
            .or_else(|| guardian.as_ref().map(|g| g.id))
            .ok_or_else(|| AuthError::missing("child.id"))?;
        let email = guardian.as_ref().and_then(|g| g.email.clone());

        Ok(NormalizedTokenPayload {
            identity_id,
            subject,
            role,
            email,
            guardian,
            dependent,
            claims,
            expires_at,
        })
    }
}

/// `role` wins over `roles`. From a list, the first recognised name is used.
fn role_of(claims: &Map<String, Value>) -> Result<Role, AuthError> {
    if let Some(name) = claims.get("role").and_then(Value::as_str).map(str::trim) {
        if !name.is_empty() {
            return name.parse().map_err(|_| AuthError::UnknownRole(name.to_string()));
        }
    }

    let names = string_list(claims.get("roles"));
    if names.is_empty() {
        return Err(AuthError::missing("role"));
    }
    names
        .iter()
        .find_map(|n| n.parse::<Role>().ok())
        .ok_or_else(|| AuthError::UnknownRole(names.join(",")))
}

fn string_list(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn present<'a>(claims: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    claims.get(name).filter(|v| !v.is_null())
}

fn as_object<'a>(value: &'a Value, name: &str) -> Result<&'a Map<String, Value>, AuthError> {
    value.as_object().ok_or_else(|| AuthError::missing(name))
}

fn scalar_text(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(scalar_text)
}

fn external_id(obj: &Map<String, Value>, name: &str) -> Result<i64, AuthError> {
    let id = match obj.get("id") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    id.ok_or_else(|| AuthError::missing(name))
}
