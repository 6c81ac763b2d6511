//! Authentication filter.
//!
//! Per request:
//!
//! - no bearer token: pass through unauthenticated (the route gate decides);
//! - token present: verify, branch internal/external, resolve the account,
//!   check it is active, attach a [`PrincipalContext`];
//! - any failure: reject with 401 (500 for store failures) before routing.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, Request, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use lms_auth::{AuthError, ClaimExtractor, InternalTokenRecognizer, TokenKind, TokenVerifier};
use lms_infra::{IdentityResolver, IdentityStore, ResolveError};

use crate::app::errors::GatewayRejection;
use crate::context::PrincipalContext;

const BEARER: &str = "Bearer ";

/// Immutable collaborators shared by every request.
#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<dyn TokenVerifier>,
    pub recognizer: Arc<InternalTokenRecognizer>,
    pub extractor: ClaimExtractor,
    pub resolver: IdentityResolver,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_token(req.headers(), req.uri()) else {
        return next.run(req).await;
    };

    match authenticate(&state, &token, Utc::now()).await {
        Ok(principal) => {
            debug!(
                username = principal.username(),
                role = %principal.role(),
                origin = ?principal.origin(),
                "authenticated"
            );
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(rejection) => {
            rejection.log();
            rejection.into_response()
        }
    }
}

async fn authenticate(
    state: &AuthState,
    token: &str,
    now: DateTime<Utc>,
) -> Result<PrincipalContext, GatewayRejection> {
    let verified = state.verifier.verify(token, now)?;
    let origin = state.recognizer.classify(&verified);

    let account = match origin {
        TokenKind::Internal => {
            let username = verified.subject().to_string();
            state
                .resolver
                .store()
                .find_account_by_username(&username)
                .await
                .map_err(ResolveError::from)?
                .ok_or(AuthError::PrincipalLookupFailure(username))?
        }
        TokenKind::External => {
            let payload = state.extractor.extract(verified)?;
            state.resolver.resolve(&payload).await?
        }
    };

    if !account.is_active() {
        return Err(AuthError::AccountDisabled(account.username().to_string()).into());
    }

    Ok(PrincipalContext::from_account(&account, origin))
}

/// `Authorization: Bearer <token>`; the `token` query parameter is read only
/// when the header is absent or blank.
fn extract_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.trim().is_empty());

    let raw = match header {
        Some(header) => header.to_string(),
        None => {
            let Ok(Query(mut params)) = Query::<HashMap<String, String>>::try_from_uri(uri) else {
                warn!("unparseable query string; ignoring token parameter");
                return None;
            };
            params.remove("token")?
        }
    };

    raw.strip_prefix(BEARER)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(auth).unwrap(),
        );
        headers
    }

    #[test]
    fn bearer_header_is_used() {
        let uri: Uri = "/api/v1/me".parse().unwrap();
        assert_eq!(extract_token(&headers("Bearer abc"), &uri).as_deref(), Some("abc"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        let uri: Uri = "/api/v1/me".parse().unwrap();
        assert_eq!(extract_token(&headers("Basic abc"), &uri), None);
        assert_eq!(extract_token(&headers("Bearer "), &uri), None);
    }

    #[test]
    fn query_parameter_is_the_fallback() {
        let uri: Uri = "/api/v1/me?token=Bearer%20xyz".parse().unwrap();
        assert_eq!(extract_token(&HeaderMap::new(), &uri).as_deref(), Some("xyz"));

        let header_wins: Uri = "/api/v1/me?token=Bearer%20xyz".parse().unwrap();
        assert_eq!(extract_token(&headers("Bearer abc"), &header_wins).as_deref(), Some("abc"));
    }

    #[test]
    fn non_bearer_header_does_not_fall_back_to_the_query() {
        let uri: Uri = "/api/v1/me?token=Bearer%20xyz".parse().unwrap();
        assert_eq!(extract_token(&headers("Basic abc"), &uri), None);
        assert_eq!(extract_token(&headers("   "), &uri).as_deref(), Some("xyz"));
    }

    #[test]
    fn query_parameter_needs_the_bearer_prefix() {
        let uri: Uri = "/api/v1/me?token=xyz".parse().unwrap();
        assert_eq!(extract_token(&HeaderMap::new(), &uri), None);
    }
}
