use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use lms_auth::AuthError;
use lms_infra::ResolveError;

/// Why a request was stopped before (or instead of) its handler.
#[derive(Debug)]
pub enum GatewayRejection {
    /// Token present but not acceptable.
    Unauthorized(AuthError),
    /// Protected path, no token.
    Unauthenticated,
    Forbidden,
    /// Identity store failure during resolution.
    Internal(String),
}

impl GatewayRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayRejection::Unauthorized(_) | GatewayRejection::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
            GatewayRejection::Forbidden => StatusCode::FORBIDDEN,
            GatewayRejection::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            GatewayRejection::Unauthorized(err) => err.to_string(),
            GatewayRejection::Unauthenticated => "Authentication required".to_string(),
            GatewayRejection::Forbidden => "Access denied".to_string(),
            GatewayRejection::Internal(_) => "Identity resolution failed".to_string(),
        }
    }

    pub fn log(&self) {
        match self {
            GatewayRejection::Unauthorized(err) => {
                warn!(reason = %err, detail = ?err.detail(), "token rejected")
            }
            GatewayRejection::Internal(detail) => error!(%detail, "identity resolution failed"),
            GatewayRejection::Unauthenticated | GatewayRejection::Forbidden => {}
        }
    }
}

impl From<AuthError> for GatewayRejection {
    fn from(err: AuthError) -> Self {
        GatewayRejection::Unauthorized(err)
    }
}

impl From<ResolveError> for GatewayRejection {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Auth(err) => GatewayRejection::Unauthorized(err),
            ResolveError::Domain(_) => GatewayRejection::Unauthorized(AuthError::InvalidToken),
            ResolveError::Persistence(err) => GatewayRejection::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for GatewayRejection {
    fn into_response(self) -> Response {
        json_rejection(self.status(), self.message())
    }
}

/// `{"success": false, "message": ...}`
pub fn json_rejection(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// `{"success": true, "message": ..., "data": ...}`
pub fn json_ok<T: Serialize>(message: &str, data: T) -> Response {
    (
        StatusCode::OK,
        axum::Json(json!({
            "success": true,
            "message": message,
            "data": data,
        })),
    )
        .into_response()
}

pub fn not_found(message: impl Into<String>) -> Response {
    json_rejection(StatusCode::NOT_FOUND, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_core::DomainError;
    use lms_infra::StoreError;

    #[test]
    fn auth_errors_are_401_with_their_message() {
        let rejection = GatewayRejection::from(AuthError::TokenExpired);
        assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(rejection.message(), "Token expired");

        let rejection = GatewayRejection::from(ResolveError::Auth(AuthError::UnknownRole(
            "TUTOR".into(),
        )));
        assert_eq!(rejection.message(), "Role not found: TUTOR");
    }

    #[test]
    fn store_failures_are_500_without_leaking_detail() {
        let rejection = GatewayRejection::from(ResolveError::Persistence(StoreError::Database(
            "connection reset".into(),
        )));
        assert_eq!(rejection.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(rejection.message(), "Identity resolution failed");
    }

    #[test]
    fn domain_failures_read_as_invalid_tokens() {
        let rejection =
            GatewayRejection::from(ResolveError::Domain(DomainError::validation("username")));
        assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(rejection.message(), "Invalid token");
    }

    #[test]
    fn gate_rejections() {
        assert_eq!(GatewayRejection::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayRejection::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(GatewayRejection::Forbidden.message(), "Access denied");
    }
}
