use axum::{Router, routing::get};

pub mod identity;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/api/v1/me", get(identity::me))
        .route("/api/v1/admin/accounts/:username", get(identity::account_by_username))
        .route("/api/v1/parent/dependents", get(identity::guardian_dependents))
        .route("/api/v1/child/profile", get(identity::dependent_profile))
}
