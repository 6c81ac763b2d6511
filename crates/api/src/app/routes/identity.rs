use std::sync::Arc;

use axum::{
    Extension,
    extract::Path,
    http::StatusCode,
    response::Response,
};
use tracing::error;

use lms_core::ProfileLink;
use lms_infra::{IdentityStore, StoreError};

use crate::app::AppServices;
use crate::app::dto::{AccountView, DependentProfileView, DependentView, GuardianView, PrincipalView};
use crate::app::errors::{json_ok, json_rejection, not_found};
use crate::context::PrincipalContext;

fn store_failure(err: StoreError) -> Response {
    error!(error = %err, "identity store read failed");
    json_rejection(StatusCode::INTERNAL_SERVER_ERROR, "Identity store unavailable")
}

pub async fn me(Extension(principal): Extension<PrincipalContext>) -> Response {
    json_ok("Authenticated", PrincipalView::from(&principal))
}

pub async fn account_by_username(
    Extension(services): Extension<Arc<AppServices>>,
    Path(username): Path<String>,
) -> Response {
    match services.store.find_account_by_username(&username).await {
        Ok(Some(account)) => json_ok("Account found", AccountView::from(&account)),
        Ok(None) => not_found(format!("Account not found: {username}")),
        Err(err) => store_failure(err),
    }
}

pub async fn guardian_dependents(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    let ProfileLink::Guardian(guardian_id) = principal.profile() else {
        return not_found("No guardian profile linked to this account");
    };
    match services.store.find_all_dependents_by_guardian_id(guardian_id).await {
        Ok(dependents) => {
            let views: Vec<DependentView> = dependents.into_iter().map(DependentView::from).collect();
            json_ok("Dependents", views)
        }
        Err(err) => store_failure(err),
    }
}

pub async fn dependent_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    let ProfileLink::Dependent(dependent_id) = principal.profile() else {
        return not_found("No dependent profile linked to this account");
    };
    let dependent = match services.store.find_dependent(dependent_id).await {
        Ok(Some(dependent)) => dependent,
        Ok(None) => return not_found("Dependent profile not found"),
        Err(err) => return store_failure(err),
    };
    let guardian = match services.store.find_guardian(dependent.guardian_id).await {
        Ok(guardian) => guardian.map(GuardianView::from),
        Err(err) => return store_failure(err),
    };
    json_ok(
        "Dependent profile",
        DependentProfileView {
            dependent: DependentView::from(dependent),
            guardian,
        },
    )
}
