//! Route gate: applies the [`RouteTable`] before any handler runs.
//!
//! Runs inside the authentication filter, so a principal (if any) is
//! already in the request extensions.

use std::sync::Arc;

use axum::{
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use lms_auth::{AccessDecision, RouteTable};

use crate::app::errors::GatewayRejection;
use crate::context::PrincipalContext;

pub async fn route_gate(
    State(routes): State<Arc<RouteTable>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let authorities = req
        .extensions()
        .get::<PrincipalContext>()
        .map(PrincipalContext::authorities);
    let decision = routes.evaluate(req.uri().path(), authorities);

    match decision {
        AccessDecision::Permit => next.run(req).await,
        AccessDecision::Unauthenticated => GatewayRejection::Unauthenticated.into_response(),
        AccessDecision::Forbidden => {
            debug!(path = req.uri().path(), "access denied");
            GatewayRejection::Forbidden.into_response()
        }
    }
}
