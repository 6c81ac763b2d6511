//! HTTP application wiring (Axum router + identity store selection).
//!
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: response views
//! - `errors.rs`: JSON rejection bodies shared by middleware and handlers
//!
//! Request pipeline: authentication filter, then route gate, then handler.

use std::sync::Arc;

use anyhow::Context;
use axum::{Extension, Router, middleware::from_fn_with_state};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tracing::info;

use lms_auth::{ClaimExtractor, HmacTokenVerifier, InternalTokenRecognizer, RouteTable};
use lms_infra::{
    BootstrapSettings, IdentityResolver, IdentityStore, InMemoryIdentityStore,
    PostgresIdentityStore, bootstrap,
};

use crate::authz;
use crate::config::GatewayConfig;
use crate::middleware::{self, AuthState};

pub mod dto;
pub mod errors;
pub mod routes;

/// Shared handles for handlers.
pub struct AppServices {
    pub store: Arc<dyn IdentityStore>,
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Uses Postgres when `DATABASE_URL` is configured, otherwise an in-memory store.
pub async fn build_app(config: &GatewayConfig) -> anyhow::Result<Router> {
    let store: Arc<dyn IdentityStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("connecting to DATABASE_URL")?;
            let store = PostgresIdentityStore::new(pool);
            store.migrate().await.context("applying identity schema")?;
            info!("using postgres identity store");
            Arc::new(store)
        }
        None => {
            info!("DATABASE_URL not set; using in-memory identity store");
            Arc::new(InMemoryIdentityStore::new())
        }
    };

    build_app_with_store(config, store).await
}

/// Seed the role catalog and admin account, then build the router.
pub async fn build_app_with_store(
    config: &GatewayConfig,
    store: Arc<dyn IdentityStore>,
) -> anyhow::Result<Router> {
    let settings = BootstrapSettings {
        admin_username: config.admin_principal.clone(),
        admin_email: config.admin_email.clone(),
    };
    bootstrap(store.as_ref(), &settings).await?;
    Ok(build_router(config, store))
}

/// Router over an already-prepared store.
pub fn build_router(config: &GatewayConfig, store: Arc<dyn IdentityStore>) -> Router {
    let auth_state = AuthState {
        verifier: Arc::new(HmacTokenVerifier::new(&config.secret)),
        recognizer: Arc::new(InternalTokenRecognizer::new(config.admin_principal.clone())),
        extractor: ClaimExtractor::new(),
        resolver: IdentityResolver::new(Arc::clone(&store)),
    };
    let routes = Arc::new(RouteTable::default_rules());
    let services = Arc::new(AppServices { store });

    // ServiceBuilder order: filter, then gate.
    routes::router()
        .layer(Extension(services))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(auth_state, middleware::auth_middleware))
                .layer(from_fn_with_state(routes, authz::route_gate)),
        )
}
