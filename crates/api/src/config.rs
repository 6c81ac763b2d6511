use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use tracing::warn;

use lms_auth::TokenSecret;

const DEV_SECRET: &str = "dev-secret";

/// Gateway configuration sourced from environment variables.
///
/// Loaded once at process start; immutable afterwards.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub secret: TokenSecret,
    pub admin_principal: String,
    pub admin_email: Option<String>,
    /// Postgres when set, in-memory store otherwise.
    pub database_url: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_addr = lookup("LMS_BIND")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse LMS_BIND")?;

        let secret = match lookup("JWT_SECRET") {
            Some(s) if s.is_empty() => bail!("JWT_SECRET is set but empty"),
            Some(s) => s,
            None => {
                warn!("JWT_SECRET not set; using insecure dev default");
                DEV_SECRET.to_string()
            }
        };
        if secret.len() < 32 {
            warn!(len = secret.len(), "JWT_SECRET is shorter than 32 bytes");
        }

        let admin_principal = lookup("LMS_ADMIN_PRINCIPAL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "superadmin".to_string());
        let admin_email = lookup("LMS_ADMIN_EMAIL")
            .unwrap_or_else(|| "superadmin@localhost".to_string());
        let admin_email = Some(admin_email).filter(|s| !s.trim().is_empty());
        let database_url = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty());

        Ok(Self {
            bind_addr,
            secret: TokenSecret::new(secret),
            admin_principal,
            admin_email,
            database_url,
        })
    }

    /// In-memory configuration with the given secret (tests, local demos).
    pub fn in_memory(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            secret: TokenSecret::new(secret),
            admin_principal: "superadmin".to_string(),
            admin_email: Some("superadmin@localhost".to_string()),
            database_url: None,
        }
    }
}
