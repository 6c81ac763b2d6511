//! Startup seeding of the role catalog and the reserved administrative account.
//!
//! Safe to run on every start and from several processes at once: existing
//! rows are left alone and a lost creation race counts as already seeded.

use anyhow::Context;
use tracing::{info, instrument};

use lms_core::{Account, ProfileLink, Role, RoleRecord};

use crate::store::{IdentityStore, StoreError};

#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    pub admin_username: String,
    pub admin_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootstrapReport {
    pub roles_created: usize,
    pub admin_created: bool,
}

/// Insert any missing role catalog entries. Returns how many were added.
pub async fn seed_roles(store: &dyn IdentityStore) -> Result<usize, StoreError> {
    let mut missing = Vec::new();
    for role in Role::ALL {
        if store.find_role(role).await?.is_none() {
            missing.push(RoleRecord::new(role));
        }
    }
    if missing.is_empty() {
        return Ok(0);
    }

    let mut tx = store.begin().await?;
    for record in &missing {
        tx.save_role(record).await?;
    }
    tx.commit().await?;
    Ok(missing.len())
}

/// Create the reserved admin account if absent. `Ok(false)` when it already existed.
pub async fn seed_admin(store: &dyn IdentityStore, settings: &BootstrapSettings) -> anyhow::Result<bool> {
    if store.find_account_by_username(&settings.admin_username).await?.is_some() {
        return Ok(false);
    }

    let admin = Account::new(
        settings.admin_username.clone(),
        settings.admin_email.clone(),
        Role::Admin,
        ProfileLink::None,
    )?;

    let mut tx = store.begin().await?;
    let saved = match tx.save_account(&admin).await {
        Ok(()) => tx.commit().await,
        Err(e) => Err(e),
    };
    match saved {
        Ok(()) => Ok(true),
        Err(StoreError::UniqueViolation(detail)) => {
            // Another process won the race, or something else holds the email.
            if store.find_account_by_username(&settings.admin_username).await?.is_some() {
                Ok(false)
            } else {
                Err(StoreError::UniqueViolation(detail).into())
            }
        }
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip(store), fields(admin = %settings.admin_username))]
pub async fn bootstrap(store: &dyn IdentityStore, settings: &BootstrapSettings) -> anyhow::Result<BootstrapReport> {
    let roles_created = seed_roles(store).await.context("seeding role catalog")?;
    let admin_created = seed_admin(store, settings)
        .await
        .with_context(|| format!("seeding admin account {}", settings.admin_username))?;

    let report = BootstrapReport {
        roles_created,
        admin_created,
    };
    info!(roles_created, admin_created, "identity bootstrap complete");
    Ok(report)
}
