//! Just-in-time identity provisioning.
//!
//! [`IdentityResolver::resolve`] maps a [`NormalizedTokenPayload`] to the local
//! [`Account`] the request authenticates as, creating guardian, dependent and
//! account rows the first time an external identity is seen.
//!
//! ## Strategies
//!
//! The resolved role selects a strategy from a fixed table:
//!
//! | Role | Strategy | Returns |
//! |------|----------|---------|
//! | `CHILD` | guardian unit, then dependent unit | dependent account |
//! | `DECIDING_PARENT` / `NON_DECIDING_PARENT` | guardian unit, then dependent unit if a `child` claim is present | guardian account |
//! | `ADMIN` | none (`UnknownRole`) | - |
//!
//! ## Write units
//!
//! Each unit (a profile plus its account) runs in one store transaction. The
//! guardian unit always commits before the dependent unit starts, so a
//! dependent never references a guardian that is not persisted.
//!
//! Profiles are upserted by external id and refreshed from the claims on
//! every call; a save is issued only when something changed. Accounts are
//! created when missing and otherwise left untouched. An existing account is
//! only reused when it is linked to the profile being provisioned; any other
//! account under the claimed login (the admin included) is an
//! [`AuthError::AccountConflict`].
//!
//! ## Races
//!
//! Concurrent first logins for the same identity are resolved by the store's
//! unique constraints: the losing unit gets a
//! [`StoreError::UniqueViolation`], is rolled back, and is run once more
//! against the now-committed rows. A second conflict is returned as fatal.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use lms_auth::{AuthError, DependentClaims, GuardianClaims, NormalizedTokenPayload};
use lms_core::{
    Account, Dependent, DomainError, Guardian, GuardianId, GuardianType, ProfileLink, Role,
};

use crate::store::{IdentityStore, IdentityTransaction, StoreError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type Strategy = for<'a> fn(
    &'a IdentityResolver,
    &'a NormalizedTokenPayload,
) -> BoxFuture<'a, Result<Account, ResolveError>>;

const STRATEGIES: &[(Role, Strategy)] = &[
    (Role::Dependent, dependent_strategy as Strategy),
    (Role::DecidingGuardian, guardian_strategy as Strategy),
    (Role::NonDecidingGuardian, guardian_strategy as Strategy),
];

fn dependent_strategy<'a>(
    resolver: &'a IdentityResolver,
    payload: &'a NormalizedTokenPayload,
) -> BoxFuture<'a, Result<Account, ResolveError>> {
    Box::pin(resolver.provision_dependent(payload))
}

fn guardian_strategy<'a>(
    resolver: &'a IdentityResolver,
    payload: &'a NormalizedTokenPayload,
) -> BoxFuture<'a, Result<Account, ResolveError>> {
    Box::pin(resolver.provision_guardian(payload))
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    #[instrument(
        skip(self, payload),
        fields(role = %payload.role, identity_id = payload.identity_id, subject = %payload.subject),
        err
    )]
    pub async fn resolve(&self, payload: &NormalizedTokenPayload) -> Result<Account, ResolveError> {
        if self.store.find_role(payload.role).await?.is_none() {
            return Err(AuthError::UnknownRole(payload.role.to_string()).into());
        }

        let strategy = STRATEGIES
            .iter()
            .find(|(role, _)| *role == payload.role)
            .map(|(_, strategy)| *strategy)
            .ok_or_else(|| AuthError::UnknownRole(payload.role.to_string()))?;

        strategy(self, payload).await
    }

    async fn provision_dependent(&self, payload: &NormalizedTokenPayload) -> Result<Account, ResolveError> {
        let guardian_claims = payload.guardian.as_ref().ok_or_else(|| AuthError::missing("parent"))?;
        let dependent_claims = payload.dependent.as_ref().ok_or_else(|| AuthError::missing("child"))?;

        // The guardian login is provisioned with decision rights whatever the
        // profile's own type says.
        let (guardian, _) = self
            .run_unit(&GuardianUnit {
                claims: guardian_claims,
                guardian_type: guardian_claims.guardian_type(),
                account_role: Role::DecidingGuardian,
            })
            .await?;

        let (_, account) = self
            .run_unit(&DependentUnit {
                claims: dependent_claims,
                guardian_id: guardian.id,
            })
            .await?;
        Ok(account)
    }

    async fn provision_guardian(&self, payload: &NormalizedTokenPayload) -> Result<Account, ResolveError> {
        let guardian_claims = payload.guardian.as_ref().ok_or_else(|| AuthError::missing("parent"))?;
        let guardian_type = GuardianType::for_role(payload.role)
            .ok_or_else(|| AuthError::UnknownRole(payload.role.to_string()))?;

        let (guardian, account) = self
            .run_unit(&GuardianUnit {
                claims: guardian_claims,
                guardian_type,
                account_role: payload.role,
            })
            .await?;

        if let Some(dependent_claims) = payload.dependent.as_ref() {
            self.run_unit(&DependentUnit {
                claims: dependent_claims,
                guardian_id: guardian.id,
            })
            .await?;
        }
        Ok(account)
    }

    /// Run a unit, re-running it once after a unique violation.
    async fn run_unit<U: WriteUnit>(&self, unit: &U) -> Result<U::Output, ResolveError> {
        match self.run_once(unit).await {
            Err(ResolveError::Persistence(StoreError::UniqueViolation(detail))) => {
                warn!(unit = unit.name(), %detail, "unique violation while provisioning; retrying once");
                self.run_once(unit).await.inspect_err(|e| {
                    error!(unit = unit.name(), error = %e, "provisioning failed after retry");
                })
            }
            Err(e @ ResolveError::Persistence(_)) => {
                error!(unit = unit.name(), error = %e, "provisioning failed");
                Err(e)
            }
            other => other,
        }
    }

    async fn run_once<U: WriteUnit>(&self, unit: &U) -> Result<U::Output, ResolveError> {
        let mut tx = self.store.begin().await?;
        match unit.apply(tx.as_mut()).await {
            Ok(output) => {
                tx.commit().await?;
                Ok(output)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(unit = unit.name(), error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// A group of writes that must commit together.
#[async_trait]
trait WriteUnit: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    async fn apply(&self, tx: &mut dyn IdentityTransaction) -> Result<Self::Output, ResolveError>;
}

/// Guardian profile plus the guardian's account.
///
/// The account email is taken from `parent.email` at creation only; later
/// refreshes update the guardian row.
struct GuardianUnit<'a> {
    claims: &'a GuardianClaims,
    guardian_type: GuardianType,
    account_role: Role,
}

#[async_trait]
impl<'a> WriteUnit for GuardianUnit<'a> {
    type Output = (Guardian, Account);

    fn name(&self) -> &'static str {
        "guardian"
    }

    async fn apply(&self, tx: &mut dyn IdentityTransaction) -> Result<Self::Output, ResolveError> {
        let claims = self.claims;

        let guardian = match tx.find_guardian_by_external_id(claims.id).await? {
            Some(existing) => {
                let refreshed = refresh_guardian(existing.clone(), claims, self.guardian_type);
                if refreshed != existing {
                    tx.save_guardian(&refreshed).await?;
                    debug!(external_id = claims.id, "refreshed guardian");
                }
                refreshed
            }
            None => {
                let created = refresh_guardian(
                    Guardian::new(claims.id, &claims.user_name)?,
                    claims,
                    self.guardian_type,
                );
                tx.save_guardian(&created).await?;
                info!(external_id = claims.id, guardian_id = %created.id, "provisioned guardian");
                created
            }
        };

        let account = match tx.find_account_by_username(&claims.user_name).await? {
            Some(account) => owned_by(account, ProfileLink::Guardian(guardian.id))?,
            None => {
                let account = Account::new(
                    claims.user_name.clone(),
                    claims.email.clone(),
                    self.account_role,
                    ProfileLink::Guardian(guardian.id),
                )?;
                tx.save_account(&account).await?;
                info!(username = %account.username(), role = %account.role(), "provisioned guardian account");
                account
            }
        };

        Ok((guardian, account))
    }
}

/// Dependent profile, linked to its guardian, plus the dependent's account.
struct DependentUnit<'a> {
    claims: &'a DependentClaims,
    guardian_id: GuardianId,
}

#[async_trait]
impl<'a> WriteUnit for DependentUnit<'a> {
    type Output = (Dependent, Account);

    fn name(&self) -> &'static str {
        "dependent"
    }

    async fn apply(&self, tx: &mut dyn IdentityTransaction) -> Result<Self::Output, ResolveError> {
        let claims = self.claims;

        let dependent = match tx.find_dependent_by_external_id(claims.id).await? {
            Some(existing) => {
                let refreshed = refresh_dependent(existing.clone(), claims, self.guardian_id);
                if refreshed != existing {
                    tx.save_dependent(&refreshed).await?;
                    debug!(external_id = claims.id, "refreshed dependent");
                }
                refreshed
            }
            None => {
                let created = refresh_dependent(
                    Dependent::new(claims.id, &claims.user_name, self.guardian_id)?,
                    claims,
                    self.guardian_id,
                );
                tx.save_dependent(&created).await?;
                info!(external_id = claims.id, dependent_id = %created.id, "provisioned dependent");
                created
            }
        };

        let account = match tx.find_account_by_username(&claims.user_name).await? {
            Some(account) => owned_by(account, ProfileLink::Dependent(dependent.id))?,
            None => {
                let account = Account::new(
                    claims.user_name.clone(),
                    None,
                    Role::Dependent,
                    ProfileLink::Dependent(dependent.id),
                )?;
                tx.save_account(&account).await?;
                info!(username = %account.username(), "provisioned dependent account");
                account
            }
        };

        Ok((dependent, account))
    }
}

/// Reuse `account` only if it is the login of `profile`.
fn owned_by(account: Account, profile: ProfileLink) -> Result<Account, ResolveError> {
    if account.role() == Role::Admin || account.profile() != profile {
        warn!(
            username = %account.username(),
            role = %account.role(),
            "claimed login belongs to another profile"
        );
        return Err(AuthError::AccountConflict(account.username().to_string()).into());
    }
    Ok(account)
}

fn refresh_guardian(mut guardian: Guardian, claims: &GuardianClaims, guardian_type: GuardianType) -> Guardian {
    guardian.name = claims.name.clone();
    guardian.login_name = claims.user_name.clone();
    guardian.email = claims.email.clone();
    guardian.gender = claims.gender.clone();
    guardian.guardian_type = guardian_type;
    guardian
}

fn refresh_dependent(mut dependent: Dependent, claims: &DependentClaims, guardian_id: GuardianId) -> Dependent {
    dependent.guardian_id = guardian_id;
    dependent.name = claims.name.clone();
    dependent.login_name = claims.user_name.clone();
    dependent.case_number = claims.case_number.clone();
    dependent.gender = claims.gender.clone();
    dependent
}
