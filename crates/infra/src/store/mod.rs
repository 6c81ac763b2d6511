//! Identity persistence collaborators.
//!
//! The provisioning resolver talks to storage only through these traits.
//!
//! ## Reads vs. writes
//!
//! [`IdentityStore`] offers committed reads and opens transactions. All writes
//! go through an [`IdentityTransaction`], which groups one provisioning write
//! unit (a profile plus its account) so it commits or rolls back as a whole.
//! Dropping a transaction without calling `commit` discards its writes.
//!
//! ## Uniqueness
//!
//! Implementations must enforce, at commit time at the latest:
//!
//! - one guardian per `external_id`
//! - one dependent per `external_id`
//! - one account per `username`, and per non-null `email`
//!
//! and report a breach as [`StoreError::UniqueViolation`]. That is the only
//! error the resolver retries. A dependent referencing a missing guardian, or
//! an account referencing a missing profile or role, is a
//! [`StoreError::ForeignKeyViolation`].
//!
//! Saves are upserts keyed by the record's own id. An account's `username` is
//! never rewritten by a save.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use lms_core::{Account, Dependent, DependentId, Guardian, GuardianId, Role, RoleRecord};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryIdentityStore;
pub use postgres::PostgresIdentityStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),

    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be turned back into a domain record.
    #[error("corrupt row: {0}")]
    Decode(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

/// Committed reads plus transaction entry point.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Role catalog lookup.
    async fn find_role(&self, role: Role) -> Result<Option<RoleRecord>, StoreError>;

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError>;

    async fn find_guardian(&self, id: GuardianId) -> Result<Option<Guardian>, StoreError>;

    async fn find_guardian_by_external_id(&self, external_id: i64) -> Result<Option<Guardian>, StoreError>;

    async fn find_dependent(&self, id: DependentId) -> Result<Option<Dependent>, StoreError>;

    async fn find_dependent_by_external_id(&self, external_id: i64) -> Result<Option<Dependent>, StoreError>;

    /// Dependents owned by a guardian, ordered by login name.
    async fn find_all_dependents_by_guardian_id(
        &self,
        guardian_id: GuardianId,
    ) -> Result<Vec<Dependent>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn IdentityTransaction>, StoreError>;
}

/// One unit of work. Reads observe the transaction's own writes.
#[async_trait]
pub trait IdentityTransaction: Send {
    async fn find_account_by_username(&mut self, username: &str) -> Result<Option<Account>, StoreError>;

    async fn find_guardian_by_external_id(&mut self, external_id: i64) -> Result<Option<Guardian>, StoreError>;

    async fn find_dependent_by_external_id(&mut self, external_id: i64) -> Result<Option<Dependent>, StoreError>;

    async fn save_role(&mut self, record: &RoleRecord) -> Result<(), StoreError>;

    async fn save_guardian(&mut self, guardian: &Guardian) -> Result<(), StoreError>;

    async fn save_dependent(&mut self, dependent: &Dependent) -> Result<(), StoreError>;

    async fn save_account(&mut self, account: &Account) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> IdentityStore for Arc<S>
where
    S: IdentityStore + ?Sized,
{
    async fn find_role(&self, role: Role) -> Result<Option<RoleRecord>, StoreError> {
        (**self).find_role(role).await
    }

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        (**self).find_account_by_username(username).await
    }

    async fn find_guardian(&self, id: GuardianId) -> Result<Option<Guardian>, StoreError> {
        (**self).find_guardian(id).await
    }

    async fn find_guardian_by_external_id(&self, external_id: i64) -> Result<Option<Guardian>, StoreError> {
        (**self).find_guardian_by_external_id(external_id).await
    }

    async fn find_dependent(&self, id: DependentId) -> Result<Option<Dependent>, StoreError> {
        (**self).find_dependent(id).await
    }

    async fn find_dependent_by_external_id(&self, external_id: i64) -> Result<Option<Dependent>, StoreError> {
        (**self).find_dependent_by_external_id(external_id).await
    }

    async fn find_all_dependents_by_guardian_id(
        &self,
        guardian_id: GuardianId,
    ) -> Result<Vec<Dependent>, StoreError> {
        (**self).find_all_dependents_by_guardian_id(guardian_id).await
    }

    async fn begin(&self) -> Result<Box<dyn IdentityTransaction>, StoreError> {
        (**self).begin().await
    }
}
