//! Integration tests for concurrent just-in-time provisioning.
//!
//! Tests: NormalizedTokenPayload → IdentityResolver → IdentityStore
//!
//! Verifies:
//! - Concurrent first logins for one identity create exactly one row per table
//! - A single commit conflict is retried and succeeds
//! - A second conflict in the same unit surfaces as a fatal persistence error

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::Map;

    use lms_auth::{DependentClaims, GuardianClaims, NormalizedTokenPayload};
    use lms_core::{Account, Dependent, DependentId, Guardian, GuardianId, Role, RoleRecord};

    use crate::bootstrap::seed_roles;
    use crate::provisioning::{IdentityResolver, ResolveError};
    use crate::store::{IdentityStore, IdentityTransaction, InMemoryIdentityStore, StoreError};

    fn dependent_payload(dependent_id: i64, guardian_id: i64) -> NormalizedTokenPayload {
        NormalizedTokenPayload {
            identity_id: dependent_id,
            subject: format!("kid-{dependent_id}"),
            role: Role::Dependent,
            email: Some(format!("parent-{guardian_id}@example.com")),
            guardian: Some(GuardianClaims {
                id: guardian_id,
                user_name: format!("parent-{guardian_id}"),
                name: Some("Parent".into()),
                email: Some(format!("parent-{guardian_id}@example.com")),
                gender: None,
                kind: None,
            }),
            dependent: Some(DependentClaims {
                id: dependent_id,
                user_name: format!("kid-{dependent_id}"),
                name: Some("Kid".into()),
                case_number: None,
                gender: None,
            }),
            claims: Map::new(),
            expires_at: Utc::now() + Duration::minutes(5),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_logins_create_one_row_per_identity() {
        let store = InMemoryIdentityStore::new();
        seed_roles(&store).await.unwrap();
        let resolver = Arc::new(IdentityResolver::new(Arc::new(store.clone())));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                resolver.resolve(&dependent_payload(12345, 56789)).await
            }));
        }

        let mut account_ids = Vec::new();
        for handle in handles {
            let account = handle.await.unwrap().unwrap();
            account_ids.push(account.id());
        }
        account_ids.dedup();
        assert_eq!(account_ids.len(), 1, "every request resolves to the same account");

        let counts = store.counts().unwrap();
        assert_eq!(counts.guardians, 1);
        assert_eq!(counts.dependents, 1);
        assert_eq!(counts.accounts, 2);

        let dependent = store.find_dependent_by_external_id(12345).await.unwrap().unwrap();
        let guardian = store.find_guardian(dependent.guardian_id).await.unwrap();
        assert!(guardian.is_some(), "dependent never points at a missing guardian");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn siblings_logging_in_together_share_one_guardian() {
        let store = InMemoryIdentityStore::new();
        seed_roles(&store).await.unwrap();
        let resolver = Arc::new(IdentityResolver::new(Arc::new(store.clone())));

        let mut handles = Vec::new();
        for kid in 1..=4 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                resolver.resolve(&dependent_payload(kid, 900)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let guardian = store.find_guardian_by_external_id(900).await.unwrap().unwrap();
        let dependents = store.find_all_dependents_by_guardian_id(guardian.id).await.unwrap();
        assert_eq!(dependents.len(), 4);
        let counts = store.counts().unwrap();
        assert_eq!((counts.guardians, counts.accounts), (1, 5));
    }

    /// Store whose first `conflicts` commits fail with a unique violation.
    struct ConflictingStore {
        inner: InMemoryIdentityStore,
        conflicts: Arc<AtomicUsize>,
    }

    struct ConflictingTransaction {
        inner: Box<dyn IdentityTransaction>,
        conflicts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl IdentityStore for ConflictingStore {
        async fn find_role(&self, role: Role) -> Result<Option<RoleRecord>, StoreError> {
            self.inner.find_role(role).await
        }

        async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
            self.inner.find_account_by_username(username).await
        }

        async fn find_guardian(&self, id: GuardianId) -> Result<Option<Guardian>, StoreError> {
            self.inner.find_guardian(id).await
        }

        async fn find_guardian_by_external_id(&self, external_id: i64) -> Result<Option<Guardian>, StoreError> {
            self.inner.find_guardian_by_external_id(external_id).await
        }

        async fn find_dependent(&self, id: DependentId) -> Result<Option<Dependent>, StoreError> {
            self.inner.find_dependent(id).await
        }

        async fn find_dependent_by_external_id(&self, external_id: i64) -> Result<Option<Dependent>, StoreError> {
            self.inner.find_dependent_by_external_id(external_id).await
        }

        async fn find_all_dependents_by_guardian_id(
            &self,
            guardian_id: GuardianId,
        ) -> Result<Vec<Dependent>, StoreError> {
            self.inner.find_all_dependents_by_guardian_id(guardian_id).await
        }

        async fn begin(&self) -> Result<Box<dyn IdentityTransaction>, StoreError> {
            Ok(Box::new(ConflictingTransaction {
                inner: self.inner.begin().await?,
                conflicts: Arc::clone(&self.conflicts),
            }))
        }
    }

    #[async_trait]
    impl IdentityTransaction for ConflictingTransaction {
        async fn find_account_by_username(&mut self, username: &str) -> Result<Option<Account>, StoreError> {
            self.inner.find_account_by_username(username).await
        }

        async fn find_guardian_by_external_id(&mut self, external_id: i64) -> Result<Option<Guardian>, StoreError> {
            self.inner.find_guardian_by_external_id(external_id).await
        }

        async fn find_dependent_by_external_id(&mut self, external_id: i64) -> Result<Option<Dependent>, StoreError> {
            self.inner.find_dependent_by_external_id(external_id).await
        }

        async fn save_role(&mut self, record: &RoleRecord) -> Result<(), StoreError> {
            self.inner.save_role(record).await
        }

        async fn save_guardian(&mut self, guardian: &Guardian) -> Result<(), StoreError> {
            self.inner.save_guardian(guardian).await
        }

        async fn save_dependent(&mut self, dependent: &Dependent) -> Result<(), StoreError> {
            self.inner.save_dependent(dependent).await
        }

        async fn save_account(&mut self, account: &Account) -> Result<(), StoreError> {
            self.inner.save_account(account).await
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            let injected = self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(StoreError::UniqueViolation("injected".to_string()));
            }
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    async fn conflicting(conflicts: usize) -> (InMemoryIdentityStore, IdentityResolver) {
        let inner = InMemoryIdentityStore::new();
        seed_roles(&inner).await.unwrap();
        let store = ConflictingStore {
            inner: inner.clone(),
            conflicts: Arc::new(AtomicUsize::new(conflicts)),
        };
        (inner, IdentityResolver::new(Arc::new(store)))
    }

    #[tokio::test]
    async fn one_conflict_is_retried() {
        let (inner, resolver) = conflicting(1).await;
        let account = resolver.resolve(&dependent_payload(1, 2)).await.unwrap();
        assert_eq!(account.username(), "kid-1");
        assert_eq!(inner.counts().unwrap().accounts, 2);
    }

    #[tokio::test]
    async fn second_conflict_in_one_unit_is_fatal() {
        let (inner, resolver) = conflicting(2).await;
        let err = resolver.resolve(&dependent_payload(1, 2)).await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Persistence(StoreError::UniqueViolation(_))
        ));
        assert_eq!(inner.counts().unwrap().guardians, 0, "nothing half-applied");
    }

    #[tokio::test]
    async fn failed_chain_completes_on_next_request() {
        let (inner, resolver) = conflicting(2).await;
        assert!(resolver.resolve(&dependent_payload(1, 2)).await.is_err());

        let account = resolver.resolve(&dependent_payload(1, 2)).await.unwrap();
        assert_eq!(account.role(), Role::Dependent);
        let counts = inner.counts().unwrap();
        assert_eq!((counts.guardians, counts.dependents, counts.accounts), (1, 1, 2));
    }
}
