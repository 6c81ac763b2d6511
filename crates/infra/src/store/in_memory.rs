use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use lms_core::{
    Account, AccountId, Dependent, DependentId, Guardian, GuardianId, ProfileLink, Role, RoleRecord,
};

use super::{IdentityStore, IdentityTransaction, StoreError};

#[derive(Debug, Default, Clone)]
struct Tables {
    roles: HashMap<Role, RoleRecord>,
    guardians: HashMap<GuardianId, Guardian>,
    dependents: HashMap<DependentId, Dependent>,
    accounts: HashMap<AccountId, Account>,
}

#[derive(Debug, Clone)]
enum Write {
    Role(RoleRecord),
    Guardian(Guardian),
    Dependent(Dependent),
    Account(Account),
}

impl Tables {
    fn guardian_by_external_id(&self, external_id: i64) -> Option<&Guardian> {
        self.guardians.values().find(|g| g.external_id == external_id)
    }

    fn dependent_by_external_id(&self, external_id: i64) -> Option<&Dependent> {
        self.dependents.values().find(|d| d.external_id == external_id)
    }

    fn account_by_username(&self, username: &str) -> Option<&Account> {
        self.accounts.values().find(|a| a.username() == username)
    }

    fn apply(&mut self, write: &Write) -> Result<(), StoreError> {
        match write {
            Write::Role(record) => {
                self.roles.insert(record.role, record.clone());
            }
            Write::Guardian(guardian) => {
                if let Some(other) = self.guardian_by_external_id(guardian.external_id) {
                    if other.id != guardian.id {
                        return Err(StoreError::UniqueViolation(format!(
                            "guardians.external_guardian_id = {}",
                            guardian.external_id
                        )));
                    }
                }
                self.guardians.insert(guardian.id, guardian.clone());
            }
            Write::Dependent(dependent) => {
                if let Some(other) = self.dependent_by_external_id(dependent.external_id) {
                    if other.id != dependent.id {
                        return Err(StoreError::UniqueViolation(format!(
                            "dependents.external_dependent_id = {}",
                            dependent.external_id
                        )));
                    }
                }
                if !self.guardians.contains_key(&dependent.guardian_id) {
                    return Err(StoreError::ForeignKeyViolation(format!(
                        "dependents.guardian_id = {}",
                        dependent.guardian_id
                    )));
                }
                self.dependents.insert(dependent.id, dependent.clone());
            }
            Write::Account(account) => self.put_account(account)?,
        }
        Ok(())
    }

    fn put_account(&mut self, account: &Account) -> Result<(), StoreError> {
        // Username is immutable: an update keeps the stored one.
        let username = match self.accounts.get(&account.id()) {
            Some(existing) => existing.username().to_string(),
            None => account.username().to_string(),
        };

        for other in self.accounts.values().filter(|a| a.id() != account.id()) {
            if other.username() == username {
                return Err(StoreError::UniqueViolation(format!("accounts.username = {username}")));
            }
            if let (Some(a), Some(b)) = (other.email(), account.email()) {
                if a == b {
                    return Err(StoreError::UniqueViolation(format!("accounts.email = {b}")));
                }
            }
        }

        if !self.roles.contains_key(&account.role()) {
            return Err(StoreError::ForeignKeyViolation(format!("accounts.role = {}", account.role())));
        }
        let profile_exists = match account.profile() {
            ProfileLink::None => true,
            ProfileLink::Guardian(id) => self.guardians.contains_key(&id),
            ProfileLink::Dependent(id) => self.dependents.contains_key(&id),
        };
        if !profile_exists {
            return Err(StoreError::ForeignKeyViolation(format!(
                "accounts profile of {username}"
            )));
        }

        let stored = Account::restore(
            account.id(),
            username,
            account.email().map(str::to_string),
            account.password_hash().map(str::to_string),
            account.role(),
            account.is_active(),
            account.profile(),
        );
        self.accounts.insert(stored.id(), stored);
        Ok(())
    }
}

/// Row counts, for assertions in tests and dev tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableCounts {
    pub roles: usize,
    pub guardians: usize,
    pub dependents: usize,
    pub accounts: usize,
}

/// In-memory identity store with the same uniqueness and reference rules as
/// the Postgres schema.
///
/// Transactions work on a snapshot taken at `begin` and re-apply their writes
/// against the latest committed state on `commit`, so a concurrent committer
/// surfaces as a [`StoreError::UniqueViolation`] exactly as it would in Postgres.
///
/// Intended for tests/dev. Lookups are linear scans.
#[derive(Debug, Default, Clone)]
pub struct InMemoryIdentityStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&tables))
    }

    pub fn counts(&self) -> Result<TableCounts, StoreError> {
        self.read(|t| TableCounts {
            roles: t.roles.len(),
            guardians: t.guardians.len(),
            dependents: t.dependents.len(),
            accounts: t.accounts.len(),
        })
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_role(&self, role: Role) -> Result<Option<RoleRecord>, StoreError> {
        self.read(|t| t.roles.get(&role).cloned())
    }

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        self.read(|t| t.account_by_username(username).cloned())
    }

    async fn find_guardian(&self, id: GuardianId) -> Result<Option<Guardian>, StoreError> {
        self.read(|t| t.guardians.get(&id).cloned())
    }

    async fn find_guardian_by_external_id(&self, external_id: i64) -> Result<Option<Guardian>, StoreError> {
        self.read(|t| t.guardian_by_external_id(external_id).cloned())
    }

    async fn find_dependent(&self, id: DependentId) -> Result<Option<Dependent>, StoreError> {
        self.read(|t| t.dependents.get(&id).cloned())
    }

    async fn find_dependent_by_external_id(&self, external_id: i64) -> Result<Option<Dependent>, StoreError> {
        self.read(|t| t.dependent_by_external_id(external_id).cloned())
    }

    async fn find_all_dependents_by_guardian_id(
        &self,
        guardian_id: GuardianId,
    ) -> Result<Vec<Dependent>, StoreError> {
        self.read(|t| {
            let mut found: Vec<Dependent> = t
                .dependents
                .values()
                .filter(|d| d.guardian_id == guardian_id)
                .cloned()
                .collect();
            found.sort_by(|a, b| a.login_name.cmp(&b.login_name));
            found
        })
    }

    async fn begin(&self) -> Result<Box<dyn IdentityTransaction>, StoreError> {
        let snapshot = self.read(Tables::clone)?;
        Ok(Box::new(InMemoryTransaction {
            committed: Arc::clone(&self.tables),
            working: snapshot,
            writes: Vec::new(),
        }))
    }
}

struct InMemoryTransaction {
    committed: Arc<RwLock<Tables>>,
    working: Tables,
    writes: Vec<Write>,
}

impl InMemoryTransaction {
    fn stage(&mut self, write: Write) -> Result<(), StoreError> {
        self.working.apply(&write)?;
        self.writes.push(write);
        Ok(())
    }
}

#[async_trait]
impl IdentityTransaction for InMemoryTransaction {
    async fn find_account_by_username(&mut self, username: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.working.account_by_username(username).cloned())
    }

    async fn find_guardian_by_external_id(&mut self, external_id: i64) -> Result<Option<Guardian>, StoreError> {
        Ok(self.working.guardian_by_external_id(external_id).cloned())
    }

    async fn find_dependent_by_external_id(&mut self, external_id: i64) -> Result<Option<Dependent>, StoreError> {
        Ok(self.working.dependent_by_external_id(external_id).cloned())
    }

    async fn save_role(&mut self, record: &RoleRecord) -> Result<(), StoreError> {
        self.stage(Write::Role(record.clone()))
    }

    async fn save_guardian(&mut self, guardian: &Guardian) -> Result<(), StoreError> {
        self.stage(Write::Guardian(guardian.clone()))
    }

    async fn save_dependent(&mut self, dependent: &Dependent) -> Result<(), StoreError> {
        self.stage(Write::Dependent(dependent.clone()))
    }

    async fn save_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.stage(Write::Account(account.clone()))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let mut committed = self.committed.write().map_err(|_| StoreError::Poisoned)?;
        let mut next = committed.clone();
        for write in &self.writes {
            next.apply(write)?;
        }
        *committed = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_core::GuardianType;

    async fn seeded() -> InMemoryIdentityStore {
        let store = InMemoryIdentityStore::new();
        let mut tx = store.begin().await.unwrap();
        for role in Role::ALL {
            tx.save_role(&RoleRecord::new(role)).await.unwrap();
        }
        tx.commit().await.unwrap();
        store
    }

    fn guardian(external_id: i64, login: &str) -> Guardian {
        let mut g = Guardian::new(external_id, login).unwrap();
        g.guardian_type = GuardianType::Deciding;
        g
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        tx.save_guardian(&guardian(1, "g")).await.unwrap();
        assert!(tx.find_guardian_by_external_id(1).await.unwrap().is_some());
        assert!(store.find_guardian_by_external_id(1).await.unwrap().is_none());

        tx.rollback().await.unwrap();
        assert_eq!(store.counts().unwrap().guardians, 0);
    }

    #[tokio::test]
    async fn concurrent_insert_of_same_external_id_conflicts_on_commit() {
        let store = seeded().await;
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        first.save_guardian(&guardian(7, "a")).await.unwrap();
        second.save_guardian(&guardian(7, "b")).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.is_unique_violation(), "{err:?}");
        assert_eq!(store.counts().unwrap().guardians, 1);
    }

    #[tokio::test]
    async fn dependent_requires_existing_guardian() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        let orphan = Dependent::new(9, "kid", GuardianId::new()).unwrap();
        let err = tx.save_dependent(&orphan).await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation(_)));
    }

    #[tokio::test]
    async fn account_username_and_email_are_unique() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        let a = Account::new("same", Some("x@example.com".into()), Role::Admin, ProfileLink::None).unwrap();
        tx.save_account(&a).await.unwrap();

        let b = Account::new("same", None, Role::Admin, ProfileLink::None).unwrap();
        assert!(tx.save_account(&b).await.unwrap_err().is_unique_violation());

        let c = Account::new("other", Some("x@example.com".into()), Role::Admin, ProfileLink::None).unwrap();
        assert!(tx.save_account(&c).await.unwrap_err().is_unique_violation());
    }

    #[tokio::test]
    async fn account_update_keeps_username() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();
        let original = Account::new("keeper", None, Role::Admin, ProfileLink::None).unwrap();
        tx.save_account(&original).await.unwrap();
        tx.commit().await.unwrap();

        let renamed = Account::restore(
            original.id(),
            "renamed".into(),
            None,
            None,
            Role::Admin,
            false,
            ProfileLink::None,
        );
        let mut tx = store.begin().await.unwrap();
        tx.save_account(&renamed).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store.find_account_by_username("keeper").await.unwrap().unwrap();
        assert!(!stored.is_active());
        assert!(store.find_account_by_username("renamed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn account_role_must_be_in_catalog() {
        let store = InMemoryIdentityStore::new();
        let mut tx = store.begin().await.unwrap();
        let a = Account::new("nobody", None, Role::Admin, ProfileLink::None).unwrap();
        assert!(matches!(
            tx.save_account(&a).await.unwrap_err(),
            StoreError::ForeignKeyViolation(_)
        ));
    }
}
