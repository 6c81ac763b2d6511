//! Postgres-backed identity store.
//!
//! Schema lives in `migrations/0001_identity.sql` and is applied by
//! [`PostgresIdentityStore::migrate`]. Uniqueness and references are enforced
//! by the database; this module only maps the resulting errors.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `UniqueViolation` | Concurrent first login created the same external id / username |
//! | Database (foreign key violation) | `23503` | `ForeignKeyViolation` | Dependent or account pointing at a missing row |
//! | Database (other) | Any other | `Database` | Check constraints, syntax, etc. |
//! | PoolClosed | N/A | `Database` | Connection pool was closed |
//! | Other | N/A | `Database` | Network errors, connection failures, etc. |
//!
//! Transactions run at the default `READ COMMITTED` level. A second writer of
//! the same external id blocks on the unique index until the first commits,
//! then fails with `23505`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use lms_core::{
    Account, AccountId, Dependent, DependentId, Guardian, GuardianId, GuardianType, ProfileLink,
    Role, RoleRecord,
};

use super::{IdentityStore, IdentityTransaction, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_identity.sql");

const ACCOUNT_COLUMNS: &str =
    "id, username, email, password_hash, role, active, guardian_id, dependent_id";
const GUARDIAN_COLUMNS: &str =
    "id, external_guardian_id, name, login_name, email, gender, guardian_type";
const DEPENDENT_COLUMNS: &str =
    "id, external_dependent_id, guardian_id, name, login_name, case_number, gender";

#[derive(Debug, Clone)]
pub struct PostgresIdentityStore {
    pool: Arc<PgPool>,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply the identity schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PostgresIdentityStore {
    #[instrument(skip(self), fields(role = %role), err)]
    async fn find_role(&self, role: Role) -> Result<Option<RoleRecord>, StoreError> {
        let row = sqlx::query("SELECT role, description FROM roles WHERE role = $1")
            .bind(role.wire_name())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_role", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        select_account_by_username(&*self.pool, username).await
    }

    #[instrument(skip(self), fields(guardian_id = %id), err)]
    async fn find_guardian(&self, id: GuardianId) -> Result<Option<Guardian>, StoreError> {
        let sql = format!("SELECT {GUARDIAN_COLUMNS} FROM guardians WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_guardian", e))?;
        row.as_ref().map(guardian_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_guardian_by_external_id(&self, external_id: i64) -> Result<Option<Guardian>, StoreError> {
        select_guardian_by_external_id(&*self.pool, external_id).await
    }

    #[instrument(skip(self), fields(dependent_id = %id), err)]
    async fn find_dependent(&self, id: DependentId) -> Result<Option<Dependent>, StoreError> {
        let sql = format!("SELECT {DEPENDENT_COLUMNS} FROM dependents WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_dependent", e))?;
        row.as_ref().map(dependent_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_dependent_by_external_id(&self, external_id: i64) -> Result<Option<Dependent>, StoreError> {
        select_dependent_by_external_id(&*self.pool, external_id).await
    }

    #[instrument(skip(self), fields(guardian_id = %guardian_id, dependent_count), err)]
    async fn find_all_dependents_by_guardian_id(
        &self,
        guardian_id: GuardianId,
    ) -> Result<Vec<Dependent>, StoreError> {
        let sql = format!(
            "SELECT {DEPENDENT_COLUMNS} FROM dependents WHERE guardian_id = $1 ORDER BY login_name ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(guardian_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_all_dependents_by_guardian_id", e))?;

        let dependents = rows.iter().map(dependent_from_row).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("dependent_count", dependents.len());
        Ok(dependents)
    }

    async fn begin(&self) -> Result<Box<dyn IdentityTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgIdentityTransaction { tx }))
    }
}

struct PgIdentityTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl IdentityTransaction for PgIdentityTransaction {
    async fn find_account_by_username(&mut self, username: &str) -> Result<Option<Account>, StoreError> {
        select_account_by_username(&mut *self.tx, username).await
    }

    async fn find_guardian_by_external_id(&mut self, external_id: i64) -> Result<Option<Guardian>, StoreError> {
        select_guardian_by_external_id(&mut *self.tx, external_id).await
    }

    async fn find_dependent_by_external_id(&mut self, external_id: i64) -> Result<Option<Dependent>, StoreError> {
        select_dependent_by_external_id(&mut *self.tx, external_id).await
    }

    #[instrument(skip(self, record), fields(role = %record.role), err)]
    async fn save_role(&mut self, record: &RoleRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO roles (role, description)
            VALUES ($1, $2)
            ON CONFLICT (role) DO UPDATE SET description = EXCLUDED.description
            "#,
        )
        .bind(record.role.wire_name())
        .bind(&record.description)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_role", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, guardian),
        fields(guardian_id = %guardian.id, external_id = guardian.external_id),
        err
    )]
    async fn save_guardian(&mut self, guardian: &Guardian) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO guardians (
                id,
                external_guardian_id,
                name,
                login_name,
                email,
                gender,
                guardian_type
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                external_guardian_id = EXCLUDED.external_guardian_id,
                name = EXCLUDED.name,
                login_name = EXCLUDED.login_name,
                email = EXCLUDED.email,
                gender = EXCLUDED.gender,
                guardian_type = EXCLUDED.guardian_type,
                updated_at = now()
            "#,
        )
        .bind(guardian.id.as_uuid())
        .bind(guardian.external_id)
        .bind(&guardian.name)
        .bind(&guardian.login_name)
        .bind(&guardian.email)
        .bind(&guardian.gender)
        .bind(guardian.guardian_type.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_guardian", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, dependent),
        fields(dependent_id = %dependent.id, external_id = dependent.external_id),
        err
    )]
    async fn save_dependent(&mut self, dependent: &Dependent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO dependents (
                id,
                external_dependent_id,
                guardian_id,
                name,
                login_name,
                case_number,
                gender
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                external_dependent_id = EXCLUDED.external_dependent_id,
                guardian_id = EXCLUDED.guardian_id,
                name = EXCLUDED.name,
                login_name = EXCLUDED.login_name,
                case_number = EXCLUDED.case_number,
                gender = EXCLUDED.gender,
                updated_at = now()
            "#,
        )
        .bind(dependent.id.as_uuid())
        .bind(dependent.external_id)
        .bind(dependent.guardian_id.as_uuid())
        .bind(&dependent.name)
        .bind(&dependent.login_name)
        .bind(&dependent.case_number)
        .bind(&dependent.gender)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_dependent", e))?;
        Ok(())
    }

    #[instrument(skip(self, account), fields(username = account.username()), err)]
    async fn save_account(&mut self, account: &Account) -> Result<(), StoreError> {
        let (guardian_id, dependent_id): (Option<Uuid>, Option<Uuid>) = match account.profile() {
            ProfileLink::None => (None, None),
            ProfileLink::Guardian(id) => (Some(id.into()), None),
            ProfileLink::Dependent(id) => (None, Some(id.into())),
        };

        // username is deliberately absent from the update set.
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id,
                username,
                email,
                password_hash,
                role,
                active,
                guardian_id,
                dependent_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                password_hash = EXCLUDED.password_hash,
                role = EXCLUDED.role,
                active = EXCLUDED.active,
                guardian_id = EXCLUDED.guardian_id,
                dependent_id = EXCLUDED.dependent_id
            "#,
        )
        .bind(account.id().as_uuid())
        .bind(account.username())
        .bind(account.email())
        .bind(account.password_hash())
        .bind(account.role().wire_name())
        .bind(account.is_active())
        .bind(guardian_id)
        .bind(dependent_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_account", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

async fn select_account_by_username<'e, E>(executor: E, username: &str) -> Result<Option<Account>, StoreError>
where
    E: PgExecutor<'e>,
{
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = $1");
    let row = sqlx::query(&sql)
        .bind(username)
        .fetch_optional(executor)
        .await
        .map_err(|e| map_sqlx_error("find_account_by_username", e))?;
    row.as_ref().map(account_from_row).transpose()
}

async fn select_guardian_by_external_id<'e, E>(executor: E, external_id: i64) -> Result<Option<Guardian>, StoreError>
where
    E: PgExecutor<'e>,
{
    let sql = format!("SELECT {GUARDIAN_COLUMNS} FROM guardians WHERE external_guardian_id = $1");
    let row = sqlx::query(&sql)
        .bind(external_id)
        .fetch_optional(executor)
        .await
        .map_err(|e| map_sqlx_error("find_guardian_by_external_id", e))?;
    row.as_ref().map(guardian_from_row).transpose()
}

async fn select_dependent_by_external_id<'e, E>(
    executor: E,
    external_id: i64,
) -> Result<Option<Dependent>, StoreError>
where
    E: PgExecutor<'e>,
{
    let sql = format!("SELECT {DEPENDENT_COLUMNS} FROM dependents WHERE external_dependent_id = $1");
    let row = sqlx::query(&sql)
        .bind(external_id)
        .fetch_optional(executor)
        .await
        .map_err(|e| map_sqlx_error("find_dependent_by_external_id", e))?;
    row.as_ref().map(dependent_from_row).transpose()
}

fn decode<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Decode(format!("{column}: {e}")))
}

fn role_from_row(row: &PgRow) -> Result<RoleRecord, StoreError> {
    let name: String = decode(row, "role")?;
    let role = name
        .parse::<Role>()
        .map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(RoleRecord {
        role,
        description: decode(row, "description")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let role: String = decode(row, "role")?;
    let role = role
        .parse::<Role>()
        .map_err(|e| StoreError::Decode(e.to_string()))?;

    let guardian_id: Option<Uuid> = decode(row, "guardian_id")?;
    let dependent_id: Option<Uuid> = decode(row, "dependent_id")?;
    let profile = match (guardian_id, dependent_id) {
        (None, None) => ProfileLink::None,
        (Some(g), None) => ProfileLink::Guardian(GuardianId::from_uuid(g)),
        (None, Some(d)) => ProfileLink::Dependent(DependentId::from_uuid(d)),
        (Some(_), Some(_)) => {
            return Err(StoreError::Decode("account links both profiles".to_string()));
        }
    };

    Ok(Account::restore(
        AccountId::from_uuid(decode(row, "id")?),
        decode(row, "username")?,
        decode(row, "email")?,
        decode(row, "password_hash")?,
        role,
        decode(row, "active")?,
        profile,
    ))
}

fn guardian_from_row(row: &PgRow) -> Result<Guardian, StoreError> {
    let guardian_type: String = decode(row, "guardian_type")?;
    Ok(Guardian {
        id: GuardianId::from_uuid(decode(row, "id")?),
        external_id: decode(row, "external_guardian_id")?,
        name: decode(row, "name")?,
        login_name: decode(row, "login_name")?,
        email: decode(row, "email")?,
        gender: decode(row, "gender")?,
        guardian_type: guardian_type
            .parse::<GuardianType>()
            .map_err(|e| StoreError::Decode(e.to_string()))?,
    })
}

fn dependent_from_row(row: &PgRow) -> Result<Dependent, StoreError> {
    Ok(Dependent {
        id: DependentId::from_uuid(decode(row, "id")?),
        external_id: decode(row, "external_dependent_id")?,
        guardian_id: GuardianId::from_uuid(decode(row, "guardian_id")?),
        name: decode(row, "name")?,
        login_name: decode(row, "login_name")?,
        case_number: decode(row, "case_number")?,
        gender: decode(row, "gender")?,
    })
}

/// Map SQLx errors to `StoreError` (see the module docs).
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("{} in {}", db_err.message(), operation);
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(
                    db_err.constraint().map(str::to_string).unwrap_or(msg),
                ),
                Some("23503") => StoreError::ForeignKeyViolation(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}
