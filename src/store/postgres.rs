use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{check_transition, CredentialStore, StoreError};
use crate::models::credential::{Credential, CredentialStatus, EncryptedSecret};

const SELECT_COLUMNS: &str =
    "id, principal, kind, scopes, length, created_at, expires_at, status, secret_enc";

/// Postgres-backed store.
///
/// Quota-affecting writes take a transaction-scoped advisory lock keyed by the
/// principal, so concurrent creations for one principal queue up while other
/// principals proceed.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn lock_principal(
        tx: &mut Transaction<'_, Postgres>,
        principal: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(principal)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn count_active_in(
        tx: &mut Transaction<'_, Postgres>,
        principal: &str,
    ) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM credentials WHERE principal = $1 AND status = 'active'",
        )
        .bind(principal)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count.max(0) as usize)
    }

    async fn fetch_for_update(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Credential, StoreError> {
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {} FROM credentials WHERE id = $1 FOR UPDATE",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::NotFound)?;
        Ok(row.into())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn count_active(&self, principal: &str) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM credentials WHERE principal = $1 AND status = 'active'",
        )
        .bind(principal)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as usize)
    }

    async fn insert(&self, record: &Credential, quota: usize) -> Result<(), StoreError> {
        let length = i32::try_from(record.length)
            .map_err(|e| StoreError::Database(sqlx::Error::Encode(Box::new(e))))?;

        let mut tx = self.pool.begin().await?;
        Self::lock_principal(&mut tx, &record.principal).await?;

        let active = Self::count_active_in(&mut tx, &record.principal).await?;
        if active >= quota {
            tx.rollback().await?;
            return Err(StoreError::QuotaExceeded);
        }

        sqlx::query(
            r#"INSERT INTO credentials (id, principal, kind, scopes, length, created_at, expires_at, status, secret_enc)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(record.id)
        .bind(&record.principal)
        .bind(&record.kind)
        .bind(Json(&record.scopes))
        .bind(length)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(&record.status)
        .bind(record.secret.as_ref().map(EncryptedSecret::as_str))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: CredentialStatus,
    ) -> Result<Credential, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut current = Self::fetch_for_update(&mut tx, id).await?;
        check_transition(&current.status, &status)?;

        sqlx::query("UPDATE credentials SET status = $1 WHERE id = $2")
            .bind(&status)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        current.status = status;
        Ok(current)
    }

    async fn attach_secret(
        &self,
        id: Uuid,
        secret: &EncryptedSecret,
        quota: usize,
    ) -> Result<Credential, StoreError> {
        // principal is immutable, so reading it outside the transaction is safe
        let principal: String =
            sqlx::query_scalar("SELECT principal FROM credentials WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(StoreError::NotFound)?;

        // advisory lock before row lock, same order as `insert`
        let mut tx = self.pool.begin().await?;
        Self::lock_principal(&mut tx, &principal).await?;
        let mut current = Self::fetch_for_update(&mut tx, id).await?;

        if current.status != CredentialStatus::Pending {
            tx.rollback().await?;
            return Err(StoreError::NotPending);
        }
        if Self::count_active_in(&mut tx, &principal).await? >= quota {
            tx.rollback().await?;
            return Err(StoreError::QuotaExceeded);
        }

        sqlx::query(
            "UPDATE credentials SET status = 'active', secret_enc = $1 WHERE id = $2 AND status = 'pending'",
        )
        .bind(secret.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        current.status = CredentialStatus::Active;
        current.secret = Some(secret.clone());
        Ok(current)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Credential>, StoreError> {
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {} FROM credentials WHERE id = $1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_all(&self) -> Result<Vec<Credential>, StoreError> {
        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {} FROM credentials ORDER BY created_at ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    principal: String,
    kind: String,
    scopes: Json<Vec<String>>,
    length: i32,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    status: CredentialStatus,
    secret_enc: Option<String>,
}

impl From<CredentialRow> for Credential {
    fn from(row: CredentialRow) -> Self {
        Credential {
            id: row.id,
            principal: row.principal,
            kind: row.kind,
            scopes: row.scopes.0,
            length: row.length.max(0) as usize,
            created_at: row.created_at,
            expires_at: row.expires_at,
            status: row.status,
            secret: row.secret_enc.map(EncryptedSecret::new),
        }
    }
}
