//! Durable credential records.
//!
//! Two backends implement [`CredentialStore`]: [`PgStore`] for deployments and
//! [`MemoryStore`] for development and tests. Both serialize the quota
//! check-and-write per principal; different principals never wait on each other.

pub mod memory;
pub mod postgres;
pub mod retry;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use retry::{with_retry, RetryConfig};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::credential::{Credential, CredentialStatus, EncryptedSecret};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential not found")]
    NotFound,

    #[error("active credential quota reached")]
    QuotaExceeded,

    #[error("credential is not pending")]
    NotPending,

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: CredentialStatus,
        to: CredentialStatus,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Contention and connectivity failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db) => matches!(
                    db.code().as_deref(),
                    // serialization_failure, deadlock_detected, lock_not_available
                    Some("40001") | Some("40P01") | Some("55P03")
                ),
                _ => false,
            },
            StoreError::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// Storage contract for credential records.
///
/// Records are never deleted. `insert` and `attach_secret` are the only writes that
/// can raise a principal's active count, and both check the quota atomically.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn count_active(&self, principal: &str) -> Result<usize, StoreError>;

    /// Insert `record` only if its principal holds fewer than `quota` active credentials.
    /// The count and the write are one atomic unit per principal.
    async fn insert(&self, record: &Credential, quota: usize) -> Result<(), StoreError>;

    /// Move a record to `status`. Activation goes through [`attach_secret`](Self::attach_secret).
    async fn update_status(
        &self,
        id: Uuid,
        status: CredentialStatus,
    ) -> Result<Credential, StoreError>;

    /// Set the encrypted secret on a pending record and mark it active in one step,
    /// subject to the same per-principal quota as `insert`.
    async fn attach_secret(
        &self,
        id: Uuid,
        secret: &EncryptedSecret,
        quota: usize,
    ) -> Result<Credential, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Credential>, StoreError>;

    /// All records, oldest first.
    async fn list_all(&self) -> Result<Vec<Credential>, StoreError>;

    /// Readiness check.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Transitions `update_status` may perform. Revoking twice is allowed and changes nothing.
pub(crate) fn check_transition(
    from: &CredentialStatus,
    to: &CredentialStatus,
) -> Result<(), StoreError> {
    match (from, to) {
        (_, CredentialStatus::Revoked) => Ok(()),
        _ => Err(StoreError::InvalidTransition {
            from: from.clone(),
            to: to.clone(),
        }),
    }
}
