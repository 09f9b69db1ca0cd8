//! In-memory credential store.
//!
//! Records live in a `DashMap`; quota-affecting writes hold a per-principal
//! async mutex across the count and the write. A principal's mutex is dropped
//! from the lock map once no writer holds it, so the map only tracks principals
//! with a write in flight. Data is lost on restart.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{check_transition, CredentialStore, StoreError};
use crate::models::credential::{Credential, CredentialStatus, EncryptedSecret};

#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<Uuid, Credential>,
    principal_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding `principal`'s write lock.
    async fn with_principal_lock<T>(&self, principal: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .principal_locks
            .entry(principal.to_string())
            .or_default()
            .clone();

        let result = {
            let _guard = lock.lock().await;
            f()
        };
        drop(lock);

        // a waiter that already cloned the Arc keeps the entry alive
        self.principal_locks
            .remove_if(principal, |_, l| Arc::strong_count(l) == 1);
        result
    }

    // Must not be called while holding a shard guard from `records`.
    fn active_count(&self, principal: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.principal == principal && r.status == CredentialStatus::Active)
            .count()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn count_active(&self, principal: &str) -> Result<usize, StoreError> {
        Ok(self.active_count(principal))
    }

    async fn insert(&self, record: &Credential, quota: usize) -> Result<(), StoreError> {
        self.with_principal_lock(&record.principal, || {
            let active = self.active_count(&record.principal);
            if active >= quota {
                debug!(principal = %record.principal, active, quota, "quota reached");
                return Err(StoreError::QuotaExceeded);
            }
            self.records.insert(record.id, record.clone());
            Ok(())
        })
        .await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: CredentialStatus,
    ) -> Result<Credential, StoreError> {
        let mut entry = self.records.get_mut(&id).ok_or(StoreError::NotFound)?;
        check_transition(&entry.status, &status)?;
        entry.status = status;
        Ok(entry.value().clone())
    }

    async fn attach_secret(
        &self,
        id: Uuid,
        secret: &EncryptedSecret,
        quota: usize,
    ) -> Result<Credential, StoreError> {
        let principal = {
            let entry = self.records.get(&id).ok_or(StoreError::NotFound)?;
            if entry.status != CredentialStatus::Pending {
                return Err(StoreError::NotPending);
            }
            entry.principal.clone()
        };

        self.with_principal_lock(&principal, || {
            if self.active_count(&principal) >= quota {
                return Err(StoreError::QuotaExceeded);
            }

            let mut entry = self.records.get_mut(&id).ok_or(StoreError::NotFound)?;
            // re-check: a revoke may have landed while we waited for the lock
            if entry.status != CredentialStatus::Pending {
                return Err(StoreError::NotPending);
            }
            entry.status = CredentialStatus::Active;
            entry.secret = Some(secret.clone());
            Ok(entry.value().clone())
        })
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Credential>, StoreError> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn list_all(&self) -> Result<Vec<Credential>, StoreError> {
        let mut all: Vec<Credential> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|r| r.created_at);
        Ok(all)
    }
}
