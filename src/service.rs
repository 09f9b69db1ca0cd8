//! Credential lifecycle workflows.
//!
//! ```text
//!   create ──(approval required)──▶ pending ──approve──▶ active
//!      └────(no approval needed)──────────────────────▶ active
//!   pending | active ──revoke──▶ revoked   (terminal)
//! ```
//!
//! Creation and approval share [`CredentialService::mint`], so an approved
//! request gets a secret of the same quality and storage guarantees as a
//! directly issued one. Expiry is informational: nothing here moves a
//! credential on the clock.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{AppError, Rejection};
use crate::metrics::METRICS;
use crate::models::credential::{
    CreateCredentialRequest, Credential, CredentialStatus, CredentialSummary, EncryptedSecret,
    IssueOutcome, IssuedSecret,
};
use crate::policy::{ApprovalDecision, PolicyEngine};
use crate::store::{with_retry, CredentialStore, RetryConfig};
use crate::token::TokenGenerator;
use crate::vault::SecretCipher;

pub struct CredentialService {
    store: Arc<dyn CredentialStore>,
    policy: PolicyEngine,
    cipher: Arc<SecretCipher>,
    tokens: TokenGenerator,
    retry: RetryConfig,
}

/// Unknown and unparsable ids are indistinguishable to callers.
pub fn parse_credential_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::Rejected(Rejection::NotFound))
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        policy: PolicyEngine,
        cipher: Arc<SecretCipher>,
    ) -> Self {
        Self {
            store,
            policy,
            cipher,
            tokens: TokenGenerator::new(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub async fn ready(&self) -> Result<(), AppError> {
        self.store.ping().await.map_err(AppError::from)
    }

    // ── Operations ───────────────────────────────────────────

    pub async fn create_credential(
        &self,
        request: CreateCredentialRequest,
    ) -> Result<IssueOutcome, AppError> {
        observe(self.create_inner(request).await)
    }

    /// Mint a secret for a pending request and make it active.
    pub async fn approve(&self, id: Uuid) -> Result<IssueOutcome, AppError> {
        observe(self.approve_inner(id).await)
    }

    /// Revoke a pending or active credential. Revoking a revoked credential succeeds
    /// and leaves the record untouched.
    pub async fn revoke(&self, id: Uuid) -> Result<CredentialSummary, AppError> {
        let result = with_retry(&self.retry, "revoke", || {
            self.store.update_status(id, CredentialStatus::Revoked)
        })
        .await
        .map_err(AppError::from);

        let record = observe(result)?;
        METRICS.revoked();
        info!(credential_id = %id, principal = %record.principal, "credential revoked");
        Ok(record.summary())
    }

    pub async fn list(&self) -> Result<Vec<CredentialSummary>, AppError> {
        let all = with_retry(&self.retry, "list", || self.store.list_all()).await?;
        Ok(all.iter().map(Credential::summary).collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<CredentialSummary, AppError> {
        observe(self.load(id).await.map(|r| r.summary()))
    }

    /// Decrypt a stored secret. Only the opt-in debug endpoint calls this.
    pub async fn reveal_secret(&self, id: Uuid) -> Result<IssuedSecret, AppError> {
        let record = observe(self.load(id).await)?;
        let sealed = record.secret.as_ref().ok_or(AppError::SecretNotSet)?;
        let plaintext = self.cipher.decrypt(sealed).map_err(|e| {
            warn!(credential_id = %id, error = %e, "stored secret failed to open");
            AppError::SecretUnreadable(e)
        })?;
        warn!(credential_id = %id, "plaintext secret revealed through debug endpoint");
        Ok(IssuedSecret::new(plaintext))
    }

    // ── Internals ────────────────────────────────────────────

    async fn create_inner(&self, request: CreateCredentialRequest) -> Result<IssueOutcome, AppError> {
        let req = request.normalize(self.policy.default_kind());

        if req.principal.is_empty() {
            return Err(Rejection::PrincipalRequired.into());
        }

        self.policy.validate_request(&req).map_err(|r| {
            debug!(principal = %req.principal, code = r.code(), "request failed validation");
            r
        })?;

        let decision = self.policy.requires_approval(&req.scopes);
        let quota = self.policy.max_active_per_principal();

        match decision {
            ApprovalDecision::Required { .. } => {
                let record = Credential::from_request(&req, CredentialStatus::Pending)?;
                // quota is checked for pending requests too; only active records count
                with_retry(&self.retry, "insert", || self.store.insert(&record, quota)).await?;

                let reason = decision.reason_code();
                METRICS.pending();
                info!(
                    credential_id = %record.id,
                    principal = %record.principal,
                    reason = %reason,
                    "credential request pending approval"
                );
                Ok(IssueOutcome::Pending {
                    id: record.id,
                    reason,
                })
            }
            ApprovalDecision::NotRequired => {
                let mut record = Credential::from_request(&req, CredentialStatus::Active)?;
                let (secret, sealed) = self.mint(req.length as usize)?;
                record.secret = Some(sealed);

                with_retry(&self.retry, "insert", || self.store.insert(&record, quota)).await?;

                METRICS.issued("direct");
                info!(
                    credential_id = %record.id,
                    principal = %record.principal,
                    expires_at = %record.expires_at,
                    "credential issued"
                );
                Ok(IssueOutcome::Issued {
                    id: record.id,
                    secret,
                    expires_at: record.expires_at,
                })
            }
        }
    }

    async fn approve_inner(&self, id: Uuid) -> Result<IssueOutcome, AppError> {
        let record = self.load(id).await?;
        if record.status != CredentialStatus::Pending {
            return Err(Rejection::NotPending.into());
        }

        let (secret, sealed) = self.mint(record.length)?;
        let quota = self.policy.max_active_per_principal();
        let updated = with_retry(&self.retry, "attach_secret", || {
            self.store.attach_secret(id, &sealed, quota)
        })
        .await?;

        METRICS.issued("approval");
        info!(
            credential_id = %id,
            principal = %updated.principal,
            "pending credential approved"
        );
        Ok(IssueOutcome::Issued {
            id,
            secret,
            expires_at: updated.expires_at,
        })
    }

    async fn load(&self, id: Uuid) -> Result<Credential, AppError> {
        with_retry(&self.retry, "get", || self.store.get(id))
            .await?
            .ok_or(AppError::Rejected(Rejection::NotFound))
    }

    /// Random token, then seal. The plaintext leaves only through the returned `IssuedSecret`.
    fn mint(&self, length: usize) -> Result<(IssuedSecret, EncryptedSecret), AppError> {
        let plaintext = self.tokens.generate(length);
        let sealed = self
            .cipher
            .encrypt(&plaintext)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("sealing secret failed: {}", e)))?;
        Ok((IssuedSecret::new(plaintext), sealed))
    }
}

fn observe<T>(result: Result<T, AppError>) -> Result<T, AppError> {
    if let Err(e) = &result {
        METRICS.rejected(e.code());
    }
    result
}
