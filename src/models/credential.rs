use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::errors::Rejection;

// ── Credential ───────────────────────────────────────────────

/// A credential record. Doubles as the approval request while it is pending.
///
/// `secret` holds the cipher blob only; the plaintext never reaches storage.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: Uuid,
    pub principal: String,
    pub kind: String,
    pub scopes: Vec<String>,
    /// Secret length requested at creation, reused when a pending request is approved.
    pub length: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: CredentialStatus,
    pub secret: Option<EncryptedSecret>,
}

impl Credential {
    /// Build a fresh record from a normalized request. Expiry is fixed here and never recomputed.
    ///
    /// Fails `ttl_too_long` when the expiry is not representable.
    pub fn from_request(req: &CredentialRequest, status: CredentialStatus) -> Result<Self, Rejection> {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::try_seconds(req.ttl_seconds)
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .ok_or(Rejection::TtlTooLong)?;
        Ok(Self {
            id: Uuid::new_v4(),
            principal: req.principal.clone(),
            kind: req.kind.clone(),
            scopes: req.scopes.clone(),
            length: req.length.max(0) as usize,
            created_at,
            expires_at,
            status,
            secret: None,
        })
    }

    pub fn summary(&self) -> CredentialSummary {
        CredentialSummary {
            id: self.id,
            principal: self.principal.clone(),
            kind: self.kind.clone(),
            scopes: self.scopes.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            status: self.status.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum CredentialStatus {
    Pending,
    Active,
    Revoked,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Pending => "pending",
            CredentialStatus::Active => "active",
            CredentialStatus::Revoked => "revoked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CredentialStatus::Revoked)
    }
}

impl std::fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing view of a credential. Carries no secret material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialSummary {
    pub id: Uuid,
    pub principal: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: CredentialStatus,
}

// ── Secrets ──────────────────────────────────────────────────

/// Opaque cipher blob as persisted in the `secret_enc` column.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedSecret(String);

impl EncryptedSecret {
    pub fn new(blob: String) -> Self {
        Self(blob)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptedSecret({} bytes)", self.0.len())
    }
}

/// Plaintext secret handed to the caller exactly once. Wiped from memory on drop.
#[derive(Clone)]
pub struct IssuedSecret(Zeroizing<String>);

impl IssuedSecret {
    pub fn new(secret: Zeroizing<String>) -> Self {
        Self(secret)
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for IssuedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IssuedSecret(****)")
    }
}

// ── Requests / outcomes ──────────────────────────────────────

/// Creation request as received from a caller. Every field but `principal` is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateCredentialRequest {
    #[serde(default)]
    pub principal: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub ttl_seconds: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub length: Option<i64>,
}

/// Integers may arrive as JSON numbers or numeric strings (`"3600"`).
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Text(String),
    }

    match Option::<IntOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IntOrString::Int(n)) => Ok(Some(n)),
        Some(IntOrString::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got {:?}", text))),
    }
}

/// A creation request after defaults have been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRequest {
    pub principal: String,
    pub kind: String,
    pub scopes: Vec<String>,
    pub ttl_seconds: i64,
    pub length: i64,
}

pub const DEFAULT_TTL_SECONDS: i64 = 3600;
pub const DEFAULT_SECRET_LENGTH: i64 = 40;

impl CreateCredentialRequest {
    /// Fill absent fields. `default_kind` is the ruleset's sole (first) allowed type.
    pub fn normalize(self, default_kind: &str) -> CredentialRequest {
        CredentialRequest {
            principal: self.principal.unwrap_or_default().trim().to_string(),
            kind: self.kind.unwrap_or_else(|| default_kind.to_string()),
            scopes: self.scopes.unwrap_or_default(),
            ttl_seconds: self.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS),
            length: self.length.unwrap_or(DEFAULT_SECRET_LENGTH),
        }
    }
}

/// Result of a successful creation call.
#[derive(Debug)]
pub enum IssueOutcome {
    Issued {
        id: Uuid,
        secret: IssuedSecret,
        expires_at: DateTime<Utc>,
    },
    Pending {
        id: Uuid,
        reason: String,
    },
}

impl IssueOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            IssueOutcome::Issued { id, .. } | IssueOutcome::Pending { id, .. } => *id,
        }
    }
}
