use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::credential::{CreateCredentialRequest, CredentialSummary, IssueOutcome};
use crate::service::parse_credential_id;
use crate::AppState;

// ── Response DTOs ────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IssueResponse {
    Issued {
        credential_id: Uuid,
        secret: String,
        expires_at: DateTime<Utc>,
    },
    Pending {
        request_id: Uuid,
        reason: String,
    },
}

impl From<IssueOutcome> for IssueResponse {
    fn from(outcome: IssueOutcome) -> Self {
        match outcome {
            IssueOutcome::Issued {
                id,
                secret,
                expires_at,
            } => IssueResponse::Issued {
                credential_id: id,
                secret: secret.expose().to_string(),
                expires_at,
            },
            IssueOutcome::Pending { id, reason } => IssueResponse::Pending {
                request_id: id,
                reason,
            },
        }
    }
}

#[derive(Serialize)]
pub struct RevokeResponse {
    pub status: &'static str,
    pub credential_id: Uuid,
}

#[derive(Serialize)]
pub struct RevealResponse {
    pub credential_id: Uuid,
    pub secret_plaintext: String,
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /credentials: 201 when issued, 202 when parked for approval
pub async fn create_credential(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateCredentialRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(|e| AppError::InvalidBody(e.body_text()))?;
    let outcome = state.service.create_credential(req).await?;

    let status = match outcome {
        IssueOutcome::Issued { .. } => StatusCode::CREATED,
        IssueOutcome::Pending { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(IssueResponse::from(outcome))).into_response())
}

/// GET /credentials
pub async fn list_credentials(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CredentialSummary>>, AppError> {
    Ok(Json(state.service.list().await?))
}

/// GET /credentials/:id
pub async fn get_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CredentialSummary>, AppError> {
    let id = parse_credential_id(&id)?;
    Ok(Json(state.service.get(id).await?))
}

/// POST /credentials/:id/revoke
pub async fn revoke_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RevokeResponse>, AppError> {
    let id = parse_credential_id(&id)?;
    let summary = state.service.revoke(id).await?;
    Ok(Json(RevokeResponse {
        status: "revoked",
        credential_id: summary.id,
    }))
}

/// POST /requests/:id/approve
pub async fn approve_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<IssueResponse>, AppError> {
    let id = parse_credential_id(&id)?;
    let outcome = state.service.approve(id).await?;
    Ok(Json(outcome.into()))
}

/// GET /_debug/decrypt/:id, mounted only when the debug endpoint is enabled
pub async fn debug_decrypt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RevealResponse>, AppError> {
    let id = parse_credential_id(&id)?;
    let secret = state.service.reveal_secret(id).await?;
    Ok(Json(RevealResponse {
        credential_id: id,
        secret_plaintext: secret.expose().to_string(),
    }))
}
