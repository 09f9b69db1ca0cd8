use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;
use crate::vault::CipherError;

/// Caller-visible policy and lookup failures. `code()` is the stable wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("principal is required")]
    PrincipalRequired,

    #[error("credential type is not allowed")]
    TypeNotAllowed,

    #[error("requested secret length is below the policy minimum")]
    LengthTooShort,

    #[error("requested secret length is above the policy maximum")]
    LengthTooLong,

    #[error("requested ttl exceeds the policy maximum")]
    TtlTooLong,

    #[error("requested ttl must be positive")]
    TtlTooShort,

    #[error("principal is at its active credential quota")]
    QuotaExceeded,

    #[error("credential not found")]
    NotFound,

    #[error("credential is not pending")]
    NotPending,
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::PrincipalRequired => "principal_required",
            Rejection::TypeNotAllowed => "type_not_allowed",
            Rejection::LengthTooShort => "length_too_short",
            Rejection::LengthTooLong => "length_too_long",
            Rejection::TtlTooLong => "ttl_too_long",
            Rejection::TtlTooShort => "ttl_too_short",
            Rejection::QuotaExceeded => "quota_exceeded",
            Rejection::NotFound => "not_found",
            Rejection::NotPending => "not_pending",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Rejection::QuotaExceeded => StatusCode::FORBIDDEN,
            Rejection::NotFound => StatusCode::NOT_FOUND,
            Rejection::NotPending => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("rejected: {}", .0.code())]
    Rejected(#[from] Rejection),

    /// Request body that could not be decoded as a creation request.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The record exists but no secret has been minted for it yet.
    #[error("credential has no secret")]
    SecretNotSet,

    /// The stored blob failed authentication or could not be parsed.
    #[error("stored secret is unreadable: {0}")]
    SecretUnreadable(#[from] CipherError),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code for every failure.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Rejected(r) => r.code(),
            AppError::InvalidBody(_) => "invalid_body",
            AppError::SecretNotSet => "secret_not_set",
            AppError::SecretUnreadable(_) => "secret_unreadable",
            AppError::StorageUnavailable(_) => "storage_unavailable",
            AppError::Internal(_) => "internal_server_error",
        }
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            AppError::Rejected(r) => Some(*r),
            _ => None,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AppError::Rejected(Rejection::NotFound),
            StoreError::QuotaExceeded => AppError::Rejected(Rejection::QuotaExceeded),
            StoreError::NotPending => AppError::Rejected(Rejection::NotPending),
            e @ StoreError::InvalidTransition { .. } => AppError::Internal(anyhow::anyhow!(e)),
            StoreError::Database(e) => AppError::StorageUnavailable(e.to_string()),
            StoreError::Unavailable(msg) => AppError::StorageUnavailable(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, msg) = match &self {
            AppError::Rejected(r) => {
                let error_type = match r {
                    Rejection::QuotaExceeded => "permission_error",
                    Rejection::NotFound => "not_found_error",
                    Rejection::NotPending => "conflict_error",
                    _ => "invalid_request_error",
                };
                (r.status(), error_type, r.to_string())
            }
            AppError::InvalidBody(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                msg.clone(),
            ),
            AppError::SecretNotSet => (
                StatusCode::CONFLICT,
                "conflict_error",
                "credential has no secret yet".to_string(),
            ),
            AppError::SecretUnreadable(e) => {
                tracing::error!("stored secret unreadable: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "stored secret is unreadable".to_string(),
                )
            }
            AppError::StorageUnavailable(e) => {
                tracing::error!("storage unavailable: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable_error",
                    "storage temporarily unavailable".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": self.code(),
            }
        }));

        let mut response = (status, body).into_response();

        if matches!(self, AppError::StorageUnavailable(_)) {
            response.headers_mut().insert(
                "retry-after",
                axum::http::HeaderValue::from_static("1"),
            );
        }

        response
    }
}
