use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::ledger::LedgerError;
use crate::store::StoreError;
use crate::upstream::UpstreamError;

/// Unified application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Perplexity API key is not configured")]
    MissingCredential,

    #[error("Upstream error ({status} {status_text}): {body}")]
    UpstreamHttp {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("Upstream response did not match the expected shape: {0}")]
    UpstreamSchema(String),

    #[error("Upstream stream produced no parseable payload")]
    EmptyStream,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    message: String,
    r#type: String,
    code: Option<String>,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownTransaction(_) => StatusCode::NOT_FOUND,
            // Preserve the upstream status for diagnostics.
            Self::UpstreamHttp { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::UpstreamSchema(_) | Self::EmptyStream | Self::Upstream(_) | Self::Ledger(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::MissingCredential | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::BadRequest(_) => "invalid_request_error",
            Self::UnknownTransaction(_) => "not_found_error",
            Self::UpstreamHttp { .. }
            | Self::UpstreamSchema(_)
            | Self::EmptyStream
            | Self::Upstream(_) => "upstream_error",
            Self::Ledger(_) => "ledger_error",
            Self::MissingCredential | Self::Store(_) | Self::Internal(_) => "server_error",
        }
    }

    fn error_code(&self) -> Option<&str> {
        match self {
            Self::MissingCredential => Some("missing_credential"),
            Self::EmptyStream => Some("empty_stream"),
            Self::UnknownTransaction(_) => Some("unknown_transaction"),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: self.error_type().to_string(),
                code: self.error_code().map(String::from),
            },
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::MissingCredential => Self::MissingCredential,
            UpstreamError::Http {
                status,
                status_text,
                body,
            } => Self::UpstreamHttp {
                status,
                status_text,
                body,
            },
            UpstreamError::Schema(message) => Self::UpstreamSchema(message),
            UpstreamError::EmptyStream => Self::EmptyStream,
            UpstreamError::Transport(e) => Self::Upstream(e.to_string()),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        tracing::error!(error = %err, "Ledger call failed");
        Self::Ledger(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Job store call failed");
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {err}"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
