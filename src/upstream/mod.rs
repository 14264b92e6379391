//! Upstream Sonar API client.
//!
//! Defines the `SonarApi` trait and error type, plus the concrete HTTP
//! client and the deadline-bounded SSE decoder for streamed completions.

pub mod client;
pub mod stream;
pub mod types;

use std::future::Future;
use std::pin::Pin;

use crate::upstream::types::{AsyncJob, ChatRequest, Completion};

pub use self::client::SonarClient;

// ---------------------------------------------------------------------------
// UpstreamError
// ---------------------------------------------------------------------------

/// Errors from the upstream API boundary.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// No API credential configured. Raised before any network call.
    #[error("Perplexity API key is not configured")]
    MissingCredential,

    /// Upstream returned a non-success HTTP status.
    #[error("API error ({status} {status_text}): {body}")]
    Http {
        status: u16,
        status_text: String,
        body: String,
    },

    /// 2xx payload that does not match the expected shape and lacks even a
    /// recognizable `choices` field.
    #[error("Response did not match the expected shape: {0}")]
    Schema(String),

    /// A streamed call produced zero parseable payloads.
    #[error("Stream ended without a single parseable payload")]
    EmptyStream,

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// SonarApi trait
// ---------------------------------------------------------------------------

/// Trait over the upstream chat/search API.
///
/// Async methods return boxed futures so the trait is dyn-compatible (used as
/// `Arc<dyn SonarApi>`); the orchestrator depends only on this interface so
/// tests can substitute a fake.
pub trait SonarApi: Send + Sync {
    /// Chat completion. Streamed requests are decoded through the SSE
    /// decoder; non-streamed requests parse a single JSON document.
    fn chat_completion(
        &self,
        request: &ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, UpstreamError>> + Send + '_>>;

    /// Submit an asynchronous deep-research job.
    fn create_async_job(
        &self,
        request: &ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AsyncJob, UpstreamError>> + Send + '_>>;

    /// Fetch the current descriptor of an asynchronous job by id.
    fn get_async_job(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<AsyncJob, UpstreamError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_display() {
        let err = UpstreamError::Http {
            status: 429,
            status_text: "Too Many Requests".into(),
            body: "slow down".into(),
        };
        assert_eq!(
            err.to_string(),
            "API error (429 Too Many Requests): slow down"
        );
    }

    #[test]
    fn test_missing_credential_display() {
        let err = UpstreamError::MissingCredential;
        assert_eq!(err.to_string(), "Perplexity API key is not configured");
    }

    #[test]
    fn test_empty_stream_display() {
        let err = UpstreamError::EmptyStream;
        assert_eq!(
            err.to_string(),
            "Stream ended without a single parseable payload"
        );
    }
}
