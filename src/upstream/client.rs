//! HTTP client for the Perplexity Sonar API.
//!
//! Performs the actual network calls: synchronous chat completions
//! (optionally SSE-streamed) and asynchronous deep-research job
//! creation/polling. Owns response decoding and schema validation.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use tokio::time::Instant;

use crate::upstream::stream::decode_sse_payload;
use crate::upstream::types::{AsyncJob, ChatRequest, Completion};
use crate::upstream::{SonarApi, UpstreamError};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";

/// Default wall-clock budget for a streamed completion.
pub const DEFAULT_STREAM_DEADLINE: Duration = Duration::from_secs(55);

/// Concrete client for the Sonar HTTP API.
pub struct SonarClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    stream_deadline: Duration,
}

impl SonarClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: crate::net::build_client(),
            base_url: base_url.into(),
            api_key,
            stream_deadline: DEFAULT_STREAM_DEADLINE,
        }
    }

    /// Override the streaming deadline (mostly for configuration).
    pub fn with_stream_deadline(mut self, deadline: Duration) -> Self {
        self.stream_deadline = deadline;
        self
    }

    /// The bearer credential, checked before any network activity.
    fn credential(&self) -> Result<&str, UpstreamError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(UpstreamError::MissingCredential)
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn async_job_url(&self) -> String {
        format!("{}/async/chat/completions", self.base_url)
    }

    /// Map a non-success response to `UpstreamError::Http` with diagnostics.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let status_text = status.canonical_reason().unwrap_or("").to_string();
        let body = resp.text().await.unwrap_or_default();
        Err(UpstreamError::Http {
            status: status.as_u16(),
            status_text,
            body,
        })
    }

    async fn chat_completion_inner(
        &self,
        request: &ChatRequest,
    ) -> Result<Completion, UpstreamError> {
        let key = self.credential()?;

        let resp = self
            .http
            .post(self.chat_url())
            .bearer_auth(key)
            .json(request)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;

        let value = if request.stream {
            let deadline = Instant::now() + self.stream_deadline;
            decode_sse_payload(resp.bytes_stream(), deadline).await?
        } else {
            let body = resp.text().await?;
            serde_json::from_str(&body).map_err(|e| UpstreamError::Schema(e.to_string()))?
        };

        Completion::from_value(value)
    }

    async fn create_async_job_inner(
        &self,
        request: &ChatRequest,
    ) -> Result<AsyncJob, UpstreamError> {
        let key = self.credential()?;

        // The async endpoint never streams.
        let mut request = request.clone();
        request.stream = false;

        let resp = self
            .http
            .post(self.async_job_url())
            .bearer_auth(key)
            .json(&serde_json::json!({ "request": request }))
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| UpstreamError::Schema(e.to_string()))
    }

    async fn get_async_job_inner(&self, id: &str) -> Result<AsyncJob, UpstreamError> {
        let key = self.credential()?;

        let resp = self
            .http
            .get(format!("{}/{id}", self.async_job_url()))
            .bearer_auth(key)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| UpstreamError::Schema(e.to_string()))
    }
}

impl SonarApi for SonarClient {
    fn chat_completion(
        &self,
        request: &ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, UpstreamError>> + Send + '_>> {
        let request = request.clone();
        Box::pin(async move { self.chat_completion_inner(&request).await })
    }

    fn create_async_job(
        &self,
        request: &ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AsyncJob, UpstreamError>> + Send + '_>> {
        let request = request.clone();
        Box::pin(async move { self.create_async_job_inner(&request).await })
    }

    fn get_async_job(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<AsyncJob, UpstreamError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move { self.get_async_job_inner(&id).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::types::{ChatMessage, MessageContent, MessageRole};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "sonar".into(),
            messages: vec![ChatMessage {
                role: MessageRole::User,
                content: MessageContent::Text("hi".into()),
            }],
            stream: false,
            max_tokens: None,
            temperature: None,
            top_p: None,
            reasoning_effort: None,
            search_domain_filter: None,
            search_recency_filter: None,
            return_related_questions: None,
            return_images: None,
        }
    }

    #[tokio::test]
    async fn test_missing_credential_is_preflight() {
        // Unroutable base URL: the call must fail before any network attempt.
        let client = SonarClient::new("http://127.0.0.1:1", None);
        let err = client.chat_completion(&request()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::MissingCredential));

        let err = client.create_async_job(&request()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::MissingCredential));

        let err = client.get_async_job("job-1").await.unwrap_err();
        assert!(matches!(err, UpstreamError::MissingCredential));
    }

    #[tokio::test]
    async fn test_empty_credential_is_missing() {
        let client = SonarClient::new("http://127.0.0.1:1", Some(String::new()));
        let err = client.chat_completion(&request()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::MissingCredential));
    }

    #[test]
    fn test_urls() {
        let client = SonarClient::new("https://api.perplexity.ai", Some("k".into()));
        assert_eq!(
            client.chat_url(),
            "https://api.perplexity.ai/chat/completions"
        );
        assert_eq!(
            client.async_job_url(),
            "https://api.perplexity.ai/async/chat/completions"
        );
    }
}
