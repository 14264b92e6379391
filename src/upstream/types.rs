use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::upstream::UpstreamError;

/// Chat completion request in the Sonar API shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_domain_filter: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_recency_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_related_questions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_images: Option<bool>,
}

/// Chat message with either plain-string or chunked content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Message content: a plain string or an ordered list of typed chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single content chunk. `text` is present iff `type == "text"`,
/// `image_url` iff `type == "image_url"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Requested reasoning effort for deep-research models.
///
/// Unrecognized values deserialize to `Medium` so that an unknown effort
/// string widens the search-query budget to the middle bucket instead of
/// rejecting the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    High,
    #[default]
    #[serde(other)]
    Medium,
}

/// Actual consumption reported by the upstream after a completed call.
///
/// The extended counters are only reported by search/deep-research models;
/// they default to 0 when reconciling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_search_queries: Option<u64>,
}

/// Chat completion response in the Sonar API shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub created: i64,
    #[serde(default)]
    pub usage: Usage,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<SearchResult>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    #[serde(default)]
    pub finish_reason: Option<String>,
    pub message: ResponseMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

// ---------------------------------------------------------------------------
// Async jobs
// ---------------------------------------------------------------------------

/// Deep-research job descriptor returned by the async endpoints.
///
/// `response` is kept as raw JSON: a completed payload is validated lazily at
/// reconciliation time so a schema drift upstream degrades instead of losing
/// the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncJob {
    pub id: String,
    pub model: String,
    pub status: JobStatus,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

/// Job lifecycle states. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Completion (validated or degraded)
// ---------------------------------------------------------------------------

/// A chat completion payload after validation.
///
/// `Degraded` carries a payload that failed strict validation but still has a
/// `choices` field, which happens when the streaming deadline truncates the
/// final snapshot. Usage figures from a degraded payload are a lower bound.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Completion {
    Valid(ChatResponse),
    Degraded(serde_json::Value),
}

impl Completion {
    /// Validate a raw payload against the chat-completion shape.
    ///
    /// A payload that fails strict decoding but contains a `choices` field is
    /// returned as-is; one without even that fails with a schema error.
    pub fn from_value(value: serde_json::Value) -> Result<Self, UpstreamError> {
        match serde_json::from_value::<ChatResponse>(value.clone()) {
            Ok(resp) => Ok(Self::Valid(resp)),
            Err(err) => {
                if value.get("choices").is_some() {
                    tracing::warn!(
                        error = %err,
                        "Completion failed strict validation, returning raw payload"
                    );
                    Ok(Self::Degraded(value))
                } else {
                    Err(UpstreamError::Schema(err.to_string()))
                }
            }
        }
    }

    /// Usage record, best-effort for degraded payloads (missing fields are 0).
    pub fn usage(&self) -> Usage {
        match self {
            Self::Valid(resp) => resp.usage.clone(),
            Self::Degraded(value) => value
                .get("usage")
                .cloned()
                .and_then(|u| serde_json::from_value(u).ok())
                .unwrap_or_default(),
        }
    }

    /// Assistant text of the first choice, when present.
    pub fn answer(&self) -> Option<String> {
        match self {
            Self::Valid(resp) => resp.choices.first().map(|c| c.message.content.clone()),
            Self::Degraded(value) => value
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
                .map(String::from),
        }
    }

    /// The full payload as raw JSON, for callers that want everything.
    pub fn into_raw(self) -> serde_json::Value {
        match self {
            Self::Valid(resp) => serde_json::to_value(resp).unwrap_or_default(),
            Self::Degraded(value) => value,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_payload() -> serde_json::Value {
        json!({
            "id": "resp-1",
            "model": "sonar",
            "created": 1_700_000_000,
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 34,
                "total_tokens": 46
            },
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": {"role": "assistant", "content": "The answer."}
            }]
        })
    }

    #[test]
    fn test_valid_payload_decodes() {
        let completion = Completion::from_value(valid_payload()).unwrap();
        assert!(matches!(completion, Completion::Valid(_)));
        assert_eq!(completion.answer().as_deref(), Some("The answer."));
        assert_eq!(completion.usage().prompt_tokens, 12);
    }

    #[test]
    fn test_choice_bearing_invalid_payload_degrades() {
        // "choices" present but not the expected shape.
        let payload = json!({"choices": [{"message": {"content": "partial"}}]});
        let completion = Completion::from_value(payload).unwrap();
        assert!(matches!(completion, Completion::Degraded(_)));
        assert_eq!(completion.answer().as_deref(), Some("partial"));
        // Missing usage defaults to zeros.
        assert_eq!(completion.usage().prompt_tokens, 0);
    }

    #[test]
    fn test_payload_without_choices_is_schema_error() {
        let payload = json!({"error": "nope"});
        let err = Completion::from_value(payload).unwrap_err();
        assert!(matches!(err, UpstreamError::Schema(_)));
    }

    #[test]
    fn test_message_content_untagged_roundtrip() {
        let plain: MessageContent = serde_json::from_str("\"hello\"").unwrap();
        assert!(matches!(plain, MessageContent::Text(_)));

        let parts: MessageContent = serde_json::from_value(json!([
            {"type": "text", "text": "hi"},
            {"type": "image_url", "image_url": {"url": "https://x/y.png"}}
        ]))
        .unwrap();
        match parts {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 2),
            MessageContent::Text(_) => panic!("expected chunk list"),
        }
    }

    #[test]
    fn test_job_status_wire_format() {
        let status: JobStatus = serde_json::from_str("\"IN_PROGRESS\"").unwrap();
        assert_eq!(status, JobStatus::InProgress);
        assert!(!status.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
    }

    #[test]
    fn test_unknown_job_status_fails_decoding() {
        let result: Result<JobStatus, _> = serde_json::from_str("\"EXPLODED\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_usage_optional_fields_default() {
        let usage: Usage =
            serde_json::from_value(json!({"prompt_tokens": 5, "completion_tokens": 7})).unwrap();
        assert_eq!(usage.total_tokens, 0);
        assert_eq!(usage.citation_tokens, None);
        assert_eq!(usage.num_search_queries, None);
    }

    #[test]
    fn test_request_skips_unset_options() {
        let request = ChatRequest {
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
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("max_tokens").is_none());
        assert!(value.get("reasoning_effort").is_none());
    }
}
