//! Operation orchestrator.
//!
//! Sequences every exposed operation through the accounting protocol:
//! estimate -> authorize -> invoke upstream -> reconcile actual usage ->
//! settle. Synchronous operations settle within one request lifecycle;
//! deep-research splits authorize and settle across two independently
//! invoked operations joined by a persisted [`JobRecord`].
//!
//! No retries anywhere in this module: a failed upstream, ledger, or store
//! call surfaces immediately. Retrying a side-effecting financial call risks
//! duplicate ledger effects.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::estimate::{
    estimate_input_tokens, estimate_input_tokens_from_messages, estimate_search_queries,
};
use crate::ledger::{AuthorizeReceipt, Clause, Ledger, Resource};
use crate::store::{JobRecord, JobStore};
use crate::upstream::types::{
    ChatMessage, ChatRequest, Completion, JobStatus, MessageContent, MessageRole, ReasoningEffort,
    Usage,
};
use crate::upstream::{SonarApi, UpstreamError};

/// Authorized citation-token floor for deep research.
const CITATION_TOKEN_FLOOR: u64 = 50_000;

/// Authorized reasoning-token floor for deep research.
const REASONING_TOKEN_FLOOR: u64 = 100_000;

// ---------------------------------------------------------------------------
// Operation parameters and results
// ---------------------------------------------------------------------------

/// Input for the simple-prompt operation.
#[derive(Debug, Clone, Deserialize)]
pub struct AskParams {
    pub query: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub search_domain_filter: Option<Vec<String>>,
    #[serde(default)]
    pub search_recency_filter: Option<String>,
    #[serde(default)]
    pub return_related_questions: Option<bool>,
    #[serde(default)]
    pub return_images: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResult {
    pub answer: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionsResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub raw: serde_json::Value,
}

/// Input for the deep-research create operation. The model is fixed to the
/// configured deep-research variant.
#[derive(Debug, Clone, Deserialize)]
pub struct DeepResearchParams {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub search_domain_filter: Option<Vec<String>>,
    #[serde(default)]
    pub search_recency_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeepResearchCreated {
    pub request: crate::upstream::types::AsyncJob,
    pub transaction_id: String,
    pub total_amount: u64,
    pub authorized_caps: Vec<Clause>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeepResearchStatus {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub settled: bool,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Model names and caps the orchestrator fills in when the caller omits them.
#[derive(Debug, Clone)]
pub struct MeterSettings {
    pub ask_model: String,
    pub deep_research_model: String,
    pub default_max_tokens: u32,
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            ask_model: "sonar".into(),
            deep_research_model: "sonar-deep-research".into(),
            default_max_tokens: 8_192,
        }
    }
}

// ---------------------------------------------------------------------------
// Meter
// ---------------------------------------------------------------------------

/// The protocol core. Owns no state of its own; everything cross-invocation
/// lives behind the injected ledger and store.
pub struct Meter {
    upstream: Arc<dyn SonarApi>,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn JobStore>,
    settings: MeterSettings,
}

impl Meter {
    pub fn new(
        upstream: Arc<dyn SonarApi>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn JobStore>,
        settings: MeterSettings,
    ) -> Self {
        Self {
            upstream,
            ledger,
            store,
            settings,
        }
    }

    /// Ask: a single user prompt, streamed completion.
    pub async fn ask(&self, params: AskParams) -> Result<AskResult, AppError> {
        let request_id = Uuid::new_v4().to_string();
        let model = params
            .model
            .clone()
            .unwrap_or_else(|| self.settings.ask_model.clone());
        let max_tokens = params.max_tokens.unwrap_or(self.settings.default_max_tokens);
        let estimated_input = estimate_input_tokens(&params.query);

        let authorized = vec![
            Clause::new(&model, Resource::InputToken, estimated_input),
            Clause::new(&model, Resource::OutputToken, u64::from(max_tokens)),
        ];
        let receipt = self.authorize(&request_id, &model, authorized).await?;

        let request = ChatRequest {
            model: model.clone(),
            messages: vec![ChatMessage {
                role: MessageRole::User,
                content: MessageContent::Text(params.query.clone()),
            }],
            stream: true,
            max_tokens: Some(max_tokens),
            temperature: params.temperature,
            top_p: params.top_p,
            reasoning_effort: None,
            search_domain_filter: params.search_domain_filter,
            search_recency_filter: params.search_recency_filter,
            return_related_questions: params.return_related_questions,
            return_images: params.return_images,
        };

        let completion = self
            .call_upstream(&receipt, self.upstream.chat_completion(&request))
            .await?;

        let usage = completion.usage();
        let settlement = vec![
            Clause::new(
                &model,
                Resource::InputToken,
                estimated_input.min(usage.prompt_tokens),
            ),
            Clause::new(
                &model,
                Resource::OutputToken,
                usage.completion_tokens.min(u64::from(max_tokens)),
            ),
        ];
        self.settle(&receipt.transaction_id, settlement).await?;

        Ok(AskResult {
            answer: completion.answer(),
            raw: completion.into_raw(),
        })
    }

    /// Raw chat completions: caller-supplied message list and parameter set,
    /// non-streamed.
    pub async fn chat_completions(
        &self,
        mut request: ChatRequest,
    ) -> Result<ChatCompletionsResult, AppError> {
        let request_id = Uuid::new_v4().to_string();
        request.stream = false;

        let model = request.model.clone();
        let max_tokens = request
            .max_tokens
            .unwrap_or(self.settings.default_max_tokens);
        let estimated_input = estimate_input_tokens_from_messages(&request.messages);

        let authorized = vec![
            Clause::new(&model, Resource::InputToken, estimated_input),
            Clause::new(&model, Resource::OutputToken, u64::from(max_tokens)),
        ];
        let receipt = self.authorize(&request_id, &model, authorized).await?;

        let completion = self
            .call_upstream(&receipt, self.upstream.chat_completion(&request))
            .await?;

        let usage = completion.usage();
        let settlement = vec![
            Clause::new(
                &model,
                Resource::InputToken,
                estimated_input.min(usage.prompt_tokens),
            ),
            Clause::new(
                &model,
                Resource::OutputToken,
                usage.completion_tokens.min(u64::from(max_tokens)),
            ),
        ];
        self.settle(&receipt.transaction_id, settlement).await?;

        Ok(ChatCompletionsResult {
            answer: completion.answer(),
            raw: completion.into_raw(),
        })
    }

    /// Deep research, first half: authorize, submit the async job, persist
    /// the record joining the two. Settlement is deferred to the poll side.
    pub async fn deep_research(
        &self,
        params: DeepResearchParams,
    ) -> Result<DeepResearchCreated, AppError> {
        let request_id = Uuid::new_v4().to_string();
        let model = self.settings.deep_research_model.clone();
        let max_tokens = params.max_tokens.unwrap_or(self.settings.default_max_tokens);
        let output_cap = u64::from(max_tokens);
        let estimated_input = estimate_input_tokens_from_messages(&params.messages);
        let search_queries = estimate_search_queries(params.reasoning_effort);

        let authorized = vec![
            Clause::new(&model, Resource::InputToken, estimated_input),
            Clause::new(&model, Resource::OutputToken, output_cap),
            Clause::new(
                &model,
                Resource::CitationToken,
                output_cap.max(CITATION_TOKEN_FLOOR),
            ),
            Clause::new(
                &model,
                Resource::ReasoningToken,
                output_cap.max(REASONING_TOKEN_FLOOR),
            ),
            Clause::new(&model, Resource::SearchQuery, search_queries),
        ];
        let receipt = self.authorize(&request_id, &model, authorized.clone()).await?;

        let request = ChatRequest {
            model,
            messages: params.messages,
            stream: false,
            max_tokens: Some(max_tokens),
            temperature: None,
            top_p: None,
            reasoning_effort: params.reasoning_effort,
            search_domain_filter: params.search_domain_filter,
            search_recency_filter: params.search_recency_filter,
            return_related_questions: None,
            return_images: None,
        };

        let job = self
            .call_upstream(&receipt, self.upstream.create_async_job(&request))
            .await?;

        let record = JobRecord {
            authorize_clauses: authorized.clone(),
            async_resp: job.clone(),
        };
        self.store.put(&receipt.transaction_id, &record)?;

        tracing::info!(
            request_id = %request_id,
            transaction_id = %receipt.transaction_id,
            job_id = %job.id,
            "Deep-research job submitted, settlement deferred"
        );

        Ok(DeepResearchCreated {
            request: job,
            transaction_id: receipt.transaction_id,
            total_amount: receipt.total_amount,
            authorized_caps: authorized,
        })
    }

    /// Deep research, second half: look up the original authorization, fetch
    /// the current job state, settle once a terminal state is observed.
    ///
    /// The record is read, never mutated: guarding against a double-poll race
    /// settling twice is the ledger's contract, not this component's.
    pub async fn deep_research_result(
        &self,
        transaction_id: &str,
    ) -> Result<DeepResearchStatus, AppError> {
        let record = self
            .store
            .get(transaction_id)?
            .ok_or_else(|| AppError::UnknownTransaction(transaction_id.to_string()))?;

        let job = self.upstream.get_async_job(&record.async_resp.id).await?;

        match job.status {
            JobStatus::Created | JobStatus::InProgress => {
                tracing::debug!(
                    transaction_id = %transaction_id,
                    status = ?job.status,
                    "Deep-research job still pending"
                );
                Ok(DeepResearchStatus {
                    status: job.status,
                    response: None,
                    error_message: None,
                    settled: false,
                })
            }
            JobStatus::Failed => {
                self.settle(transaction_id, refund(&record.authorize_clauses))
                    .await?;
                Ok(DeepResearchStatus {
                    status: job.status,
                    response: None,
                    error_message: job.error_message,
                    settled: true,
                })
            }
            JobStatus::Completed => match job.response {
                // Completed but empty: treat as zero usage, full refund.
                None => {
                    self.settle(transaction_id, refund(&record.authorize_clauses))
                        .await?;
                    Ok(DeepResearchStatus {
                        status: job.status,
                        response: None,
                        error_message: None,
                        settled: true,
                    })
                }
                Some(value) => {
                    let completion = Completion::from_value(value)?;
                    let usage = completion.usage();
                    let settlement = reconcile_completed(&record.authorize_clauses, &usage);
                    self.settle(transaction_id, settlement).await?;
                    Ok(DeepResearchStatus {
                        status: job.status,
                        response: Some(completion.into_raw()),
                        error_message: None,
                        settled: true,
                    })
                }
            },
        }
    }

    // -- protocol steps ------------------------------------------------------

    async fn authorize(
        &self,
        request_id: &str,
        model: &str,
        clauses: Vec<Clause>,
    ) -> Result<AuthorizeReceipt, AppError> {
        let receipt = self.ledger.authorize(clauses).await?;
        tracing::info!(
            request_id = %request_id,
            transaction_id = %receipt.transaction_id,
            model = %model,
            total_amount = receipt.total_amount,
            "Authorized"
        );
        Ok(receipt)
    }

    /// Invoke the upstream after authorization. On failure the transaction is
    /// left authorized-but-unsettled (the ledger expires stale
    /// authorizations); the orphaned id is logged for reconciliation.
    async fn call_upstream<T>(
        &self,
        receipt: &AuthorizeReceipt,
        call: impl Future<Output = Result<T, UpstreamError>>,
    ) -> Result<T, AppError> {
        match call.await {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!(
                    transaction_id = %receipt.transaction_id,
                    error = %err,
                    "Upstream call failed after authorization, transaction left unsettled"
                );
                Err(err.into())
            }
        }
    }

    async fn settle(
        &self,
        transaction_id: &str,
        clauses: Vec<Clause>,
    ) -> Result<(), AppError> {
        let total: u64 = clauses.iter().map(|c| c.amount).sum();
        self.ledger.settle(transaction_id, clauses).await?;
        tracing::info!(
            transaction_id = %transaction_id,
            total = total,
            "Settled"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Settlement clauses for a completed deep-research job: actual usage clamped
/// to the authorized amount per clause. Output tokens are the exception and
/// settle at the actual value; no independent cap was tracked beyond the
/// authorization.
fn reconcile_completed(authorized: &[Clause], usage: &Usage) -> Vec<Clause> {
    authorized
        .iter()
        .map(|clause| {
            let amount = match Resource::from_clause_id(&clause.clause_id) {
                Some(Resource::InputToken) => usage.prompt_tokens.min(clause.amount),
                Some(Resource::OutputToken) => usage.completion_tokens,
                Some(Resource::CitationToken) => {
                    usage.citation_tokens.unwrap_or(0).min(clause.amount)
                }
                Some(Resource::ReasoningToken) => {
                    usage.reasoning_tokens.unwrap_or(0).min(clause.amount)
                }
                Some(Resource::SearchQuery) => {
                    usage.num_search_queries.unwrap_or(0).min(clause.amount)
                }
                None => 0,
            };
            Clause {
                clause_id: clause.clause_id.clone(),
                amount,
            }
        })
        .collect()
}

/// Full refund: every authorized clause settled at 0.
fn refund(authorized: &[Clause]) -> Vec<Clause> {
    authorized
        .iter()
        .map(|clause| Clause {
            clause_id: clause.clause_id.clone(),
            amount: 0,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn authorized() -> Vec<Clause> {
        let model = "sonar-deep-research";
        vec![
            Clause::new(model, Resource::InputToken, 100),
            Clause::new(model, Resource::OutputToken, 8_192),
            Clause::new(model, Resource::CitationToken, 50_000),
            Clause::new(model, Resource::ReasoningToken, 100_000),
            Clause::new(model, Resource::SearchQuery, 30),
        ]
    }

    fn amount_for(clauses: &[Clause], resource: Resource) -> u64 {
        clauses
            .iter()
            .find(|c| Resource::from_clause_id(&c.clause_id) == Some(resource))
            .map(|c| c.amount)
            .expect("clause missing")
    }

    #[test]
    fn test_refund_zeroes_every_clause() {
        let refunded = refund(&authorized());
        assert_eq!(refunded.len(), 5);
        assert!(refunded.iter().all(|c| c.amount == 0));
        // Ids are preserved.
        assert_eq!(refunded[0].clause_id, "sonar-deep-research:input-token");
    }

    #[test]
    fn test_reconcile_clamps_to_authorized() {
        let usage = Usage {
            prompt_tokens: 250, // above the 100 authorized
            completion_tokens: 4_000,
            total_tokens: 4_250,
            citation_tokens: Some(60_000),  // above the 50k authorized
            reasoning_tokens: Some(20_000), // below the 100k authorized
            num_search_queries: Some(45),   // above the 30 authorized
        };
        let settled = reconcile_completed(&authorized(), &usage);

        assert_eq!(amount_for(&settled, Resource::InputToken), 100);
        assert_eq!(amount_for(&settled, Resource::CitationToken), 50_000);
        assert_eq!(amount_for(&settled, Resource::ReasoningToken), 20_000);
        assert_eq!(amount_for(&settled, Resource::SearchQuery), 30);
    }

    #[test]
    fn test_reconcile_output_settles_actual() {
        let usage = Usage {
            completion_tokens: 9_999, // above the 8192 authorized
            ..Usage::default()
        };
        let settled = reconcile_completed(&authorized(), &usage);
        assert_eq!(amount_for(&settled, Resource::OutputToken), 9_999);
    }

    #[test]
    fn test_reconcile_missing_counters_default_to_zero() {
        let usage = Usage {
            prompt_tokens: 50,
            completion_tokens: 10,
            total_tokens: 60,
            citation_tokens: None,
            reasoning_tokens: None,
            num_search_queries: None,
        };
        let settled = reconcile_completed(&authorized(), &usage);
        assert_eq!(amount_for(&settled, Resource::InputToken), 50);
        assert_eq!(amount_for(&settled, Resource::CitationToken), 0);
        assert_eq!(amount_for(&settled, Resource::ReasoningToken), 0);
        assert_eq!(amount_for(&settled, Resource::SearchQuery), 0);
    }

    #[test]
    fn test_default_settings() {
        let settings = MeterSettings::default();
        assert_eq!(settings.ask_model, "sonar");
        assert_eq!(settings.deep_research_model, "sonar-deep-research");
        assert_eq!(settings.default_max_tokens, 8_192);
    }
}
