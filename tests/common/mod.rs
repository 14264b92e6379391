//! Shared in-process fakes for the injected dependencies.
//!
//! The orchestrator only sees the `SonarApi`, `Ledger`, and `JobStore`
//! traits, so the whole protocol can be exercised without a network.
#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use sonargate::ledger::{AuthorizeReceipt, Clause, Ledger, LedgerError};
use sonargate::upstream::types::{AsyncJob, ChatRequest, Completion, JobStatus};
use sonargate::upstream::{SonarApi, UpstreamError};

// ---------------------------------------------------------------------------
// FakeLedger
// ---------------------------------------------------------------------------

/// Ledger fake that records every authorize and settle call.
#[derive(Default)]
pub struct FakeLedger {
    counter: AtomicU64,
    pub authorizations: Mutex<Vec<Vec<Clause>>>,
    pub settlements: Mutex<Vec<(String, Vec<Clause>)>>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authorized(&self) -> Vec<Vec<Clause>> {
        self.authorizations.lock().unwrap().clone()
    }

    pub fn settled(&self) -> Vec<(String, Vec<Clause>)> {
        self.settlements.lock().unwrap().clone()
    }
}

impl Ledger for FakeLedger {
    fn authorize(
        &self,
        clauses: Vec<Clause>,
    ) -> Pin<Box<dyn Future<Output = Result<AuthorizeReceipt, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let total_amount = clauses.iter().map(|c| c.amount).sum();
            self.authorizations.lock().unwrap().push(clauses);
            Ok(AuthorizeReceipt {
                transaction_id: format!("tx-{n}"),
                total_amount,
            })
        })
    }

    fn settle(
        &self,
        transaction_id: &str,
        clauses: Vec<Clause>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let transaction_id = transaction_id.to_string();
        Box::pin(async move {
            self.settlements
                .lock()
                .unwrap()
                .push((transaction_id, clauses));
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// FakeSonar
// ---------------------------------------------------------------------------

/// What the fake upstream should do on a chat-completion call.
pub enum ChatBehavior {
    /// Validate and return the given payload.
    Respond(serde_json::Value),
    /// Fail with an HTTP status.
    FailHttp(u16),
}

/// Upstream fake with a programmable chat behavior and job state.
pub struct FakeSonar {
    pub chat: ChatBehavior,
    pub job: Mutex<AsyncJob>,
    pub chat_calls: AtomicU64,
    pub poll_calls: AtomicU64,
}

impl FakeSonar {
    pub fn with_chat(chat: ChatBehavior) -> Self {
        Self {
            chat,
            job: Mutex::new(job(JobStatus::Created)),
            chat_calls: AtomicU64::new(0),
            poll_calls: AtomicU64::new(0),
        }
    }

    pub fn with_job(job: AsyncJob) -> Self {
        Self {
            chat: ChatBehavior::FailHttp(500),
            job: Mutex::new(job),
            chat_calls: AtomicU64::new(0),
            poll_calls: AtomicU64::new(0),
        }
    }

    /// Swap the job state returned by subsequent polls.
    pub fn set_job(&self, job: AsyncJob) {
        *self.job.lock().unwrap() = job;
    }

    pub fn poll_count(&self) -> u64 {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

impl SonarApi for FakeSonar {
    fn chat_completion(
        &self,
        _request: &ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, UpstreamError>> + Send + '_>> {
        Box::pin(async move {
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            match &self.chat {
                ChatBehavior::Respond(value) => Completion::from_value(value.clone()),
                ChatBehavior::FailHttp(status) => Err(UpstreamError::Http {
                    status: *status,
                    status_text: String::new(),
                    body: "upstream failure".into(),
                }),
            }
        })
    }

    fn create_async_job(
        &self,
        _request: &ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AsyncJob, UpstreamError>> + Send + '_>> {
        Box::pin(async move { Ok(self.job.lock().unwrap().clone()) })
    }

    fn get_async_job(
        &self,
        _id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<AsyncJob, UpstreamError>> + Send + '_>> {
        Box::pin(async move {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.job.lock().unwrap().clone())
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A job descriptor in the given state.
pub fn job(status: JobStatus) -> AsyncJob {
    AsyncJob {
        id: "job-1".into(),
        model: "sonar-deep-research".into(),
        status,
        created_at: chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        started_at: None,
        completed_at: None,
        failed_at: None,
        error_message: None,
        response: None,
    }
}

/// A well-formed chat-completion payload with the given usage numbers.
pub fn completion_payload(
    prompt_tokens: u64,
    completion_tokens: u64,
    content: &str,
) -> serde_json::Value {
    serde_json::json!({
        "id": "resp-1",
        "model": "sonar",
        "created": 1_700_000_000,
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens
        },
        "choices": [{
            "index": 0,
            "finish_reason": "stop",
            "message": {"role": "assistant", "content": content}
        }]
    })
}

/// Look up a clause amount by resource suffix within one clause set.
pub fn amount_for(clauses: &[Clause], suffix: &str) -> u64 {
    clauses
        .iter()
        .find(|c| c.clause_id.ends_with(suffix))
        .map(|c| c.amount)
        .unwrap_or_else(|| panic!("no clause ending in {suffix}"))
}
