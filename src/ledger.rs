//! Usage-contract ledger gateway.
//!
//! The ledger is an external service: `authorize` reserves an upper-bound
//! spend against a set of clauses and returns a transaction id, `settle`
//! reports actual consumption against that transaction, closing it. Every
//! authorized transaction must be settled exactly once; the ledger itself is
//! the authority that rejects duplicate settlement.

use std::future::Future;
use std::pin::Pin;

use reqwest::Client;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Clauses
// ---------------------------------------------------------------------------

/// Priced resource kinds. The wire string is the second half of a clause id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    InputToken,
    OutputToken,
    CitationToken,
    ReasoningToken,
    SearchQuery,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InputToken => "input-token",
            Self::OutputToken => "output-token",
            Self::CitationToken => "citation-token",
            Self::ReasoningToken => "reasoning-token",
            Self::SearchQuery => "search-query",
        }
    }

    /// Parse the resource half of a composite clause id.
    pub fn from_clause_id(clause_id: &str) -> Option<Self> {
        let (_, resource) = clause_id.rsplit_once(':')?;
        match resource {
            "input-token" => Some(Self::InputToken),
            "output-token" => Some(Self::OutputToken),
            "citation-token" => Some(Self::CitationToken),
            "reasoning-token" => Some(Self::ReasoningToken),
            "search-query" => Some(Self::SearchQuery),
            _ => None,
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single priced line item, keyed `"<model>:<resource>"`. Immutable once
/// constructed; keys within one authorize/settle call must be unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    pub clause_id: String,
    pub amount: u64,
}

impl Clause {
    pub fn new(model: &str, resource: Resource, amount: u64) -> Self {
        Self {
            clause_id: format!("{model}:{resource}"),
            amount,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
struct AuthorizeRequest {
    clauses: Vec<Clause>,
}

/// Result of a successful authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeReceipt {
    pub transaction_id: String,
    pub total_amount: u64,
}

#[derive(Debug, Clone, Serialize)]
struct SettleRequest {
    transaction_id: String,
    vendor_id: String,
    clauses: Vec<Clause>,
}

// ---------------------------------------------------------------------------
// LedgerError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Ledger response did not match the expected shape: {0}")]
    Schema(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Ledger trait
// ---------------------------------------------------------------------------

/// Gateway to the external budget ledger.
///
/// Boxed futures keep the trait dyn-compatible; the orchestrator holds an
/// `Arc<dyn Ledger>` so tests can substitute a fake. No retries anywhere:
/// retrying an authorize or settle risks duplicate ledger effects.
pub trait Ledger: Send + Sync {
    /// Reserve an upper-bound spend. Returns the transaction id and the
    /// priced total of all clauses.
    fn authorize(
        &self,
        clauses: Vec<Clause>,
    ) -> Pin<Box<dyn Future<Output = Result<AuthorizeReceipt, LedgerError>> + Send + '_>>;

    /// Report actual consumption against a previously authorized
    /// transaction. The return body is unused by this system.
    fn settle(
        &self,
        transaction_id: &str,
        clauses: Vec<Clause>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Ledger gateway backed by the contract service's HTTP API.
pub struct HttpLedger {
    http: Client,
    base_url: String,
    vendor_id: String,
}

impl HttpLedger {
    pub fn new(base_url: impl Into<String>, vendor_id: impl Into<String>) -> Self {
        Self {
            http: crate::net::build_client(),
            base_url: base_url.into(),
            vendor_id: vendor_id.into(),
        }
    }

    async fn post_checked(
        &self,
        url: String,
        body: &impl Serialize,
    ) -> Result<String, LedgerError> {
        let resp = self.http.post(url).json(body).send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(LedgerError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(text)
    }
}

impl Ledger for HttpLedger {
    fn authorize(
        &self,
        clauses: Vec<Clause>,
    ) -> Pin<Box<dyn Future<Output = Result<AuthorizeReceipt, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let body = AuthorizeRequest { clauses };
            let text = self
                .post_checked(format!("{}/contract/authorize", self.base_url), &body)
                .await?;
            serde_json::from_str(&text).map_err(|e| LedgerError::Schema(e.to_string()))
        })
    }

    fn settle(
        &self,
        transaction_id: &str,
        clauses: Vec<Clause>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let transaction_id = transaction_id.to_string();
        Box::pin(async move {
            let body = SettleRequest {
                transaction_id,
                vendor_id: self.vendor_id.clone(),
                clauses,
            };
            self.post_checked(format!("{}/contract/settle", self.base_url), &body)
                .await?;
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
