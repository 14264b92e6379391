//! Durable transaction-to-job association.
//!
//! A `JobRecord` joins the two halves of the deep-research protocol: it is
//! written once when a job is submitted (keyed by the ledger transaction id)
//! and read on every poll to reconcile actual usage against the original
//! authorization. Records are never deleted by this system; expiry is the
//! store's concern.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::ledger::Clause;
use crate::upstream::types::AsyncJob;

/// The persisted association for one deep-research transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub authorize_clauses: Vec<Clause>,
    pub async_resp: AsyncJob,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt job record for {transaction_id}: {message}")]
    Corrupt {
        transaction_id: String,
        message: String,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Trait for job-record storage backends.
///
/// All implementations must be thread-safe (`Send + Sync`). Values are
/// serialized as JSON text so any text-valued key/value store qualifies.
pub trait JobStore: Send + Sync {
    /// Persist a record under a transaction id (written once).
    fn put(&self, transaction_id: &str, record: &JobRecord) -> Result<(), StoreError>;

    /// Load the record for a transaction id, if any.
    fn get(&self, transaction_id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Name of this storage backend.
    fn name(&self) -> &str;
}

// Blanket implementation for Arc<T>
impl<T: JobStore + ?Sized> JobStore for Arc<T> {
    fn put(&self, transaction_id: &str, record: &JobRecord) -> Result<(), StoreError> {
        (**self).put(transaction_id, record)
    }
    fn get(&self, transaction_id: &str) -> Result<Option<JobRecord>, StoreError> {
        (**self).get(transaction_id)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

/// Job store backed by the SQLite `job_records` table.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl JobStore for SqliteJobStore {
    fn put(&self, transaction_id: &str, record: &JobRecord) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(record).map_err(|e| StoreError::Corrupt {
            transaction_id: transaction_id.to_string(),
            message: e.to_string(),
        })?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO job_records (transaction_id, record) VALUES (?1, ?2) \
                 ON CONFLICT(transaction_id) DO UPDATE SET record = ?2",
                rusqlite::params![transaction_id, serialized],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn get(&self, transaction_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let serialized: Option<String> = self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT record FROM job_records WHERE transaction_id = ?1",
                rusqlite::params![transaction_id],
                |row| row.get(0),
            );
            match result {
                Ok(text) => Ok(Some(text)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })?;

        serialized
            .map(|text| {
                serde_json::from_str(&text).map_err(|e| StoreError::Corrupt {
                    transaction_id: transaction_id.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-memory job store.
///
/// Uses `Arc<RwLock<HashMap>>` for thread-safe access. Useful for testing
/// and ephemeral deployments; records do not survive a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("lock poisoned").is_empty()
    }
}

impl JobStore for MemoryJobStore {
    fn put(&self, transaction_id: &str, record: &JobRecord) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(record).map_err(|e| StoreError::Corrupt {
            transaction_id: transaction_id.to_string(),
            message: e.to_string(),
        })?;
        let mut guard = self.inner.write().expect("lock poisoned");
        guard.insert(transaction_id.to_string(), serialized);
        Ok(())
    }

    fn get(&self, transaction_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let guard = self.inner.read().expect("lock poisoned");
        guard
            .get(transaction_id)
            .map(|text| {
                serde_json::from_str(text).map_err(|e| StoreError::Corrupt {
                    transaction_id: transaction_id.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
