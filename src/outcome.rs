//! Sled-based outcome log.
//!
//! One record per processed transcript, keyed by a monotonic id so iteration
//! follows write order. A second tree remembers which sources succeeded so
//! later runs can skip them. Workers never touch the database directly: they
//! send records to a single writer task through an [`OutcomeSink`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum OutcomeError {
    #[error("database error: {0}")]
    DbError(#[from] sled::Error),
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("outcome writer has shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// What happened to one transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub source_id: String,
    pub source_name: String,
    pub batch_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: OutcomeStatus,
    /// Failure reason, or a warning attached to a success
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub doc_url: Option<String>,
}

impl OutcomeRecord {
    pub fn success(
        source_id: &str,
        source_name: &str,
        batch_id: &str,
        doc_url: Option<String>,
        warning: Option<String>,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            source_name: source_name.to_string(),
            batch_id: batch_id.to_string(),
            timestamp: Utc::now(),
            status: OutcomeStatus::Success,
            error: warning.unwrap_or_default(),
            doc_url,
        }
    }

    pub fn failure(source_id: &str, source_name: &str, batch_id: &str, error: String) -> Self {
        Self {
            source_id: source_id.to_string(),
            source_name: source_name.to_string(),
            batch_id: batch_id.to_string(),
            timestamp: Utc::now(),
            status: OutcomeStatus::Failed,
            error,
            doc_url: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Persistent outcome log.
#[derive(Clone)]
pub struct OutcomeLog {
    db: sled::Db,
    records: sled::Tree,
    processed: sled::Tree,
}

impl OutcomeLog {
    /// Open or create the log at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OutcomeError> {
        let db = sled::open(path)?;
        let records = db.open_tree("outcomes")?;
        let processed = db.open_tree("processed")?;
        Ok(Self {
            db,
            records,
            processed,
        })
    }

    /// Append a record; successful sources are marked processed.
    pub fn append(&self, record: &OutcomeRecord) -> Result<(), OutcomeError> {
        let key = self.db.generate_id()?.to_be_bytes();
        self.records.insert(key, serde_json::to_vec(record)?)?;
        if record.is_success() {
            self.processed
                .insert(record.source_id.as_bytes(), record.batch_id.as_bytes())?;
        }
        self.db.flush()?;
        Ok(())
    }

    pub fn is_processed(&self, source_id: &str) -> Result<bool, OutcomeError> {
        Ok(self.processed.contains_key(source_id.as_bytes())?)
    }

    /// All records in write order
    pub fn list_all(&self) -> Result<Vec<OutcomeRecord>, OutcomeError> {
        let mut results = Vec::new();
        for item in self.records.iter() {
            let (_key, value) = item?;
            results.push(serde_json::from_slice(&value)?);
        }
        Ok(results)
    }

    pub fn list_batch(&self, batch_id: &str) -> Result<Vec<OutcomeRecord>, OutcomeError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|r| r.batch_id == batch_id)
            .collect())
    }

    /// Get the number of stored records
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Records as JSON lines, optionally limited to one batch.
    pub fn export_jsonl(&self, batch_id: Option<&str>) -> Result<String, OutcomeError> {
        let records = match batch_id {
            Some(id) => self.list_batch(id)?,
            None => self.list_all()?,
        };
        to_jsonl(&records)
    }

    /// Start the writer task. The task ends once every sink is dropped and
    /// yields the number of records written.
    pub fn spawn_writer(&self) -> (OutcomeSink, JoinHandle<usize>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutcomeRecord>();
        let log = self.clone();
        let handle = tokio::spawn(async move {
            let mut written = 0;
            while let Some(record) = rx.recv().await {
                match log.append(&record) {
                    Ok(()) => {
                        written += 1;
                        debug!(source = %record.source_name, status = ?record.status, "outcome recorded");
                    }
                    Err(e) => error!(source = %record.source_name, error = %e, "failed to record outcome"),
                }
            }
            written
        });
        (OutcomeSink { tx }, handle)
    }
}

pub fn to_jsonl(records: &[OutcomeRecord]) -> Result<String, OutcomeError> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

/// Cloneable handle feeding the writer task.
#[derive(Clone)]
pub struct OutcomeSink {
    tx: mpsc::UnboundedSender<OutcomeRecord>,
}

impl OutcomeSink {
    pub fn record(&self, record: OutcomeRecord) -> Result<(), OutcomeError> {
        self.tx.send(record).map_err(|_| OutcomeError::Closed)
    }
}
