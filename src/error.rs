//! Per-item failure taxonomy.
//!
//! Every failure while processing one transcript ends up as an [`ItemError`].
//! Only the completion variant has been retried by the time it surfaces; the
//! batch loop records the rest and moves on.

use crate::agent::AgentError;
use crate::builder::BuildError;
use crate::document::DocumentError;
use crate::store::StoreError;
use crate::table::TableError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ItemError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("missing anchor: {0}")]
    MissingAnchor(String),
    #[error("offset computation failed: {0}")]
    OffsetComputation(String),
    #[error("store error: {0}")]
    StoreIo(String),
    #[error("completion failed: {0}")]
    Completion(String),
    #[error("worker stopped unexpectedly: {0}")]
    WorkerPanicked(String),
}

impl ItemError {
    /// Short machine-readable reason recorded in the outcome log.
    pub fn reason(&self) -> &'static str {
        match self {
            ItemError::MalformedInput(_) => "parse",
            ItemError::MissingAnchor(_) => "missing_anchor",
            ItemError::OffsetComputation(_) => "offset",
            ItemError::StoreIo(_) => "store",
            ItemError::Completion(_) => "completion",
            ItemError::WorkerPanicked(_) => "worker_panicked",
        }
    }
}

impl From<StoreError> for ItemError {
    fn from(e: StoreError) -> Self {
        ItemError::StoreIo(e.to_string())
    }
}

impl From<AgentError> for ItemError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::NoJson | AgentError::ParseError(_) => ItemError::MalformedInput(e.to_string()),
            other => ItemError::Completion(other.to_string()),
        }
    }
}

impl From<DocumentError> for ItemError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::InvalidOffset { .. }
            | DocumentError::InvalidRange { .. }
            | DocumentError::EmptyInsert(_)
            | DocumentError::InvalidTable { .. } => ItemError::OffsetComputation(e.to_string()),
            DocumentError::NotFound(_) | DocumentError::Remote(_) | DocumentError::Unavailable(_) => {
                ItemError::StoreIo(e.to_string())
            }
        }
    }
}

impl From<TableError> for ItemError {
    fn from(e: TableError) -> Self {
        match e {
            TableError::Anchor(anchor) => ItemError::MissingAnchor(anchor.to_string()),
            TableError::Document(doc) => doc.into(),
            other => ItemError::OffsetComputation(other.to_string()),
        }
    }
}

impl From<BuildError> for ItemError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::MissingAnchor(marker) => ItemError::MissingAnchor(marker),
            BuildError::Table(table) => table.into(),
            BuildError::Document(doc) => doc.into(),
        }
    }
}
