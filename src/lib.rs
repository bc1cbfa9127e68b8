//! # Minuta
//!
//! Turns meeting transcripts into structured summaries and formatted documents.
//!
//! ## Features
//!
//! - **Tolerant Normalization**: Any JSON the model returns becomes a fully populated `CanonicalSummary`
//! - **Offset-Safe Rendering**: Outline, takeaways and action tables land in template documents without index drift
//! - **Batch Pipeline**: Bounded worker pool with per-item failure isolation and a sled outcome log
//! - **Pluggable Backends**: Local filesystem or remote drive storage, in-memory or remote documents

pub mod agent;
pub mod builder;
pub mod config;
pub mod document;
pub mod error;
pub mod google;
pub mod logging;
pub mod mapping;
pub mod normalize;
pub mod outcome;
pub mod pipeline;
pub mod planner;
pub mod resolver;
pub mod store;
pub mod summary;
pub mod table;

pub use builder::{BuildOutcome, DocBuilder};
pub use config::Config;
pub use document::{DocumentService, MemoryDocs, MemoryDocument};
pub use error::ItemError;
pub use mapping::SectionMapping;
pub use normalize::normalize;
pub use outcome::OutcomeLog;
pub use pipeline::Pipeline;
pub use store::{BlobStore, LocalStore};
pub use summary::CanonicalSummary;
