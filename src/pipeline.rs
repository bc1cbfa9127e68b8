//! Batch processing of transcript folders.
//!
//! For each source folder: list transcripts not yet processed, create a
//! timestamped archive folder, then run every transcript through a bounded
//! worker pool. A failure is recorded against its own transcript and never
//! stops the batch.

use crate::agent::{self, Backoff, CompletionService};
use crate::builder::DocBuilder;
use crate::error::ItemError;
use crate::normalize::normalize;
use crate::outcome::{self, OutcomeLog, OutcomeRecord, OutcomeSink};
use crate::store::{self, BlobStore, FileEntry, JSON_MIME};
use crate::summary::{CanonicalSummary, NO_UPDATES};
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const LOGS_FOLDER: &str = "logs";
const LOG_FILE: &str = "outcomes.jsonl";
const MAX_STEM_CHARS: usize = 80;

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^\w\s-]").expect("valid regex");
    static ref SEPARATORS: Regex = Regex::new(r"[\s-]+").expect("valid regex");
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub workers: usize,
    pub source_folders: Vec<String>,
    pub summary_folder: String,
    pub archive_name: String,
    pub backoff: Backoff,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: 5,
            source_folders: Vec::new(),
            summary_folder: String::new(),
            archive_name: "transcript_archive".to_string(),
            backoff: Backoff::default(),
        }
    }
}

/// Totals for one source folder.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub folder: String,
    pub batch_id: String,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<OutcomeRecord>,
}

impl BatchReport {
    pub fn summary_line(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} skipped",
            self.succeeded, self.failed, self.skipped
        )
    }
}

struct ItemSuccess {
    doc_url: Option<String>,
    warning: Option<String>,
}

pub struct Pipeline {
    store: Arc<dyn BlobStore>,
    completion: Arc<dyn CompletionService>,
    builder: Option<Arc<DocBuilder>>,
    log: OutcomeLog,
    instructions: String,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn BlobStore>,
        completion: Arc<dyn CompletionService>,
        log: OutcomeLog,
        instructions: String,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            completion,
            builder: None,
            log,
            instructions,
            options,
        }
    }

    pub fn with_builder(mut self, builder: DocBuilder) -> Self {
        self.builder = Some(Arc::new(builder));
        self
    }

    /// Process every configured source folder in turn.
    pub async fn run(self: Arc<Self>) -> Vec<BatchReport> {
        let (sink, writer) = self.log.spawn_writer();
        let mut reports = Vec::new();
        for folder in &self.options.source_folders {
            match self.clone().run_folder(folder, &sink).await {
                Ok(Some(report)) => {
                    info!(folder = %folder, batch = %report.batch_id, "{}", report.summary_line());
                    reports.push(report);
                }
                Ok(None) => info!(folder = %folder, "no new transcripts"),
                Err(e) => error!(folder = %folder, error = %e, "folder skipped"),
            }
        }
        drop(sink);
        match writer.await {
            Ok(written) => info!(written, "outcome log flushed"),
            Err(e) => error!(error = %e, "outcome writer failed"),
        }
        reports
    }

    async fn run_folder(
        self: Arc<Self>,
        folder: &str,
        sink: &OutcomeSink,
    ) -> Result<Option<BatchReport>, ItemError> {
        let listed = self
            .store
            .list_children(folder, Some(self.store.transcript_mime()))
            .await?;

        let mut pending = Vec::new();
        let mut skipped = 0;
        for entry in listed {
            match self.log.is_processed(&entry.id) {
                Ok(true) => skipped += 1,
                Ok(false) => pending.push(entry),
                Err(e) => {
                    warn!(source = %entry.name, error = %e, "outcome lookup failed, processing anyway");
                    pending.push(entry);
                }
            }
        }
        if pending.is_empty() {
            return Ok(None);
        }

        let archive = store::ensure_folder(self.store.as_ref(), folder, &self.options.archive_name).await?;
        let batch_name = format!("processed-transcripts_{}", Utc::now().format("%Y%m%d-%H%M%S"));
        let processed_folder = self.store.create_folder(&batch_name, &archive).await?;
        let logs_folder = self.store.create_folder(LOGS_FOLDER, &processed_folder).await?;
        let batch_id = uuid::Uuid::new_v4().to_string();
        info!(folder, batch = %batch_id, count = pending.len(), archive = %batch_name, "starting batch");

        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let processed_folder = Arc::new(processed_folder);
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();
        for entry in pending {
            let pipeline = self.clone();
            let semaphore = semaphore.clone();
            let processed_folder = processed_folder.clone();
            let batch_id = batch_id.clone();
            let item = entry.clone();
            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                pipeline.process_item(&item, &processed_folder, &batch_id).await
            });
            in_flight.insert(handle.id(), entry);
        }

        let mut report = BatchReport {
            folder: folder.to_string(),
            batch_id: batch_id.clone(),
            skipped,
            ..Default::default()
        };
        while let Some(joined) = tasks.join_next_with_id().await {
            let record = match joined {
                Ok((id, record)) => {
                    in_flight.remove(&id);
                    record
                }
                Err(e) => {
                    let Some(entry) = in_flight.remove(&e.id()) else {
                        error!(error = %e, "unknown worker stopped");
                        continue;
                    };
                    let failure = ItemError::WorkerPanicked(e.to_string());
                    error!(source = %entry.name, reason = failure.reason(), error = %failure, "transcript failed");
                    OutcomeRecord::failure(
                        &entry.id,
                        &entry.name,
                        &batch_id,
                        format!("{}: {}", failure.reason(), failure),
                    )
                }
            };
            if record.is_success() {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            if let Err(e) = sink.record(record.clone()) {
                error!(error = %e, "outcome not recorded");
            }
            report.outcomes.push(record);
        }

        match outcome::to_jsonl(&report.outcomes) {
            Ok(jsonl) => {
                if let Err(e) = self
                    .store
                    .create(LOG_FILE, jsonl.as_bytes(), JSON_MIME, &logs_folder)
                    .await
                {
                    warn!(error = %e, "batch log not uploaded");
                }
            }
            Err(e) => warn!(error = %e, "batch log not serialized"),
        }
        Ok(Some(report))
    }

    /// Run one transcript end to end. Never fails: errors become records.
    pub async fn process_item(
        &self,
        entry: &FileEntry,
        processed_folder: &str,
        batch_id: &str,
    ) -> OutcomeRecord {
        match self.try_process(entry, processed_folder).await {
            Ok(done) => {
                info!(source = %entry.name, "transcript processed");
                OutcomeRecord::success(&entry.id, &entry.name, batch_id, done.doc_url, done.warning)
            }
            Err(e) => {
                error!(source = %entry.name, reason = e.reason(), error = %e, "transcript failed");
                OutcomeRecord::failure(
                    &entry.id,
                    &entry.name,
                    batch_id,
                    format!("{}: {}", e.reason(), e),
                )
            }
        }
    }

    async fn try_process(
        &self,
        entry: &FileEntry,
        processed_folder: &str,
    ) -> Result<ItemSuccess, ItemError> {
        let transcript = self.store.get_content(&entry.id).await?;
        if transcript.trim().is_empty() {
            return Err(ItemError::MalformedInput("transcript is empty".into()));
        }

        let reply = agent::complete_with_retry(
            self.completion.as_ref(),
            &self.instructions,
            &transcript,
            self.options.backoff,
        )
        .await?;
        let mut raw = agent::parse_reply(&reply)?;
        if let Value::Object(map) = &mut raw {
            map.insert(
                "transcript_link".to_string(),
                Value::String(self.store.file_url(&entry.id)),
            );
        }
        let mut summary = normalize(&raw);

        let file_name = summary_file_name(&summary, &entry.name);
        let body = serde_json::to_vec_pretty(&summary)
            .map_err(|e| ItemError::MalformedInput(e.to_string()))?;
        let summary_id = self
            .store
            .create(&file_name, &body, JSON_MIME, &self.options.summary_folder)
            .await?;
        summary.summary_link = self.store.file_url(&summary_id);

        let mut done = ItemSuccess {
            doc_url: None,
            warning: None,
        };
        if let Some(builder) = &self.builder {
            let built = builder.try_build(&summary).await.map_err(|f| ItemError::from(f.source))?;
            done.doc_url = Some(built.doc_url);
            done.warning = built.warning;
        }

        self.store.move_file(&entry.id, processed_folder).await?;
        Ok(done)
    }
}

/// `{date}_{title}.json` with the title reduced to filename-safe characters.
pub fn summary_file_name(summary: &CanonicalSummary, fallback_title: &str) -> String {
    let title = if summary.title.trim().is_empty() || summary.title == NO_UPDATES {
        fallback_title
    } else {
        summary.title.as_str()
    };
    let date = if summary.date == NO_UPDATES {
        Utc::now().format("%Y-%m-%d").to_string()
    } else {
        summary.date.clone()
    };
    format!("{}_{}.json", date, sanitize(title))
}

pub fn sanitize(title: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(title.trim(), "");
    let joined = SEPARATORS.replace_all(cleaned.trim(), "_");
    let stem: String = joined.chars().take(MAX_STEM_CHARS).collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem.to_string()
    }
}
