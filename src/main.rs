//! Minuta CLI - meeting transcripts into structured summaries and documents
//!
//! The application logic is contained in lib.rs, and this file is responsible
//! for parsing arguments and handling top-level errors.

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use minuta::agent::{self, Backoff, GeminiCompletion};
use minuta::config::StoreBackend;
use minuta::document::DocumentService;
use minuta::google::GoogleClient;
use minuta::mapping::DEFAULT_TEMPLATE;
use minuta::outcome::OutcomeStatus;
use minuta::pipeline::PipelineOptions;
use minuta::store::TEXT_MIME;
use minuta::{
    logging, normalize, resolver, BlobStore, Config, DocBuilder, LocalStore, MemoryDocs,
    MemoryDocument, OutcomeLog, Pipeline, SectionMapping,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "minuta")]
#[command(author, version, about = "Meeting transcripts into structured summaries and documents", long_about = None)]
struct Cli {
    /// Config file (defaults to minuta.toml, then ~/.config/minuta/minuta.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process new transcripts in the configured source folders
    Process {
        /// Override the configured source folders
        #[arg(long = "folder")]
        folders: Vec<String>,
    },
    /// Render a summary JSON file into a document
    Render {
        /// Raw or canonical summary JSON
        file: PathBuf,
        /// Render in memory and print the document as text
        #[arg(long)]
        local: bool,
        /// Plain-text template for --local (defaults to the built-in one)
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// Normalize a raw summary JSON file and print the canonical form
    Normalize { file: PathBuf },
    /// List markers and placeholders left in a document
    Markers { doc_id: String },
    /// Show the outcome log
    Log {
        /// Only records of this batch
        #[arg(long)]
        batch: Option<String>,
        /// Print JSON lines instead of a table
        #[arg(long)]
        jsonl: bool,
    },
    /// Generate shell completions
    Completions { shell: Shell },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

fn load_mapping(config: &Config) -> anyhow::Result<SectionMapping> {
    let mapping = match &config.documents.mapping {
        Some(path) => SectionMapping::load(path)
            .with_context(|| format!("loading mapping {}", path.display()))?,
        None => SectionMapping::builtin()?,
    };
    Ok(mapping)
}

fn read_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let span = agent::extract_json(&text).unwrap_or(&text);
    Ok(serde_json::from_str(span)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "minuta", &mut std::io::stdout());
        }
        Commands::Normalize { file } => {
            logging::init("warn", cli.json);
            let summary = normalize(&read_json(&file)?);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Render {
            file,
            local,
            template,
        } => {
            let summary = normalize(&read_json(&file)?);
            if local {
                logging::init("warn", cli.json);
                let mapping = match load_config(cli.config.as_deref()) {
                    Ok(config) => load_mapping(&config)?,
                    Err(_) => SectionMapping::builtin()?,
                };
                let template = match template {
                    Some(path) => std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?,
                    None => DEFAULT_TEMPLATE.to_string(),
                };
                let docs = Arc::new(MemoryDocs::new());
                docs.insert(MemoryDocument::from_text("template", "Template", &template));
                let builder = DocBuilder::new(docs.clone(), "template", mapping);
                let outcome = builder.build(&summary).await;
                match outcome.doc_id.as_deref().and_then(|id| docs.document(id)) {
                    Some(doc) if outcome.success => print!("{}", doc.render_text()),
                    _ => anyhow::bail!(
                        "render failed: {}",
                        outcome.error.unwrap_or_else(|| "unknown error".into())
                    ),
                }
            } else {
                let config = load_config(cli.config.as_deref())?;
                logging::init(&config.logging.level, cli.json || config.logging.json);
                let template_id = config
                    .documents
                    .template_doc_id
                    .clone()
                    .context("documents.template_doc_id is not set")?;
                let client = Arc::new(GoogleClient::new(config.access_token()?)?);
                let mut builder = DocBuilder::new(client, template_id, load_mapping(&config)?);
                if let Some(folder) = &config.documents.output_folder_id {
                    builder = builder.output_folder(folder);
                }
                if let Some(prefix) = &config.documents.title_prefix {
                    builder = builder.title_prefix(prefix);
                }
                let outcome = builder.build(&summary).await;
                if outcome.success {
                    println!("{} {}", "✓".green(), outcome.doc_url.unwrap_or_default());
                    if let Some(warning) = outcome.warning {
                        println!("{} {}", "!".yellow(), warning);
                    }
                } else {
                    anyhow::bail!(
                        "render failed at {}: {}",
                        outcome.stage,
                        outcome.error.unwrap_or_default()
                    );
                }
            }
        }
        Commands::Markers { doc_id } => {
            let config = load_config(cli.config.as_deref())?;
            logging::init(&config.logging.level, cli.json || config.logging.json);
            let client = GoogleClient::new(config.access_token()?)?;
            let structure = client.get(&doc_id).await?;
            let markers = resolver::find_markers(&structure);
            if markers.is_empty() {
                println!("No markers found in {}", doc_id);
            } else {
                for marker in markers {
                    println!("{}", marker);
                }
            }
        }
        Commands::Log { batch, jsonl } => {
            let config = load_config(cli.config.as_deref())?;
            logging::init(&config.logging.level, cli.json || config.logging.json);
            let log = OutcomeLog::open(config.storage.path.join("outcomes"))?;
            if jsonl {
                print!("{}", log.export_jsonl(batch.as_deref())?);
            } else {
                let records = match batch.as_deref() {
                    Some(id) => log.list_batch(id)?,
                    None => log.list_all()?,
                };
                if records.is_empty() {
                    println!("No outcomes recorded.");
                }
                for record in records {
                    let status = match record.status {
                        OutcomeStatus::Success => "ok".green(),
                        OutcomeStatus::Failed => "failed".red(),
                    };
                    println!(
                        "{} {:>6}  {}  {}",
                        record.timestamp.format("%Y-%m-%d %H:%M"),
                        status,
                        record.source_name,
                        record.doc_url.as_deref().unwrap_or(&record.error)
                    );
                }
            }
        }
        Commands::Process { folders } => {
            let config = load_config(cli.config.as_deref())?;
            logging::init(&config.logging.level, cli.json || config.logging.json);
            process(config, folders).await?;
        }
    }

    Ok(())
}

async fn process(config: Config, folders: Vec<String>) -> anyhow::Result<()> {
    let completion = Arc::new(GeminiCompletion::from_config(&config)?);
    let log = OutcomeLog::open(config.storage.path.join("outcomes"))?;
    let options = PipelineOptions {
        workers: config.pipeline.workers,
        source_folders: if folders.is_empty() {
            config.pipeline.source_folders.clone()
        } else {
            folders
        },
        summary_folder: config.pipeline.summary_folder.clone(),
        archive_name: config.pipeline.archive_name.clone(),
        backoff: Backoff::from_config(&config.agent),
    };
    if options.source_folders.is_empty() {
        anyhow::bail!("no source folders configured");
    }
    let instructions = agent::build_instructions(&config.agent.persona);

    // Local runs build into memory and write the rendered text next to the summaries.
    let mut local_docs: Option<Arc<MemoryDocs>> = None;
    let (store, docs): (Arc<dyn BlobStore>, Option<Arc<dyn DocumentService>>) =
        match config.store.backend {
            StoreBackend::Google => {
                let client = Arc::new(GoogleClient::new(config.access_token()?)?);
                (
                    client.clone() as Arc<dyn BlobStore>,
                    Some(client as Arc<dyn DocumentService>),
                )
            }
            StoreBackend::Local => {
                let store = Arc::new(LocalStore::new(&config.store.root));
                let docs = match &config.documents.template_doc_id {
                    Some(path) => {
                        let template = std::fs::read_to_string(path)
                            .with_context(|| format!("reading template {}", path))?;
                        let memory = Arc::new(MemoryDocs::new());
                        memory.insert(MemoryDocument::from_text(path.as_str(), "Template", &template));
                        local_docs = Some(memory.clone());
                        Some(memory as Arc<dyn DocumentService>)
                    }
                    None => None,
                };
                (store as Arc<dyn BlobStore>, docs)
            }
        };

    let mut pipeline = Pipeline::new(store.clone(), completion, log, instructions, options);
    if let (Some(docs), Some(template_id)) = (docs, &config.documents.template_doc_id) {
        let mut builder = DocBuilder::new(docs, template_id.clone(), load_mapping(&config)?);
        if let Some(folder) = &config.documents.output_folder_id {
            builder = builder.output_folder(folder);
        }
        if let Some(prefix) = &config.documents.title_prefix {
            builder = builder.title_prefix(prefix);
        }
        pipeline = pipeline.with_builder(builder);
    }

    let reports = Arc::new(pipeline).run().await;

    for report in &reports {
        println!("{} {}", report.folder.bold(), report.summary_line());
        for record in report.outcomes.iter().filter(|r| !r.is_success()) {
            println!("  {} {}: {}", "✗".red(), record.source_name, record.error);
        }
        if let Some(memory) = &local_docs {
            let folder = config
                .documents
                .output_folder_id
                .as_deref()
                .unwrap_or(&config.pipeline.summary_folder);
            for url in report.outcomes.iter().filter_map(|r| r.doc_url.as_deref()) {
                let Some(doc) = url.rsplit('/').next().and_then(|id| memory.document(id)) else {
                    continue;
                };
                let name = format!("{}.md", minuta::pipeline::sanitize(doc.title()));
                store
                    .create(&name, doc.render_text().as_bytes(), TEXT_MIME, folder)
                    .await?;
            }
        }
    }
    if reports.is_empty() {
        println!("No new transcripts.");
    }
    Ok(())
}
