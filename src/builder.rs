//! Document assembly from a template.
//!
//! A build walks a fixed sequence of stages. Every required anchor is checked
//! right after the template is cloned, so a template missing one fails before
//! any edit batch is submitted. The structure is re-read before each rich
//! section and table because earlier batches move every later offset.
//!
//! Summary text is inserted verbatim except for anchors: any occurrence of a
//! template marker inside the content is broken up with a word joiner first,
//! so only the template's own anchors are ever located or cleared.

use crate::document::{DocumentError, DocumentService, EditOperation};
use crate::mapping::SectionMapping;
use crate::planner;
use crate::resolver::{self, ResolveError};
use crate::summary::{CanonicalSummary, NO_UPDATES};
use crate::table::{self, TableError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    Started,
    TemplateCloned,
    FlatReplaced,
    RichSectionsInserted,
    TablesRendered,
    Relocated,
    Done,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Started => "started",
            BuildStage::TemplateCloned => "template_cloned",
            BuildStage::FlatReplaced => "flat_replaced",
            BuildStage::RichSectionsInserted => "rich_sections_inserted",
            BuildStage::TablesRendered => "tables_rendered",
            BuildStage::Relocated => "relocated",
            BuildStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("required marker not found: {0}")]
    MissingAnchor(String),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl From<ResolveError> for BuildError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound(marker) => BuildError::MissingAnchor(marker),
            ResolveError::EmptyMarker => BuildError::MissingAnchor(String::new()),
        }
    }
}

/// A failed build: the last stage reached and the copy left behind, if any.
#[derive(Error, Debug)]
#[error("{source} (after stage {stage})")]
pub struct BuildFailure {
    pub stage: BuildStage,
    pub doc_id: Option<String>,
    #[source]
    pub source: BuildError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuiltDocument {
    pub doc_id: String,
    pub doc_url: String,
    /// Set when the document was built but could not be filed
    pub warning: Option<String>,
}

/// Flat result of a build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildOutcome {
    pub success: bool,
    pub doc_id: Option<String>,
    pub doc_url: Option<String>,
    pub stage: BuildStage,
    pub error: Option<String>,
    pub warning: Option<String>,
}

pub struct DocBuilder {
    docs: Arc<dyn DocumentService>,
    template_id: String,
    output_folder_id: Option<String>,
    mapping: SectionMapping,
    title_prefix: Option<String>,
}

impl DocBuilder {
    pub fn new(
        docs: Arc<dyn DocumentService>,
        template_id: impl Into<String>,
        mapping: SectionMapping,
    ) -> Self {
        Self {
            docs,
            template_id: template_id.into(),
            output_folder_id: None,
            mapping,
            title_prefix: None,
        }
    }

    pub fn output_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.output_folder_id = Some(folder_id.into());
        self
    }

    pub fn title_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.title_prefix = Some(prefix.into());
        self
    }

    pub fn mapping(&self) -> &SectionMapping {
        &self.mapping
    }

    pub fn document_title(&self, summary: &CanonicalSummary) -> String {
        let base = if summary.date == NO_UPDATES {
            summary.title.clone()
        } else {
            format!("{} {}", summary.date, summary.title)
        };
        match &self.title_prefix {
            Some(prefix) => format!("{prefix}{base}"),
            None => base,
        }
    }

    /// Build and flatten the result.
    pub async fn build(&self, summary: &CanonicalSummary) -> BuildOutcome {
        match self.try_build(summary).await {
            Ok(built) => BuildOutcome {
                success: true,
                doc_id: Some(built.doc_id),
                doc_url: Some(built.doc_url),
                stage: BuildStage::Done,
                error: None,
                warning: built.warning,
            },
            Err(failure) => BuildOutcome {
                success: false,
                doc_url: failure.doc_id.as_deref().map(|id| self.docs.doc_url(id)),
                doc_id: failure.doc_id,
                stage: failure.stage,
                error: Some(failure.source.to_string()),
                warning: None,
            },
        }
    }

    pub async fn try_build(&self, summary: &CanonicalSummary) -> Result<BuiltDocument, BuildFailure> {
        let title = self.document_title(summary);
        let doc_id = self
            .docs
            .copy_template(&self.template_id, &title)
            .await
            .map_err(|e| BuildFailure {
                stage: BuildStage::Started,
                doc_id: None,
                source: e.into(),
            })?;
        info!(doc_id = %doc_id, title = %title, "template cloned");

        let mut stage = BuildStage::TemplateCloned;
        match self.fill(&doc_id, summary, &mut stage).await {
            Ok(()) => {}
            Err(source) => {
                warn!(doc_id = %doc_id, %stage, error = %source, "document build failed");
                return Err(BuildFailure {
                    stage,
                    doc_id: Some(doc_id),
                    source,
                });
            }
        }

        let warning = match &self.output_folder_id {
            Some(folder) => match self.docs.move_to_folder(&doc_id, folder).await {
                Ok(()) => {
                    debug!(doc_id = %doc_id, folder = %folder, "document filed");
                    None
                }
                Err(e) => {
                    warn!(doc_id = %doc_id, error = %e, "document built but not filed");
                    Some(format!("document built but not moved to output folder: {e}"))
                }
            },
            None => None,
        };

        let doc_url = self.docs.doc_url(&doc_id);
        info!(doc_id = %doc_id, url = %doc_url, "document built");
        Ok(BuiltDocument {
            doc_id,
            doc_url,
            warning,
        })
    }

    async fn fill(
        &self,
        doc_id: &str,
        summary: &CanonicalSummary,
        stage: &mut BuildStage,
    ) -> Result<(), BuildError> {
        let structure = self.docs.get(doc_id).await?;
        for anchor in self.mapping.required_anchors() {
            if !resolver::exists(&structure, anchor) {
                return Err(BuildError::MissingAnchor(anchor.to_string()));
            }
        }
        let template_markers = resolver::find_markers(&structure);
        let mut anchors = template_markers.clone();
        anchors.extend(self.mapping.anchors().map(str::to_string));
        let summary = &defuse_summary(summary, &anchors);

        let flat = planner::flat_replacements(summary, &self.mapping);
        if !flat.is_empty() {
            self.docs.batch_update(doc_id, &flat).await?;
        }
        *stage = BuildStage::FlatReplaced;

        for section in &self.mapping.rich {
            let structure = self.docs.get(doc_id).await?;
            if !resolver::exists(&structure, &section.marker) {
                debug!(marker = %section.marker, "optional marker absent");
                continue;
            }
            let ops = planner::plan_rich(&structure, section, summary)?;
            self.docs.batch_update(doc_id, &ops).await?;
            debug!(marker = %section.marker, ops = ops.len(), "rich section inserted");
        }
        *stage = BuildStage::RichSectionsInserted;

        for mapping in &self.mapping.tables {
            let descriptor = mapping.descriptor(summary);
            if !mapping.required {
                let structure = self.docs.get(doc_id).await?;
                if !resolver::exists(&structure, &mapping.placeholder) {
                    debug!(placeholder = %mapping.placeholder, "optional table absent");
                    continue;
                }
            }
            table::render_table(self.docs.as_ref(), doc_id, &descriptor).await?;
        }
        *stage = BuildStage::TablesRendered;

        self.clear_leftovers(doc_id, &template_markers).await?;
        Ok(())
    }

    /// Strip template markers the mapping does not know about. Marker-shaped
    /// text that came from the summary is left alone.
    async fn clear_leftovers(
        &self,
        doc_id: &str,
        template_markers: &BTreeSet<String>,
    ) -> Result<(), BuildError> {
        let structure = self.docs.get(doc_id).await?;
        let leftovers: Vec<String> = resolver::find_markers(&structure)
            .intersection(template_markers)
            .cloned()
            .collect();
        if leftovers.is_empty() {
            return Ok(());
        }
        warn!(doc_id, markers = ?leftovers, "clearing unmapped markers");
        let ops: Vec<_> = leftovers
            .into_iter()
            .map(|needle| EditOperation::ReplaceAll {
                needle,
                replacement: String::new(),
            })
            .collect();
        self.docs.batch_update(doc_id, &ops).await?;
        Ok(())
    }
}

/// Copy of `summary` in which no text can be mistaken for one of `anchors`.
fn defuse_summary(summary: &CanonicalSummary, anchors: &BTreeSet<String>) -> CanonicalSummary {
    let mut safe = summary.clone();
    safe.map_text(|text| resolver::defuse(text, anchors));
    safe
}
