//! Document buffer model.
//!
//! A document is a linearly indexed text buffer. [`DocumentStructure`] is a
//! read-only snapshot of it (the shape the remote editor returns from a
//! `get`), and [`EditOperation`] is the unit of change submitted in batches.
//! Offsets count UTF-16 code units, starting at 1 after the section break.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

pub use memory::{MemoryDocs, MemoryDocument};

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid insertion point {offset}: {reason}")]
    InvalidOffset { offset: usize, reason: &'static str },
    #[error("invalid range {start}..{end}: {reason}")]
    InvalidRange {
        start: usize,
        end: usize,
        reason: &'static str,
    },
    #[error("refusing zero-length insert at {0}")]
    EmptyInsert(usize),
    #[error("invalid table shape {rows}x{cols}")]
    InvalidTable { rows: usize, cols: usize },
    #[error("remote document service failed: {0}")]
    Remote(#[from] crate::store::StoreError),
    #[error("document service unavailable: {0}")]
    Unavailable(String),
}

/// Length of `text` in the editor's index space.
pub fn text_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Named paragraph styles understood by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedStyle {
    Title,
    Heading1,
    Heading2,
    Heading3,
    Heading4,
    Heading5,
    Normal,
}

impl NamedStyle {
    pub fn as_api(self) -> &'static str {
        match self {
            NamedStyle::Title => "TITLE",
            NamedStyle::Heading1 => "HEADING_1",
            NamedStyle::Heading2 => "HEADING_2",
            NamedStyle::Heading3 => "HEADING_3",
            NamedStyle::Heading4 => "HEADING_4",
            NamedStyle::Heading5 => "HEADING_5",
            NamedStyle::Normal => "NORMAL_TEXT",
        }
    }

    pub fn from_api(name: &str) -> Option<Self> {
        let style = match name {
            "TITLE" => NamedStyle::Title,
            "HEADING_1" => NamedStyle::Heading1,
            "HEADING_2" => NamedStyle::Heading2,
            "HEADING_3" => NamedStyle::Heading3,
            "HEADING_4" => NamedStyle::Heading4,
            "HEADING_5" => NamedStyle::Heading5,
            "NORMAL_TEXT" => NamedStyle::Normal,
            _ => return None,
        };
        Some(style)
    }

    /// Heading style for a 1-based level, saturating at 5.
    pub fn heading(level: u8) -> Self {
        match level {
            0 | 1 => NamedStyle::Heading1,
            2 => NamedStyle::Heading2,
            3 => NamedStyle::Heading3,
            4 => NamedStyle::Heading4,
            _ => NamedStyle::Heading5,
        }
    }
}

impl fmt::Display for NamedStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api())
    }
}

/// A primitive buffer edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOperation {
    InsertText { offset: usize, text: String },
    DeleteRange { start: usize, end: usize },
    ApplyStyle { start: usize, end: usize, style: NamedStyle },
    CreateTable { offset: usize, rows: usize, cols: usize },
    CreateBullets { start: usize, end: usize },
    DeleteBullets { start: usize, end: usize },
    /// Replace every occurrence of `needle`, case-sensitively.
    ReplaceAll { needle: String, replacement: String },
}

impl EditOperation {
    /// Encode as a batch-update request object.
    pub fn to_request(&self) -> Value {
        match self {
            EditOperation::InsertText { offset, text } => json!({
                "insertText": { "location": { "index": offset }, "text": text }
            }),
            EditOperation::DeleteRange { start, end } => json!({
                "deleteContentRange": { "range": { "startIndex": start, "endIndex": end } }
            }),
            EditOperation::ApplyStyle { start, end, style } => json!({
                "updateParagraphStyle": {
                    "range": { "startIndex": start, "endIndex": end },
                    "paragraphStyle": { "namedStyleType": style.as_api() },
                    "fields": "namedStyleType"
                }
            }),
            EditOperation::CreateTable { offset, rows, cols } => json!({
                "insertTable": { "rows": rows, "columns": cols, "location": { "index": offset } }
            }),
            EditOperation::CreateBullets { start, end } => json!({
                "createParagraphBullets": {
                    "range": { "startIndex": start, "endIndex": end },
                    "bulletPreset": "BULLET_DISC_CIRCLE_SQUARE"
                }
            }),
            EditOperation::DeleteBullets { start, end } => json!({
                "deleteParagraphBullets": {
                    "range": { "startIndex": start, "endIndex": end }
                }
            }),
            EditOperation::ReplaceAll {
                needle,
                replacement,
            } => json!({
                "replaceAllText": {
                    "containsText": { "text": needle, "matchCase": true },
                    "replaceText": replacement
                }
            }),
        }
    }
}

/// Snapshot of a document's structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStructure {
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Body,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default)]
    pub content: Vec<StructuralElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralElement {
    #[serde(default)]
    pub start_index: usize,
    #[serde(default)]
    pub end_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraph: Option<Paragraph>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<Table>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_break: Option<SectionBreak>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionBreak {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paragraph {
    #[serde(default)]
    pub elements: Vec<ParagraphElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraph_style: Option<ParagraphStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bullet: Option<Bullet>,
}

impl Paragraph {
    /// Concatenated text of every run, including the trailing newline.
    pub fn text(&self) -> String {
        self.elements
            .iter()
            .filter_map(|e| e.text_run.as_ref())
            .map(|r| r.content.as_str())
            .collect()
    }

    pub fn style(&self) -> Option<NamedStyle> {
        self.paragraph_style
            .as_ref()
            .and_then(|s| s.named_style_type.as_deref())
            .and_then(NamedStyle::from_api)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_style_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bullet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphElement {
    #[serde(default)]
    pub start_index: usize,
    #[serde(default)]
    pub end_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_run: Option<TextRun>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    #[serde(default)]
    pub rows: usize,
    #[serde(default)]
    pub columns: usize,
    #[serde(default)]
    pub table_rows: Vec<TableRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    #[serde(default)]
    pub start_index: usize,
    #[serde(default)]
    pub end_index: usize,
    #[serde(default)]
    pub table_cells: Vec<TableCell>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCell {
    #[serde(default)]
    pub start_index: usize,
    #[serde(default)]
    pub end_index: usize,
    #[serde(default)]
    pub content: Vec<StructuralElement>,
}

impl TableCell {
    pub fn text(&self) -> String {
        paragraphs_in(&self.content)
            .into_iter()
            .map(|(_, p)| p.text())
            .collect()
    }
}

impl DocumentStructure {
    /// Every paragraph in document order, descending into table cells.
    pub fn paragraphs(&self) -> Vec<(&StructuralElement, &Paragraph)> {
        paragraphs_in(&self.body.content)
    }

    /// Top-level tables with their element bounds.
    pub fn tables(&self) -> impl Iterator<Item = (&StructuralElement, &Table)> {
        self.body
            .content
            .iter()
            .filter_map(|el| el.table.as_ref().map(|t| (el, t)))
    }

    /// Every table in document order, including tables nested in cells.
    pub fn all_tables(&self) -> Vec<(&StructuralElement, &Table)> {
        tables_in(&self.body.content)
    }
}

fn tables_in(content: &[StructuralElement]) -> Vec<(&StructuralElement, &Table)> {
    let mut out = Vec::new();
    for el in content {
        if let Some(t) = &el.table {
            out.push((el, t));
            for cell in t.table_rows.iter().flat_map(|r| r.table_cells.iter()) {
                out.extend(tables_in(&cell.content));
            }
        }
    }
    out
}

fn paragraphs_in(content: &[StructuralElement]) -> Vec<(&StructuralElement, &Paragraph)> {
    let mut out = Vec::new();
    for el in content {
        if let Some(p) = &el.paragraph {
            out.push((el, p));
        }
        if let Some(t) = &el.table {
            for cell in t.table_rows.iter().flat_map(|r| r.table_cells.iter()) {
                out.extend(paragraphs_in(&cell.content));
            }
        }
    }
    out
}

/// Remote (or in-memory) editor holding the documents being built.
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Duplicate a template document under a new title, returning the copy's id.
    async fn copy_template(&self, template_id: &str, title: &str) -> Result<String, DocumentError>;

    async fn get(&self, doc_id: &str) -> Result<DocumentStructure, DocumentError>;

    /// Apply a batch atomically, in order.
    async fn batch_update(&self, doc_id: &str, ops: &[EditOperation]) -> Result<(), DocumentError>;

    async fn move_to_folder(&self, doc_id: &str, folder_id: &str) -> Result<(), DocumentError>;

    fn doc_url(&self, doc_id: &str) -> String;
}
