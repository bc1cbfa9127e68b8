//! In-memory document engine.
//!
//! Stores the body as a flat vector of index units, one per UTF-16 code unit
//! or structural marker, so every edit shifts later offsets exactly the way
//! the remote editor does. Used by tests and by local renders.

use super::{
    Body, Bullet, DocumentError, DocumentService, DocumentStructure, EditOperation, NamedStyle,
    Paragraph, ParagraphElement, ParagraphStyle, SectionBreak, StructuralElement, Table,
    TableCell, TableRow, TextRun,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const NEWLINE: u16 = b'\n' as u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    SectionBreak,
    Char(u16),
    ParagraphEnd { style: NamedStyle, bullet: bool },
    TableStart,
    RowStart,
    CellStart,
    TableEnd,
}

impl Unit {
    fn is_structural(self) -> bool {
        matches!(
            self,
            Unit::TableStart | Unit::RowStart | Unit::CellStart | Unit::TableEnd
        )
    }
}

fn is_low_surrogate(u: u16) -> bool {
    (0xDC00..=0xDFFF).contains(&u)
}

fn encode(text: &str, style: NamedStyle, bullet: bool) -> Vec<Unit> {
    text.encode_utf16()
        .map(|u| {
            if u == NEWLINE {
                Unit::ParagraphEnd { style, bullet }
            } else {
                Unit::Char(u)
            }
        })
        .collect()
}

/// A single document held in memory.
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    id: String,
    title: String,
    units: Vec<Unit>,
}

impl MemoryDocument {
    /// Empty document: a section break followed by one empty paragraph.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            units: vec![
                Unit::SectionBreak,
                Unit::ParagraphEnd {
                    style: NamedStyle::Normal,
                    bullet: false,
                },
            ],
        }
    }

    /// Document whose body is `text`, one normal paragraph per line.
    pub fn from_text(id: impl Into<String>, title: impl Into<String>, text: &str) -> Self {
        let mut doc = Self::new(id, title);
        let body = text.strip_suffix('\n').unwrap_or(text);
        if !body.is_empty() {
            doc.units.splice(1..1, encode(body, NamedStyle::Normal, false));
        }
        doc
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// End index of the body.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.len() <= 2
    }

    /// Apply a batch atomically: on error the document is left untouched.
    pub fn apply_batch(&mut self, ops: &[EditOperation]) -> Result<(), DocumentError> {
        let snapshot = self.units.clone();
        for op in ops {
            if let Err(e) = self.apply(op) {
                self.units = snapshot;
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn apply(&mut self, op: &EditOperation) -> Result<(), DocumentError> {
        match op {
            EditOperation::InsertText { offset, text } => self.insert_text(*offset, text),
            EditOperation::DeleteRange { start, end } => self.delete_range(*start, *end),
            EditOperation::ApplyStyle { start, end, style } => {
                self.check_range(*start, *end)?;
                self.update_paragraphs(*start, *end, |s, _| *s = *style);
                Ok(())
            }
            EditOperation::CreateBullets { start, end } => {
                self.check_range(*start, *end)?;
                self.update_paragraphs(*start, *end, |_, b| *b = true);
                Ok(())
            }
            EditOperation::DeleteBullets { start, end } => {
                self.check_range(*start, *end)?;
                self.update_paragraphs(*start, *end, |_, b| *b = false);
                Ok(())
            }
            EditOperation::CreateTable { offset, rows, cols } => {
                self.create_table(*offset, *rows, *cols)
            }
            EditOperation::ReplaceAll {
                needle,
                replacement,
            } => self.replace_all(needle, replacement).map(|n| {
                debug!(needle = %needle, replaced = n, "replace all");
            }),
        }
    }

    fn check_insertion(&self, offset: usize) -> Result<(), DocumentError> {
        if offset == 0 || offset >= self.units.len() {
            return Err(DocumentError::InvalidOffset {
                offset,
                reason: "outside the body",
            });
        }
        match self.units[offset] {
            Unit::Char(u) if is_low_surrogate(u) => Err(DocumentError::InvalidOffset {
                offset,
                reason: "splits a surrogate pair",
            }),
            Unit::Char(_) | Unit::ParagraphEnd { .. } => Ok(()),
            _ => Err(DocumentError::InvalidOffset {
                offset,
                reason: "not inside a paragraph",
            }),
        }
    }

    fn check_range(&self, start: usize, end: usize) -> Result<(), DocumentError> {
        if start >= end {
            return Err(DocumentError::InvalidRange {
                start,
                end,
                reason: "empty range",
            });
        }
        if start == 0 || end > self.units.len() {
            return Err(DocumentError::InvalidRange {
                start,
                end,
                reason: "outside the body",
            });
        }
        Ok(())
    }

    /// Style and bullet flag of the paragraph containing `offset`.
    fn host_paragraph(&self, offset: usize) -> (NamedStyle, bool) {
        self.units[offset..]
            .iter()
            .find_map(|u| match u {
                Unit::ParagraphEnd { style, bullet } => Some((*style, *bullet)),
                _ => None,
            })
            .unwrap_or((NamedStyle::Normal, false))
    }

    fn insert_text(&mut self, offset: usize, text: &str) -> Result<(), DocumentError> {
        if text.is_empty() {
            return Err(DocumentError::EmptyInsert(offset));
        }
        self.check_insertion(offset)?;
        let (style, bullet) = self.host_paragraph(offset);
        self.units.splice(offset..offset, encode(text, style, bullet));
        Ok(())
    }

    fn delete_range(&mut self, start: usize, end: usize) -> Result<(), DocumentError> {
        self.check_range(start, end)?;
        if end >= self.units.len() {
            return Err(DocumentError::InvalidRange {
                start,
                end,
                reason: "cannot delete the final newline",
            });
        }
        for i in start..end {
            match self.units[i] {
                Unit::Char(u) if i == start && is_low_surrogate(u) => {
                    return Err(DocumentError::InvalidRange {
                        start,
                        end,
                        reason: "splits a surrogate pair",
                    })
                }
                Unit::Char(_) => {}
                Unit::ParagraphEnd { .. } => {
                    if self.units.get(i + 1).is_some_and(|u| u.is_structural()) {
                        return Err(DocumentError::InvalidRange {
                            start,
                            end,
                            reason: "would remove a newline bounding a table",
                        });
                    }
                }
                _ => {
                    return Err(DocumentError::InvalidRange {
                        start,
                        end,
                        reason: "cuts table structure",
                    })
                }
            }
        }
        self.units.drain(start..end);
        Ok(())
    }

    fn create_table(&mut self, offset: usize, rows: usize, cols: usize) -> Result<(), DocumentError> {
        if rows == 0 || cols == 0 {
            return Err(DocumentError::InvalidTable { rows, cols });
        }
        self.check_insertion(offset)?;
        let (style, bullet) = self.host_paragraph(offset);

        // The editor always inserts a newline ahead of the table, so the
        // table itself begins one index past the requested offset.
        let mut shell = Vec::with_capacity(3 + rows * (1 + cols * 2));
        shell.push(Unit::ParagraphEnd { style, bullet });
        shell.push(Unit::TableStart);
        for _ in 0..rows {
            shell.push(Unit::RowStart);
            for _ in 0..cols {
                shell.push(Unit::CellStart);
                shell.push(Unit::ParagraphEnd {
                    style: NamedStyle::Normal,
                    bullet: false,
                });
            }
        }
        shell.push(Unit::TableEnd);
        self.units.splice(offset..offset, shell);
        Ok(())
    }

    fn replace_all(&mut self, needle: &str, replacement: &str) -> Result<usize, DocumentError> {
        let pattern: Vec<u16> = needle.encode_utf16().collect();
        if pattern.is_empty() {
            return Err(DocumentError::InvalidRange {
                start: 0,
                end: 0,
                reason: "empty search text",
            });
        }

        let mut matches = Vec::new();
        for (start, end) in self.paragraph_spans() {
            let mut i = start;
            while i + pattern.len() <= end {
                let hit = self.units[i..i + pattern.len()]
                    .iter()
                    .zip(&pattern)
                    .all(|(u, p)| *u == Unit::Char(*p));
                if hit {
                    matches.push(i);
                    i += pattern.len();
                } else {
                    i += 1;
                }
            }
        }

        // Back to front so earlier match offsets stay valid.
        for &at in matches.iter().rev() {
            let (style, bullet) = self.host_paragraph(at);
            self.units
                .splice(at..at + pattern.len(), encode(replacement, style, bullet));
        }
        Ok(matches.len())
    }

    /// `(first char index, paragraph-end index)` for every paragraph.
    fn paragraph_spans(&self) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut start = None;
        for (i, unit) in self.units.iter().enumerate() {
            match unit {
                Unit::Char(_) => {
                    start.get_or_insert(i);
                }
                Unit::ParagraphEnd { .. } => spans.push((start.take().unwrap_or(i), i)),
                _ => start = None,
            }
        }
        spans
    }

    fn update_paragraphs(
        &mut self,
        start: usize,
        end: usize,
        mut f: impl FnMut(&mut NamedStyle, &mut bool),
    ) {
        for (p_start, p_end) in self.paragraph_spans() {
            if p_start < end && start <= p_end {
                if let Unit::ParagraphEnd { style, bullet } = &mut self.units[p_end] {
                    f(style, bullet);
                }
            }
        }
    }

    /// Structure snapshot in the remote editor's shape.
    pub fn structure(&self) -> DocumentStructure {
        let mut content = Vec::new();
        let mut i = 0;
        if let Some(Unit::SectionBreak) = self.units.first() {
            content.push(StructuralElement {
                start_index: 0,
                end_index: 1,
                section_break: Some(SectionBreak {}),
                ..Default::default()
            });
            i = 1;
        }
        let (body, _) = self.parse_content(i);
        content.extend(body);
        DocumentStructure {
            document_id: self.id.clone(),
            title: self.title.clone(),
            body: Body { content },
        }
    }

    fn parse_content(&self, mut i: usize) -> (Vec<StructuralElement>, usize) {
        let mut out = Vec::new();
        loop {
            match self.units.get(i) {
                Some(Unit::Char(_)) | Some(Unit::ParagraphEnd { .. }) => {
                    let (el, next) = self.parse_paragraph(i);
                    out.push(el);
                    i = next;
                }
                Some(Unit::TableStart) => {
                    let (el, next) = self.parse_table(i);
                    out.push(el);
                    i = next;
                }
                _ => return (out, i),
            }
        }
    }

    fn parse_paragraph(&self, start: usize) -> (StructuralElement, usize) {
        let mut i = start;
        let mut text = Vec::new();
        let mut end_marker = (NamedStyle::Normal, false);
        while let Some(unit) = self.units.get(i) {
            i += 1;
            match unit {
                Unit::Char(u) => text.push(*u),
                Unit::ParagraphEnd { style, bullet } => {
                    text.push(NEWLINE);
                    end_marker = (*style, *bullet);
                    break;
                }
                _ => {
                    i -= 1;
                    break;
                }
            }
        }

        let (style, bullet) = end_marker;
        let paragraph = Paragraph {
            elements: vec![ParagraphElement {
                start_index: start,
                end_index: i,
                text_run: Some(TextRun {
                    content: String::from_utf16_lossy(&text),
                }),
            }],
            paragraph_style: Some(ParagraphStyle {
                named_style_type: Some(style.as_api().to_string()),
            }),
            bullet: bullet.then(|| Bullet {
                list_id: Some(format!("{}.list", self.id)),
            }),
        };
        let el = StructuralElement {
            start_index: start,
            end_index: i,
            paragraph: Some(paragraph),
            ..Default::default()
        };
        (el, i)
    }

    fn parse_table(&self, start: usize) -> (StructuralElement, usize) {
        let mut i = start + 1;
        let mut rows = Vec::new();
        while let Some(Unit::RowStart) = self.units.get(i) {
            let row_start = i;
            i += 1;
            let mut cells = Vec::new();
            while let Some(Unit::CellStart) = self.units.get(i) {
                let cell_start = i;
                let (content, next) = self.parse_content(i + 1);
                i = next;
                cells.push(TableCell {
                    start_index: cell_start,
                    end_index: i,
                    content,
                });
            }
            rows.push(TableRow {
                start_index: row_start,
                end_index: i,
                table_cells: cells,
            });
        }
        if let Some(Unit::TableEnd) = self.units.get(i) {
            i += 1;
        }

        let columns = rows.first().map_or(0, |r| r.table_cells.len());
        let el = StructuralElement {
            start_index: start,
            end_index: i,
            table: Some(Table {
                rows: rows.len(),
                columns,
                table_rows: rows,
            }),
            ..Default::default()
        };
        (el, i)
    }

    /// Plain-text rendering: `#` prefixes for title and headings, `•` for
    /// bulleted paragraphs, `| a | b |` for table rows.
    pub fn render_text(&self) -> String {
        let structure = self.structure();
        let mut out = String::new();
        for el in &structure.body.content {
            if let Some(p) = &el.paragraph {
                let prefix = match p.style() {
                    Some(NamedStyle::Title) => "# ",
                    Some(NamedStyle::Heading1) => "## ",
                    Some(NamedStyle::Heading2) => "### ",
                    Some(NamedStyle::Heading3) => "#### ",
                    Some(NamedStyle::Heading4) => "##### ",
                    Some(NamedStyle::Heading5) => "###### ",
                    _ => "",
                };
                out.push_str(prefix);
                if p.bullet.is_some() {
                    out.push_str("• ");
                }
                out.push_str(p.text().trim_end_matches('\n'));
                out.push('\n');
            }
            if let Some(t) = &el.table {
                for row in &t.table_rows {
                    let cells: Vec<String> = row
                        .table_cells
                        .iter()
                        .map(|c| c.text().split_whitespace().collect::<Vec<_>>().join(" "))
                        .collect();
                    out.push_str(&format!("| {} |\n", cells.join(" | ")));
                }
            }
        }
        out
    }
}

#[derive(Debug, Default)]
struct Inner {
    docs: HashMap<String, MemoryDocument>,
    folders: HashMap<String, String>,
    batches: HashMap<String, usize>,
    next_id: usize,
    refuse_moves: bool,
}

/// In-memory [`DocumentService`].
#[derive(Debug, Default)]
pub struct MemoryDocs {
    inner: Mutex<Inner>,
}

impl MemoryDocs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, DocumentError> {
        self.inner
            .lock()
            .map_err(|_| DocumentError::Unavailable("document store lock poisoned".into()))
    }

    /// Register a document (usually a template).
    pub fn insert(&self, doc: MemoryDocument) {
        if let Ok(mut inner) = self.lock() {
            inner.docs.insert(doc.id.clone(), doc);
        }
    }

    pub fn document(&self, id: &str) -> Option<MemoryDocument> {
        self.lock().ok()?.docs.get(id).cloned()
    }

    pub fn folder_of(&self, id: &str) -> Option<String> {
        self.lock().ok()?.folders.get(id).cloned()
    }

    /// Number of batches successfully applied to `id`.
    pub fn batch_count(&self, id: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|inner| inner.batches.get(id).copied())
            .unwrap_or(0)
    }

    /// Make every subsequent folder move fail.
    pub fn refuse_moves(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.refuse_moves = true;
        }
    }
}

#[async_trait]
impl DocumentService for MemoryDocs {
    async fn copy_template(&self, template_id: &str, title: &str) -> Result<String, DocumentError> {
        let mut inner = self.lock()?;
        let template = inner
            .docs
            .get(template_id)
            .cloned()
            .ok_or_else(|| DocumentError::NotFound(template_id.to_string()))?;
        inner.next_id += 1;
        let id = format!("doc-{}", inner.next_id);
        let copy = MemoryDocument {
            id: id.clone(),
            title: title.to_string(),
            units: template.units,
        };
        inner.docs.insert(id.clone(), copy);
        Ok(id)
    }

    async fn get(&self, doc_id: &str) -> Result<DocumentStructure, DocumentError> {
        let inner = self.lock()?;
        inner
            .docs
            .get(doc_id)
            .map(MemoryDocument::structure)
            .ok_or_else(|| DocumentError::NotFound(doc_id.to_string()))
    }

    async fn batch_update(&self, doc_id: &str, ops: &[EditOperation]) -> Result<(), DocumentError> {
        let mut inner = self.lock()?;
        let doc = inner
            .docs
            .get_mut(doc_id)
            .ok_or_else(|| DocumentError::NotFound(doc_id.to_string()))?;
        doc.apply_batch(ops)?;
        *inner.batches.entry(doc_id.to_string()).or_default() += 1;
        Ok(())
    }

    async fn move_to_folder(&self, doc_id: &str, folder_id: &str) -> Result<(), DocumentError> {
        let mut inner = self.lock()?;
        if inner.refuse_moves {
            return Err(DocumentError::Unavailable("folder move refused".into()));
        }
        if !inner.docs.contains_key(doc_id) {
            return Err(DocumentError::NotFound(doc_id.to_string()));
        }
        inner
            .folders
            .insert(doc_id.to_string(), folder_id.to_string());
        Ok(())
    }

    fn doc_url(&self, doc_id: &str) -> String {
        format!("memory://documents/{doc_id}")
    }
}
