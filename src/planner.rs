//! Turns summary content into ordered edit batches.
//!
//! Two strategies keep offsets valid without re-reading the document:
//!
//! * [`CursorWriter`] writes forward from an anchor, advancing its cursor by
//!   each insert's length. Every inserted paragraph gets its style and
//!   bullet state set explicitly right after it lands, so nothing inherits
//!   them from the host paragraph.
//! * [`BackToFront`] takes inserts whose offsets were all read from one
//!   snapshot and emits them from the highest offset down, so no insert
//!   shifts a position that is still pending.

use crate::document::{text_len, DocumentStructure, EditOperation, NamedStyle};
use crate::mapping::{RichKind, RichSection, SectionMapping};
use crate::resolver::{self, ResolveError};
use crate::summary::{CanonicalSummary, FieldValue, Section, Takeaway, NO_UPDATES};
use std::ops::Range;

const SUBJECT_FALLBACK_CHARS: usize = 60;

/// Forward writer anchored at an offset.
#[derive(Debug)]
pub struct CursorWriter {
    cursor: usize,
    ops: Vec<EditOperation>,
}

impl CursorWriter {
    pub fn at(offset: usize) -> Self {
        Self {
            cursor: offset,
            ops: Vec::new(),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn insert(&mut self, text: String) -> Range<usize> {
        let start = self.cursor;
        self.cursor += text_len(&text);
        self.ops.push(EditOperation::InsertText {
            offset: start,
            text,
        });
        start..self.cursor
    }

    fn block(&mut self, text: &str, style: NamedStyle, bulleted: bool) -> Range<usize> {
        let range = self.insert(format!("{text}\n"));
        self.ops.push(EditOperation::ApplyStyle {
            start: range.start,
            end: range.end,
            style,
        });
        let (start, end) = (range.start, range.end);
        self.ops.push(if bulleted {
            EditOperation::CreateBullets { start, end }
        } else {
            EditOperation::DeleteBullets { start, end }
        });
        range
    }

    /// One or more unbulleted paragraphs sharing `style`. Embedded newlines
    /// split the text into several paragraphs.
    pub fn paragraph(&mut self, text: &str, style: NamedStyle) -> Range<usize> {
        self.block(text, style, false)
    }

    /// A contiguous bulleted block, one paragraph per item.
    pub fn bullets<S: AsRef<str>>(&mut self, items: &[S]) -> Range<usize> {
        let lines: Vec<String> = items
            .iter()
            .map(|item| single_line(item.as_ref()))
            .filter(|line| !line.is_empty())
            .collect();
        let lines = if lines.is_empty() {
            vec![NO_UPDATES.to_string()]
        } else {
            lines
        };

        self.block(&lines.join("\n"), NamedStyle::Normal, true)
    }

    pub fn finish(self) -> Vec<EditOperation> {
        self.ops
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Inserts planned against a single snapshot.
#[derive(Debug, Default)]
pub struct BackToFront {
    inserts: Vec<(usize, usize, String)>,
}

impl BackToFront {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `text` at `offset`. Inserts queued at the same offset keep their
    /// queue order in the final document.
    pub fn insert(&mut self, offset: usize, text: impl Into<String>) {
        let seq = self.inserts.len();
        self.inserts.push((offset, seq, text.into()));
    }

    /// Emit from the highest offset down.
    pub fn finish(mut self) -> Vec<EditOperation> {
        self.inserts
            .sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        self.inserts
            .into_iter()
            .filter(|(_, _, text)| !text.is_empty())
            .map(|(offset, _, text)| EditOperation::InsertText { offset, text })
            .collect()
    }
}

/// Whole-document placeholder substitutions for text fields and links.
pub fn flat_replacements(summary: &CanonicalSummary, mapping: &SectionMapping) -> Vec<EditOperation> {
    mapping
        .text
        .iter()
        .chain(mapping.links.iter())
        .map(|entry| EditOperation::ReplaceAll {
            needle: entry.placeholder.clone(),
            replacement: entry.render(summary),
        })
        .collect()
}

/// Replace a rich-section marker with its rendered content.
pub fn plan_rich(
    structure: &DocumentStructure,
    section: &RichSection,
    summary: &CanonicalSummary,
) -> Result<Vec<EditOperation>, ResolveError> {
    let range = resolver::locate_range(structure, &section.marker)?;
    let mut ops = vec![EditOperation::DeleteRange {
        start: range.start,
        end: range.end,
    }];

    let mut writer = CursorWriter::at(range.start);
    match section.kind {
        RichKind::Outline => write_outline(&mut writer, &summary.outline, section.heading_style()),
        RichKind::Takeaways => {
            write_takeaways(&mut writer, &summary.key_takeaways, section.heading_style())
        }
        RichKind::Bullets => {
            let items = match summary.text_field(&section.field) {
                Some(FieldValue::List(items)) => items.to_vec(),
                Some(FieldValue::Text(text)) => text.lines().map(str::to_string).collect(),
                None => Vec::new(),
            };
            writer.bullets(&items);
        }
    }
    ops.extend(writer.finish());
    Ok(ops)
}

/// Heading per section followed by its bullets.
pub fn write_outline(writer: &mut CursorWriter, outline: &[Section], heading: NamedStyle) {
    if outline.is_empty() {
        write_outline(writer, &[Section::placeholder()], heading);
        return;
    }
    for section in outline {
        writer.paragraph(&single_line(&section.heading), heading);
        writer.bullets(&section.bullets);
    }
}

/// Subject heading, metadata line, body text and a spacer per takeaway.
pub fn write_takeaways(writer: &mut CursorWriter, takeaways: &[Takeaway], heading: NamedStyle) {
    if takeaways.is_empty() {
        writer.paragraph(NO_UPDATES, NamedStyle::Normal);
        return;
    }
    for takeaway in takeaways {
        writer.paragraph(&takeaway_subject(takeaway), heading);
        writer.paragraph(&takeaway_meta(takeaway), NamedStyle::Heading5);
        let body = takeaway.text.trim();
        writer.paragraph(if body.is_empty() { NO_UPDATES } else { body }, NamedStyle::Normal);
        writer.paragraph("", NamedStyle::Normal);
    }
}

fn takeaway_subject(takeaway: &Takeaway) -> String {
    let subject = single_line(&takeaway.subject);
    if !subject.is_empty() {
        return subject;
    }
    let text = single_line(&takeaway.text);
    if text.is_empty() {
        return NO_UPDATES.to_string();
    }
    text.chars().take(SUBJECT_FALLBACK_CHARS).collect()
}

fn takeaway_meta(takeaway: &Takeaway) -> String {
    let priority = takeaway.priority_score.to_string();
    [
        ("Category", takeaway.category.as_str()),
        ("Type", takeaway.kind.as_str()),
        ("Owner", takeaway.owner.as_str()),
        ("Priority", priority.as_str()),
        ("Citation", takeaway.citation.as_str()),
    ]
    .iter()
    .filter(|(_, value)| !value.trim().is_empty())
    .map(|(label, value)| format!("{label}: {}", single_line(value)))
    .collect::<Vec<_>>()
    .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocument;

    #[test]
    fn test_cursor_writer_advances_by_utf16_length() {
        let mut writer = CursorWriter::at(5);
        let first = writer.paragraph("🚀 go", NamedStyle::Heading2);
        assert_eq!(first, 5..11);
        let second = writer.bullets(&["a", "b"]);
        assert_eq!(second, 11..15);
        assert_eq!(writer.cursor(), 15);

        let ops = writer.finish();
        assert_eq!(
            ops[2],
            EditOperation::DeleteBullets { start: 5, end: 11 }
        );
        assert_eq!(
            ops[5],
            EditOperation::CreateBullets { start: 11, end: 15 }
        );
    }

    #[test]
    fn test_headings_drop_bullets_of_a_bulleted_marker() {
        let mut doc = MemoryDocument::from_text("d", "D", "before\n<<M>>\nafter");
        doc.apply(&EditOperation::CreateBullets { start: 8, end: 9 })
            .unwrap();
        assert_eq!(doc.render_text(), "before\n• <<M>>\nafter\n");

        let structure = doc.structure();
        let range = resolver::locate_range(&structure, "<<M>>").unwrap();
        let mut ops = vec![EditOperation::DeleteRange {
            start: range.start,
            end: range.end,
        }];
        let mut writer = CursorWriter::at(range.start);
        write_outline(
            &mut writer,
            &[Section::new("Budget", vec!["Approved".into()])],
            NamedStyle::Heading2,
        );
        ops.extend(writer.finish());
        doc.apply_batch(&ops).unwrap();

        assert_eq!(
            doc.render_text(),
            "before\n### Budget\n• Approved\n• \nafter\n"
        );
    }

    #[test]
    fn test_blank_bullets_become_sentinel() {
        let mut doc = MemoryDocument::from_text("d", "D", "x");
        let mut writer = CursorWriter::at(1);
        writer.bullets(&["  ", ""]);
        doc.apply_batch(&writer.finish()).unwrap();
        assert_eq!(doc.render_text(), "• No Updates\nx\n");
    }

    #[test]
    fn test_back_to_front_order() {
        let mut plan = BackToFront::new();
        plan.insert(3, "a");
        plan.insert(9, "b");
        plan.insert(3, "c");
        plan.insert(6, "");
        let offsets: Vec<_> = plan
            .finish()
            .into_iter()
            .map(|op| match op {
                EditOperation::InsertText { offset, text } => (offset, text),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            offsets,
            vec![(9, "b".into()), (3, "c".into()), (3, "a".into())]
        );
    }

    #[test]
    fn test_back_to_front_same_offset_keeps_queue_order() {
        let mut doc = MemoryDocument::from_text("d", "D", "[]");
        let mut plan = BackToFront::new();
        plan.insert(2, "one ");
        plan.insert(2, "two");
        doc.apply_batch(&plan.finish()).unwrap();
        assert_eq!(doc.render_text(), "[one two]\n");
    }

    #[test]
    fn test_takeaway_meta_omits_empty_parts() {
        let mut takeaway = Takeaway::from_text("Budget approved for Q3");
        takeaway.owner = "Dana".into();
        takeaway.priority_score = 8;
        assert_eq!(takeaway_meta(&takeaway), "Owner: Dana | Priority: 8");
        assert_eq!(takeaway_subject(&takeaway), "Budget approved for Q3");
    }

    #[test]
    fn test_subject_fallback_is_truncated() {
        let takeaway = Takeaway::from_text("x".repeat(100));
        assert_eq!(takeaway_subject(&takeaway).chars().count(), 60);
    }

    #[test]
    fn test_outline_written_in_order() {
        let mut doc = MemoryDocument::from_text("d", "D", "before\n<<M>>\nafter");
        let outline = vec![
            Section::new("Budget", vec!["Approved".into(), "Q3".into()]),
            Section::new("Hiring", vec![]),
        ];
        let structure = doc.structure();
        let range = resolver::locate_range(&structure, "<<M>>").unwrap();
        let mut ops = vec![EditOperation::DeleteRange {
            start: range.start,
            end: range.end,
        }];
        let mut writer = CursorWriter::at(range.start);
        write_outline(&mut writer, &outline, NamedStyle::Heading2);
        ops.extend(writer.finish());
        doc.apply_batch(&ops).unwrap();

        assert_eq!(
            doc.render_text(),
            "before\n### Budget\n• Approved\n• Q3\n### Hiring\n• No Updates\n\nafter\n"
        );
    }
}
