//! Marker and placeholder resolution.
//!
//! Markers are literal tokens in a template. Earlier formatting can split a
//! marker across several text runs, so each paragraph's runs are joined
//! before searching. Only the first match in document order is reported.

use crate::document::{text_len, DocumentStructure, Paragraph, StructuralElement};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use std::ops::Range;
use thiserror::Error;

/// Invisible character used to break up anchor text inside inserted content.
pub const WORD_JOINER: char = '\u{2060}';

lazy_static! {
    /// `<<OUTLINE_MARKER>>`-style markers and `{{TITLE}}`-style placeholders.
    pub static ref MARKER_PATTERN: Regex =
        Regex::new(r"<<[A-Z0-9_-]+>>|\{\{[A-Za-z0-9_]+\}\}").expect("valid marker regex");
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("marker not found: {0}")]
    NotFound(String),
    #[error("empty marker")]
    EmptyMarker,
}

struct Hit<'a> {
    element: &'a StructuralElement,
    paragraph: &'a Paragraph,
    start: usize,
}

fn first_hit<'a>(
    structure: &'a DocumentStructure,
    marker: &str,
) -> Result<Hit<'a>, ResolveError> {
    if marker.is_empty() {
        return Err(ResolveError::EmptyMarker);
    }

    for (element, paragraph) in structure.paragraphs() {
        // (byte offset of the run in the joined text, run start index, run text)
        let mut runs = Vec::with_capacity(paragraph.elements.len());
        let mut joined = String::new();
        for el in &paragraph.elements {
            if let Some(run) = &el.text_run {
                runs.push((joined.len(), el.start_index, run.content.as_str()));
                joined.push_str(&run.content);
            }
        }

        let Some(pos) = joined.find(marker) else {
            continue;
        };
        if let Some(&(byte_start, index_start, content)) =
            runs.iter().rev().find(|(byte_start, _, _)| *byte_start <= pos)
        {
            let start = index_start + text_len(&content[..pos - byte_start]);
            return Ok(Hit {
                element,
                paragraph,
                start,
            });
        }
    }

    Err(ResolveError::NotFound(marker.to_string()))
}

/// Absolute offset where `marker` begins.
pub fn locate(structure: &DocumentStructure, marker: &str) -> Result<usize, ResolveError> {
    first_hit(structure, marker).map(|hit| hit.start)
}

/// Offsets spanned by `marker` itself.
pub fn locate_range(
    structure: &DocumentStructure,
    marker: &str,
) -> Result<Range<usize>, ResolveError> {
    first_hit(structure, marker).map(|hit| hit.start..hit.start + text_len(marker))
}

/// Offsets of the whole paragraph holding `marker`, trailing newline included.
pub fn paragraph_range(
    structure: &DocumentStructure,
    marker: &str,
) -> Result<Range<usize>, ResolveError> {
    first_hit(structure, marker).map(|hit| {
        let start = hit
            .paragraph
            .elements
            .first()
            .map_or(hit.element.start_index, |e| e.start_index);
        start..hit.element.end_index
    })
}

pub fn exists(structure: &DocumentStructure, marker: &str) -> bool {
    first_hit(structure, marker).is_ok()
}

/// Every distinct match of `pattern`, searched paragraph by paragraph.
pub fn find_all(structure: &DocumentStructure, pattern: &Regex) -> BTreeSet<String> {
    structure
        .paragraphs()
        .into_iter()
        .flat_map(|(_, p)| {
            let text = p.text();
            pattern
                .find_iter(&text)
                .map(|m| m.as_str().to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Markers and placeholders still present in the document.
pub fn find_markers(structure: &DocumentStructure) -> BTreeSet<String> {
    find_all(structure, &MARKER_PATTERN)
}

/// `text` with a [`WORD_JOINER`] after the first character of every
/// occurrence of `anchors`, so none of them can be located in it afterwards.
pub fn defuse<S: AsRef<str>>(text: &str, anchors: &BTreeSet<S>) -> String {
    let mut out = text.to_string();
    for anchor in anchors {
        let anchor = anchor.as_ref();
        let mut chars = anchor.chars();
        let Some(first) = chars.next() else {
            continue;
        };
        if out.contains(anchor) {
            let broken = format!("{first}{WORD_JOINER}{}", chars.as_str());
            out = out.replace(anchor, &broken);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Body, ParagraphElement, TextRun};
    use crate::document::{EditOperation, MemoryDocument};

    fn split_run_doc() -> DocumentStructure {
        // "Intro\n" then "<<OUTLINE_MARKER>>\n" split across three runs
        let runs = [(7, "<<OUT"), (12, "LINE_MAR"), (20, "KER>>\n")];
        let elements = runs
            .iter()
            .map(|(start, text)| ParagraphElement {
                start_index: *start,
                end_index: start + text.len(),
                text_run: Some(TextRun {
                    content: text.to_string(),
                }),
            })
            .collect();
        let intro = MemoryDocument::from_text("d", "D", "Intro").structure();
        let mut content = intro.body.content;
        content.push(StructuralElement {
            start_index: 7,
            end_index: 26,
            paragraph: Some(Paragraph {
                elements,
                ..Default::default()
            }),
            ..Default::default()
        });
        DocumentStructure {
            body: Body { content },
            ..Default::default()
        }
    }

    #[test]
    fn test_marker_split_across_runs() {
        let doc = split_run_doc();
        assert_eq!(locate(&doc, "<<OUTLINE_MARKER>>"), Ok(7));
        assert_eq!(locate_range(&doc, "<<OUTLINE_MARKER>>"), Ok(7..25));
        assert_eq!(paragraph_range(&doc, "<<OUTLINE_MARKER>>"), Ok(7..26));
        assert_eq!(locate(&doc, "MARKER"), Ok(17));
    }

    #[test]
    fn test_missing_marker() {
        let doc = split_run_doc();
        assert_eq!(
            locate(&doc, "<<NOPE>>"),
            Err(ResolveError::NotFound("<<NOPE>>".into()))
        );
        assert!(!exists(&doc, "<<NOPE>>"));
        assert_eq!(locate(&doc, ""), Err(ResolveError::EmptyMarker));
    }

    #[test]
    fn test_first_match_wins_and_offsets_are_utf16() {
        let doc = MemoryDocument::from_text("d", "D", "héllo 🚀 {{X}}\n{{X}}").structure();
        // 'h' 'é' 'l' 'l' 'o' ' ' + rocket (2 units) + ' ' = 9 units after index 1
        assert_eq!(locate(&doc, "{{X}}"), Ok(10));
    }

    #[test]
    fn test_markers_inside_table_cells() {
        let mut doc = MemoryDocument::from_text("d", "D", "x");
        doc.apply(&EditOperation::CreateTable {
            offset: 1,
            rows: 1,
            cols: 1,
        })
        .unwrap();
        let cell = doc.structure().tables().next().unwrap().1.table_rows[0].table_cells[0]
            .start_index;
        doc.apply(&EditOperation::InsertText {
            offset: cell + 1,
            text: "<<CELL>>".into(),
        })
        .unwrap();
        assert_eq!(locate(&doc.structure(), "<<CELL>>"), Ok(cell + 1));
    }

    #[test]
    fn test_find_markers() {
        let doc = MemoryDocument::from_text(
            "d",
            "D",
            "{{TITLE}} on {{DATE}}\n<<OUTLINE_MARKER>>\n<<lower>> {{TITLE}}",
        )
        .structure();
        let found: Vec<_> = find_markers(&doc).into_iter().collect();
        assert_eq!(found, vec!["<<OUTLINE_MARKER>>", "{{DATE}}", "{{TITLE}}"]);
    }

    #[test]
    fn test_defused_anchors_are_no_longer_found() {
        let anchors: BTreeSet<&str> = ["<<OUTLINE_MARKER>>", "{{TITLE}}"].into_iter().collect();
        let text = defuse("See <<OUTLINE_MARKER>> and {{TITLE}}, not {{first_name}}", &anchors);
        assert_eq!(
            text.replace(WORD_JOINER, ""),
            "See <<OUTLINE_MARKER>> and {{TITLE}}, not {{first_name}}"
        );
        assert!(text.contains("{{first_name}}"));

        let doc = MemoryDocument::from_text("d", "D", &format!("{text}\n<<OUTLINE_MARKER>>"))
            .structure();
        assert_eq!(locate(&doc, "<<OUTLINE_MARKER>>"), Ok(2 + text_len(&text)));
        assert!(!exists(&doc, "{{TITLE}}"));
        assert_eq!(defuse("plain", &anchors), "plain");
    }
}
