use minuta::document::{EditOperation, MemoryDocs, MemoryDocument};
use minuta::mapping::DEFAULT_TEMPLATE;
use minuta::table::{self, Column, Row, TableDescriptor};
use minuta::{normalize, DocBuilder, DocumentService, SectionMapping};
use serde_json::json;
use std::sync::Arc;

fn builder(template: &str) -> (Arc<MemoryDocs>, DocBuilder) {
    let docs = Arc::new(MemoryDocs::new());
    docs.insert(MemoryDocument::from_text("template", "Template", template));
    let mapping = SectionMapping::builtin().unwrap();
    (docs.clone(), DocBuilder::new(docs, "template", mapping))
}

fn position(text: &str, needle: &str) -> usize {
    text.find(needle)
        .unwrap_or_else(|| panic!("{needle:?} not found in:\n{text}"))
}

#[tokio::test]
async fn test_full_build_renders_every_section_in_order() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (docs, builder) = builder(DEFAULT_TEMPLATE);
    let summary = normalize(&json!({
        "title": "Quarterly Review",
        "date": "2024-03-04",
        "attendees": ["Ann", "Bob"],
        "summary": "Budget held flat.",
        "outline": [
            {"section": "Budget", "bullets": ["Flat year on year", "Hiring freeze"]},
            {"section": "Roadmap", "bullets": ["Ship v2 🚀"]}
        ],
        "key_takeaways": [
            {"subject": "Vendor risk", "text": "Supplier may slip.", "type": "risk", "priority_score": 8}
        ],
        "next_steps": [{"description": "Send memo", "owner": "Ann", "due_date": "2024-03-08"}],
        "transcript_link": "https://example.com/t/1"
    }));

    let outcome = builder.build(&summary).await;
    assert!(outcome.success, "{:?}", outcome.error);
    let doc = docs.document(outcome.doc_id.as_deref().unwrap()).unwrap();
    assert_eq!(doc.title(), "2024-03-04 Quarterly Review");

    let text = doc.render_text();
    assert!(!text.contains("{{"), "{text}");
    assert!(!text.contains("<<"), "{text}");
    assert!(text.starts_with("Quarterly Review\n"));
    assert!(text.contains("Date: 2024-03-04\n"));
    assert!(text.contains("Attendees: Ann, Bob\n"));
    assert!(text.contains("Transcript: https://example.com/t/1\n"));
    assert!(text.contains("Summary data: N/A\n"));

    let expected_order = [
        "Budget held flat.",
        "### Budget\n• Flat year on year\n• Hiring freeze\n### Roadmap\n• Ship v2 🚀\n",
        "#### Vendor risk\n###### Type: risk | Priority: 8\nSupplier may slip.\n",
        "| Description | Owner | Due Date | Priority | Urgency | Citation |\n| Send memo | Ann | 2024-03-08 | 1 | 1 | N/A |\n",
        "| Subject | Description | Owner | Topic | Priority | Citation |\n| No Updates | N/A | N/A | N/A | N/A | N/A |\n",
        "| Description | Owner | Due Date | Priority | Referenced | Citation |\n",
        "Transcript:",
    ];
    let positions: Vec<usize> = expected_order.iter().map(|n| position(&text, n)).collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "sections out of order:\n{text}"
    );
}

#[tokio::test]
async fn test_marker_text_in_content_neither_moves_sections_nor_disappears() {
    let (docs, builder) = builder(DEFAULT_TEMPLATE);
    let summary = normalize(&json!({
        "title": "Templating review",
        "summary": "See <<OUTLINE_MARKER>> below.",
        "outline": [{"section": "Budget", "bullets": ["Flat"]}],
        "key_takeaways": [{"subject": "Greeting", "text": "The greeting uses {{first_name}} now."}],
        "next_steps": [{"description": "Rename {{SUMMARY}} to {{ABSTRACT}}", "owner": "Ann"}]
    }));

    let outcome = builder.build(&summary).await;
    assert!(outcome.success, "{:?}", outcome.error);
    let raw = docs
        .document(outcome.doc_id.as_deref().unwrap())
        .unwrap()
        .render_text();
    assert!(!raw.contains("<<OUTLINE_MARKER>>"), "{raw}");

    let text = raw.replace('\u{2060}', "");
    let summary_at = position(&text, "Executive Summary\nSee <<OUTLINE_MARKER>> below.\n");
    let outline_at = position(&text, "Outline\n### Budget\n• Flat\n");
    assert!(summary_at < outline_at);
    assert!(text.contains("\nThe greeting uses {{first_name}} now.\n"), "{text}");
    assert!(text.contains("| Rename {{SUMMARY}} to {{ABSTRACT}} | Ann | N/A | 1 | 1 | N/A |"));
}

#[tokio::test]
async fn test_missing_outline_marker_leaves_copy_untouched() {
    let template = DEFAULT_TEMPLATE.replace("<<OUTLINE_MARKER>>", "Outline goes here");
    let (docs, builder) = builder(&template);

    let outcome = builder.build(&normalize(&json!({"title": "Sync"}))).await;
    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().contains("<<OUTLINE_MARKER>>"));

    let copy = outcome.doc_id.unwrap();
    assert_eq!(docs.batch_count(&copy), 0);
    let text = docs.document(&copy).unwrap().render_text();
    assert!(text.contains("{{TITLE}}"));
    assert!(text.contains("<<KEY_TAKEAWAYS_MARKER>>"));
    assert!(text.contains("{{NEXT_STEPS}}"));
}

#[tokio::test]
async fn test_table_headers_and_rows_land_in_their_cells() {
    let docs = MemoryDocs::new();
    docs.insert(MemoryDocument::from_text("d", "D", "Before\n{{T}}\nAfter\n"));
    let mut row = Row::new();
    row.insert("owner".into(), "Bob".into());
    row.insert("due_date".into(), "2025-01-01".into());
    let descriptor = TableDescriptor::new(
        vec![Column::from_header("Owner"), Column::from_header("Due Date")],
        "{{T}}",
        vec![row],
    );

    table::render_table(&docs, "d", &descriptor).await.unwrap();

    let structure = docs.get("d").await.unwrap();
    let (_, found) = structure.tables().next().unwrap();
    assert_eq!((found.table_rows.len(), found.table_rows[0].table_cells.len()), (2, 2));
    let cells: Vec<Vec<String>> = found
        .table_rows
        .iter()
        .map(|r| r.table_cells.iter().map(|c| c.text().trim().to_string()).collect())
        .collect();
    assert_eq!(cells, vec![vec!["Owner", "Due Date"], vec!["Bob", "2025-01-01"]]);
}

/// Fill cells one at a time, re-reading the structure before each insert.
fn render_cell_by_cell(doc: &mut MemoryDocument, offset: usize, descriptor: &TableDescriptor) {
    for r in 0..descriptor.total_rows() {
        for c in 0..descriptor.columns.len() {
            let structure = doc.structure();
            let found = table::find_table(&structure, offset).unwrap();
            let cell = &found.table_rows[r].table_cells[c];
            doc.apply(&EditOperation::InsertText {
                offset: cell.start_index + 1,
                text: descriptor.cell(r, c).to_string(),
            })
            .unwrap();
        }
    }
}

#[test]
fn test_single_batch_fill_matches_cell_by_cell_fill() {
    let columns = |n: usize| -> Vec<Column> {
        (0..n).map(|i| Column::new(format!("H{i}"), format!("f{i}"))).collect()
    };
    let values = ["x", "", "  ", "naïve café", "🚀🚀", "multi word value", "日本語", "N/A"];

    for cols in 1..=4 {
        for rows in 0..=3 {
            let data: Vec<Row> = (0..rows)
                .map(|r| {
                    (0..cols)
                        .map(|c| (format!("f{c}"), values[(r * cols + c) % values.len()].to_string()))
                        .collect()
                })
                .collect();
            let descriptor = TableDescriptor::new(columns(cols), "{{TABLE}}", data);

            let mut doc = MemoryDocument::from_text("d", "D", "Intro 🚀\n{{TABLE}}\nOutro\n");
            let (offset, shell) = table::shell_ops(&doc.structure(), &descriptor).unwrap();
            doc.apply_batch(&shell).unwrap();

            let mut reference = doc.clone();
            render_cell_by_cell(&mut reference, offset, &descriptor);

            let structure = doc.structure();
            let found = table::find_table(&structure, offset).unwrap();
            let ops = table::cell_ops(found, &descriptor).unwrap();
            doc.apply_batch(&ops).unwrap();

            assert_eq!(
                doc.render_text(),
                reference.render_text(),
                "{rows} data rows x {cols} columns"
            );
            assert_eq!(doc.structure(), reference.structure());
        }
    }
}
