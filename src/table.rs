//! Table rendering in two phases.
//!
//! The first batch replaces a placeholder with an empty table shell. Cell
//! offsets only exist once the shell does, so the document is re-read and a
//! second batch fills every cell from that one snapshot, last cell first.

use crate::document::{DocumentError, DocumentService, DocumentStructure, EditOperation, Table};
use crate::planner::BackToFront;
use crate::resolver::{self, ResolveError};
use crate::summary::{NOT_AVAILABLE, NO_UPDATES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Written into cells whose value is blank, so no insert is empty.
pub const BLANK_CELL: &str = "\u{00A0}";

#[derive(Error, Debug)]
pub enum TableError {
    #[error("table has no columns")]
    NoColumns,
    #[error(transparent)]
    Anchor(#[from] ResolveError),
    #[error("no table found at or after offset {0}")]
    NotFound(usize),
    #[error("table is {found_rows}x{found_cols}, expected {rows}x{cols}")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        found_rows: usize,
        found_cols: usize,
    },
    #[error(transparent)]
    Document(#[from] DocumentError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub header: String,
    pub field: String,
}

impl Column {
    pub fn new(header: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            field: field.into(),
        }
    }

    /// Column whose field is the header in snake case.
    pub fn from_header(header: &str) -> Self {
        let field = header
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_lowercase();
        Self::new(header, field)
    }
}

pub type Row = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub columns: Vec<Column>,
    pub placeholder: String,
    pub rows: Vec<Row>,
}

impl TableDescriptor {
    /// An empty row list renders as a single sentinel row.
    pub fn new(columns: Vec<Column>, placeholder: impl Into<String>, rows: Vec<Row>) -> Self {
        let rows = if rows.is_empty() {
            let mut sentinel = Row::new();
            if let Some(first) = columns.first() {
                sentinel.insert(first.field.clone(), NO_UPDATES.to_string());
            }
            vec![sentinel]
        } else {
            rows
        };
        Self {
            columns,
            placeholder: placeholder.into(),
            rows,
        }
    }

    /// Rows including the header row.
    pub fn total_rows(&self) -> usize {
        self.rows.len() + 1
    }

    /// Text of a cell; row 0 is the header row.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        let Some(column) = self.columns.get(col) else {
            return BLANK_CELL;
        };
        let value = if row == 0 {
            column.header.as_str()
        } else {
            self.rows
                .get(row - 1)
                .and_then(|r| r.get(&column.field))
                .map_or(NOT_AVAILABLE, |v| v.trim())
        };
        if value.trim().is_empty() {
            BLANK_CELL
        } else {
            value
        }
    }
}

/// First batch: delete the placeholder and insert an empty shell at its start.
/// Returns the shell offset alongside the operations.
pub fn shell_ops(
    structure: &DocumentStructure,
    descriptor: &TableDescriptor,
) -> Result<(usize, Vec<EditOperation>), TableError> {
    if descriptor.columns.is_empty() {
        return Err(TableError::NoColumns);
    }
    let range = resolver::locate_range(structure, &descriptor.placeholder)?;
    let ops = vec![
        EditOperation::DeleteRange {
            start: range.start,
            end: range.end,
        },
        EditOperation::CreateTable {
            offset: range.start,
            rows: descriptor.total_rows(),
            cols: descriptor.columns.len(),
        },
    ];
    Ok((range.start, ops))
}

/// The nearest table starting at or after `offset`, nested ones included.
/// Falls back to the innermost table containing `offset`.
pub fn find_table(structure: &DocumentStructure, offset: usize) -> Option<&Table> {
    let tables = structure.all_tables();
    tables
        .iter()
        .filter(|(el, _)| el.start_index >= offset)
        .min_by_key(|(el, _)| el.start_index)
        .or_else(|| {
            tables
                .iter()
                .filter(|(el, _)| el.start_index <= offset && offset < el.end_index)
                .max_by_key(|(el, _)| el.start_index)
        })
        .map(|(_, table)| *table)
}

/// Second batch: fill every cell, bottom row first and right to left.
pub fn cell_ops(table: &Table, descriptor: &TableDescriptor) -> Result<Vec<EditOperation>, TableError> {
    let rows = descriptor.total_rows();
    let cols = descriptor.columns.len();
    let found_cols = table.table_rows.first().map_or(0, |r| r.table_cells.len());
    if table.table_rows.len() != rows
        || table.table_rows.iter().any(|r| r.table_cells.len() != cols)
    {
        return Err(TableError::ShapeMismatch {
            rows,
            cols,
            found_rows: table.table_rows.len(),
            found_cols,
        });
    }

    let mut plan = BackToFront::new();
    for (r, row) in table.table_rows.iter().enumerate() {
        for (c, cell) in row.table_cells.iter().enumerate() {
            plan.insert(cell.start_index + 1, descriptor.cell(r, c));
        }
    }
    Ok(plan.finish())
}

/// Render `descriptor` into `doc_id` with two batches.
pub async fn render_table(
    docs: &dyn DocumentService,
    doc_id: &str,
    descriptor: &TableDescriptor,
) -> Result<(), TableError> {
    let structure = docs.get(doc_id).await?;
    let (offset, shell) = shell_ops(&structure, descriptor)?;
    docs.batch_update(doc_id, &shell).await?;

    let structure = docs.get(doc_id).await?;
    let table = find_table(&structure, offset).ok_or(TableError::NotFound(offset))?;
    let cells = cell_ops(table, descriptor)?;
    debug!(
        placeholder = %descriptor.placeholder,
        offset,
        cells = cells.len(),
        "filling table"
    );
    docs.batch_update(doc_id, &cells).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocument;

    fn descriptor(rows: Vec<Row>) -> TableDescriptor {
        TableDescriptor::new(
            vec![Column::from_header("Owner"), Column::from_header("Due Date")],
            "{{T}}",
            rows,
        )
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_rows_get_sentinel() {
        let d = descriptor(vec![]);
        assert_eq!(d.total_rows(), 2);
        assert_eq!(d.cell(1, 0), NO_UPDATES);
        assert_eq!(d.cell(1, 1), NOT_AVAILABLE);
    }

    #[test]
    fn test_blank_cells_are_non_empty() {
        let d = descriptor(vec![row(&[("owner", "  "), ("due_date", "Friday")])]);
        assert_eq!(d.cell(0, 1), "Due Date");
        assert_eq!(d.cell(1, 0), BLANK_CELL);
        assert_eq!(d.cell(1, 1), "Friday");
    }

    #[test]
    fn test_cell_ops_descend() {
        let mut doc = MemoryDocument::from_text("d", "D", "x\n{{T}}\ny");
        let d = descriptor(vec![row(&[("owner", "Ann"), ("due_date", "Mon")])]);
        let (offset, shell) = shell_ops(&doc.structure(), &d).unwrap();
        doc.apply_batch(&shell).unwrap();

        let structure = doc.structure();
        let table = find_table(&structure, offset).unwrap();
        let ops = cell_ops(table, &d).unwrap();
        let offsets: Vec<usize> = ops
            .iter()
            .map(|op| match op {
                EditOperation::InsertText { offset, .. } => *offset,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(offsets, sorted);
        assert_eq!(offsets.len(), 4);

        doc.apply_batch(&ops).unwrap();
        assert_eq!(
            doc.render_text(),
            "x\n\n| Owner | Due Date |\n| Ann | Mon |\n\ny\n"
        );
    }

    #[test]
    fn test_find_table_prefers_next_then_containing() {
        let mut doc = MemoryDocument::from_text("d", "D", "a\nb");
        doc.apply(&EditOperation::CreateTable {
            offset: 3,
            rows: 1,
            cols: 1,
        })
        .unwrap();
        let structure = doc.structure();
        let (el, _) = structure.tables().next().unwrap();
        assert!(find_table(&structure, el.start_index + 1).is_some());
        assert!(find_table(&structure, 1).is_some());
        assert!(find_table(&structure, el.end_index).is_none());
    }

    #[test]
    fn test_placeholder_inside_a_cell_fills_the_nested_table() {
        let mut doc = MemoryDocument::from_text("d", "D", "a\nb");
        doc.apply(&EditOperation::CreateTable {
            offset: 3,
            rows: 1,
            cols: 1,
        })
        .unwrap();
        let structure = doc.structure();
        let (_, outer) = structure.tables().next().unwrap();
        let outer_cell = outer.table_rows[0].table_cells[0].start_index;
        doc.apply(&EditOperation::InsertText {
            offset: outer_cell + 1,
            text: "{{T}}".into(),
        })
        .unwrap();

        let d = descriptor(vec![row(&[("owner", "Ann"), ("due_date", "Mon")])]);
        let (offset, shell) = shell_ops(&doc.structure(), &d).unwrap();
        doc.apply_batch(&shell).unwrap();

        let structure = doc.structure();
        assert_eq!(structure.tables().count(), 1);
        assert_eq!(structure.all_tables().len(), 2);
        let inner = find_table(&structure, offset).unwrap();
        assert_eq!((inner.rows, inner.columns), (2, 2));
        doc.apply_batch(&cell_ops(inner, &d).unwrap()).unwrap();

        let structure = doc.structure();
        let (_, outer) = structure.tables().next().unwrap();
        assert_eq!(outer.table_rows.len(), 1);
        let (_, inner) = structure.all_tables()[1];
        let cells: Vec<String> = inner.table_rows[1]
            .table_cells
            .iter()
            .map(|c| c.text().trim().to_string())
            .collect();
        assert_eq!(cells, vec!["Ann", "Mon"]);
    }

    #[test]
    fn test_shape_mismatch() {
        let mut doc = MemoryDocument::from_text("d", "D", "a");
        doc.apply(&EditOperation::CreateTable {
            offset: 1,
            rows: 1,
            cols: 1,
        })
        .unwrap();
        let structure = doc.structure();
        let table = find_table(&structure, 1).unwrap();
        assert!(matches!(
            cell_ops(table, &descriptor(vec![])),
            Err(TableError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_placeholder() {
        let doc = MemoryDocument::from_text("d", "D", "nothing here");
        assert!(matches!(
            shell_ops(&doc.structure(), &descriptor(vec![])),
            Err(TableError::Anchor(ResolveError::NotFound(_)))
        ));
    }
}
