//! Section mapping: which summary field lands at which template location.
//!
//! Loaded from TOML, or taken from [`SectionMapping::builtin`] which matches
//! [`DEFAULT_TEMPLATE`].

use crate::document::NamedStyle;
use crate::summary::{ActionTable, CanonicalSummary, FieldValue, NO_UPDATES};
use crate::table::{Column, TableDescriptor};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("failed to read mapping: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse mapping: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid mapping: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionMapping {
    /// Flat placeholder substitutions
    #[serde(default)]
    pub text: Vec<TextReplacement>,
    /// Marker-anchored structured sections, rendered in this order
    #[serde(default)]
    pub rich: Vec<RichSection>,
    #[serde(default)]
    pub links: Vec<TextReplacement>,
    #[serde(default)]
    pub tables: Vec<TableMapping>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    JoinComma,
    IsoDate,
    JoinParagraphs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextReplacement {
    pub placeholder: String,
    pub field: String,
    #[serde(default)]
    pub transform: Option<Transform>,
    #[serde(default = "default_text")]
    pub default: String,
}

impl TextReplacement {
    /// Replacement text for this placeholder.
    pub fn render(&self, summary: &CanonicalSummary) -> String {
        let value = match summary.text_field(&self.field) {
            Some(FieldValue::Text(text)) => match self.transform {
                Some(Transform::IsoDate) => text.trim().chars().take(10).collect(),
                _ => text.trim().to_string(),
            },
            Some(FieldValue::List(items)) => {
                let items: Vec<&str> = items
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .collect();
                match self.transform {
                    Some(Transform::JoinParagraphs) => items.join("\n\n"),
                    _ => items.join(", "),
                }
            }
            None => {
                warn!(field = %self.field, placeholder = %self.placeholder, "unknown field in mapping");
                String::new()
            }
        };
        if value.is_empty() || value == NO_UPDATES {
            self.default.clone()
        } else {
            value
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RichKind {
    Outline,
    Takeaways,
    Bullets,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichSection {
    pub marker: String,
    pub field: String,
    pub kind: RichKind,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub heading_level: Option<u8>,
}

impl RichSection {
    pub fn heading_style(&self) -> NamedStyle {
        let level = self.heading_level.unwrap_or(match self.kind {
            RichKind::Takeaways => 3,
            _ => 2,
        });
        NamedStyle::heading(level)
    }
}

/// A column given either as a bare header or as header plus field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnSpec {
    Header(String),
    Full { header: String, field: String },
}

impl ColumnSpec {
    pub fn to_column(&self) -> Column {
        match self {
            ColumnSpec::Header(header) => Column::from_header(header),
            ColumnSpec::Full { header, field } => Column::new(header, field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    pub placeholder: String,
    pub field: ActionTable,
    pub columns: Vec<ColumnSpec>,
    #[serde(default = "default_true")]
    pub required: bool,
}

impl TableMapping {
    pub fn columns(&self) -> Vec<Column> {
        self.columns.iter().map(ColumnSpec::to_column).collect()
    }

    /// Rows of the mapped table ready for rendering.
    pub fn descriptor(&self, summary: &CanonicalSummary) -> TableDescriptor {
        let rows = summary
            .table(self.field)
            .iter()
            .map(|row| row.to_row())
            .collect();
        TableDescriptor::new(self.columns(), self.placeholder.clone(), rows)
    }
}

fn default_text() -> String {
    NO_UPDATES.to_string()
}

fn default_true() -> bool {
    true
}

impl SectionMapping {
    pub fn load(path: &Path) -> Result<Self, MappingError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, MappingError> {
        let mapping: SectionMapping = toml::from_str(content)?;
        mapping.validate()?;
        Ok(mapping)
    }

    /// Mapping for [`DEFAULT_TEMPLATE`].
    pub fn builtin() -> Result<Self, MappingError> {
        Self::from_toml(BUILTIN_MAPPING)
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        let placeholders = self
            .text
            .iter()
            .chain(&self.links)
            .map(|t| t.placeholder.as_str())
            .chain(self.rich.iter().map(|r| r.marker.as_str()))
            .chain(self.tables.iter().map(|t| t.placeholder.as_str()));
        for placeholder in placeholders {
            if placeholder.trim().is_empty() {
                return Err(MappingError::Invalid("empty placeholder".into()));
            }
        }

        for rich in &self.rich {
            let compatible = match rich.kind {
                RichKind::Outline => rich.field == "outline",
                RichKind::Takeaways => rich.field == "key_takeaways",
                RichKind::Bullets => {
                    CanonicalSummary::TEXT_FIELDS.contains(&rich.field.as_str())
                }
            };
            if !compatible {
                return Err(MappingError::Invalid(format!(
                    "field '{}' cannot be rendered as {:?}",
                    rich.field, rich.kind
                )));
            }
        }

        for table in &self.tables {
            if table.columns.is_empty() {
                return Err(MappingError::Invalid(format!(
                    "table {} has no columns",
                    table.placeholder
                )));
            }
        }
        Ok(())
    }

    /// Every placeholder and marker the mapping consumes.
    pub fn anchors(&self) -> impl Iterator<Item = &str> {
        self.text
            .iter()
            .chain(self.links.iter())
            .map(|t| t.placeholder.as_str())
            .chain(self.rich.iter().map(|r| r.marker.as_str()))
            .chain(self.tables.iter().map(|t| t.placeholder.as_str()))
    }

    /// Rich markers and table placeholders that must be present in a template.
    pub fn required_anchors(&self) -> Vec<&str> {
        self.rich
            .iter()
            .filter(|r| r.required)
            .map(|r| r.marker.as_str())
            .chain(
                self.tables
                    .iter()
                    .filter(|t| t.required)
                    .map(|t| t.placeholder.as_str()),
            )
            .collect()
    }
}

/// Plain-text template matching the built-in mapping.
pub const DEFAULT_TEMPLATE: &str = "\
{{TITLE}}
Date: {{DATE}}
Attendees: {{ATTENDEES}}
Executive Summary
{{SUMMARY}}
Outline
<<OUTLINE_MARKER>>
Key Takeaways
<<KEY_TAKEAWAYS_MARKER>>
Next Steps
{{NEXT_STEPS}}
Strategic Initiatives
{{STRATEGIC_INITIATIVES}}
Executive Follow-up
{{EXECUTIVE_FOLLOWUP}}
James Grant Actions
{{JAMES_GRANT_ACTIONS}}
Transcript: {{TRANSCRIPT_LINK}}
Summary data: {{SUMMARY_LINK}}
";

const BUILTIN_MAPPING: &str = r#"
[[text]]
placeholder = "{{TITLE}}"
field = "title"

[[text]]
placeholder = "{{DATE}}"
field = "date"
transform = "iso_date"

[[text]]
placeholder = "{{ATTENDEES}}"
field = "attendees"
transform = "join_comma"

[[text]]
placeholder = "{{SUMMARY}}"
field = "summary"

[[rich]]
marker = "<<OUTLINE_MARKER>>"
field = "outline"
kind = "outline"

[[rich]]
marker = "<<KEY_TAKEAWAYS_MARKER>>"
field = "key_takeaways"
kind = "takeaways"

[[links]]
placeholder = "{{TRANSCRIPT_LINK}}"
field = "transcript_link"
default = "N/A"

[[links]]
placeholder = "{{SUMMARY_LINK}}"
field = "summary_link"
default = "N/A"

[[tables]]
placeholder = "{{NEXT_STEPS}}"
field = "next_steps"
columns = [
    "Description",
    "Owner",
    "Due Date",
    { header = "Priority", field = "priority_score" },
    { header = "Urgency", field = "urgency_score" },
    "Citation",
]

[[tables]]
placeholder = "{{STRATEGIC_INITIATIVES}}"
field = "strategic_initiatives"
columns = [
    "Subject",
    "Description",
    "Owner",
    { header = "Topic", field = "high_level_topic" },
    { header = "Priority", field = "priority_score" },
    "Citation",
]

[[tables]]
placeholder = "{{EXECUTIVE_FOLLOWUP}}"
field = "executive_followup"
columns = [
    "Subject",
    "Description",
    "Owner",
    "Due Date",
    { header = "Urgency", field = "urgency_score" },
    "Citation",
]

[[tables]]
placeholder = "{{JAMES_GRANT_ACTIONS}}"
field = "james_grant_actions"
columns = [
    "Description",
    "Owner",
    "Due Date",
    { header = "Priority", field = "priority_score" },
    { header = "Referenced", field = "james_grant_reference" },
    "Citation",
]
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use serde_json::json;

    #[test]
    fn test_builtin_mapping_is_valid() {
        let mapping = SectionMapping::builtin().unwrap();
        assert_eq!(mapping.text.len(), 4);
        assert_eq!(mapping.rich.len(), 2);
        assert_eq!(mapping.tables.len(), 4);
        for anchor in mapping.required_anchors() {
            assert!(DEFAULT_TEMPLATE.contains(anchor), "{anchor} missing");
        }
        assert_eq!(mapping.anchors().count(), 12);
        for anchor in mapping.anchors() {
            assert!(DEFAULT_TEMPLATE.contains(anchor), "{anchor} missing");
        }
    }

    #[test]
    fn test_bare_headers_become_snake_case_fields() {
        let column = ColumnSpec::Header("Due Date".into()).to_column();
        assert_eq!(column.field, "due_date");
        assert_eq!(column.header, "Due Date");
    }

    #[test]
    fn test_text_transforms() {
        let summary = normalize(&json!({
            "title": "Weekly sync",
            "date": "2024-05-01T10:00:00Z",
            "attendees": ["Ann", " ", "Bob"],
        }));
        let render = |field: &str, transform| {
            TextReplacement {
                placeholder: "{{X}}".into(),
                field: field.into(),
                transform,
                default: NO_UPDATES.into(),
            }
            .render(&summary)
        };
        assert_eq!(render("attendees", Some(Transform::JoinComma)), "Ann, Bob");
        assert_eq!(render("attendees", Some(Transform::JoinParagraphs)), "Ann\n\nBob");
        assert_eq!(render("date", Some(Transform::IsoDate)), "2024-05-01");
        assert_eq!(render("transcript_link", None), NO_UPDATES);
        assert_eq!(render("nonsense", None), NO_UPDATES);
    }

    #[test]
    fn test_rejects_incompatible_rich_field() {
        let err = SectionMapping::from_toml(
            r#"
            [[rich]]
            marker = "<<X>>"
            field = "summary"
            kind = "takeaways"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::Invalid(_)));
    }

    #[test]
    fn test_heading_defaults() {
        let mapping = SectionMapping::builtin().unwrap();
        assert_eq!(mapping.rich[0].heading_style(), NamedStyle::Heading2);
        assert_eq!(mapping.rich[1].heading_style(), NamedStyle::Heading3);
    }
}
