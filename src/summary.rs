//! Canonical summary - the normalized record every downstream stage consumes.
//!
//! Instances are produced by [`crate::normalize::normalize`] and are always
//! fully populated: no field is absent, every score lies in `1..=10`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Sentinel used for defaulted prose fields and empty sections.
pub const NO_UPDATES: &str = "No Updates";

/// Sentinel used for missing action-table cells.
pub const NOT_AVAILABLE: &str = "N/A";

/// Heading used when outline items arrive without a section structure.
pub const GENERAL_SECTION: &str = "General";

/// Structured meeting summary in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalSummary {
    /// Meeting title
    pub title: String,
    /// Meeting date as `YYYY-MM-DD`, or the sentinel when unknown
    pub date: String,
    /// Attendees in order of appearance
    pub attendees: Vec<String>,
    /// Executive summary prose
    pub summary: String,
    /// Discussion outline, one entry per topic
    pub outline: Vec<Section>,
    /// Notable decisions, risks and insights
    pub key_takeaways: Vec<Takeaway>,
    pub next_steps: Vec<ActionRow>,
    pub strategic_initiatives: Vec<ActionRow>,
    pub executive_followup: Vec<ActionRow>,
    pub james_grant_actions: Vec<ActionRow>,
    pub transcript_link: String,
    pub summary_link: String,
}

/// One outline topic with its bullet points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Section {
    #[serde(rename = "section")]
    pub heading: String,
    pub bullets: Vec<String>,
}

impl Section {
    pub fn new(heading: impl Into<String>, bullets: Vec<String>) -> Self {
        Self {
            heading: heading.into(),
            bullets,
        }
    }

    /// Fallback used when no usable outline was supplied.
    pub fn placeholder() -> Self {
        Self::new(GENERAL_SECTION, vec![NO_UPDATES.to_string()])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Takeaway {
    pub subject: String,
    pub text: String,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub owner: String,
    pub priority_score: u8,
    pub citation: String,
}

impl Takeaway {
    /// Minimal takeaway carrying only free text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            subject: String::new(),
            text: text.into(),
            category: String::new(),
            kind: String::new(),
            owner: String::new(),
            priority_score: 1,
            citation: String::new(),
        }
    }
}

/// A row of one of the four action tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionRow {
    pub subject: String,
    pub description: String,
    pub owner: String,
    pub due_date: String,
    pub citation: String,
    pub high_level_topic: String,
    pub urgency_score: u8,
    pub priority_score: u8,
    /// Present only on rows of the James Grant actions table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub james_grant_reference: Option<bool>,
}

impl ActionRow {
    /// Row with every text cell set to `N/A` and both scores at the floor.
    pub fn placeholder(kind: ActionTable) -> Self {
        Self {
            subject: NOT_AVAILABLE.to_string(),
            description: NOT_AVAILABLE.to_string(),
            owner: NOT_AVAILABLE.to_string(),
            due_date: NOT_AVAILABLE.to_string(),
            citation: NOT_AVAILABLE.to_string(),
            high_level_topic: NOT_AVAILABLE.to_string(),
            urgency_score: 1,
            priority_score: 1,
            james_grant_reference: kind.has_reference_flag().then_some(false),
        }
    }

    /// Look up a cell by its field name, stringified.
    pub fn field(&self, name: &str) -> Option<String> {
        let value = match name {
            "subject" => self.subject.clone(),
            "description" => self.description.clone(),
            "owner" => self.owner.clone(),
            "due_date" => self.due_date.clone(),
            "citation" => self.citation.clone(),
            "high_level_topic" => self.high_level_topic.clone(),
            "urgency_score" => self.urgency_score.to_string(),
            "priority_score" => self.priority_score.to_string(),
            "james_grant_reference" => self.james_grant_reference?.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Flatten into a field-name keyed map for table rendering.
    pub fn to_row(&self) -> BTreeMap<String, String> {
        ActionTable::field_order(self.james_grant_reference.is_some())
            .iter()
            .filter_map(|name| self.field(name).map(|v| (name.to_string(), v)))
            .collect()
    }
}

/// The four tabular sections sharing the [`ActionRow`] schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTable {
    NextSteps,
    StrategicInitiatives,
    ExecutiveFollowup,
    JamesGrantActions,
}

impl ActionTable {
    pub const ALL: [ActionTable; 4] = [
        ActionTable::NextSteps,
        ActionTable::StrategicInitiatives,
        ActionTable::ExecutiveFollowup,
        ActionTable::JamesGrantActions,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ActionTable::NextSteps => "next_steps",
            ActionTable::StrategicInitiatives => "strategic_initiatives",
            ActionTable::ExecutiveFollowup => "executive_followup",
            ActionTable::JamesGrantActions => "james_grant_actions",
        }
    }

    pub fn has_reference_flag(self) -> bool {
        self == ActionTable::JamesGrantActions
    }

    /// Positional order used when a row arrives as a bare list.
    pub fn field_order(with_reference: bool) -> &'static [&'static str] {
        const BASE: [&str; 9] = [
            "description",
            "owner",
            "due_date",
            "priority_score",
            "urgency_score",
            "citation",
            "high_level_topic",
            "subject",
            "james_grant_reference",
        ];
        if with_reference {
            &BASE
        } else {
            &BASE[..8]
        }
    }
}

impl fmt::Display for ActionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ActionTable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionTable::ALL
            .into_iter()
            .find(|t| t.key() == s)
            .ok_or_else(|| format!("unknown action table: {s}"))
    }
}

impl CanonicalSummary {
    /// Names accepted by [`CanonicalSummary::text_field`].
    pub const TEXT_FIELDS: [&'static str; 6] = [
        "title",
        "date",
        "summary",
        "transcript_link",
        "summary_link",
        "attendees",
    ];

    pub fn table(&self, kind: ActionTable) -> &[ActionRow] {
        match kind {
            ActionTable::NextSteps => &self.next_steps,
            ActionTable::StrategicInitiatives => &self.strategic_initiatives,
            ActionTable::ExecutiveFollowup => &self.executive_followup,
            ActionTable::JamesGrantActions => &self.james_grant_actions,
        }
    }

    pub(crate) fn table_mut(&mut self, kind: ActionTable) -> &mut Vec<ActionRow> {
        match kind {
            ActionTable::NextSteps => &mut self.next_steps,
            ActionTable::StrategicInitiatives => &mut self.strategic_initiatives,
            ActionTable::ExecutiveFollowup => &mut self.executive_followup,
            ActionTable::JamesGrantActions => &mut self.james_grant_actions,
        }
    }

    /// Scalar and list fields by name, as used by flat-replace mappings.
    pub fn text_field(&self, name: &str) -> Option<FieldValue<'_>> {
        let value = match name {
            "title" => FieldValue::Text(&self.title),
            "date" => FieldValue::Text(&self.date),
            "summary" => FieldValue::Text(&self.summary),
            "transcript_link" => FieldValue::Text(&self.transcript_link),
            "summary_link" => FieldValue::Text(&self.summary_link),
            "attendees" => FieldValue::List(&self.attendees),
            _ => return None,
        };
        Some(value)
    }

    /// Rewrite every free-text value in place. Scores and flags are untouched.
    pub fn map_text(&mut self, mut f: impl FnMut(&str) -> String) {
        let mut apply = |s: &mut String| {
            let mapped = f(s);
            *s = mapped;
        };

        apply(&mut self.title);
        apply(&mut self.date);
        apply(&mut self.summary);
        apply(&mut self.transcript_link);
        apply(&mut self.summary_link);
        self.attendees.iter_mut().for_each(&mut apply);
        for section in &mut self.outline {
            apply(&mut section.heading);
            section.bullets.iter_mut().for_each(&mut apply);
        }
        for t in &mut self.key_takeaways {
            for field in [
                &mut t.subject,
                &mut t.text,
                &mut t.category,
                &mut t.kind,
                &mut t.owner,
                &mut t.citation,
            ] {
                apply(field);
            }
        }
        for kind in ActionTable::ALL {
            for row in self.table_mut(kind) {
                for field in [
                    &mut row.subject,
                    &mut row.description,
                    &mut row.owner,
                    &mut row.due_date,
                    &mut row.citation,
                    &mut row.high_level_topic,
                ] {
                    apply(field);
                }
            }
        }
    }
}

/// Borrowed view of a flat-replaceable field.
#[derive(Debug, Clone, Copy)]
pub enum FieldValue<'a> {
    Text(&'a str),
    List(&'a [String]),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_flag_only_serialized_for_james_grant_rows() {
        let plain = serde_json::to_value(ActionRow::placeholder(ActionTable::NextSteps)).unwrap();
        assert!(plain.get("james_grant_reference").is_none());
        assert_eq!(plain.as_object().unwrap().len(), 8);

        let flagged =
            serde_json::to_value(ActionRow::placeholder(ActionTable::JamesGrantActions)).unwrap();
        assert_eq!(flagged["james_grant_reference"], serde_json::json!(false));
    }

    #[test]
    fn map_text_reaches_nested_fields_but_not_scores() {
        let mut summary = crate::normalize::normalize(&serde_json::json!({
            "title": "sync",
            "outline": [{"section": "budget", "bullets": ["flat"]}],
            "key_takeaways": [{"subject": "risk", "text": "slip"}],
            "james_grant_actions": [{"description": "call", "priority_score": 7}]
        }));
        summary.map_text(|s| s.to_uppercase());

        assert_eq!(summary.title, "SYNC");
        assert_eq!(summary.outline[0].heading, "BUDGET");
        assert_eq!(summary.outline[0].bullets, vec!["FLAT"]);
        assert_eq!(summary.key_takeaways[0].text, "SLIP");
        let row = &summary.james_grant_actions[0];
        assert_eq!(row.description, "CALL");
        assert_eq!(row.priority_score, 7);
        assert_eq!(row.james_grant_reference, Some(false));
    }

    #[test]
    fn table_names_round_trip_through_from_str() {
        for table in ActionTable::ALL {
            assert_eq!(table.key().parse::<ActionTable>().unwrap(), table);
        }
        assert!("minutes".parse::<ActionTable>().is_err());
    }

    #[test]
    fn to_row_uses_field_names() {
        let mut row = ActionRow::placeholder(ActionTable::NextSteps);
        row.owner = "Bob".into();
        row.priority_score = 7;
        let map = row.to_row();
        assert_eq!(map["owner"], "Bob");
        assert_eq!(map["priority_score"], "7");
        assert!(!map.contains_key("james_grant_reference"));
    }
}
