//! Schema normalizer.
//!
//! Converts whatever JSON the completion service produced into a
//! [`CanonicalSummary`]. The conversion is total: wrong types, missing keys
//! and malformed rows are coerced or defaulted, never rejected. Every schema
//! revision the summariser has emitted is accepted here.

use crate::summary::{
    ActionRow, ActionTable, CanonicalSummary, Section, Takeaway, GENERAL_SECTION, NOT_AVAILABLE,
    NO_UPDATES,
};
use chrono::NaiveDate;
use serde_json::{Map, Value};
use tracing::{debug, warn};

const KNOWN_KEYS: &[&str] = &[
    "title",
    "date",
    "attendees",
    "summary",
    "outline",
    "key_takeaways",
    "next_steps",
    "strategic_initiatives",
    "executive_followup",
    "james_grant_actions",
    "transcript_link",
    "summary_link",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%B %d, %Y", "%b %d, %Y", "%m/%d/%Y"];

const SCORE_MIN: i64 = 1;
const SCORE_MAX: i64 = 10;

/// Normalize a decoded JSON value into canonical form. Never fails.
pub fn normalize(raw: &Value) -> CanonicalSummary {
    let empty = Map::new();
    let obj = match raw {
        Value::Object(obj) => obj,
        Value::Null => &empty,
        other => {
            warn!(kind = json_kind(other), "summary is not an object, using defaults");
            &empty
        }
    };

    for key in obj.keys().filter(|k| !KNOWN_KEYS.contains(&k.as_str())) {
        debug!(key = %key, "ignoring unrecognised summary key");
    }

    let mut summary = CanonicalSummary {
        title: text_or(obj.get("title"), NO_UPDATES, "title"),
        date: date(obj.get("date")),
        attendees: attendees(obj.get("attendees")),
        summary: prose(obj.get("summary")),
        outline: outline(obj.get("outline")),
        key_takeaways: takeaways(obj.get("key_takeaways")),
        next_steps: Vec::new(),
        strategic_initiatives: Vec::new(),
        executive_followup: Vec::new(),
        james_grant_actions: Vec::new(),
        transcript_link: text_or(obj.get("transcript_link"), NO_UPDATES, "transcript_link"),
        summary_link: text_or(obj.get("summary_link"), NO_UPDATES, "summary_link"),
    };

    for kind in ActionTable::ALL {
        *summary.table_mut(kind) = action_rows(obj.get(kind.key()), kind);
    }

    summary
}

/// Best-effort stringification. `null` becomes empty; lists are joined.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(stringify)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Coerce a score to an integer in `1..=10`; anything unparseable is `1`.
pub fn score(value: Option<&Value>) -> u8 {
    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.round() as i64)
            })
        }
        _ => None,
    };
    parsed.unwrap_or(SCORE_MIN).clamp(SCORE_MIN, SCORE_MAX) as u8
}

fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "y" | "1"
        ),
        _ => false,
    }
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    value.map(stringify).filter(|s| !s.is_empty())
}

fn text_or(value: Option<&Value>, default: &str, field: &str) -> String {
    non_blank(value).unwrap_or_else(|| {
        warn!(field, "missing or blank field, defaulting");
        default.to_string()
    })
}

fn date(value: Option<&Value>) -> String {
    let Some(raw) = non_blank(value) else {
        warn!(field = "date", "missing date, defaulting");
        return NO_UPDATES.to_string();
    };
    parse_date(&raw)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| {
            if raw != NO_UPDATES {
                warn!(date = %raw, "unrecognised date, defaulting");
            }
            NO_UPDATES.to_string()
        })
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    // Timestamps carry the calendar date in their first ten characters.
    let candidates = [Some(raw), raw.get(..10)];
    candidates.into_iter().flatten().find_map(|candidate| {
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
    })
}

fn attendees(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(stringify)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            warn!(kind = json_kind(other), "attendees has unexpected type, dropping");
            Vec::new()
        }
    }
}

fn prose(value: Option<&Value>) -> String {
    let text = match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(stringify)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => String::new(),
    };
    if text.is_empty() {
        warn!(field = "summary", "missing summary, defaulting");
        NO_UPDATES.to_string()
    } else {
        text
    }
}

fn outline(value: Option<&Value>) -> Vec<Section> {
    let sections = match value {
        Some(Value::Array(items)) => outline_from_list(items),
        Some(Value::Object(obj)) => section_from_object(obj).into_iter().collect(),
        Some(other) => {
            let line = stringify(other);
            if line.is_empty() {
                Vec::new()
            } else {
                vec![Section::new(GENERAL_SECTION, vec![line])]
            }
        }
        None => Vec::new(),
    };

    if sections.is_empty() {
        warn!(field = "outline", "no usable outline, substituting placeholder section");
        vec![Section::placeholder()]
    } else {
        sections
    }
}

fn outline_from_list(items: &[Value]) -> Vec<Section> {
    if items.iter().any(Value::is_object) {
        let mut sections = Vec::new();
        let mut loose = Vec::new();
        for item in items {
            match item {
                Value::Object(obj) => sections.extend(section_from_object(obj)),
                other => {
                    let line = stringify(other);
                    if !line.is_empty() {
                        loose.push(line);
                    }
                }
            }
        }
        if !loose.is_empty() {
            sections.push(Section::new(GENERAL_SECTION, loose));
        }
        return sections;
    }

    let flat: Vec<String> = items
        .iter()
        .map(stringify)
        .filter(|s| !s.is_empty())
        .collect();
    if flat.is_empty() {
        return Vec::new();
    }

    if flat.len() % 2 == 0 {
        flat.chunks(2)
            .map(|pair| Section::new(pair[0].clone(), vec![pair[1].clone()]))
            .collect()
    } else {
        vec![Section::new(GENERAL_SECTION, flat)]
    }
}

fn section_from_object(obj: &Map<String, Value>) -> Option<Section> {
    let heading = ["section", "heading", "title"]
        .iter()
        .find_map(|k| non_blank(obj.get(*k)));
    let bullets: Vec<String> = match ["bullets", "points", "items"]
        .iter()
        .find_map(|k| obj.get(*k))
    {
        Some(Value::Array(items)) => items
            .iter()
            .map(stringify)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(other) => non_blank(Some(other)).into_iter().collect(),
        None => Vec::new(),
    };

    if heading.is_none() && bullets.is_empty() {
        return None;
    }
    Some(Section::new(
        heading.unwrap_or_else(|| GENERAL_SECTION.to_string()),
        bullets,
    ))
}

fn takeaways(value: Option<&Value>) -> Vec<Takeaway> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(takeaway).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(single) => takeaway(single).into_iter().collect(),
    }
}

fn takeaway(item: &Value) -> Option<Takeaway> {
    match item {
        Value::Object(obj) => {
            let field = |key: &str| obj.get(key).map(stringify).unwrap_or_default();
            Some(Takeaway {
                subject: field("subject"),
                text: field("text"),
                category: field("category"),
                kind: obj.get("type").or_else(|| obj.get("kind")).map(stringify).unwrap_or_default(),
                owner: field("owner"),
                priority_score: score(obj.get("priority_score")),
                citation: field("citation"),
            })
        }
        other => {
            let text = stringify(other);
            (!text.is_empty()).then(|| Takeaway::from_text(text))
        }
    }
}

fn action_rows(value: Option<&Value>, kind: ActionTable) -> Vec<ActionRow> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| action_row(item, kind, index))
            .collect(),
        Some(Value::Object(obj)) => vec![row_from_object(obj, kind)],
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            warn!(table = %kind, kind = json_kind(other), "table is not a list, dropping");
            Vec::new()
        }
    }
}

fn action_row(item: &Value, kind: ActionTable, index: usize) -> ActionRow {
    match item {
        Value::Object(obj) => row_from_object(obj, kind),
        Value::Array(cells) => {
            let fields = ActionTable::field_order(kind.has_reference_flag());
            let obj: Map<String, Value> = fields
                .iter()
                .zip(cells.iter())
                .map(|(field, cell)| (field.to_string(), cell.clone()))
                .collect();
            row_from_object(&obj, kind)
        }
        other => {
            warn!(
                table = %kind,
                index,
                kind = json_kind(other),
                "row is not a record, defaulting every field"
            );
            ActionRow::placeholder(kind)
        }
    }
}

fn row_from_object(obj: &Map<String, Value>, kind: ActionTable) -> ActionRow {
    let cell = |key: &str| non_blank(obj.get(key));
    let mut subject = cell("subject");
    let mut description = cell("description");
    match (&subject, &description) {
        (Some(s), None) => description = Some(s.clone()),
        (None, Some(d)) => subject = Some(d.clone()),
        _ => {}
    }
    let or_na = |v: Option<String>| v.unwrap_or_else(|| NOT_AVAILABLE.to_string());

    ActionRow {
        subject: or_na(subject),
        description: or_na(description),
        owner: or_na(cell("owner")),
        due_date: or_na(cell("due_date")),
        citation: or_na(cell("citation")),
        high_level_topic: or_na(cell("high_level_topic")),
        urgency_score: score(obj.get("urgency_score")),
        priority_score: score(obj.get("priority_score")),
        james_grant_reference: kind
            .has_reference_flag()
            .then(|| flag(obj.get("james_grant_reference"))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
