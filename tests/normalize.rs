use minuta::normalize;
use minuta::summary::{ActionTable, GENERAL_SECTION, NOT_AVAILABLE, NO_UPDATES};
use serde_json::{json, Value};

#[test]
fn test_blank_title_and_partial_rows_are_defaulted() {
    let summary = normalize(&json!({
        "title": "",
        "attendees": "Jane Roe",
        "next_steps": [{"description": "Ship", "owner": "Jane"}]
    }));

    assert_eq!(summary.title, NO_UPDATES);
    assert_eq!(summary.attendees, vec!["Jane Roe"]);

    let row = &summary.next_steps[0];
    assert_eq!(row.description, "Ship");
    assert_eq!(row.subject, "Ship");
    assert_eq!(row.owner, "Jane");
    assert_eq!(row.due_date, NOT_AVAILABLE);
    assert_eq!(row.citation, NOT_AVAILABLE);
    assert_eq!(row.high_level_topic, NOT_AVAILABLE);
    assert_eq!(row.urgency_score, 1);
    assert_eq!(row.priority_score, 1);
    assert_eq!(row.james_grant_reference, None);
}

#[test]
fn test_flat_outline_pairs_and_odd_fallback() {
    let even = normalize(&json!({"outline": ["Heading A", "Bullet 1", "Heading B", "Bullet 2"]}));
    let pairs: Vec<_> = even
        .outline
        .iter()
        .map(|s| (s.heading.as_str(), s.bullets.clone()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("Heading A", vec!["Bullet 1".to_string()]),
            ("Heading B", vec!["Bullet 2".to_string()]),
        ]
    );

    let odd = normalize(&json!({"outline": ["one", "two", "three"]}));
    assert_eq!(odd.outline.len(), 1);
    assert_eq!(odd.outline[0].heading, GENERAL_SECTION);
    assert_eq!(odd.outline[0].bullets, vec!["one", "two", "three"]);
}

#[test]
fn test_canonical_form_is_a_fixed_point() {
    let inputs = vec![
        json!({}),
        json!({
            "title": "Quarterly Review",
            "date": "March 4, 2024",
            "attendees": ["Ann", "", "Bob"],
            "summary": ["First paragraph.", "Second paragraph."],
            "outline": [{"heading": "Budget", "points": ["Flat", "Hiring freeze"]}, "stray note"],
            "key_takeaways": ["Plain text", {"subject": "Risk", "text": "Vendor delay", "type": "risk", "priority_score": "9"}],
            "next_steps": [["Write memo", "Ann", "2024-03-10", 12, "3"]],
            "james_grant_actions": [{"description": "Call JG", "james_grant_reference": "yes"}],
            "transcript_link": "https://example.com/t"
        }),
        json!({"outline": {"section": "Only", "bullets": "single"}, "executive_followup": {"owner": "CEO"}}),
    ];

    for input in inputs {
        let once = normalize(&input);
        let serialized = serde_json::to_value(&once).unwrap();
        let twice = normalize(&serialized);
        assert_eq!(once, twice, "not stable for {input}");
    }
}

#[test]
fn test_every_shape_yields_a_complete_summary() {
    let odd_inputs = vec![
        Value::Null,
        json!(42),
        json!("just a string"),
        json!([1, 2, 3]),
        json!({"title": {"nested": true}, "date": "not a date", "attendees": 7}),
        json!({"next_steps": "none", "key_takeaways": null, "outline": []}),
        json!({"strategic_initiatives": [null, 5, {"urgency_score": 99, "priority_score": -4}]}),
    ];

    for input in odd_inputs {
        let summary = normalize(&input);
        assert!(!summary.title.is_empty());
        assert!(!summary.summary.is_empty());
        assert!(summary.date == NO_UPDATES || summary.date.len() == 10);
        assert!(!summary.outline.is_empty());
        for kind in ActionTable::ALL {
            for row in summary.table(kind) {
                assert!((1..=10).contains(&row.urgency_score));
                assert!((1..=10).contains(&row.priority_score));
                assert!(!row.owner.is_empty());
                assert_eq!(row.james_grant_reference.is_some(), kind.has_reference_flag());
            }
        }
    }
}

#[test]
fn test_scores_are_clamped_and_flags_coerced() {
    let summary = normalize(&json!({
        "strategic_initiatives": [{"subject": "Expand", "urgency_score": 99, "priority_score": "-4"}],
        "james_grant_actions": [{"description": "Brief", "james_grant_reference": "yes"}]
    }));
    let row = &summary.strategic_initiatives[0];
    assert_eq!(row.urgency_score, 10);
    assert_eq!(row.priority_score, 1);
    assert_eq!(row.description, "Expand");
    assert_eq!(summary.james_grant_actions[0].james_grant_reference, Some(true));
}

#[test]
fn test_dates_are_iso() {
    assert_eq!(normalize(&json!({"date": "2024/06/03"})).date, "2024-06-03");
    assert_eq!(normalize(&json!({"date": "June 3, 2024"})).date, "2024-06-03");
    assert_eq!(normalize(&json!({"date": "2024-06-03T10:00:00Z"})).date, "2024-06-03");
    assert_eq!(normalize(&json!({"date": "sometime"})).date, NO_UPDATES);
}
