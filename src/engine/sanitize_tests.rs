//! Sanitization Tests
//!
//! Caps hold, markers fit inside the caps, and a second pass over any
//! sanitized value changes nothing.

use crate::engine::event::{Direction, EventDraft, EventPayload};
use crate::engine::sanitize::{
    sanitize_payload, sanitize_value, to_sanitized_value, SanitizeLimits,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn limits() -> SanitizeLimits {
    SanitizeLimits::default()
}

// =============================================================================
// STRING CAPS
// =============================================================================

#[test]
fn test_short_strings_pass_through() {
    let value = json!("hello");
    assert_eq!(sanitize_value(&value, &limits()), value);
}

#[test]
fn test_long_strings_truncate_within_cap() {
    let raw = "x".repeat(1_000);
    let out = sanitize_value(&json!(raw), &limits());
    let Value::String(s) = out else {
        panic!("string stays a string");
    };
    assert!(s.len() <= limits().max_string_bytes);
    assert!(s.ends_with("bytes total)"), "marker records the original size");
}

#[test]
fn test_truncation_respects_char_boundaries() {
    // Multi-byte characters straddling the cut must not split.
    let raw = "é".repeat(500);
    let out = sanitize_value(&json!(raw), &limits());
    let Value::String(s) = out else {
        panic!("string stays a string");
    };
    assert!(s.len() <= limits().max_string_bytes);
}

#[test]
fn test_tight_cap_degrades_to_bare_prefix() {
    let tight = SanitizeLimits {
        max_string_bytes: 10,
        ..limits()
    };
    let out = sanitize_value(&json!("abcdefghijklmnop"), &tight);
    assert_eq!(out, json!("abcdefghij"));
}

// =============================================================================
// COLLECTION CAPS
// =============================================================================

#[test]
fn test_oversized_arrays_keep_cap_entries_with_marker() {
    let raw: Vec<i64> = (0..100).collect();
    let out = sanitize_value(&json!(raw), &limits());
    let Value::Array(items) = out else {
        panic!("array stays an array");
    };
    assert_eq!(items.len(), limits().max_collection_items);
    assert_eq!(items.last(), Some(&json!("… +69 more")));
}

#[test]
fn test_oversized_objects_record_dropped_count() {
    let mut map = serde_json::Map::new();
    for i in 0..100 {
        map.insert(format!("key-{:03}", i), json!(i));
    }
    let out = sanitize_value(&Value::Object(map), &limits());
    let Value::Object(entries) = out else {
        panic!("object stays an object");
    };
    assert_eq!(entries.len(), limits().max_collection_items);
    assert_eq!(entries.get("__truncated__"), Some(&json!(69)));
}

#[test]
fn test_deep_nesting_collapses_to_marker() {
    let mut nested = json!(1);
    for _ in 0..50 {
        nested = json!({ "inner": nested });
    }
    let out = sanitize_value(&nested, &limits());
    let rendered = out.to_string();
    assert!(rendered.contains("…depth"));
}

#[test]
fn test_scalars_and_small_values_unchanged() {
    for value in [
        json!(null),
        json!(true),
        json!(42),
        json!(-1.5),
        json!([1, 2, 3]),
        json!({ "a": 1 }),
    ] {
        assert_eq!(sanitize_value(&value, &limits()), value);
    }
}

// =============================================================================
// IDEMPOTENCE
// =============================================================================

#[test]
fn test_sanitize_is_idempotent() {
    let mut nested = json!("x".repeat(2_000));
    for _ in 0..20 {
        nested = json!({ "layer": nested, "bulk": (0..80).collect::<Vec<i64>>() });
    }
    let cases = [
        json!("y".repeat(5_000)),
        json!((0..500).collect::<Vec<i64>>()),
        nested,
        json!({ "plain": 1 }),
    ];
    for value in &cases {
        let once = sanitize_value(value, &limits());
        let twice = sanitize_value(&once, &limits());
        assert_eq!(once, twice, "second pass must be a no-op");
    }
}

#[test]
fn test_sanitize_payload_is_idempotent() {
    let draft = EventDraft::message(
        Direction::Send,
        "a",
        "b",
        json!({ "blob": "z".repeat(10_000) }),
    );
    let once = sanitize_payload(draft.payload, &limits());
    let twice = sanitize_payload(once.clone(), &limits());
    assert_eq!(once, twice);
}

// =============================================================================
// PAYLOAD COVERAGE AND FAILURES
// =============================================================================

#[test]
fn test_payload_free_form_fields_are_bounded() {
    let big = json!("w".repeat(4_096));
    let payload = EventPayload::State {
        module: "m".to_string(),
        callback: "cb".to_string(),
        snapshot: big,
    };
    let EventPayload::State { snapshot, .. } = sanitize_payload(payload, &limits()) else {
        panic!("kind preserved");
    };
    let Value::String(s) = snapshot else {
        panic!("string stays a string");
    };
    assert!(s.len() <= limits().max_string_bytes);
}

#[test]
fn test_unrepresentable_data_is_rejected() {
    // Non-string map keys have no JSON rendering.
    let mut bad: BTreeMap<(i32, i32), i32> = BTreeMap::new();
    bad.insert((1, 2), 3);
    assert!(to_sanitized_value(&bad, &limits()).is_err());
}

#[test]
fn test_representable_data_serializes_and_bounds() {
    #[derive(serde::Serialize)]
    struct WorkerState {
        queue: Vec<String>,
        label: String,
    }
    let state = WorkerState {
        queue: (0..200).map(|i| format!("job-{}", i)).collect(),
        label: "L".repeat(1_000),
    };
    let value = to_sanitized_value(&state, &limits()).expect("representable");
    let queue = value.get("queue").and_then(Value::as_array).expect("array");
    assert_eq!(queue.len(), limits().max_collection_items);
}
