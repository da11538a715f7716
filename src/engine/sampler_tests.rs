//! Sampler Behavior Tests
//!
//! Verifies the admission-control contract:
//! 1. Criticals bypass any rate, including 0.0
//! 2. Rate 1.0 admits everything, rate 0.0 drops every non-critical
//! 3. Decisions are deterministic per fingerprint, across stores and runs
//! 4. Fingerprint failure falls back to randomness, flagged as such

use crate::engine::config::StoreConfig;
use crate::engine::event::{CallDirection, Direction, EventDraft, EventKind, ProcessEvent};
use crate::engine::query::QueryEngine;
use crate::engine::sampler::{decide, SampleDecision};
use crate::engine::store::{EventStore, Filter, PutOutcome};
use serde_json::json;

fn store_with_rate(sample_rate: f64, max_events: usize) -> EventStore {
    EventStore::with_config(StoreConfig {
        sample_rate,
        max_events,
        ..StoreConfig::default()
    })
    .expect("valid config")
}

// =============================================================================
// RATE EXTREMES
// =============================================================================

#[test]
fn test_rate_zero_preserves_criticals() {
    let store = store_with_rate(0.0, 100);

    for i in 0..10 {
        let actor = format!("proc-{}", i);
        store
            .put(EventDraft::process(actor.as_str(), ProcessEvent::Spawn))
            .expect("writable");
        store
            .put(EventDraft::function(
                actor.as_str(),
                "worker",
                "step",
                1,
                CallDirection::Enter,
                json!(i),
            ))
            .expect("writable");
    }

    let processes = store.query(&Filter::new().kind(EventKind::Process));
    let functions = store.query(&Filter::new().kind(EventKind::Function));
    assert_eq!(processes.len(), 10, "criticals must survive rate 0.0");
    assert_eq!(functions.len(), 0, "non-criticals must all drop at rate 0.0");
    assert_eq!(store.stats().dropped_sampling, 10);
}

#[test]
fn test_rate_one_keeps_all() {
    let store = store_with_rate(1.0, 100);
    let engine = QueryEngine::new(&store);

    for i in 0..5 {
        store
            .put(EventDraft::state("a", "counter", "handle_cast", json!({ "n": i })))
            .expect("writable");
        store
            .put(EventDraft::message(
                Direction::Send,
                "a",
                "b",
                json!({ "seq": i }),
            ))
            .expect("writable");
    }

    assert_eq!(engine.state_timeline(&"a".into()).len(), 5);
    assert_eq!(engine.messages_between(&"a".into(), &"b".into()).len(), 5);
    assert_eq!(store.stats().dropped_sampling, 0);
}

#[test]
fn test_critical_bypass_is_unconditional() {
    for sub in [ProcessEvent::Spawn, ProcessEvent::Exit, ProcessEvent::Crash] {
        let draft = EventDraft::process("a", sub);
        assert_eq!(decide(&draft, 0.0), SampleDecision::Admit);
    }
    let flagged = EventDraft::custom("deploy", Default::default()).critical();
    assert_eq!(decide(&flagged, 0.0), SampleDecision::Admit);
}

// =============================================================================
// DETERMINISM
// =============================================================================

#[test]
fn test_identical_drafts_get_identical_decisions() {
    let draft = EventDraft::message(Direction::Send, "x", "y", json!({ "k": 7 })).at(1_000_000);
    for _ in 0..100 {
        assert_eq!(decide(&draft, 0.5), decide(&draft, 0.5));
    }
}

#[test]
fn test_same_sequence_samples_identically_across_stores() {
    let drafts: Vec<EventDraft> = (0..1_000)
        .map(|i| {
            EventDraft::message(
                Direction::Send,
                format!("sender-{}", i % 17).as_str(),
                "sink",
                json!({ "seq": i }),
            )
            .at(i as i64 * 1_000)
        })
        .collect();

    let run = |drafts: &[EventDraft]| -> Vec<usize> {
        let store = store_with_rate(0.5, 10_000);
        drafts
            .iter()
            .enumerate()
            .filter_map(|(i, draft)| {
                match store.put(draft.clone()).expect("writable") {
                    PutOutcome::Stored(_) => Some(i),
                    PutOutcome::Dropped(_) => None,
                }
            })
            .collect()
    };

    let first = run(&drafts);
    let second = run(&drafts);
    assert_eq!(first, second, "admission sets must match across fresh stores");
    assert!(
        !first.is_empty() && first.len() < drafts.len(),
        "rate 0.5 should admit a strict subset, admitted {}",
        first.len()
    );
}

#[test]
fn test_rate_partitions_monotonically() {
    // An event admitted at a low rate must also be admitted at any higher
    // rate: the threshold comparison is monotone in the rate.
    let drafts: Vec<EventDraft> = (0..200)
        .map(|i| EventDraft::message(Direction::Send, "p", "q", json!(i)))
        .collect();
    for draft in &drafts {
        if decide(draft, 0.2).is_admit() {
            assert!(decide(draft, 0.7).is_admit());
        }
    }
}

// =============================================================================
// FALLBACK
// =============================================================================

#[test]
fn test_pathological_payload_uses_fallback() {
    let mut nested = json!(0);
    for _ in 0..100 {
        nested = json!([nested]);
    }
    let draft = EventDraft::message(Direction::Send, "x", "y", nested);
    let decision = decide(&draft, 0.5);
    assert!(decision.used_fallback());
}

#[test]
fn test_fallback_respects_rate_extremes_after_bypass_checks() {
    let mut nested = json!(0);
    for _ in 0..100 {
        nested = json!([nested]);
    }
    let draft = EventDraft::message(Direction::Send, "x", "y", nested);
    // Extremes short-circuit before fingerprinting, so no fallback there.
    assert_eq!(decide(&draft, 1.0), SampleDecision::Admit);
    assert_eq!(decide(&draft, 0.0), SampleDecision::Drop);
}

#[test]
fn test_put_sanitizes_before_fingerprinting() {
    // The store sanitizes ahead of sampling, which collapses pathological
    // nesting below the hash depth limit: payloads that would force the
    // sampler's RNG fallback in isolation never do so through `put`.
    let store = store_with_rate(0.5, 100);
    let mut nested = json!(0);
    for _ in 0..100 {
        nested = json!([nested]);
    }
    store
        .put(EventDraft::message(Direction::Send, "x", "y", nested))
        .expect("writable");
    assert_eq!(store.stats().fingerprint_fallbacks, 0);
}
