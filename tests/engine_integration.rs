//! End-to-End Engine Tests
//!
//! Drives the full pipeline — adapters through the sampler into the store,
//! queries over the result, periodic snapshots out the side — including
//! concurrent producers and readers against one shared store.

use actorlens::{
    AdapterConfig, EventDraft, EventKind, EventStore, Filter, IngestionAdapter,
    PeriodicSnapshotter, ProcessEvent, PutOutcome, QueryEngine, StoreConfig, TracingLevel,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

// =============================================================================
// FULL PIPELINE
// =============================================================================

#[test]
fn test_adapter_to_query_pipeline() {
    init_tracing();
    let store = Arc::new(EventStore::new());
    let lifecycle = IngestionAdapter::new(
        Arc::clone(&store),
        AdapterConfig::new("lifecycle", TracingLevel::Full),
    );
    let messaging = IngestionAdapter::new(
        Arc::clone(&store),
        AdapterConfig::new("messaging", TracingLevel::MessagesOnly),
    );

    lifecycle.spawn("sup", None).expect("writable");
    lifecycle
        .spawn("worker", Some("sup".into()))
        .expect("writable");
    lifecycle
        .state_change("worker", "counter", "init", &json!({ "n": 0 }))
        .expect("writable");
    messaging
        .message_sent("sup", "worker", &json!("inc"))
        .expect("writable");
    messaging
        .message_received("sup", "worker", &json!("inc"))
        .expect("writable");
    lifecycle
        .state_change("worker", "counter", "handle_cast", &json!({ "n": 1 }))
        .expect("writable");
    lifecycle.exit("worker", Some("normal")).expect("writable");

    // The messaging adapter must refuse non-message kinds.
    messaging
        .state_change("worker", "counter", "noop", &json!({}))
        .expect("writable");
    assert_eq!(store.stats().adapter_rejections, 1);

    let engine = QueryEngine::new(&store);
    let worker = "worker".into();
    assert_eq!(engine.state_timeline(&worker).len(), 2);
    assert_eq!(engine.messages_between(&"sup".into(), &worker).len(), 2);
    assert!(engine.live_actors_at(i64::MAX).contains(&"sup".into()));
    assert!(!engine.live_actors_at(i64::MAX).contains(&worker));

    let supervision = engine.supervision_view_at(i64::MAX);
    assert_eq!(supervision.len(), 1);
    assert!(supervision[0].children.contains(&worker));
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[test]
fn test_concurrent_producers_preserve_ordering_invariants() {
    init_tracing();
    let store = Arc::new(
        EventStore::with_config(StoreConfig {
            max_events: 500,
            ..StoreConfig::default()
        })
        .expect("valid config"),
    );

    let mut producers = Vec::new();
    for p in 0..8 {
        let store = Arc::clone(&store);
        producers.push(std::thread::spawn(move || {
            let actor = format!("producer-{}", p);
            let mut ids = Vec::new();
            for i in 0..200 {
                let outcome = if i % 20 == 0 {
                    store
                        .put(EventDraft::process(actor.as_str(), ProcessEvent::Spawn))
                        .expect("writable")
                } else {
                    store
                        .put(EventDraft::state(
                            actor.as_str(),
                            "worker",
                            "tick",
                            json!({ "i": i }),
                        ))
                        .expect("writable")
                };
                if let PutOutcome::Stored(id) = outcome {
                    ids.push(id);
                }
            }
            ids
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        readers.push(std::thread::spawn(move || {
            for _ in 0..50 {
                let all = store.iter_all();
                // Any observed view is totally ordered.
                assert!(all
                    .windows(2)
                    .all(|w| w[0].order_key() < w[1].order_key()));
                let stats = store.stats();
                assert!(stats.len <= 500 + stats.critical_len);
            }
        }));
    }

    for producer in producers {
        let ids = producer.join().expect("producer thread");
        // Ids handed to one producer are strictly increasing in its own
        // program order.
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
    for reader in readers {
        reader.join().expect("reader thread");
    }

    // Post-quiescence: index agrees with the log, criticals all retained.
    let all = store.iter_all();
    assert_eq!(all.iter().filter(|e| e.critical).count(), 8 * 10);
    for event in &all {
        for actor in event.actors() {
            assert!(store
                .iter_by_actor(actor)
                .iter()
                .any(|indexed| indexed.id == event.id));
        }
    }
}

#[test]
fn test_clear_is_atomic_under_concurrent_reads() {
    init_tracing();
    let store = Arc::new(EventStore::new());
    for i in 0..50 {
        store
            .put(EventDraft::state("a", "m", "cb", json!({ "i": i })))
            .expect("writable");
    }

    let reader = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for _ in 0..200 {
                let len = store.iter_all().len();
                assert!(
                    len == 0 || len == 50,
                    "a reader must see the full store or an empty one, saw {}",
                    len
                );
            }
        })
    };
    let clearer = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(1));
            store.clear();
        })
    };

    reader.join().expect("reader thread");
    clearer.join().expect("clearer thread");
    assert!(store.is_empty());
}

// =============================================================================
// PERIODIC SNAPSHOTTER
// =============================================================================

#[tokio::test]
async fn test_periodic_snapshotter_emits_restorable_blobs() {
    init_tracing();
    let store = Arc::new(
        EventStore::with_config(StoreConfig {
            name: "periodic".to_string(),
            snapshot_enabled: true,
            snapshot_interval: Duration::from_millis(20),
            ..StoreConfig::default()
        })
        .expect("valid config"),
    );
    for i in 0..25 {
        store
            .put(EventDraft::state("a", "m", "cb", json!({ "i": i })))
            .expect("writable");
    }

    let (snapshotter, mut blobs) =
        PeriodicSnapshotter::spawn(Arc::clone(&store), 4).expect("snapshots enabled");
    let blob = tokio::time::timeout(Duration::from_secs(5), blobs.recv())
        .await
        .expect("a blob within the deadline")
        .expect("channel open");
    snapshotter.shutdown().await;

    let restored = actorlens::restore(&blob.bytes, StoreConfig::named("periodic"))
        .expect("blob restores");
    assert_eq!(restored.len(), 25);
    assert!(store.stats().snapshots_taken >= 1);
}

#[test]
fn test_snapshotter_refuses_disabled_config() {
    let store = Arc::new(EventStore::new());
    assert!(PeriodicSnapshotter::spawn(store, 4).is_none());
}

// =============================================================================
// SAMPLED PIPELINE
// =============================================================================

#[test]
fn test_sampled_pipeline_is_reproducible_end_to_end() {
    init_tracing();
    let run = || {
        let store = Arc::new(
            EventStore::with_config(StoreConfig {
                sample_rate: 0.4,
                ..StoreConfig::default()
            })
            .expect("valid config"),
        );
        let adapter = IngestionAdapter::new(
            Arc::clone(&store),
            AdapterConfig::new("probe", TracingLevel::Full),
        );
        for i in 0..300 {
            adapter
                .forward(
                    EventDraft::state(
                        format!("actor-{}", i % 5).as_str(),
                        "worker",
                        "tick",
                        json!({ "i": i }),
                    )
                    .at(i * 1_000),
                )
                .expect("writable");
        }
        store
            .query(&Filter::new().kind(EventKind::State))
            .iter()
            .map(|e| e.timestamp)
            .collect::<Vec<_>>()
    };

    assert_eq!(run(), run(), "identical input must survive sampling identically");
}
