//! actorlens
//!
//! In-memory observability engine for concurrent actor runtimes: capture
//! execution events from many producers at low overhead, sample them
//! deterministically, index them per actor, and answer time-travel queries
//! ("what was actor X's state at time T", "which messages were in flight").
//!
//! See [`engine`] for the architecture overview.

pub mod engine;

// Re-export the public surface at the crate root for convenience.
pub use engine::adapter::{
    AdapterConfig, IngestOutcome, IngestionAdapter, RawRecord, RejectReason, TracingLevel,
};
pub use engine::classify::{classify, fingerprint, Criticality};
pub use engine::clock::{now_ns, ManualClock, Nanos, TimeSource};
pub use engine::config::{ConfigError, StoreConfig};
pub use engine::event::{
    ActorHandle, CallDirection, Direction, Event, EventDraft, EventId, EventKind, EventPayload,
    GenCallback, ProcessEvent,
};
pub use engine::query::{
    compare_states, QueryEngine, RuntimeSnapshot, StateDiff, StateTransition, SupervisionLink,
};
pub use engine::sampler::{decide, SampleDecision};
pub use engine::sanitize::{sanitize_value, SanitizeError, SanitizeLimits};
pub use engine::snapshot::{
    restore, snapshot, PeriodicSnapshotter, SnapshotBlob, SnapshotError, SNAPSHOT_VERSION,
};
pub use engine::store::{
    DropReason, EventStore, Filter, PutOutcome, StoreError, StoreStats, SubKind,
};
