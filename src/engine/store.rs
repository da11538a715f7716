//! Event Store
//!
//! Owner of the event log, state log, and per-actor index. Assigns ids and
//! timestamps, enforces the bounded retention budget, and exposes the read
//! primitives the query engine composes.
//!
//! # Ordering Contract
//!
//! - Ids are strictly increasing in admission order.
//! - Timestamps are non-decreasing in id order: a pre-stamped event is
//!   preserved only when it respects that order, otherwise it is clamped
//!   just past the newest retained timestamp.
//! - Consequently the log's `(timestamp, id)` order and its id order agree,
//!   and every index stores `(timestamp, id)` keys directly.
//!
//! # Concurrency
//!
//! One `RwLock` guards the log and indices. Writers never hold it across
//! I/O. Readers materialize their results and release the lock before
//! returning, so callers own what they get and `clear` is atomic from any
//! reader's point of view.

use crate::engine::classify::classify;
use crate::engine::clock::Nanos;
use crate::engine::config::{ConfigError, StoreConfig};
use crate::engine::event::{
    ActorHandle, CallDirection, Direction, Event, EventDraft, EventId, EventKind, EventPayload,
    GenCallback, ProcessEvent,
};
use crate::engine::sampler::decide;
use crate::engine::sanitize::sanitize_payload;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Log-order key: `(timestamp, id)`.
pub(crate) type OrderKey = (Nanos, EventId);

// =============================================================================
// OUTCOMES AND ERRORS
// =============================================================================

/// Why an offered event was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The sampler declined it at the configured rate.
    Sampling,
    /// Its payload could not be rendered into a storable form.
    Sanitization,
}

/// Result of a successful `put` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Admitted; the event is retrievable under this id until evicted.
    Stored(EventId),
    /// Declined; nothing observable changed beyond a drop counter.
    Dropped(DropReason),
}

impl PutOutcome {
    /// Assigned id, when stored.
    #[inline]
    pub fn id(&self) -> Option<EventId> {
        match self {
            PutOutcome::Stored(id) => Some(*id),
            PutOutcome::Dropped(_) => None,
        }
    }
}

/// Fatal store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The 64-bit id counter ran out. The store refuses further writes;
    /// reads keep working.
    CapacityExhausted,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapacityExhausted => {
                write!(f, "event id space exhausted; store refuses further writes")
            }
        }
    }
}

impl std::error::Error for StoreError {}

// =============================================================================
// OBSERVABILITY COUNTERS
// =============================================================================

/// Internal counters, exported through [`EventStore::stats`].
#[derive(Debug, Default)]
struct StoreCounters {
    admitted: AtomicU64,
    dropped_sampling: AtomicU64,
    sanitize_failures: AtomicU64,
    evicted: AtomicU64,
    /// Gauge: how far the store currently exceeds `max_events` because only
    /// critical events remain above budget.
    critical_over_budget: AtomicU64,
    fingerprint_fallbacks: AtomicU64,
    adapter_rejections: AtomicU64,
    snapshots_taken: AtomicU64,
    snapshot_failures: AtomicU64,
}

/// Point-in-time view of store health and activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub len: usize,
    pub critical_len: usize,
    pub admitted: u64,
    pub dropped_sampling: u64,
    pub sanitize_failures: u64,
    pub evicted: u64,
    pub critical_over_budget: u64,
    pub fingerprint_fallbacks: u64,
    pub adapter_rejections: u64,
    pub snapshots_taken: u64,
    pub snapshot_failures: u64,
}

// =============================================================================
// FILTERS
// =============================================================================

/// Sub-kind predicate for [`Filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubKind {
    Process(ProcessEvent),
    Message(Direction),
    GenServer(GenCallback),
    Function(CallDirection),
    Framework(String),
    Custom(String),
}

impl SubKind {
    fn matches(&self, payload: &EventPayload) -> bool {
        match (self, payload) {
            (SubKind::Process(want), EventPayload::Process { sub, .. }) => want == sub,
            (SubKind::Message(want), EventPayload::Message { direction, .. }) => want == direction,
            (SubKind::GenServer(want), EventPayload::GenServer { callback, .. }) => {
                want == callback
            }
            (SubKind::Function(want), EventPayload::Function { direction, .. }) => {
                want == direction
            }
            (SubKind::Framework(want), EventPayload::Framework { subtype, .. }) => want == subtype,
            (SubKind::Custom(want), EventPayload::Custom { tag, .. }) => want == tag,
            _ => false,
        }
    }
}

/// Declarative event filter. Any combination of constraints; events must
/// satisfy all of them. Results come back in `(timestamp, id)` order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub kind: Option<EventKind>,
    pub sub: Option<SubKind>,
    /// Event references this actor in any role.
    pub actor: Option<ActorHandle>,
    /// Message sender constraint.
    pub from_actor: Option<ActorHandle>,
    /// Message recipient constraint.
    pub to_actor: Option<ActorHandle>,
    /// Inclusive lower timestamp bound.
    pub ts_start: Option<Nanos>,
    /// Inclusive upper timestamp bound.
    pub ts_end: Option<Nanos>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn sub(mut self, sub: SubKind) -> Self {
        self.sub = Some(sub);
        self
    }

    pub fn actor(mut self, actor: impl Into<ActorHandle>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn sent_by(mut self, actor: impl Into<ActorHandle>) -> Self {
        self.from_actor = Some(actor.into());
        self
    }

    pub fn sent_to(mut self, actor: impl Into<ActorHandle>) -> Self {
        self.to_actor = Some(actor.into());
        self
    }

    pub fn since(mut self, ts: Nanos) -> Self {
        self.ts_start = Some(ts);
        self
    }

    pub fn until(mut self, ts: Nanos) -> Self {
        self.ts_end = Some(ts);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Handle to drive the actor index with, when any actor constraint is
    /// present. Actor-constrained queries never scan the full log.
    fn index_handle(&self) -> Option<&ActorHandle> {
        self.actor
            .as_ref()
            .or(self.from_actor.as_ref())
            .or(self.to_actor.as_ref())
    }

    fn matches(&self, event: &Event) -> bool {
        if let Some(kind) = self.kind {
            if event.kind() != kind {
                return false;
            }
        }
        if let Some(sub) = &self.sub {
            if !sub.matches(&event.payload) {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if !event.actors().contains(&actor) {
                return false;
            }
        }
        if let Some(from) = &self.from_actor {
            if event.message_from() != Some(from) {
                return false;
            }
        }
        if let Some(to) = &self.to_actor {
            if event.message_to() != Some(to) {
                return false;
            }
        }
        // Timestamp bounds are enforced by the range scan; re-checked here
        // so `matches` is usable on its own.
        if let Some(start) = self.ts_start {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.ts_end {
            if event.timestamp > end {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// STORE INTERNALS
// =============================================================================

#[derive(Debug, Default)]
struct StoreInner {
    /// Primary log, keyed by `(timestamp, id)`.
    by_time: BTreeMap<OrderKey, Arc<Event>>,
    /// Point lookup by id.
    by_id: HashMap<EventId, Arc<Event>>,
    /// Inverted index: every event referencing an actor (as subject, sender,
    /// or recipient) appears under that actor's entry.
    actor_index: HashMap<ActorHandle, BTreeSet<OrderKey>>,
    /// State log: the `kind = State` subset, per actor.
    state_index: HashMap<ActorHandle, BTreeSet<OrderKey>>,
    /// Non-critical events in admission order; the eviction frontier.
    evictable: VecDeque<OrderKey>,
    /// Next id to assign. Starts at 1 so 0 can never name a stored event.
    next_id: EventId,
    /// Newest assigned timestamp.
    last_ts: Nanos,
    critical_len: usize,
}

impl StoreInner {
    fn fresh() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    fn len(&self) -> usize {
        self.by_time.len()
    }

    fn insert(&mut self, event: Arc<Event>) {
        let key = event.order_key();
        for actor in event.actors() {
            self.actor_index
                .entry(actor.clone())
                .or_default()
                .insert(key);
        }
        if event.kind() == EventKind::State {
            if let Some(actor) = &event.actor {
                self.state_index
                    .entry(actor.clone())
                    .or_default()
                    .insert(key);
            }
        }
        if event.critical {
            self.critical_len += 1;
        } else {
            self.evictable.push_back(key);
        }
        self.by_id.insert(event.id, Arc::clone(&event));
        self.by_time.insert(key, event);
    }

    /// Remove one event and all of its index entries.
    fn remove(&mut self, key: OrderKey) {
        let Some(event) = self.by_time.remove(&key) else {
            debug_assert!(false, "eviction frontier pointed at a missing event");
            return;
        };
        self.by_id.remove(&event.id);
        for actor in event.actors() {
            if let Some(keys) = self.actor_index.get_mut(actor) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.actor_index.remove(actor);
                }
            }
        }
        if event.kind() == EventKind::State {
            if let Some(actor) = &event.actor {
                if let Some(keys) = self.state_index.get_mut(actor) {
                    keys.remove(&key);
                    if keys.is_empty() {
                        self.state_index.remove(actor);
                    }
                }
            }
        }
        if event.critical {
            self.critical_len -= 1;
        }
    }

    /// Reclaim oldest non-critical events until the non-critical population
    /// fits the budget. Critical events never count against it and are never
    /// touched. Returns how many events went.
    fn evict_over_budget(&mut self, max_events: usize) -> u64 {
        let mut evicted = 0;
        while self.len() - self.critical_len > max_events {
            let Some(key) = self.evictable.pop_front() else {
                break;
            };
            self.remove(key);
            evicted += 1;
        }
        evicted
    }
}

// =============================================================================
// STORE
// =============================================================================

/// The central store. The only stateful component in the engine; samplers,
/// queries, and adapters are all stateless over it.
pub struct EventStore {
    config: StoreConfig,
    inner: RwLock<StoreInner>,
    counters: StoreCounters,
    /// Set when the id counter is exhausted; all writes fail afterwards.
    fatal: AtomicBool,
}

impl EventStore {
    /// Store with default configuration.
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
            inner: RwLock::new(StoreInner::fresh()),
            counters: StoreCounters::default(),
            fatal: AtomicBool::new(false),
        }
    }

    /// Store with the given configuration. Rejects invalid values.
    pub fn with_config(config: StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            inner: RwLock::new(StoreInner::fresh()),
            counters: StoreCounters::default(),
            fatal: AtomicBool::new(false),
        })
    }

    /// Rebuild a store from retained events (snapshot restore). The caller
    /// guarantees events arrive sorted by `(timestamp, id)` with unique ids.
    pub(crate) fn from_restored_events(
        config: StoreConfig,
        events: Vec<Event>,
    ) -> Result<Self, ConfigError> {
        let store = Self::with_config(config)?;
        {
            let mut inner = store.inner.write();
            for event in events {
                inner.next_id = inner.next_id.max(event.id.saturating_add(1));
                inner.last_ts = inner.last_ts.max(event.timestamp);
                inner.insert(Arc::new(event));
            }
            let evicted = inner.evict_over_budget(store.config.max_events);
            if evicted > 0 {
                store.counters.evicted.fetch_add(evicted, Ordering::Relaxed);
            }
        }
        Ok(store)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[inline]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter and occupancy snapshot.
    pub fn stats(&self) -> StoreStats {
        let (len, critical_len) = {
            let inner = self.inner.read();
            (inner.len(), inner.critical_len)
        };
        let c = &self.counters;
        StoreStats {
            len,
            critical_len,
            admitted: c.admitted.load(Ordering::Relaxed),
            dropped_sampling: c.dropped_sampling.load(Ordering::Relaxed),
            sanitize_failures: c.sanitize_failures.load(Ordering::Relaxed),
            evicted: c.evicted.load(Ordering::Relaxed),
            critical_over_budget: c.critical_over_budget.load(Ordering::Relaxed),
            fingerprint_fallbacks: c.fingerprint_fallbacks.load(Ordering::Relaxed),
            adapter_rejections: c.adapter_rejections.load(Ordering::Relaxed),
            snapshots_taken: c.snapshots_taken.load(Ordering::Relaxed),
            snapshot_failures: c.snapshot_failures.load(Ordering::Relaxed),
        }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Offer an event through the sampler. On admission the event is
    /// sanitized, stamped, appended, and indexed; eviction may run before
    /// the call returns.
    pub fn put(&self, draft: EventDraft) -> Result<PutOutcome, StoreError> {
        self.check_writable()?;
        let draft = self.sanitized(draft);
        let decision = decide(&draft, self.config.sample_rate);
        if decision.used_fallback() {
            self.counters
                .fingerprint_fallbacks
                .fetch_add(1, Ordering::Relaxed);
        }
        if !decision.is_admit() {
            self.counters.dropped_sampling.fetch_add(1, Ordering::Relaxed);
            return Ok(PutOutcome::Dropped(DropReason::Sampling));
        }
        let critical = classify(&draft).is_critical();
        self.admit(draft, critical).map(PutOutcome::Stored)
    }

    /// Store an event unconditionally: the producer asserts criticality.
    /// Still sanitized and ordered like any other event.
    pub fn put_critical(&self, draft: EventDraft) -> Result<EventId, StoreError> {
        self.check_writable()?;
        let draft = self.sanitized(draft);
        self.admit(draft, true)
    }

    /// Atomic reset of the log, indices, id counter, and last-seen
    /// timestamp. Counters deliberately survive so post-clear stats still
    /// describe the process lifetime. Readers observe either the full
    /// pre-clear store or an empty one, never a torn view.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        *inner = StoreInner::fresh();
        self.fatal.store(false, Ordering::Release);
        self.counters.critical_over_budget.store(0, Ordering::Relaxed);
        debug!(store = %self.config.name, "store cleared");
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fatal.load(Ordering::Acquire) {
            return Err(StoreError::CapacityExhausted);
        }
        Ok(())
    }

    fn sanitized(&self, draft: EventDraft) -> EventDraft {
        let EventDraft {
            actor,
            timestamp,
            payload,
            tags,
        } = draft;
        EventDraft {
            actor,
            timestamp,
            payload: sanitize_payload(payload, &self.config.sanitize),
            tags,
        }
    }

    fn admit(&self, draft: EventDraft, critical: bool) -> Result<EventId, StoreError> {
        let EventDraft {
            actor,
            timestamp,
            payload,
            tags,
        } = draft;

        let mut inner = self.inner.write();
        if inner.next_id == EventId::MAX {
            drop(inner);
            self.fatal.store(true, Ordering::Release);
            error!(
                store = %self.config.name,
                "event id space exhausted, store is now read-only"
            );
            return Err(StoreError::CapacityExhausted);
        }
        let id = inner.next_id;
        inner.next_id += 1;

        // A pre-stamp survives only when it keeps the log monotonic;
        // otherwise the event lands just past the newest timestamp.
        let candidate = timestamp.unwrap_or_else(|| self.config.time_source.now());
        let ts = if candidate >= inner.last_ts {
            candidate
        } else {
            inner.last_ts + 1
        };
        inner.last_ts = ts;

        let event = Arc::new(Event {
            id,
            timestamp: ts,
            actor,
            payload,
            tags,
            critical,
        });
        inner.insert(event);

        let evicted = inner.evict_over_budget(self.config.max_events);
        let excess = inner.len().saturating_sub(self.config.max_events) as u64;
        drop(inner);

        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            self.counters.evicted.fetch_add(evicted, Ordering::Relaxed);
        }
        self.counters
            .critical_over_budget
            .store(excess, Ordering::Relaxed);
        Ok(id)
    }

    /// Record a sanitization failure observed upstream (adapter or typed
    /// constructor). The event never reaches the log.
    pub(crate) fn note_sanitize_failure(&self) {
        self.counters.sanitize_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event rejected by an adapter's tracing level.
    pub(crate) fn note_adapter_rejection(&self) {
        self.counters.adapter_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_snapshot_taken(&self) {
        self.counters.snapshots_taken.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_snapshot_failure(&self) {
        self.counters.snapshot_failures.fetch_add(1, Ordering::Relaxed);
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Point lookup.
    pub fn event_by_id(&self, id: EventId) -> Option<Arc<Event>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    /// Every retained event in `(timestamp, id)` order.
    pub fn iter_all(&self) -> Vec<Arc<Event>> {
        self.inner.read().by_time.values().cloned().collect()
    }

    /// Every retained event referencing the actor, ordered. Uses the actor
    /// index, not a log scan.
    pub fn iter_by_actor(&self, actor: &ActorHandle) -> Vec<Arc<Event>> {
        let inner = self.inner.read();
        match inner.actor_index.get(actor) {
            Some(keys) => keys
                .iter()
                .filter_map(|key| inner.by_time.get(key).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// State events for the actor, ordered.
    pub fn iter_state(&self, actor: &ActorHandle) -> Vec<Arc<Event>> {
        let inner = self.inner.read();
        match inner.state_index.get(actor) {
            Some(keys) => keys
                .iter()
                .filter_map(|key| inner.by_time.get(key).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Evaluate a filter. Actor-constrained filters walk the actor index;
    /// everything else range-scans the primary log. Results are ordered and
    /// bounded by `limit`.
    pub fn query(&self, filter: &Filter) -> Vec<Arc<Event>> {
        let inner = self.inner.read();
        let lo: OrderKey = (filter.ts_start.unwrap_or(Nanos::MIN), 0);
        let hi: OrderKey = (filter.ts_end.unwrap_or(Nanos::MAX), EventId::MAX);
        if lo > hi {
            return Vec::new();
        }
        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();

        if let Some(handle) = filter.index_handle() {
            let Some(keys) = inner.actor_index.get(handle) else {
                return Vec::new();
            };
            for key in keys.range(lo..=hi) {
                if out.len() >= limit {
                    break;
                }
                if let Some(event) = inner.by_time.get(key) {
                    if filter.matches(event) {
                        out.push(Arc::clone(event));
                    }
                }
            }
        } else {
            for event in inner.by_time.range(lo..=hi).map(|(_, e)| e) {
                if out.len() >= limit {
                    break;
                }
                if filter.matches(event) {
                    out.push(Arc::clone(event));
                }
            }
        }
        out
    }

    /// Consistent view for the snapshotter, read under a single lock
    /// acquisition.
    pub(crate) fn snapshot_view(&self) -> Vec<Arc<Event>> {
        self.inner.read().by_time.values().cloned().collect()
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("name", &self.config.name)
            .field("len", &self.len())
            .finish()
    }
}
