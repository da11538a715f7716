//! Query Engine
//!
//! Pure reads over the store's primitives: basic retrieval, time-travel
//! lookups, and causal windowing. Every function is total — missing data
//! yields empty results, never an error — and reissuing any query against an
//! unchanged store returns identical results.
//!
//! Reconstruction honesty: everything here is only as accurate as the
//! lifecycle and state events the producers actually emitted. An actor whose
//! spawn was never captured is invisible to `live_actors_at`; a state from
//! before the earliest retained state event is unrecoverable.

use crate::engine::classify::content_hash;
use crate::engine::clock::Nanos;
use crate::engine::event::{
    ActorHandle, Direction, Event, EventId, EventKind, EventPayload, ProcessEvent,
};
use crate::engine::store::{EventStore, Filter};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// Stateless query surface over one store.
pub struct QueryEngine<'a> {
    store: &'a EventStore,
}

/// One supervisor and the children observed under it.
///
/// Best-effort: derived from spawn parentage and monitor events, so it can
/// only describe structure the producer exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisionLink {
    pub supervisor: ActorHandle,
    pub children: BTreeSet<ActorHandle>,
    /// Restart strategy, when a spawn event carried one.
    pub strategy: Option<String>,
}

/// Reconstructed runtime view at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    pub at: Nanos,
    pub live: BTreeSet<ActorHandle>,
    /// Most recent known state per live actor. Actors with no retained
    /// state event are absent.
    pub states: BTreeMap<ActorHandle, Arc<Event>>,
    /// Per-recipient sends not yet matched to a receive.
    pub pending: BTreeMap<ActorHandle, Vec<Arc<Event>>>,
    pub supervision: Vec<SupervisionLink>,
}

/// One state change with its causal context.
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub event: Arc<Event>,
    /// The state this transition replaced, possibly from before the queried
    /// window. `None` when no earlier state was retained.
    pub previous: Option<Arc<Event>>,
    /// Recent non-state events on the same actor inside the precursor
    /// window, most recent first.
    pub causes: Vec<Arc<Event>>,
}

/// A single changed key in a map diff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangedKey {
    pub key: String,
    pub before: Value,
    pub after: Value,
}

/// Structured comparison of two state snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StateDiff {
    /// Both states are map-like; keys sorted within each bucket.
    Maps {
        added: Vec<String>,
        removed: Vec<String>,
        changed: Vec<ChangedKey>,
    },
    /// At least one side is scalar.
    Scalar { equal: bool },
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a EventStore) -> Self {
        Self { store }
    }

    // -------------------------------------------------------------------------
    // Basic retrieval
    // -------------------------------------------------------------------------

    /// Evaluate an arbitrary filter.
    pub fn query(&self, filter: &Filter) -> Vec<Arc<Event>> {
        self.store.query(filter)
    }

    /// Every event referencing the actor, ordered.
    pub fn events_for_actor(&self, actor: &ActorHandle) -> Vec<Arc<Event>> {
        self.store.iter_by_actor(actor)
    }

    /// The actor's state events in timestamp order.
    pub fn state_timeline(&self, actor: &ActorHandle) -> Vec<Arc<Event>> {
        self.store.iter_state(actor)
    }

    /// Message events flowing either direction between two actors.
    pub fn messages_between(&self, x: &ActorHandle, y: &ActorHandle) -> Vec<Arc<Event>> {
        self.store
            .query(&Filter::new().kind(EventKind::Message).actor(x.clone()))
            .into_iter()
            .filter(|event| {
                let from = event.message_from();
                let to = event.message_to();
                (from == Some(x) && to == Some(y)) || (from == Some(y) && to == Some(x))
            })
            .collect()
    }

    /// Function events for a module, optionally narrowed to one function.
    pub fn function_calls_for(
        &self,
        module: &str,
        function: Option<&str>,
    ) -> Vec<Arc<Event>> {
        self.store
            .query(&Filter::new().kind(EventKind::Function))
            .into_iter()
            .filter(|event| match &event.payload {
                EventPayload::Function {
                    module: m,
                    function: f,
                    ..
                } => m == module && function.map(|want| want == f).unwrap_or(true),
                _ => false,
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Time travel
    // -------------------------------------------------------------------------

    /// The state the actor was known to be in at or immediately before `t`.
    pub fn state_at(&self, actor: &ActorHandle, t: Nanos) -> Option<Arc<Event>> {
        self.store
            .query(
                &Filter::new()
                    .kind(EventKind::State)
                    .actor(actor.clone())
                    .until(t),
            )
            .into_iter()
            .last()
    }

    /// Actors with a spawn at or before `t` and no exit/crash at or before
    /// `t`. Only as complete as the captured lifecycle events.
    pub fn live_actors_at(&self, t: Nanos) -> BTreeSet<ActorHandle> {
        let mut live = BTreeSet::new();
        for event in self
            .store
            .query(&Filter::new().kind(EventKind::Process).until(t))
        {
            let EventPayload::Process { sub, .. } = &event.payload else {
                continue;
            };
            let Some(actor) = &event.actor else {
                continue;
            };
            match sub {
                ProcessEvent::Spawn => {
                    live.insert(actor.clone());
                }
                ProcessEvent::Exit | ProcessEvent::Crash => {
                    live.remove(actor);
                }
                ProcessEvent::Monitor => {}
            }
        }
        live
    }

    /// Per-recipient sends at or before `t` with no matching receive.
    ///
    /// Matching pairs a receive with the earliest unmatched send of equal
    /// (sanitized) content on the same recipient, provided the send strictly
    /// precedes it. Identical in-flight messages are indistinguishable; the
    /// earliest-send heuristic is deliberate.
    pub fn pending_messages_at(&self, t: Nanos) -> BTreeMap<ActorHandle, Vec<Arc<Event>>> {
        let mut unmatched: HashMap<(ActorHandle, u64), VecDeque<Arc<Event>>> = HashMap::new();

        for event in self
            .store
            .query(&Filter::new().kind(EventKind::Message).until(t))
        {
            let EventPayload::Message {
                direction,
                to,
                content,
                ..
            } = &event.payload
            else {
                continue;
            };
            let Some(recipient) = to else {
                continue;
            };
            let key = (recipient.clone(), content_hash(content));
            match direction {
                Direction::Send => {
                    unmatched.entry(key).or_default().push_back(Arc::clone(&event));
                }
                Direction::Receive => {
                    if let Some(queue) = unmatched.get_mut(&key) {
                        let front_precedes = queue
                            .front()
                            .map(|send| send.timestamp < event.timestamp)
                            .unwrap_or(false);
                        if front_precedes {
                            queue.pop_front();
                        }
                    }
                }
            }
        }

        let mut out: BTreeMap<ActorHandle, Vec<Arc<Event>>> = BTreeMap::new();
        for ((recipient, _), queue) in unmatched {
            if !queue.is_empty() {
                out.entry(recipient).or_default().extend(queue);
            }
        }
        for sends in out.values_mut() {
            sends.sort_by_key(|event| event.order_key());
        }
        out
    }

    /// Supervisor/children/strategy triples derivable from events at or
    /// before `t`. Spawn parentage and monitor edges both contribute.
    pub fn supervision_view_at(&self, t: Nanos) -> Vec<SupervisionLink> {
        let mut links: BTreeMap<ActorHandle, SupervisionLink> = BTreeMap::new();
        for event in self
            .store
            .query(&Filter::new().kind(EventKind::Process).until(t))
        {
            let EventPayload::Process {
                sub, parent, info, ..
            } = &event.payload
            else {
                continue;
            };
            let (Some(child), Some(supervisor)) = (&event.actor, parent) else {
                continue;
            };
            if !matches!(sub, ProcessEvent::Spawn | ProcessEvent::Monitor) {
                continue;
            }
            let link = links
                .entry(supervisor.clone())
                .or_insert_with(|| SupervisionLink {
                    supervisor: supervisor.clone(),
                    children: BTreeSet::new(),
                    strategy: None,
                });
            link.children.insert(child.clone());
            if link.strategy.is_none() {
                if let Some(Value::String(strategy)) = info.get("strategy") {
                    link.strategy = Some(strategy.clone());
                }
            }
        }
        links.into_values().collect()
    }

    /// Full reconstructed view at `t`.
    pub fn snapshot_at(&self, t: Nanos) -> RuntimeSnapshot {
        let live = self.live_actors_at(t);
        let states = live
            .iter()
            .filter_map(|actor| {
                self.state_at(actor, t)
                    .map(|state| (actor.clone(), state))
            })
            .collect();
        RuntimeSnapshot {
            at: t,
            live,
            states,
            pending: self.pending_messages_at(t),
            supervision: self.supervision_view_at(t),
        }
    }

    // -------------------------------------------------------------------------
    // Causal windowing
    // -------------------------------------------------------------------------

    /// Events within `half_window` of the given event's timestamp, ordered.
    /// Empty when the id names nothing retained.
    pub fn events_around(&self, id: EventId, half_window: Nanos) -> Vec<Arc<Event>> {
        let Some(center) = self.store.event_by_id(id) else {
            return Vec::new();
        };
        let w = half_window.max(0);
        self.store.query(
            &Filter::new()
                .since(center.timestamp.saturating_sub(w))
                .until(center.timestamp.saturating_add(w)),
        )
    }

    /// Each state change of the actor in `[t1, t2]`, paired with the state
    /// it replaced and the recent events that plausibly caused it. Window
    /// and cause count come from the store config
    /// (`precursor_window`, `precursor_limit`).
    pub fn state_evolution(
        &self,
        actor: &ActorHandle,
        t1: Nanos,
        t2: Nanos,
    ) -> Vec<StateTransition> {
        let config = self.store.config();
        let window = config.precursor_window;
        let limit = config.precursor_limit;

        let states = self.store.query(
            &Filter::new()
                .kind(EventKind::State)
                .actor(actor.clone())
                .since(t1)
                .until(t2),
        );

        let mut out = Vec::with_capacity(states.len());
        for event in states {
            let previous = self
                .store
                .query(
                    &Filter::new()
                        .kind(EventKind::State)
                        .actor(actor.clone())
                        .until(event.timestamp),
                )
                .into_iter()
                .filter(|earlier| earlier.order_key() < event.order_key())
                .last();

            let mut causes: Vec<Arc<Event>> = self
                .store
                .query(
                    &Filter::new()
                        .actor(actor.clone())
                        .since(event.timestamp.saturating_sub(window))
                        .until(event.timestamp),
                )
                .into_iter()
                .filter(|candidate| {
                    candidate.order_key() < event.order_key()
                        && candidate.kind() != EventKind::State
                })
                .collect();
            causes.reverse();
            causes.truncate(limit);

            out.push(StateTransition {
                event,
                previous,
                causes,
            });
        }
        out
    }
}

/// Structured diff of two state snapshots. Map-like states get a key-level
/// diff; anything else reduces to scalar equality.
pub fn compare_states(before: &Value, after: &Value) -> StateDiff {
    match (before.as_object(), after.as_object()) {
        (Some(a), Some(b)) => {
            let mut added: Vec<String> = b
                .keys()
                .filter(|k| !a.contains_key(*k))
                .cloned()
                .collect();
            let mut removed: Vec<String> = a
                .keys()
                .filter(|k| !b.contains_key(*k))
                .cloned()
                .collect();
            let mut changed: Vec<ChangedKey> = a
                .iter()
                .filter_map(|(k, va)| match b.get(k) {
                    Some(vb) if va != vb => Some(ChangedKey {
                        key: k.clone(),
                        before: va.clone(),
                        after: vb.clone(),
                    }),
                    _ => None,
                })
                .collect();
            added.sort();
            removed.sort();
            changed.sort_by(|x, y| x.key.cmp(&y.key));
            StateDiff::Maps {
                added,
                removed,
                changed,
            }
        }
        _ => StateDiff::Scalar {
            equal: before == after,
        },
    }
}
