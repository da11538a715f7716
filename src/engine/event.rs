//! Event Model
//!
//! Canonical event types captured from a running actor system. Every stored
//! event is timestamped in nanoseconds and carries a store-assigned id for
//! tie-breaking, so the log has a total order `(timestamp, id)`.
//!
//! Events exist in two forms:
//! - [`EventDraft`]: what a producer hands to the ingestion path. May carry a
//!   pre-stamped timestamp; has no id.
//! - [`Event`]: what the store retains after admission. Immutable, ordered,
//!   flagged critical or not at admission time.

use crate::engine::clock::Nanos;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Store-assigned event identifier, unique and strictly increasing per store.
pub type EventId = u64;

/// Opaque identity of a unit of concurrency in the target runtime.
///
/// Equality is total; the store treats a handle purely as an identity label.
/// The target runtime may reuse handles, and that reuse is visible here —
/// a handle is not proof of continuity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorHandle(String);

impl ActorHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorHandle {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for ActorHandle {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Kind tag for filtering and tracing-level gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Process,
    Message,
    State,
    GenServer,
    Function,
    Framework,
    Custom,
}

/// Process lifecycle sub-events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessEvent {
    Spawn,
    Exit,
    Crash,
    Monitor,
}

/// Message direction relative to the observed actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Send,
    Receive,
}

/// GenServer-style behavior callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenCallback {
    Init,
    Call,
    Cast,
    Info,
    Terminate,
}

/// Function call direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    Enter,
    Return,
}

/// Kind-specific payload data.
///
/// Free-form fields (`content`, `snapshot`, `detail`, `fields`, `info`) hold
/// sanitized JSON values; the store never retains the producer's original
/// oversized representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    /// Process lifecycle transition.
    Process {
        sub: ProcessEvent,
        /// Exit/crash reason, if the producer reported one.
        reason: Option<String>,
        /// Spawning or monitoring process, when known. Feeds the
        /// supervision view.
        parent: Option<ActorHandle>,
        /// Additional producer-supplied detail (e.g. restart strategy).
        info: BTreeMap<String, Value>,
    },

    /// Inter-actor message, observed on send or receive.
    Message {
        direction: Direction,
        from: Option<ActorHandle>,
        to: Option<ActorHandle>,
        content: Value,
        /// Producer correlation tag; stored verbatim, compared by equality.
        correlation: Option<String>,
    },

    /// Actor state snapshot after a callback ran.
    State {
        module: String,
        callback: String,
        snapshot: Value,
    },

    /// Behavior callback invocation (pre-state transition).
    GenServer {
        module: String,
        callback: GenCallback,
        /// Id of the most recent state event before this callback, if the
        /// producer tracked one.
        pre_state: Option<EventId>,
        message: Value,
    },

    /// Function call boundary.
    Function {
        module: String,
        function: String,
        arity: u8,
        direction: CallDirection,
        /// Argument or result summary.
        detail: Value,
    },

    /// Framework telemetry (http_request, channel_join, ...).
    Framework {
        subtype: String,
        fields: BTreeMap<String, Value>,
    },

    /// Escape hatch for adapter-defined events.
    Custom {
        tag: String,
        fields: BTreeMap<String, Value>,
        /// Explicit criticality marker; reserved error tags imply it.
        critical: bool,
    },
}

impl EventPayload {
    /// Kind tag for this payload.
    #[inline]
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Process { .. } => EventKind::Process,
            EventPayload::Message { .. } => EventKind::Message,
            EventPayload::State { .. } => EventKind::State,
            EventPayload::GenServer { .. } => EventKind::GenServer,
            EventPayload::Function { .. } => EventKind::Function,
            EventPayload::Framework { .. } => EventKind::Framework,
            EventPayload::Custom { .. } => EventKind::Custom,
        }
    }
}

/// A producer-side event awaiting admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Actor this event is about, if any. Messages carry `from`/`to` in the
    /// payload instead of (or in addition to) this.
    pub actor: Option<ActorHandle>,
    /// Pre-stamped timestamp. Preserved by the store only when it does not
    /// violate the store's monotonic order.
    pub timestamp: Option<Nanos>,
    pub payload: EventPayload,
    /// Small correlation-tag map forwarded verbatim by adapters.
    pub tags: BTreeMap<String, String>,
}

impl EventDraft {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            actor: None,
            timestamp: None,
            payload,
            tags: BTreeMap::new(),
        }
    }

    /// Lifecycle event for an actor.
    pub fn process(actor: impl Into<ActorHandle>, sub: ProcessEvent) -> Self {
        Self::new(EventPayload::Process {
            sub,
            reason: None,
            parent: None,
            info: BTreeMap::new(),
        })
        .for_actor(actor)
    }

    /// Message observed between two actors.
    pub fn message(
        direction: Direction,
        from: impl Into<ActorHandle>,
        to: impl Into<ActorHandle>,
        content: Value,
    ) -> Self {
        Self::new(EventPayload::Message {
            direction,
            from: Some(from.into()),
            to: Some(to.into()),
            content,
            correlation: None,
        })
    }

    /// State snapshot for an actor.
    pub fn state(
        actor: impl Into<ActorHandle>,
        module: impl Into<String>,
        callback: impl Into<String>,
        snapshot: Value,
    ) -> Self {
        Self::new(EventPayload::State {
            module: module.into(),
            callback: callback.into(),
            snapshot,
        })
        .for_actor(actor)
    }

    /// Behavior callback invocation on an actor.
    pub fn gen_server(
        actor: impl Into<ActorHandle>,
        module: impl Into<String>,
        callback: GenCallback,
        message: Value,
    ) -> Self {
        Self::new(EventPayload::GenServer {
            module: module.into(),
            callback,
            pre_state: None,
            message,
        })
        .for_actor(actor)
    }

    /// Function call boundary on an actor.
    pub fn function(
        actor: impl Into<ActorHandle>,
        module: impl Into<String>,
        function: impl Into<String>,
        arity: u8,
        direction: CallDirection,
        detail: Value,
    ) -> Self {
        Self::new(EventPayload::Function {
            module: module.into(),
            function: function.into(),
            arity,
            direction,
            detail,
        })
        .for_actor(actor)
    }

    /// Framework telemetry event.
    pub fn framework(subtype: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self::new(EventPayload::Framework {
            subtype: subtype.into(),
            fields,
        })
    }

    /// Adapter-defined event.
    pub fn custom(tag: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self::new(EventPayload::Custom {
            tag: tag.into(),
            fields,
            critical: false,
        })
    }

    /// Attach the primary actor handle.
    pub fn for_actor(mut self, actor: impl Into<ActorHandle>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Pre-stamp a timestamp (replay producers, tests).
    pub fn at(mut self, ts: Nanos) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Attach a correlation tag.
    pub fn tagged(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Mark a custom event critical. No-op for other kinds.
    pub fn critical(mut self) -> Self {
        if let EventPayload::Custom { critical, .. } = &mut self.payload {
            *critical = true;
        }
        self
    }

    /// Exit/crash reason or parent on a process payload. No-op otherwise.
    pub fn with_reason(mut self, r: impl Into<String>) -> Self {
        if let EventPayload::Process { reason, .. } = &mut self.payload {
            *reason = Some(r.into());
        }
        self
    }

    pub fn with_parent(mut self, p: impl Into<ActorHandle>) -> Self {
        if let EventPayload::Process { parent, .. } = &mut self.payload {
            *parent = Some(p.into());
        }
        self
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// A retained event. Ordered by `(timestamp, id)`; since the store assigns
/// non-decreasing timestamps in id order, id order and `(timestamp, id)`
/// order coincide for events of the same store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Nanos,
    pub actor: Option<ActorHandle>,
    pub payload: EventPayload,
    pub tags: BTreeMap<String, String>,
    /// Fixed at admission: classification result, or forced by
    /// `put_critical`. Critical events bypass sampling and eviction.
    pub critical: bool,
}

impl Event {
    #[inline]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Every actor handle this event references (`actor`, message `from`/`to`).
    /// These are the handles the store indexes the event under.
    pub fn actors(&self) -> Vec<&ActorHandle> {
        let mut out = Vec::with_capacity(3);
        if let Some(a) = &self.actor {
            out.push(a);
        }
        if let EventPayload::Message { from, to, .. } = &self.payload {
            for handle in [from, to].into_iter().flatten() {
                if !out.contains(&handle) {
                    out.push(handle);
                }
            }
        }
        out
    }

    /// Message sender, if this is a message event.
    pub fn message_from(&self) -> Option<&ActorHandle> {
        match &self.payload {
            EventPayload::Message { from, .. } => from.as_ref(),
            _ => None,
        }
    }

    /// Message recipient, if this is a message event.
    pub fn message_to(&self) -> Option<&ActorHandle> {
        match &self.payload {
            EventPayload::Message { to, .. } => to.as_ref(),
            _ => None,
        }
    }

    /// State snapshot value, if this is a state event.
    pub fn state_snapshot(&self) -> Option<&Value> {
        match &self.payload {
            EventPayload::State { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }

    /// Log-order key.
    #[inline]
    pub fn order_key(&self) -> (Nanos, EventId) {
        (self.timestamp, self.id)
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordering for retained events: timestamp first, id breaks ties.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }
}
