//! Ingestion Adapters
//!
//! The boundary between event producers and the store. Adapters normalize
//! raw producer records into drafts, gate them by tracing level, and forward
//! survivors through the sampler into the store. Runtime-specific capture
//! code lives on the far side of this boundary; everything behind it is pure
//! data.
//!
//! Two producer surfaces:
//! - [`IngestionAdapter::ingest`] takes external `(kind_tag, payload,
//!   source)` records and normalizes them.
//! - Typed methods (`spawn`, `message_sent`, `state_change`, ...) serve
//!   in-process producers per capture style: lifecycle, messaging, callback
//!   interception, and framework telemetry.
//!
//! Adapters do no I/O on the ingestion path; the store's `put` is the only
//! blocking step.

use crate::engine::classify::classify;
use crate::engine::event::{
    ActorHandle, CallDirection, Direction, EventDraft, EventId, EventKind, EventPayload,
    GenCallback, ProcessEvent,
};
use crate::engine::sanitize::to_sanitized_value;
use crate::engine::store::{DropReason, EventStore, PutOutcome, StoreError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Payload keys with adapter-level meaning; everything else in a framework
/// or custom record is event data.
const META_KEYS: &[&str] = &[
    "actor",
    "timestamp",
    "tags",
    "critical",
];

/// Per-adapter policy controlling which event kinds pass the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub enum TracingLevel {
    /// All kinds.
    Full,
    /// Message flow plus lifecycle.
    MessagesOnly,
    /// State transitions, behavior callbacks, and lifecycle.
    StatesOnly,
    /// Lifecycle only, plus anything critical.
    Minimal,
    /// Nothing; the adapter stays registered but inert.
    Off,
}

impl TracingLevel {
    /// Whether this level admits an event of the given kind/criticality.
    pub fn accepts(self, kind: EventKind, critical: bool) -> bool {
        match self {
            TracingLevel::Full => true,
            TracingLevel::MessagesOnly => {
                matches!(kind, EventKind::Message | EventKind::Process)
            }
            TracingLevel::StatesOnly => matches!(
                kind,
                EventKind::State | EventKind::GenServer | EventKind::Process
            ),
            TracingLevel::Minimal => kind == EventKind::Process || critical,
            TracingLevel::Off => false,
        }
    }
}

/// Adapter registration data.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Identifies the producer style ("lifecycle", "phoenix", ...). Stamped
    /// onto every forwarded event as the `adapter` tag.
    pub name: String,
    pub level: TracingLevel,
    /// Static correlation tags applied to every forwarded event.
    pub tags: BTreeMap<String, String>,
}

impl AdapterConfig {
    pub fn new(name: impl Into<String>, level: TracingLevel) -> Self {
        Self {
            name: name.into(),
            level,
            tags: BTreeMap::new(),
        }
    }

    pub fn tagged(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Why an adapter refused a record before it reached the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The adapter's tracing level disallows this kind.
    LevelGate,
    /// Unrecognized kind tag.
    UnknownKind,
    /// The record is missing required fields or has the wrong shapes.
    MalformedPayload,
}

/// Outcome of one ingestion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(EventId),
    /// The sampler declined it, or its payload could not be rendered.
    Dropped(DropReason),
    /// The adapter refused it; counted, logged at debug, never an error.
    Rejected(RejectReason),
}

/// A raw producer record awaiting normalization.
///
/// `kind_tag` selects the event shape (`process.spawn`, `message.send`,
/// `state`, `genserver.call`, `function.enter`, `framework.http_request`,
/// `custom.deploy`, ...); `payload` carries the fields; `source` names the
/// producer and is preserved as the `source` tag.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub kind_tag: String,
    pub payload: Map<String, Value>,
    pub source: String,
}

impl RawRecord {
    pub fn new(
        kind_tag: impl Into<String>,
        payload: Map<String, Value>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            kind_tag: kind_tag.into(),
            payload,
            source: source.into(),
        }
    }
}

/// One registered producer boundary.
pub struct IngestionAdapter {
    config: AdapterConfig,
    store: Arc<EventStore>,
}

impl IngestionAdapter {
    pub fn new(store: Arc<EventStore>, config: AdapterConfig) -> Self {
        Self { config, store }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[inline]
    pub fn level(&self) -> TracingLevel {
        self.config.level
    }

    /// Normalize and forward an external record.
    pub fn ingest(&self, record: RawRecord) -> Result<IngestOutcome, StoreError> {
        let source = record.source.clone();
        match normalize(record) {
            Ok(draft) => self.forward(draft.tagged("source", source)),
            Err(reason) => Ok(self.reject(reason)),
        }
    }

    /// Gate a ready draft by tracing level and hand it to the store.
    pub fn forward(&self, mut draft: EventDraft) -> Result<IngestOutcome, StoreError> {
        let critical = classify(&draft).is_critical();
        if !self.config.level.accepts(draft.kind(), critical) {
            return Ok(self.reject(RejectReason::LevelGate));
        }
        for (key, value) in &self.config.tags {
            draft
                .tags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        draft
            .tags
            .entry("adapter".to_string())
            .or_insert_with(|| self.config.name.clone());
        let outcome = self.store.put(draft)?;
        Ok(match outcome {
            PutOutcome::Stored(id) => IngestOutcome::Stored(id),
            PutOutcome::Dropped(reason) => IngestOutcome::Dropped(reason),
        })
    }

    fn reject(&self, reason: RejectReason) -> IngestOutcome {
        self.store.note_adapter_rejection();
        debug!(
            adapter = %self.config.name,
            reason = ?reason,
            "record rejected at adapter boundary"
        );
        IngestOutcome::Rejected(reason)
    }

    // -------------------------------------------------------------------------
    // Lifecycle capture
    // -------------------------------------------------------------------------

    pub fn spawn(
        &self,
        actor: impl Into<ActorHandle>,
        parent: Option<ActorHandle>,
    ) -> Result<IngestOutcome, StoreError> {
        let mut draft = EventDraft::process(actor, ProcessEvent::Spawn);
        if let Some(parent) = parent {
            draft = draft.with_parent(parent);
        }
        self.forward(draft)
    }

    pub fn exit(
        &self,
        actor: impl Into<ActorHandle>,
        reason: Option<&str>,
    ) -> Result<IngestOutcome, StoreError> {
        let mut draft = EventDraft::process(actor, ProcessEvent::Exit);
        if let Some(reason) = reason {
            draft = draft.with_reason(reason);
        }
        self.forward(draft)
    }

    pub fn crash(
        &self,
        actor: impl Into<ActorHandle>,
        reason: &str,
    ) -> Result<IngestOutcome, StoreError> {
        self.forward(EventDraft::process(actor, ProcessEvent::Crash).with_reason(reason))
    }

    pub fn monitor(
        &self,
        watcher: impl Into<ActorHandle>,
        watched: impl Into<ActorHandle>,
    ) -> Result<IngestOutcome, StoreError> {
        self.forward(
            EventDraft::process(watched, ProcessEvent::Monitor).with_parent(watcher),
        )
    }

    // -------------------------------------------------------------------------
    // Message capture
    // -------------------------------------------------------------------------

    pub fn message_sent<T: Serialize>(
        &self,
        from: impl Into<ActorHandle>,
        to: impl Into<ActorHandle>,
        content: &T,
    ) -> Result<IngestOutcome, StoreError> {
        self.message(Direction::Send, from, to, content)
    }

    pub fn message_received<T: Serialize>(
        &self,
        from: impl Into<ActorHandle>,
        to: impl Into<ActorHandle>,
        content: &T,
    ) -> Result<IngestOutcome, StoreError> {
        self.message(Direction::Receive, from, to, content)
    }

    fn message<T: Serialize>(
        &self,
        direction: Direction,
        from: impl Into<ActorHandle>,
        to: impl Into<ActorHandle>,
        content: &T,
    ) -> Result<IngestOutcome, StoreError> {
        let content = match to_sanitized_value(content, &self.store.config().sanitize) {
            Ok(value) => value,
            Err(_) => return Ok(self.drop_unrepresentable()),
        };
        self.forward(EventDraft::message(direction, from, to, content))
    }

    // -------------------------------------------------------------------------
    // Callback interception
    // -------------------------------------------------------------------------

    pub fn state_change<T: Serialize>(
        &self,
        actor: impl Into<ActorHandle>,
        module: &str,
        callback: &str,
        state: &T,
    ) -> Result<IngestOutcome, StoreError> {
        let snapshot = match to_sanitized_value(state, &self.store.config().sanitize) {
            Ok(value) => value,
            Err(_) => return Ok(self.drop_unrepresentable()),
        };
        self.forward(EventDraft::state(actor, module, callback, snapshot))
    }

    pub fn callback_invoked<T: Serialize>(
        &self,
        actor: impl Into<ActorHandle>,
        module: &str,
        callback: GenCallback,
        message: &T,
    ) -> Result<IngestOutcome, StoreError> {
        let message = match to_sanitized_value(message, &self.store.config().sanitize) {
            Ok(value) => value,
            Err(_) => return Ok(self.drop_unrepresentable()),
        };
        self.forward(EventDraft::gen_server(actor, module, callback, message))
    }

    pub fn function_trace(
        &self,
        actor: impl Into<ActorHandle>,
        module: &str,
        function: &str,
        arity: u8,
        direction: CallDirection,
        detail: Value,
    ) -> Result<IngestOutcome, StoreError> {
        self.forward(EventDraft::function(
            actor, module, function, arity, direction, detail,
        ))
    }

    // -------------------------------------------------------------------------
    // Framework telemetry
    // -------------------------------------------------------------------------

    pub fn framework_event(
        &self,
        subtype: &str,
        fields: BTreeMap<String, Value>,
    ) -> Result<IngestOutcome, StoreError> {
        self.forward(EventDraft::framework(subtype, fields))
    }

    pub fn custom_event(
        &self,
        tag: &str,
        fields: BTreeMap<String, Value>,
    ) -> Result<IngestOutcome, StoreError> {
        self.forward(EventDraft::custom(tag, fields))
    }

    fn drop_unrepresentable(&self) -> IngestOutcome {
        self.store.note_sanitize_failure();
        debug!(adapter = %self.config.name, "payload unrepresentable, event dropped");
        IngestOutcome::Dropped(DropReason::Sanitization)
    }
}

// =============================================================================
// NORMALIZATION
// =============================================================================

/// Turn a raw record into a draft. Pure; does not touch the store.
fn normalize(record: RawRecord) -> Result<EventDraft, RejectReason> {
    let payload = &record.payload;
    let (family, detail) = match record.kind_tag.split_once('.') {
        Some((family, detail)) => (family, detail),
        None => (record.kind_tag.as_str(), ""),
    };

    let mut draft = match (family, detail) {
        ("process", sub) => {
            let sub = match sub {
                "spawn" => ProcessEvent::Spawn,
                "exit" => ProcessEvent::Exit,
                "crash" => ProcessEvent::Crash,
                "monitor" => ProcessEvent::Monitor,
                _ => return Err(RejectReason::UnknownKind),
            };
            let actor = required_actor(payload, "actor")?;
            let mut draft = EventDraft::process(actor, sub);
            if let Some(reason) = string_field(payload, "reason") {
                draft = draft.with_reason(reason);
            }
            if let Some(parent) = string_field(payload, "parent") {
                draft = draft.with_parent(parent);
            }
            if let Some(Value::Object(info)) = payload.get("info") {
                if let EventPayload::Process { info: target, .. } = &mut draft.payload
                {
                    *target = info
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                }
            }
            draft
        }
        ("message", direction) => {
            let direction = match direction {
                "send" => Direction::Send,
                "receive" => Direction::Receive,
                _ => return Err(RejectReason::UnknownKind),
            };
            let from = string_field(payload, "from");
            let to = string_field(payload, "to");
            if from.is_none() && to.is_none() {
                return Err(RejectReason::MalformedPayload);
            }
            let content = payload.get("content").cloned().unwrap_or(Value::Null);
            let mut draft = EventDraft::new(EventPayload::Message {
                direction,
                from: from.map(ActorHandle::new),
                to: to.map(ActorHandle::new),
                content,
                correlation: string_field(payload, "correlation").map(str::to_string),
            });
            if let Some(actor) = string_field(payload, "actor") {
                draft = draft.for_actor(actor);
            }
            draft
        }
        ("state", _) => {
            let actor = required_actor(payload, "actor")?;
            EventDraft::state(
                actor,
                string_field(payload, "module").unwrap_or("unknown"),
                string_field(payload, "callback").unwrap_or("unknown"),
                payload.get("state").cloned().unwrap_or(Value::Null),
            )
        }
        ("genserver", callback) => {
            let callback = match callback {
                "init" => GenCallback::Init,
                "call" => GenCallback::Call,
                "cast" => GenCallback::Cast,
                "info" => GenCallback::Info,
                "terminate" => GenCallback::Terminate,
                _ => return Err(RejectReason::UnknownKind),
            };
            let actor = required_actor(payload, "actor")?;
            EventDraft::gen_server(
                actor,
                string_field(payload, "module").unwrap_or("unknown"),
                callback,
                payload.get("message").cloned().unwrap_or(Value::Null),
            )
        }
        ("function", direction) => {
            let direction = match direction {
                "enter" => CallDirection::Enter,
                "return" => CallDirection::Return,
                _ => return Err(RejectReason::UnknownKind),
            };
            let actor = required_actor(payload, "actor")?;
            let module = string_field(payload, "module").ok_or(RejectReason::MalformedPayload)?;
            let function =
                string_field(payload, "function").ok_or(RejectReason::MalformedPayload)?;
            let arity = payload
                .get("arity")
                .and_then(Value::as_u64)
                .unwrap_or(0)
                .min(u8::MAX as u64) as u8;
            EventDraft::function(
                actor,
                module,
                function,
                arity,
                direction,
                payload.get("detail").cloned().unwrap_or(Value::Null),
            )
        }
        ("framework", subtype) if !subtype.is_empty() => {
            let mut draft = EventDraft::framework(subtype, data_fields(payload));
            if let Some(actor) = string_field(payload, "actor") {
                draft = draft.for_actor(actor);
            }
            draft
        }
        ("custom", tag) if !tag.is_empty() => {
            let mut draft = EventDraft::custom(tag, data_fields(payload));
            if payload.get("critical").and_then(Value::as_bool) == Some(true) {
                draft = draft.critical();
            }
            if let Some(actor) = string_field(payload, "actor") {
                draft = draft.for_actor(actor);
            }
            draft
        }
        _ => return Err(RejectReason::UnknownKind),
    };

    if let Some(ts) = payload.get("timestamp").and_then(Value::as_i64) {
        draft = draft.at(ts);
    }
    if let Some(Value::Object(tags)) = payload.get("tags") {
        for (key, value) in tags {
            if let Value::String(value) = value {
                draft = draft.tagged(key.clone(), value.clone());
            }
        }
    }
    Ok(draft)
}

fn string_field<'m>(payload: &'m Map<String, Value>, key: &str) -> Option<&'m str> {
    payload.get(key).and_then(Value::as_str)
}

fn required_actor<'m>(payload: &'m Map<String, Value>, key: &str) -> Result<&'m str, RejectReason> {
    string_field(payload, key).ok_or(RejectReason::MalformedPayload)
}

/// Non-meta payload entries, for framework and custom events.
fn data_fields(payload: &Map<String, Value>) -> BTreeMap<String, Value> {
    payload
        .iter()
        .filter(|(key, _)| !META_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
