//! Event Classification and Fingerprinting
//!
//! Two derived properties drive admission control:
//!
//! - **Criticality**: lifecycle transitions and explicitly flagged events
//!   bypass sampling and eviction entirely.
//! - **Fingerprint**: a stable 64-bit hash of an event's semantic identity.
//!   Two events that mean the same thing hash the same, so the sampler's
//!   admit/drop decision is reproducible across runs and across stores.
//!
//! # Canonicalization
//!
//! Identity hashing visits JSON object keys in sorted order, hashes floats by
//! bit pattern, and folds the actor handles and a coarse timestamp bucket
//! into the digest. The hasher is `DefaultHasher` (SipHash with fixed keys),
//! which is stable across processes.

use crate::engine::clock::{Nanos, NANOS_PER_MILLI};
use crate::engine::event::{ActorHandle, EventDraft, EventPayload, ProcessEvent};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Bucket width for the logical-timestamp component of the fingerprint.
/// Events of identical content within the same millisecond share a
/// fingerprint; re-sends in a later bucket get an independent decision.
pub const FINGERPRINT_BUCKET_NS: Nanos = NANOS_PER_MILLI;

/// Nesting depth beyond which a payload is considered malformed for
/// fingerprinting purposes. Sanitized payloads sit far below this.
const MAX_HASH_DEPTH: usize = 64;

/// Custom-event tags that imply criticality.
const RESERVED_ERROR_TAGS: &[&str] = &["error", "crash", "panic", "exception"];

/// Admission class of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Normal,
    Critical,
}

impl Criticality {
    #[inline]
    pub fn is_critical(self) -> bool {
        matches!(self, Criticality::Critical)
    }
}

/// Classify a draft. Critical events are never sampled away and never
/// evicted while a non-critical event remains.
pub fn classify(draft: &EventDraft) -> Criticality {
    match &draft.payload {
        EventPayload::Process { sub, .. } => match sub {
            ProcessEvent::Spawn | ProcessEvent::Exit | ProcessEvent::Crash => {
                Criticality::Critical
            }
            ProcessEvent::Monitor => Criticality::Normal,
        },
        EventPayload::Custom { tag, critical, .. } => {
            if *critical || RESERVED_ERROR_TAGS.contains(&tag.as_str()) {
                Criticality::Critical
            } else {
                Criticality::Normal
            }
        }
        _ => Criticality::Normal,
    }
}

/// Stable semantic-identity hash of a draft.
///
/// Returns `None` when the payload is too malformed to hash (pathological
/// nesting); the sampler then falls back to a random decision and the store
/// counts an anomaly.
pub fn fingerprint(draft: &EventDraft) -> Option<u64> {
    let mut hasher = DefaultHasher::new();

    // Kind tag.
    kind_tag(&draft.payload).hash(&mut hasher);

    // Actor handles participate so sampling cannot starve a single actor.
    hash_actor(&draft.actor, &mut hasher);

    // Logical-timestamp bucket; unstamped drafts all land in bucket zero so
    // identical replayed sequences fingerprint identically.
    let bucket = draft.timestamp.unwrap_or(0) / FINGERPRINT_BUCKET_NS;
    bucket.hash(&mut hasher);

    hash_identity(&draft.payload, &mut hasher)?;

    Some(hasher.finish())
}

fn kind_tag(payload: &EventPayload) -> u8 {
    match payload {
        EventPayload::Process { .. } => 0,
        EventPayload::Message { .. } => 1,
        EventPayload::State { .. } => 2,
        EventPayload::GenServer { .. } => 3,
        EventPayload::Function { .. } => 4,
        EventPayload::Framework { .. } => 5,
        EventPayload::Custom { .. } => 6,
    }
}

fn hash_actor(actor: &Option<ActorHandle>, hasher: &mut DefaultHasher) {
    match actor {
        Some(a) => {
            1u8.hash(hasher);
            a.as_str().hash(hasher);
        }
        None => 0u8.hash(hasher),
    }
}

/// Hash the identity-bearing fields of a payload.
fn hash_identity(payload: &EventPayload, hasher: &mut DefaultHasher) -> Option<()> {
    match payload {
        EventPayload::Process { sub, reason, parent, .. } => {
            (*sub as u8).hash(hasher);
            reason.hash(hasher);
            hash_actor(parent, hasher);
        }
        EventPayload::Message {
            direction,
            from,
            to,
            content,
            correlation,
        } => {
            (*direction as u8).hash(hasher);
            hash_actor(from, hasher);
            hash_actor(to, hasher);
            hash_value(content, hasher, 0)?;
            correlation.hash(hasher);
        }
        EventPayload::State {
            module,
            callback,
            snapshot,
        } => {
            module.hash(hasher);
            callback.hash(hasher);
            hash_value(snapshot, hasher, 0)?;
        }
        EventPayload::GenServer {
            module,
            callback,
            message,
            ..
        } => {
            module.hash(hasher);
            (*callback as u8).hash(hasher);
            hash_value(message, hasher, 0)?;
        }
        EventPayload::Function {
            module,
            function,
            arity,
            direction,
            detail,
        } => {
            module.hash(hasher);
            function.hash(hasher);
            arity.hash(hasher);
            (*direction as u8).hash(hasher);
            hash_value(detail, hasher, 0)?;
        }
        EventPayload::Framework { subtype, fields } => {
            subtype.hash(hasher);
            for (k, v) in fields {
                k.hash(hasher);
                hash_value(v, hasher, 0)?;
            }
        }
        EventPayload::Custom { tag, fields, critical } => {
            tag.hash(hasher);
            critical.hash(hasher);
            for (k, v) in fields {
                k.hash(hasher);
                hash_value(v, hasher, 0)?;
            }
        }
    }
    Some(())
}

/// Structural hash of a JSON value with sorted object-key order.
fn hash_value(value: &Value, hasher: &mut DefaultHasher, depth: usize) -> Option<()> {
    if depth > MAX_HASH_DEPTH {
        return None;
    }
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Number(n) => {
            2u8.hash(hasher);
            if let Some(i) = n.as_i64() {
                0u8.hash(hasher);
                i.hash(hasher);
            } else if let Some(u) = n.as_u64() {
                1u8.hash(hasher);
                u.hash(hasher);
            } else if let Some(f) = n.as_f64() {
                2u8.hash(hasher);
                f.to_bits().hash(hasher);
            }
        }
        Value::String(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Array(items) => {
            4u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                hash_value(item, hasher, depth + 1)?;
            }
        }
        Value::Object(entries) => {
            5u8.hash(hasher);
            entries.len().hash(hasher);
            let mut keys: Vec<&String> = entries.keys().collect();
            keys.sort();
            for key in keys {
                key.hash(hasher);
                hash_value(&entries[key], hasher, depth + 1)?;
            }
        }
    }
    Some(())
}

/// Hash of a message's content alone. Used by the pending-message matcher to
/// pair sends with receives by content identity.
pub fn content_hash(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    // Total by construction: matcher inputs are already sanitized, and a
    // depth miss just folds nothing further into the digest.
    let _ = hash_value(value, &mut hasher, 0);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::event::{Direction, EventDraft, ProcessEvent};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_lifecycle_events_are_critical() {
        for sub in [ProcessEvent::Spawn, ProcessEvent::Exit, ProcessEvent::Crash] {
            assert!(classify(&EventDraft::process("a", sub)).is_critical());
        }
        assert!(!classify(&EventDraft::process("a", ProcessEvent::Monitor)).is_critical());
    }

    #[test]
    fn test_reserved_custom_tags_are_critical() {
        assert!(classify(&EventDraft::custom("panic", BTreeMap::new())).is_critical());
        assert!(!classify(&EventDraft::custom("deploy", BTreeMap::new())).is_critical());
        assert!(classify(&EventDraft::custom("deploy", BTreeMap::new()).critical()).is_critical());
    }

    #[test]
    fn test_fingerprint_is_stable_for_identical_drafts() {
        let a = EventDraft::message(Direction::Send, "x", "y", json!({"n": 1})).at(5_000_000);
        let b = EventDraft::message(Direction::Send, "x", "y", json!({"n": 1})).at(5_000_000);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_varies_with_actor_and_content() {
        let base = EventDraft::message(Direction::Send, "x", "y", json!(1));
        let other_actor = EventDraft::message(Direction::Send, "z", "y", json!(1));
        let other_content = EventDraft::message(Direction::Send, "x", "y", json!(2));
        assert_ne!(fingerprint(&base), fingerprint(&other_actor));
        assert_ne!(fingerprint(&base), fingerprint(&other_content));
    }

    #[test]
    fn test_fingerprint_object_key_order_is_canonical() {
        // Same map content must hash the same regardless of literal order.
        let a = EventDraft::message(Direction::Send, "x", "y", json!({"a": 1, "b": 2}));
        let b = EventDraft::message(Direction::Send, "x", "y", json!({"b": 2, "a": 1}));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_fails_on_pathological_nesting() {
        let mut v = json!(1);
        for _ in 0..100 {
            v = json!([v]);
        }
        let draft = EventDraft::message(Direction::Send, "x", "y", v);
        assert_eq!(fingerprint(&draft), None);
    }

    #[test]
    fn test_timestamp_bucket_separates_distant_resends() {
        let early = EventDraft::message(Direction::Send, "x", "y", json!(1)).at(0);
        let late = EventDraft::message(Direction::Send, "x", "y", json!(1))
            .at(10 * FINGERPRINT_BUCKET_NS);
        assert_ne!(fingerprint(&early), fingerprint(&late));
    }
}
