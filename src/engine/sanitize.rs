//! Payload Sanitization
//!
//! Bounded-size reduction of arbitrary producer payloads before storage.
//! The original value is never retained; whatever survives sanitization is
//! what queries see.
//!
//! # Idempotence Contract
//!
//! Sanitizing an already-sanitized value is a no-op. Every reduction
//! therefore produces output that is itself within the caps:
//! - truncated strings stay within `max_string_bytes` *including* the
//!   truncation marker
//! - truncated collections stay at exactly `max_collection_items` entries,
//!   marker included
//! - over-deep subtrees collapse to a scalar marker

use crate::engine::event::EventPayload;
use serde::Serialize;
use serde_json::{Map, Value};

/// Marker substituted for subtrees nested beyond the depth cap.
const DEPTH_MARKER: &str = "…depth";

/// Key recording how many object entries were dropped.
const TRUNCATED_KEY: &str = "__truncated__";

/// Per-field soft caps applied to free-form payload values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct SanitizeLimits {
    /// Maximum rendered byte length of any string, marker included.
    pub max_string_bytes: usize,
    /// Maximum entries retained in any array or object, marker included.
    pub max_collection_items: usize,
    /// Maximum nesting depth before a subtree collapses to a marker.
    pub max_depth: usize,
}

impl Default for SanitizeLimits {
    fn default() -> Self {
        Self {
            max_string_bytes: 256,
            max_collection_items: 32,
            max_depth: 8,
        }
    }
}

/// Reduce a value to within the configured caps. Total and idempotent.
pub fn sanitize_value(value: &Value, limits: &SanitizeLimits) -> Value {
    sanitize_at(value, limits, 0)
}

fn sanitize_at(value: &Value, limits: &SanitizeLimits, depth: usize) -> Value {
    match value {
        Value::String(s) => Value::String(bound_string(s, limits.max_string_bytes)),
        Value::Array(items) => {
            if depth >= limits.max_depth {
                return Value::String(DEPTH_MARKER.to_string());
            }
            let cap = limits.max_collection_items;
            if items.len() > cap {
                // Keep cap-1 entries plus a marker so the result sits exactly
                // at the cap and a second pass leaves it alone.
                let keep = cap.saturating_sub(1);
                let mut out: Vec<Value> = items
                    .iter()
                    .take(keep)
                    .map(|v| sanitize_at(v, limits, depth + 1))
                    .collect();
                out.push(Value::String(format!("… +{} more", items.len() - keep)));
                Value::Array(out)
            } else {
                Value::Array(
                    items
                        .iter()
                        .map(|v| sanitize_at(v, limits, depth + 1))
                        .collect(),
                )
            }
        }
        Value::Object(entries) => {
            if depth >= limits.max_depth {
                return Value::String(DEPTH_MARKER.to_string());
            }
            let cap = limits.max_collection_items;
            if entries.len() > cap {
                let keep = cap.saturating_sub(1);
                let mut out = Map::new();
                for (k, v) in entries.iter().take(keep) {
                    out.insert(
                        bound_string(k, limits.max_string_bytes),
                        sanitize_at(v, limits, depth + 1),
                    );
                }
                out.insert(
                    TRUNCATED_KEY.to_string(),
                    Value::from((entries.len() - keep) as u64),
                );
                Value::Object(out)
            } else {
                let mut out = Map::new();
                for (k, v) in entries.iter() {
                    out.insert(
                        bound_string(k, limits.max_string_bytes),
                        sanitize_at(v, limits, depth + 1),
                    );
                }
                Value::Object(out)
            }
        }
        // Numbers, booleans, null are already bounded.
        other => other.clone(),
    }
}

/// Truncate a string to at most `max` bytes on a char boundary, appending a
/// size marker when it fits. Output length is always <= max.
fn bound_string(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let marker = format!("… ({} bytes total)", s.len());
    if marker.len() >= max {
        // Caps this tight get a bare prefix.
        return s[..floor_char_boundary(s, max)].to_string();
    }
    let keep = floor_char_boundary(s, max - marker.len());
    format!("{}{}", &s[..keep], marker)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Sanitize every free-form field of a payload in place.
pub fn sanitize_payload(payload: EventPayload, limits: &SanitizeLimits) -> EventPayload {
    match payload {
        EventPayload::Process {
            sub,
            reason,
            parent,
            info,
        } => EventPayload::Process {
            sub,
            reason: reason.map(|r| bound_string(&r, limits.max_string_bytes)),
            parent,
            info: info
                .into_iter()
                .map(|(k, v)| (k, sanitize_value(&v, limits)))
                .collect(),
        },
        EventPayload::Message {
            direction,
            from,
            to,
            content,
            correlation,
        } => EventPayload::Message {
            direction,
            from,
            to,
            content: sanitize_value(&content, limits),
            correlation,
        },
        EventPayload::State {
            module,
            callback,
            snapshot,
        } => EventPayload::State {
            module,
            callback,
            snapshot: sanitize_value(&snapshot, limits),
        },
        EventPayload::GenServer {
            module,
            callback,
            pre_state,
            message,
        } => EventPayload::GenServer {
            module,
            callback,
            pre_state,
            message: sanitize_value(&message, limits),
        },
        EventPayload::Function {
            module,
            function,
            arity,
            direction,
            detail,
        } => EventPayload::Function {
            module,
            function,
            arity,
            direction,
            detail: sanitize_value(&detail, limits),
        },
        EventPayload::Framework { subtype, fields } => EventPayload::Framework {
            subtype,
            fields: fields
                .into_iter()
                .map(|(k, v)| (k, sanitize_value(&v, limits)))
                .collect(),
        },
        EventPayload::Custom {
            tag,
            fields,
            critical,
        } => EventPayload::Custom {
            tag,
            fields: fields
                .into_iter()
                .map(|(k, v)| (k, sanitize_value(&v, limits)))
                .collect(),
            critical,
        },
    }
}

/// Serialize arbitrary producer data into a sanitized JSON value.
///
/// This is the one place sanitization can fail: values serde_json cannot
/// represent (non-finite floats, non-string map keys, failing Serialize
/// impls) are rejected and the event carrying them is dropped upstream.
pub fn to_sanitized_value<T: Serialize>(
    data: &T,
    limits: &SanitizeLimits,
) -> Result<Value, SanitizeError> {
    let raw = serde_json::to_value(data).map_err(SanitizeError::Unrepresentable)?;
    Ok(sanitize_value(&raw, limits))
}

/// Sanitization failure for a single event.
#[derive(Debug)]
pub enum SanitizeError {
    /// The producer's data has no JSON representation.
    Unrepresentable(serde_json::Error),
}

impl std::fmt::Display for SanitizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unrepresentable(e) => write!(f, "payload is not representable: {}", e),
        }
    }
}

impl std::error::Error for SanitizeError {}

impl From<serde_json::Error> for SanitizeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Unrepresentable(e)
    }
}
