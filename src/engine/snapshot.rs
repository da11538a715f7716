//! Store Snapshots
//!
//! On-demand and periodic serialization of a store to an opaque, versioned
//! byte blob, and the inverse restore path.
//!
//! # Blob Layout
//!
//! ```text
//! ┌──────────┬─────────┬──────────┬───────────────┬────────────┐
//! │ magic(8) │ ver(u16)│ len(u32) │ JSON body     │ sha256(32) │
//! └──────────┴─────────┴──────────┴───────────────┴────────────┘
//! ```
//!
//! The version is the first parseable field and governs compatibility;
//! unknown versions are refused, not guessed at. The digest covers the body,
//! so a truncated or bit-flipped blob fails before deserialization is
//! attempted. Indices are not serialized — restore rebuilds them from the
//! events, which makes index/log agreement structural rather than checked.

use crate::engine::clock::{now_ns, Nanos};
use crate::engine::config::{ConfigError, StoreConfig};
use crate::engine::event::Event;
use crate::engine::store::EventStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Blob magic. Eight bytes so the header stays aligned and grep-able.
const MAGIC: &[u8; 8] = b"ALENSSNP";

/// Current blob format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// magic + version + body length.
const HEADER_LEN: usize = 8 + 2 + 4;

/// SHA-256 output size.
const DIGEST_LEN: usize = 32;

#[derive(Serialize)]
struct SnapshotBodyRef<'a> {
    version: u16,
    name: &'a str,
    events: &'a [Arc<Event>],
}

#[derive(Deserialize)]
struct SnapshotBody {
    version: u16,
    #[allow(dead_code)]
    name: String,
    events: Vec<Event>,
}

/// Serialize a consistent view of the store.
///
/// Consistency comes from a single read-lock acquisition: no id can appear
/// in an index but not in the serialized log or vice versa.
pub fn snapshot(store: &EventStore) -> Result<Vec<u8>, SnapshotError> {
    let events = store.snapshot_view();
    let body = match serde_json::to_vec(&SnapshotBodyRef {
        version: SNAPSHOT_VERSION,
        name: store.name(),
        events: &events,
    }) {
        Ok(body) => body,
        Err(error) => {
            store.note_snapshot_failure();
            return Err(SnapshotError::Serialize(error));
        }
    };
    if body.len() > u32::MAX as usize {
        store.note_snapshot_failure();
        return Err(SnapshotError::BodyTooLarge(body.len()));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + body.len() + DIGEST_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(&Sha256::digest(&body));

    store.note_snapshot_taken();
    debug!(
        store = %store.name(),
        events = events.len(),
        bytes = out.len(),
        "snapshot taken"
    );
    Ok(out)
}

/// Rebuild a store from a blob produced by [`snapshot`].
///
/// Ids, timestamps, and criticality flags are preserved; id assignment
/// resumes past the highest restored id. A failed restore leaves the caller
/// with the error and no store; creating an empty one is their decision.
pub fn restore(bytes: &[u8], config: StoreConfig) -> Result<EventStore, SnapshotError> {
    if bytes.len() < HEADER_LEN + DIGEST_LEN {
        return Err(SnapshotError::TooShort(bytes.len()));
    }
    if &bytes[..8] != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = u16::from_le_bytes([bytes[8], bytes[9]]);
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let body_len = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]) as usize;
    if bytes.len() != HEADER_LEN + body_len + DIGEST_LEN {
        return Err(SnapshotError::LengthMismatch {
            declared: body_len,
            actual: bytes.len().saturating_sub(HEADER_LEN + DIGEST_LEN),
        });
    }
    let body = &bytes[HEADER_LEN..HEADER_LEN + body_len];
    let digest = &bytes[HEADER_LEN + body_len..];
    if Sha256::digest(body).as_slice() != digest {
        return Err(SnapshotError::DigestMismatch);
    }

    let parsed: SnapshotBody = serde_json::from_slice(body).map_err(SnapshotError::Malformed)?;
    if parsed.version != version {
        return Err(SnapshotError::Inconsistent("header and body versions differ"));
    }

    // The log's order keys must be strictly increasing in both components'
    // composite order; anything else means the blob was not produced by a
    // healthy store.
    let mut last_key: Option<(Nanos, u64)> = None;
    for event in &parsed.events {
        if event.id == 0 {
            return Err(SnapshotError::Inconsistent("event id zero"));
        }
        let key = event.order_key();
        if let Some((last_ts, last_id)) = last_key {
            if key <= (last_ts, last_id) || event.id <= last_id {
                return Err(SnapshotError::Inconsistent("events out of order"));
            }
        }
        last_key = Some(key);
    }

    let count = parsed.events.len();
    let store = EventStore::from_restored_events(config, parsed.events)
        .map_err(SnapshotError::Config)?;
    info!(store = %store.name(), events = count, "store restored from snapshot");
    Ok(store)
}

// =============================================================================
// PERIODIC SNAPSHOTTER
// =============================================================================

/// One periodic snapshot, handed to the consumer channel.
#[derive(Debug, Clone)]
pub struct SnapshotBlob {
    /// Wall time at which the blob was produced.
    pub taken_at: Nanos,
    pub bytes: Vec<u8>,
}

/// Background task serializing the store on the configured interval.
///
/// Blobs go to a bounded channel; where they land (disk, network, a test
/// buffer) is the consumer's business. A lagging consumer loses blobs, which
/// is counted and logged, never fatal — the in-memory store is the source of
/// truth and the next tick produces a fresh blob.
pub struct PeriodicSnapshotter {
    shutdown: mpsc::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl PeriodicSnapshotter {
    /// Start the task. Returns `None` when the store's config has snapshots
    /// disabled.
    pub fn spawn(
        store: Arc<EventStore>,
        buffer: usize,
    ) -> Option<(Self, mpsc::Receiver<SnapshotBlob>)> {
        let config = store.config();
        if !config.snapshot_enabled {
            return None;
        }
        let interval = config.snapshot_interval;
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of `interval` fires immediately; consume it so
            // the first blob lands one full interval after spawn.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        match snapshot(&store) {
                            Ok(bytes) => {
                                let blob = SnapshotBlob { taken_at: now_ns(), bytes };
                                if tx.try_send(blob).is_err() {
                                    store.note_snapshot_failure();
                                    warn!(
                                        store = %store.name(),
                                        "snapshot consumer lagging, blob discarded"
                                    );
                                }
                            }
                            Err(error) => {
                                warn!(store = %store.name(), %error, "periodic snapshot failed");
                            }
                        }
                    }
                }
            }
            debug!(store = %store.name(), "periodic snapshotter stopped");
        });

        Some((
            Self {
                shutdown: shutdown_tx,
                handle,
            },
            rx,
        ))
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.handle.await;
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Snapshot and restore failures. All transient from the store's point of
/// view: the in-memory state is unaffected.
#[derive(Debug)]
pub enum SnapshotError {
    /// The store's contents failed to serialize.
    Serialize(serde_json::Error),
    /// Body exceeds the u32 length field.
    BodyTooLarge(usize),
    /// Blob shorter than header + digest.
    TooShort(usize),
    BadMagic,
    /// Blob from a format this build does not read.
    UnsupportedVersion(u16),
    LengthMismatch { declared: usize, actual: usize },
    /// Body bytes do not match the recorded digest.
    DigestMismatch,
    /// Digest-valid body that does not parse.
    Malformed(serde_json::Error),
    /// Parsed body violates store invariants.
    Inconsistent(&'static str),
    /// The restore-target configuration is itself invalid.
    Config(ConfigError),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialize(e) => write!(f, "snapshot serialization failed: {}", e),
            Self::BodyTooLarge(len) => write!(f, "snapshot body too large: {} bytes", len),
            Self::TooShort(len) => write!(f, "blob too short to be a snapshot: {} bytes", len),
            Self::BadMagic => write!(f, "not a snapshot blob (bad magic)"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported snapshot version {}", v),
            Self::LengthMismatch { declared, actual } => write!(
                f,
                "snapshot length mismatch: header declares {} body bytes, found {}",
                declared, actual
            ),
            Self::DigestMismatch => write!(f, "snapshot digest mismatch"),
            Self::Malformed(e) => write!(f, "snapshot body malformed: {}", e),
            Self::Inconsistent(what) => write!(f, "snapshot inconsistent: {}", what),
            Self::Config(e) => write!(f, "restore configuration invalid: {}", e),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<ConfigError> for SnapshotError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
