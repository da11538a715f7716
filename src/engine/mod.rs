//! Observability Engine
//!
//! In-memory capture, correlation, and time-travel querying of execution
//! events from a concurrent actor runtime.
//!
//! # Architecture
//!
//! ```text
//!  producers (lifecycle hooks, message taps, callback wrappers, telemetry)
//!        │
//!        ▼
//! ┌─────────────────┐   tracing-level gate, normalization
//! │ IngestionAdapter│──────────────────────────────┐
//! └─────────────────┘                              │
//!        │                                         ▼
//!        ▼                                  ┌─────────────┐
//! ┌─────────────────┐  deterministic        │  sanitize   │
//! │    Sampler      │  fingerprint admit    │  (bounded   │
//! │ (stateless)     │◀──────────────────────│   payloads) │
//! └─────────────────┘                       └─────────────┘
//!        │ admit
//!        ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                      EventStore                         │
//! │  ordered log · state log · per-actor index · eviction   │
//! │  (single RwLock, id/timestamp assignment, counters)     │
//! └─────────────────────────────────────────────────────────┘
//!        │ read primitives                        │ read view
//!        ▼                                        ▼
//! ┌─────────────────┐                      ┌──────────────────┐
//! │  QueryEngine    │                      │PeriodicSnapshotter│
//! │ state_at, live  │                      │ versioned blobs   │
//! │ sets, windows   │                      │ (tokio task)      │
//! └─────────────────┘                      └──────────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - **Ids**: strictly increasing per store; ties in timestamps broken by id
//! - **Sampling**: fingerprint-based, so the same logical event is admitted
//!   or dropped identically across runs and stores
//! - **Queries**: pure reads; reissued queries over an unchanged store
//!   return identical results

pub mod adapter;
pub mod classify;
pub mod clock;
pub mod config;
pub mod event;
pub mod query;
pub mod sampler;
pub mod sanitize;
pub mod snapshot;
pub mod store;

#[cfg(test)]
mod sampler_tests;
#[cfg(test)]
mod sanitize_tests;
