//! Deterministic Sampler
//!
//! Admission control for the ingestion path. Decisions are a pure function
//! of `(event identity, sample_rate)`:
//!
//! 1. Critical events are always admitted.
//! 2. `rate == 1.0` admits, `rate == 0.0` drops.
//! 3. Otherwise an event is admitted iff `fingerprint / 2^64 < rate`.
//!
//! Because the fingerprint is stable, the same logical event is admitted or
//! dropped consistently across runs and across stores, which keeps replayed
//! workloads and repeated queries self-consistent. Randomness only enters
//! when fingerprinting itself fails on a malformed payload.

use crate::engine::classify::{classify, fingerprint};
use crate::engine::event::EventDraft;
use rand::Rng;
use tracing::warn;

/// Outcome of admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDecision {
    Admit,
    /// Dropped by rate. The store records nothing beyond a counter.
    Drop,
    /// Admitted (or dropped) by the RNG fallback because the payload could
    /// not be fingerprinted. Surfaced separately so the store can count the
    /// anomaly.
    FallbackAdmit,
    FallbackDrop,
}

impl SampleDecision {
    #[inline]
    pub fn is_admit(self) -> bool {
        matches!(self, SampleDecision::Admit | SampleDecision::FallbackAdmit)
    }

    #[inline]
    pub fn used_fallback(self) -> bool {
        matches!(
            self,
            SampleDecision::FallbackAdmit | SampleDecision::FallbackDrop
        )
    }
}

/// Decide admission for a draft under the given sample rate.
///
/// `sample_rate` is assumed validated to `[0.0, 1.0]` by the store config.
pub fn decide(draft: &EventDraft, sample_rate: f64) -> SampleDecision {
    if classify(draft).is_critical() {
        return SampleDecision::Admit;
    }
    if sample_rate >= 1.0 {
        return SampleDecision::Admit;
    }
    if sample_rate <= 0.0 {
        return SampleDecision::Drop;
    }

    match fingerprint(draft) {
        Some(h) => {
            // Admit iff h / 2^64 < rate, computed in integer space so the
            // comparison is bit-exact for a given rate.
            let threshold = (sample_rate * (u64::MAX as f64)) as u128;
            if (h as u128) < threshold {
                SampleDecision::Admit
            } else {
                SampleDecision::Drop
            }
        }
        None => {
            warn!(
                kind = ?draft.kind(),
                "fingerprinting failed, falling back to random sampling"
            );
            if rand::thread_rng().gen::<f64>() < sample_rate {
                SampleDecision::FallbackAdmit
            } else {
                SampleDecision::FallbackDrop
            }
        }
    }
}
