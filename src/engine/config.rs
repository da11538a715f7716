//! Store Configuration
//!
//! Construction-time knobs for an [`EventStore`](crate::engine::store::EventStore).
//! Invalid values are rejected when the store is built, never at use time.

use crate::engine::clock::{Nanos, TimeSource, NANOS_PER_MILLI};
use crate::engine::sanitize::SanitizeLimits;
use std::time::Duration;

/// Floor for `max_string_bytes`. Truncation markers must themselves fit
/// within the cap or sanitization would stop being idempotent.
const MIN_STRING_BYTES: usize = 64;

/// Ceiling for `max_depth`; sanitization recurses payload-deep.
const MAX_DEPTH_CAP: usize = 32;

/// Configuration for one store instance.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Name scoping this store (log fields, snapshot header). Multiple
    /// stores with distinct names can coexist, e.g. for isolated test runs.
    pub name: String,
    /// Retained-event budget. Critical events may exceed it (§ eviction).
    pub max_events: usize,
    /// Admission rate in `[0.0, 1.0]`.
    pub sample_rate: f64,
    /// Per-field payload caps.
    pub sanitize: SanitizeLimits,
    /// Whether a periodic snapshotter should run for this store.
    pub snapshot_enabled: bool,
    /// Cadence of the periodic snapshotter.
    pub snapshot_interval: Duration,
    /// How far back `state_evolution` looks for precursor events.
    pub precursor_window: Nanos,
    /// How many precursor events `state_evolution` reports per transition.
    pub precursor_limit: usize,
    /// Where unstamped events get their timestamps from.
    pub time_source: TimeSource,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_events: 10_000,
            sample_rate: 1.0,
            sanitize: SanitizeLimits::default(),
            snapshot_enabled: false,
            snapshot_interval: Duration::from_secs(30),
            precursor_window: 100 * NANOS_PER_MILLI,
            precursor_limit: 5,
            time_source: TimeSource::Wall,
        }
    }
}

impl StoreConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Validate every field. Called by `EventStore::with_config`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::new("name", "must not be empty"));
        }
        if self.max_events == 0 {
            return Err(ConfigError::new("max_events", "must be at least 1"));
        }
        if !self.sample_rate.is_finite() || !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(ConfigError::new(
                "sample_rate",
                format!("must be within [0.0, 1.0], got {}", self.sample_rate),
            ));
        }
        if self.sanitize.max_string_bytes < MIN_STRING_BYTES {
            return Err(ConfigError::new(
                "sanitize.max_string_bytes",
                format!("must be at least {}", MIN_STRING_BYTES),
            ));
        }
        if self.sanitize.max_collection_items == 0 {
            return Err(ConfigError::new(
                "sanitize.max_collection_items",
                "must be at least 1",
            ));
        }
        if self.sanitize.max_depth == 0 || self.sanitize.max_depth > MAX_DEPTH_CAP {
            return Err(ConfigError::new(
                "sanitize.max_depth",
                format!("must be within [1, {}]", MAX_DEPTH_CAP),
            ));
        }
        if self.snapshot_enabled && self.snapshot_interval.is_zero() {
            return Err(ConfigError::new(
                "snapshot_interval",
                "must be non-zero when snapshots are enabled",
            ));
        }
        if self.precursor_window <= 0 {
            return Err(ConfigError::new("precursor_window", "must be positive"));
        }
        if self.precursor_limit == 0 {
            return Err(ConfigError::new("precursor_limit", "must be at least 1"));
        }
        Ok(())
    }
}

/// A configuration field failed validation. Fatal to store construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid configuration: {}: {}", self.field, self.reason)
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(StoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_sample_rate() {
        for rate in [-0.1, 1.1, f64::NAN, f64::INFINITY] {
            let config = StoreConfig {
                sample_rate: rate,
                ..StoreConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert_eq!(err.field, "sample_rate");
        }
    }

    #[test]
    fn test_rejects_zero_budget() {
        let config = StoreConfig {
            max_events: 0,
            ..StoreConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().field, "max_events");
    }

    #[test]
    fn test_rejects_degenerate_sanitize_caps() {
        let config = StoreConfig {
            sanitize: SanitizeLimits {
                max_string_bytes: 8,
                ..SanitizeLimits::default()
            },
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_snapshot_interval_checked_only_when_enabled() {
        let disabled = StoreConfig {
            snapshot_enabled: false,
            snapshot_interval: Duration::ZERO,
            ..StoreConfig::default()
        };
        assert!(disabled.validate().is_ok());

        let enabled = StoreConfig {
            snapshot_enabled: true,
            snapshot_interval: Duration::ZERO,
            ..StoreConfig::default()
        };
        assert_eq!(enabled.validate().unwrap_err().field, "snapshot_interval");
    }
}
