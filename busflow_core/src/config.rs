//! Tracker configuration.
//!
//! Keys are camelCase on the wire so the same JSON file can be shared with
//! the web front end:
//!
//! ```json
//! { "gracePeriodMs": 60000, "tweenDurationMs": 1500, "feedIntervalMs": 5000,
//!   "frameIntervalMs": 16, "h3Resolution": 10 }
//! ```
//!
//! Missing keys fall back to their defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroInterval { field: &'static str },

    #[error("grace period {grace_ms}ms is shorter than three feed intervals ({feed_ms}ms each)")]
    GraceTooShort { grace_ms: u64, feed_ms: u64 },

    #[error("tween duration {tween_ms}ms exceeds the feed interval {feed_ms}ms")]
    TweenTooLong { tween_ms: u64, feed_ms: u64 },

    #[error("H3 resolution {0} is outside 0..=15")]
    BadResolution(u8),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Timing and indexing knobs for the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Max time without an accepted record before eviction (default: 60s,
    /// twelve feed intervals)
    pub grace_period_ms: u64,

    /// Length of one position tween (default: 1.5s)
    pub tween_duration_ms: u64,

    /// Feed polling cadence (default: 5s)
    pub feed_interval_ms: u64,

    /// Frame cadence (default: 16ms, ~60 fps)
    pub frame_interval_ms: u64,

    /// H3 resolution for the proximity index (default: 10, ~66m cells)
    pub h3_resolution: u8,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 60_000,
            tween_duration_ms: 1_500,
            feed_interval_ms: 5_000,
            frame_interval_ms: 16,
            h3_resolution: 10,
        }
    }
}

impl TrackerConfig {
    /// Parses and validates a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: TrackerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("gracePeriodMs", self.grace_period_ms),
            ("tweenDurationMs", self.tween_duration_ms),
            ("feedIntervalMs", self.feed_interval_ms),
            ("frameIntervalMs", self.frame_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval { field });
            }
        }

        if self.grace_period_ms < self.feed_interval_ms.saturating_mul(3) {
            return Err(ConfigError::GraceTooShort {
                grace_ms: self.grace_period_ms,
                feed_ms: self.feed_interval_ms,
            });
        }

        if self.tween_duration_ms > self.feed_interval_ms {
            return Err(ConfigError::TweenTooLong {
                tween_ms: self.tween_duration_ms,
                feed_ms: self.feed_interval_ms,
            });
        }

        if self.h3_resolution > 15 {
            return Err(ConfigError::BadResolution(self.h3_resolution));
        }

        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn tween_duration(&self) -> Duration {
        Duration::from_millis(self.tween_duration_ms)
    }

    pub fn feed_interval(&self) -> Duration {
        Duration::from_millis(self.feed_interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grace_period(), Duration::from_secs(60));
        assert_eq!(config.tween_duration(), Duration::from_millis(1500));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = TrackerConfig::from_json_str(r#"{ "gracePeriodMs": 20000 }"#).unwrap();
        assert_eq!(config.grace_period_ms, 20_000);
        assert_eq!(config.feed_interval_ms, 5_000);
        assert_eq!(config.h3_resolution, 10);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(matches!(
            TrackerConfig::from_json_str(r#"{ "frameIntervalMs": 0 }"#),
            Err(ConfigError::ZeroInterval { field: "frameIntervalMs" })
        ));
        assert!(matches!(
            TrackerConfig::from_json_str(r#"{ "gracePeriodMs": 10000 }"#),
            Err(ConfigError::GraceTooShort { .. })
        ));
        assert!(matches!(
            TrackerConfig::from_json_str(r#"{ "tweenDurationMs": 6000 }"#),
            Err(ConfigError::TweenTooLong { .. })
        ));
        assert!(matches!(
            TrackerConfig::from_json_str(r#"{ "h3Resolution": 16 }"#),
            Err(ConfigError::BadResolution(16))
        ));
        assert!(matches!(
            TrackerConfig::from_json_str(r#"{ "grace": 1 }"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            TrackerConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            TrackerConfig::load("/nonexistent/busflow.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_string(&TrackerConfig::default()).unwrap();
        assert!(json.contains("\"gracePeriodMs\":60000"));
        assert!(json.contains("\"h3Resolution\":10"));
    }
}
