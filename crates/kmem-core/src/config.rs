//! Compaction Configuration
//!
//! Policy knobs for clustering and the automatic schedule.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for day-valued settings, about a century.
const MAX_DAYS: u32 = 36_500;

/// Compaction policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Minimum Active records sharing a topic to form a cluster (default: 3)
    pub min_cluster_size: u32,

    /// Every member must be at least this old, in days (default: 7)
    pub min_age_days: u32,

    /// Automatic run interval in days, 0 disables automatic runs (default: 0)
    pub auto_interval_days: u32,

    /// Bounded wait for the maintenance lock; None fails fast (default: None)
    pub lock_wait_ms: Option<u64>,

    /// How often the automatic loop checks whether a run is due (default: 60)
    pub poll_interval_secs: u64,

    /// Lifetime of the shared maintenance lease, renewed between clusters (default: 900)
    pub lease_ttl_secs: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 3,
            min_age_days: 7,
            auto_interval_days: 0,
            lock_wait_ms: None,
            poll_interval_secs: 60,
            lease_ttl_secs: 900,
        }
    }
}

impl CompactionConfig {
    /// Lock wait as a duration, if a bounded wait is configured
    pub fn lock_wait(&self) -> Option<Duration> {
        self.lock_wait_ms.map(Duration::from_millis)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Automatic interval, if automatic runs are enabled
    pub fn auto_interval(&self) -> Option<chrono::Duration> {
        (self.auto_interval_days > 0)
            .then(|| chrono::Duration::days(self.auto_interval_days as i64))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.min_cluster_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "compaction.min_cluster_size".into(),
                message: "must be at least 1".into(),
            });
        }

        for (field, days) in [
            ("compaction.min_age_days", self.min_age_days),
            ("compaction.auto_interval_days", self.auto_interval_days),
        ] {
            if days > MAX_DAYS {
                return Err(ConfigValidationError::InvalidValue {
                    field: field.into(),
                    message: format!("must be at most {}", MAX_DAYS),
                });
            }
        }

        for (field, secs) in [
            ("compaction.poll_interval_secs", self.poll_interval_secs),
            ("compaction.lease_ttl_secs", self.lease_ttl_secs),
        ] {
            if secs == 0 {
                return Err(ConfigValidationError::InvalidValue {
                    field: field.into(),
                    message: "must be greater than 0".into(),
                });
            }
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<ConfigValidationError> for crate::Error {
    fn from(err: ConfigValidationError) -> Self {
        match err {
            ConfigValidationError::InvalidValue { field, message } => {
                crate::Error::Validation { field, message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompactionConfig::default();
        assert_eq!(config.min_cluster_size, 3);
        assert_eq!(config.min_age_days, 7);
        assert!(config.auto_interval().is_none());
        assert!(config.lock_wait().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = CompactionConfig::default();
        config.min_cluster_size = 0;
        assert!(config.validate().is_err());

        config.min_cluster_size = 1;
        config.auto_interval_days = 40_000;
        assert!(config.validate().is_err());

        config.auto_interval_days = 7;
        config.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        config.poll_interval_secs = 60;
        config.lease_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: CompactionConfig =
            serde_json::from_str(r#"{"auto_interval_days": 2}"#).unwrap();
        assert_eq!(config.auto_interval(), Some(chrono::Duration::days(2)));
        assert_eq!(config.min_cluster_size, 3);
    }
}
