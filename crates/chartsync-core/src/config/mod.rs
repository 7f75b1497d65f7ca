//! Engine configuration.
//!
//! Provides a `SyncConfig` struct loaded from JSON (or defaults) that tunes
//! batching, retry backoff, the periodic timer, the default conflict strategy
//! and the resource-type priority table.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ConflictStrategy, Priority};

const DEFAULT_BATCH_SIZE: usize = 25;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 300_000;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const DEFAULT_ERROR_LOG_LIMIT: usize = 100;

/// Sync engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Queue items pushed per batch
    pub batch_size: usize,
    /// Attempts before an item becomes a terminal failure
    pub max_attempts: u32,
    /// Backoff base; the delay after attempt `n` is `base * 2^n`
    pub base_retry_delay_ms: u64,
    /// Backoff cap
    pub max_retry_delay_ms: u64,
    /// Periodic pass interval
    pub sync_interval_secs: u64,
    /// Strategy used when neither the item nor the pass names one
    pub default_strategy: ConflictStrategy,
    /// Number of error records kept in the rolling log
    pub error_log_limit: usize,
    /// Keep syncing while the app is in the background
    pub sync_in_background: bool,
    /// Resource types pulled from the server
    pub tracked_resource_types: Vec<String>,
    /// Priority by resource type
    pub resource_priorities: BTreeMap<String, Priority>,
    /// Priority for types missing from the table
    pub default_priority: Priority,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_retry_delay_ms: DEFAULT_BASE_RETRY_DELAY_MS,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY_MS,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            default_strategy: ConflictStrategy::LastWriteWins,
            error_log_limit: DEFAULT_ERROR_LOG_LIMIT,
            sync_in_background: false,
            tracked_resource_types: default_tracked_types(),
            resource_priorities: default_priority_table(),
            default_priority: Priority::Low,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid sync config JSON: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let payload = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&payload)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.base_retry_delay_ms > self.max_retry_delay_ms {
            return Err(Error::Config(
                "base_retry_delay_ms must not exceed max_retry_delay_ms".to_string(),
            ));
        }
        if self.error_log_limit == 0 {
            return Err(Error::Config(
                "error_log_limit must be at least 1".to_string(),
            ));
        }
        if self
            .tracked_resource_types
            .iter()
            .any(|resource_type| resource_type.trim().is_empty())
        {
            return Err(Error::Config(
                "tracked_resource_types must not contain empty names".to_string(),
            ));
        }
        Ok(())
    }

    /// Priority derived from the resource-type table.
    pub fn priority_for(&self, resource_type: &str) -> Priority {
        self.resource_priorities
            .get(resource_type)
            .copied()
            .unwrap_or(self.default_priority)
    }

    pub fn base_retry_delay(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.base_retry_delay_ms).unwrap_or(i64::MAX))
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.max_retry_delay_ms).unwrap_or(i64::MAX))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::seconds(i64::try_from(self.sync_interval_secs).unwrap_or(i64::MAX))
    }
}

fn default_tracked_types() -> Vec<String> {
    [
        "Patient",
        "Practitioner",
        "Encounter",
        "Condition",
        "AllergyIntolerance",
        "Observation",
        "MedicationRequest",
        "ServiceRequest",
        "Appointment",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Identity records first, then encounters and orders, then measurements.
/// Administrative types fall through to `default_priority`.
fn default_priority_table() -> BTreeMap<String, Priority> {
    let table = [
        ("Patient", Priority::Critical),
        ("Person", Priority::Critical),
        ("Practitioner", Priority::Critical),
        ("RelatedPerson", Priority::Critical),
        ("Encounter", Priority::High),
        ("Condition", Priority::High),
        ("AllergyIntolerance", Priority::High),
        ("MedicationRequest", Priority::High),
        ("ServiceRequest", Priority::High),
        ("Observation", Priority::Medium),
        ("DiagnosticReport", Priority::Medium),
        ("Procedure", Priority::Medium),
        ("Immunization", Priority::Medium),
    ];
    table
        .into_iter()
        .map(|(resource_type, priority)| (resource_type.to_string(), priority))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_priority_table_orders_clinical_urgency() {
        let config = SyncConfig::default();
        assert_eq!(config.priority_for("Patient"), Priority::Critical);
        assert_eq!(config.priority_for("Encounter"), Priority::High);
        assert_eq!(config.priority_for("Observation"), Priority::Medium);
        assert_eq!(config.priority_for("Organization"), Priority::Low);
    }

    #[test]
    fn from_json_fills_defaults() {
        let config = SyncConfig::from_json(r#"{"batch_size": 10, "default_strategy": "merge"}"#)
            .expect("config should parse");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.default_strategy, ConflictStrategy::Merge);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn from_json_rejects_unknown_fields() {
        let error = SyncConfig::from_json(r#"{"batch": 10}"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn validate_rejects_inverted_backoff() {
        let error = SyncConfig::from_json(
            r#"{"base_retry_delay_ms": 5000, "max_retry_delay_ms": 100}"#,
        )
        .unwrap_err();
        assert!(error.to_string().contains("base_retry_delay_ms"));
    }

    #[test]
    fn validate_rejects_zero_batch() {
        assert!(SyncConfig::from_json(r#"{"batch_size": 0}"#).is_err());
    }

    #[test]
    fn priority_overrides_from_json() {
        let config = SyncConfig::from_json(
            r#"{"resource_priorities": {"Appointment": "high"}, "default_priority": "medium"}"#,
        )
        .unwrap();
        assert_eq!(config.priority_for("Appointment"), Priority::High);
        assert_eq!(config.priority_for("Patient"), Priority::Medium);
    }
}
