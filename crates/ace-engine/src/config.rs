//! Engine configuration, loadable from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ace_comms::ProtocolConfig;
use ace_conflict::ConflictConfig;
use ace_delegation::DelegationConfig;
use ace_protocol::{
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_OFFLINE_AFTER_SECS, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_RESOLUTION_TIMEOUT_SECS, DEFAULT_RESOURCE_LEASE_SECS, DEFAULT_TASK_QUEUE_CAPACITY,
    DEFAULT_TASK_TIMEOUT_SECS,
};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub delegation: DelegationSection,
    pub comms: CommsSection,
    pub conflict: ConflictSection,
}

impl EngineConfig {
    /// Parse a TOML document; absent keys fall back to defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationSection {
    pub max_queue_size: usize,
    pub default_timeout_secs: u64,
    pub monitor_interval_ms: u64,
    pub dispatch_batch: usize,
    pub offline_after_secs: u64,
}

impl Default for DelegationSection {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_TASK_QUEUE_CAPACITY,
            default_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            monitor_interval_ms: 500,
            dispatch_batch: 10,
            offline_after_secs: DEFAULT_OFFLINE_AFTER_SECS,
        }
    }
}

impl From<&DelegationSection> for DelegationConfig {
    fn from(section: &DelegationSection) -> Self {
        Self {
            max_queue_size: section.max_queue_size,
            default_timeout: Duration::from_secs(section.default_timeout_secs),
            monitor_interval: Duration::from_millis(section.monitor_interval_ms),
            dispatch_batch: section.dispatch_batch,
            offline_after: Duration::from_secs(section.offline_after_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommsSection {
    /// Base pre-shared secret for message signatures.
    pub secret: String,
    pub queue_capacity: usize,
    pub heartbeat_interval_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for CommsSection {
    fn default() -> Self {
        Self {
            secret: String::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            poll_interval_ms: 50,
        }
    }
}

impl From<&CommsSection> for ProtocolConfig {
    fn from(section: &CommsSection) -> Self {
        Self {
            queue_capacity: section.queue_capacity,
            heartbeat_interval: Duration::from_secs(section.heartbeat_interval_secs),
            poll_interval: Duration::from_millis(section.poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictSection {
    pub resolution_timeout_secs: u64,
    pub resource_lease_secs: u64,
    pub scan_interval_ms: u64,
}

impl Default for ConflictSection {
    fn default() -> Self {
        Self {
            resolution_timeout_secs: DEFAULT_RESOLUTION_TIMEOUT_SECS,
            resource_lease_secs: DEFAULT_RESOURCE_LEASE_SECS,
            scan_interval_ms: 1_000,
        }
    }
}

impl From<&ConflictSection> for ConflictConfig {
    fn from(section: &ConflictSection) -> Self {
        Self {
            resolution_timeout: Duration::from_secs(section.resolution_timeout_secs),
            resource_lease: Duration::from_secs(section.resource_lease_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.delegation.dispatch_batch, 10);
        assert_eq!(config.comms.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(
            config.conflict.resource_lease_secs,
            DEFAULT_RESOURCE_LEASE_SECS
        );
    }

    #[test]
    fn test_partial_toml_overrides() {
        let text = r#"
            [delegation]
            max_queue_size = 50
            dispatch_batch = 2

            [comms]
            secret = "team-secret"

            [conflict]
            resolution_timeout_secs = 30
        "#;
        let config = EngineConfig::from_toml(text).unwrap();
        assert_eq!(config.delegation.max_queue_size, 50);
        assert_eq!(config.delegation.dispatch_batch, 2);
        // Untouched keys keep their defaults.
        assert_eq!(
            config.delegation.default_timeout_secs,
            DEFAULT_TASK_TIMEOUT_SECS
        );
        assert_eq!(config.comms.secret, "team-secret");
        assert_eq!(config.conflict.resolution_timeout_secs, 30);
    }

    #[test]
    fn test_section_conversions() {
        let config = EngineConfig::default();
        let delegation: DelegationConfig = (&config.delegation).into();
        assert_eq!(delegation.dispatch_batch, 10);
        let protocol: ProtocolConfig = (&config.comms).into();
        assert_eq!(protocol.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        let conflict: ConflictConfig = (&config.conflict).into();
        assert_eq!(
            conflict.resource_lease,
            Duration::from_secs(DEFAULT_RESOURCE_LEASE_SECS)
        );
    }
}
