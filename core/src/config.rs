//! Session configuration types, loaded from YAML with environment overrides.
//!
//! Grouped, `serde`-deserializable structs with sensible defaults and a
//! `validate()` that rejects nonsensical values eagerly rather than failing
//! deep in a tick handler.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::model::ZoneConfig;

/// A governance policy, evaluated every tick by the Governance Engine (§4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// `pauseIntent = true` if any primary participant is below `zone_id`
    /// for more than `grace_seconds`.
    RequireZoneAtLeast { zone_id: String, grace_seconds: u64 },
    /// Enters RUNNING at session start, WON when `progress >= target` within
    /// the deadline, FAILED at the deadline otherwise.
    Challenge {
        id: String,
        metric: String,
        target: f64,
        duration_seconds: u64,
    },
}

/// Governance configuration: the ordered list of policies in effect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

/// Configuration for the Timeline Store / tick alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// Timebase tick interval, in seconds. Must be >= 1.
    pub interval_seconds: u64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            interval_seconds: crate::constants::DEFAULT_TICK_INTERVAL_SECS,
        }
    }
}

impl TimelineConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.interval_seconds == 0 {
            return Err(CoreError::Configuration(
                "timeline.interval_seconds must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the Persistence / Reconstruction component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory the v3 session document is written into.
    pub output_dir: PathBuf,
    /// Interval between periodic persistence writes.
    #[serde(default = "default_persistence_interval")]
    pub interval_seconds: u64,
}

fn default_persistence_interval() -> u64 {
    crate::constants::PERSISTENCE_INTERVAL_SECS
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./sessions"),
            interval_seconds: default_persistence_interval(),
        }
    }
}

impl PersistenceConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.interval_seconds == 0 {
            return Err(CoreError::Configuration(
                "persistence.interval_seconds must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One configured user: the device(s) assigned to them plus a display name.
/// Roster assignment (§4.B) is built from `users.primary`/`users.secondary`
/// at `startSession`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    #[serde(default)]
    pub hr: Option<String>,
    #[serde(default)]
    pub cadence: Option<String>,
}

impl UserConfig {
    /// Stable participant id derived from the configured display name.
    #[must_use]
    pub fn user_id(&self) -> String {
        self.name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect()
    }
}

/// `users.primary`/`users.secondary` (§6 "Configuration (consumed)").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsersConfig {
    #[serde(default)]
    pub primary: Vec<UserConfig>,
    #[serde(default)]
    pub secondary: Vec<UserConfig>,
}

/// Display color assigned to a device, keyed by `deviceId`, per telemetry kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AntDeviceColors {
    #[serde(default)]
    pub hr: HashMap<String, String>,
    #[serde(default)]
    pub cadence: HashMap<String, String>,
}

/// One piece of non-wearable equipment (a rower, a bike) publishing vibration
/// or cadence telemetry over MQTT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentSensorConfig {
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub mqtt_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentConfig {
    pub id: String,
    pub name: String,
    pub sensor: EquipmentSensorConfig,
    #[serde(default)]
    pub thresholds: Option<EquipmentThresholds>,
}

/// Top-level session configuration: the union of everything consumed at
/// `startSession` (§6 "Configuration (consumed)").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session timezone, IANA name (e.g. `"America/Chicago"`), stored verbatim
    /// on the [`crate::model::Session`].
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default)]
    pub timeline: TimelineConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Participant state machine tuning (§4.F).
    #[serde(default = "default_idle_threshold_ticks")]
    pub idle_threshold_ticks: u64,
    #[serde(default = "default_removal_timeout_ms")]
    pub removal_timeout_ms: i64,

    /// Whether a REMOVED participant re-entering under the same userId (new
    /// deviceId) resurrects to ACTIVE rather than remaining REMOVED.
    /// Default false: REMOVED stays terminal for the session.
    #[serde(default)]
    pub resurrect_removed_participants: bool,

    /// Per-user zone tables, keyed by userId, with a `"default"` fallback
    /// entry used when no user-specific table is configured (§4.C).
    #[serde(default)]
    pub zones: HashMap<String, ZoneConfig>,

    /// Zone id -> bucket name, for Aggregator coin routing (§4.G). Defaults
    /// to an empty map (coins land only in the session total, no bucket).
    #[serde(default)]
    pub zone_bucket_map: HashMap<String, String>,

    #[serde(default)]
    pub governance: GovernanceConfig,

    /// Device-to-user roster seed, built at `startSession` (§4.B).
    #[serde(default)]
    pub users: UsersConfig,

    /// Display colors for ANT+ devices, keyed by `deviceId`.
    #[serde(default)]
    pub ant_devices: AntDeviceColors,

    /// Non-wearable equipment publishing vibration/cadence over MQTT.
    #[serde(default)]
    pub equipment: Vec<EquipmentConfig>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_idle_threshold_ticks() -> u64 {
    crate::constants::DEFAULT_IDLE_THRESHOLD_TICKS
}

fn default_removal_timeout_ms() -> i64 {
    crate::constants::DEFAULT_REMOVAL_TIMEOUT_MS
}

impl Config {
    /// Validates the configuration, eagerly rejecting values that would
    /// otherwise fail deep inside a tick handler.
    pub fn validate(&self) -> CoreResult<()> {
        self.timeline.validate()?;
        self.persistence.validate()?;

        if self.idle_threshold_ticks == 0 {
            return Err(CoreError::Configuration(
                "idle_threshold_ticks must be >= 1".to_string(),
            ));
        }
        if self.removal_timeout_ms <= 0 {
            return Err(CoreError::Configuration(
                "removal_timeout_ms must be positive".to_string(),
            ));
        }
        if self.zones.is_empty() {
            return Err(CoreError::Configuration(
                "at least one zone table (\"default\") must be configured".to_string(),
            ));
        }
        for (user, table) in &self.zones {
            validate_zone_table(user, table)?;
        }
        Ok(())
    }

    /// Looks up the zone table for a user, falling back to `"default"`.
    #[must_use]
    pub fn zone_table_for(&self, user_id: &str) -> Option<&ZoneConfig> {
        self.zones.get(user_id).or_else(|| self.zones.get("default"))
    }
}

fn validate_zone_table(owner: &str, table: &ZoneConfig) -> CoreResult<()> {
    if table.is_empty() {
        return Err(CoreError::Configuration(format!(
            "zone table for {owner} is empty"
        )));
    }
    let mut last_min: Option<u32> = None;
    for zone in table {
        if let Some(last) = last_min {
            if zone.min <= last {
                return Err(CoreError::Configuration(format!(
                    "zone table for {owner} is not strictly increasing in min (at {})",
                    zone.id
                )));
            }
        }
        last_min = Some(zone.min);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Zone;

    fn sample_zones() -> ZoneConfig {
        vec![
            Zone { id: "c".into(), min: 0, color: None, label: None },
            Zone { id: "a".into(), min: 95, color: None, label: None },
        ]
    }

    #[test]
    fn default_config_fails_validation_without_zones() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_with_default_zone_table_validates() {
        let mut config = Config::default();
        config.zones.insert("default".to_string(), sample_zones());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_increasing_zone_table_rejected() {
        let mut config = Config::default();
        config.zones.insert(
            "default".to_string(),
            vec![
                Zone { id: "a".into(), min: 95, color: None, label: None },
                Zone { id: "c".into(), min: 0, color: None, label: None },
            ],
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn zone_table_for_falls_back_to_default() {
        let mut config = Config::default();
        config.zones.insert("default".to_string(), sample_zones());
        assert!(config.zone_table_for("unknown_user").is_some());
    }
}
