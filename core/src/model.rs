//! Core data model: the types owned and exchanged by the session components.
//!
//! These are plain data types; behavior lives in the component modules
//! (`roster`, `zones`, `timeline`, `participant`, `aggregator`, `governance`,
//! `coordinator`, `persistence`), keeping the wire/runtime types separate
//! from the services that act on them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock instant used throughout the session core. `chrono`'s UTC
/// variant is used uniformly; wire timestamps are parsed as ISO-8601 into
/// this type at the Normalizer boundary.
pub type Instant = DateTime<Utc>;

// ─────────────────────────────────────────────────────────────────────────────
// Frame Normalizer output (§3, §4.A)
// ─────────────────────────────────────────────────────────────────────────────

/// The kind of telemetry a [`Sample`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SampleKind {
    HeartRate,
    Cadence,
    Vibration,
    Power,
}

impl SampleKind {
    /// The metric name used as the second half of a Timeline Store key.
    #[must_use]
    pub fn metric_name(self) -> &'static str {
        match self {
            Self::HeartRate => "heart_rate",
            Self::Cadence => "cadence",
            Self::Vibration => "vibration",
            Self::Power => "power",
        }
    }
}

/// A sample's payload: numeric for HR/cadence/power, boolean for a vibration edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Bool(bool),
}

impl SampleValue {
    #[must_use]
    pub fn as_number(self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(n),
            Self::Bool(_) => None,
        }
    }

    #[must_use]
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(b),
            Self::Number(_) => None,
        }
    }
}

/// A single decoded telemetry reading, uniform across wire sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub device_id: String,
    pub kind: SampleKind,
    pub value: SampleValue,
    pub instant: Instant,
}

// ─────────────────────────────────────────────────────────────────────────────
// Device Roster (§3, §4.B)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceKind {
    HeartRate,
    Cadence,
    Vibration,
    Power,
}

impl From<SampleKind> for DeviceKind {
    fn from(kind: SampleKind) -> Self {
        match kind {
            SampleKind::HeartRate => Self::HeartRate,
            SampleKind::Cadence => Self::Cadence,
            SampleKind::Vibration => Self::Vibration,
            SampleKind::Power => Self::Power,
        }
    }
}

/// A registered or discovered device, keyed by `device_id` in the Roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub kind: DeviceKind,
    pub owner_user_id: Option<String>,
    pub color: Option<String>,
    pub last_seen_instant: Option<Instant>,
    pub battery_level: Option<u8>,
}

impl Device {
    #[must_use]
    pub fn new(device_id: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            owner_user_id: None,
            color: None,
            last_seen_instant: None,
            battery_level: None,
        }
    }
}

/// Role used to break ties when two assignments compete for the same device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Secondary users lose ties against primary users.
    Secondary,
    /// Primary users win ties.
    Primary,
}

// ─────────────────────────────────────────────────────────────────────────────
// Participant State Machine (§3, §4.F)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    Absent,
    Active,
    Idle,
    Removed,
}

/// Running min/max/avg for a participant's heart rate, updated only from
/// samples observed while the participant was ACTIVE.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HrStats {
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub avg: f64,
    /// Count of ACTIVE samples folded into `avg`; not persisted.
    #[serde(skip)]
    pub n: u64,
}

impl HrStats {
    pub fn fold(&mut self, hr: u32) {
        self.min = Some(self.min.map_or(hr, |m| m.min(hr)));
        self.max = Some(self.max.map_or(hr, |m| m.max(hr)));
        self.avg = (self.avg * self.n as f64 + hr as f64) / (self.n + 1) as f64;
        self.n += 1;
    }
}

/// A session participant, keyed by stable user id. Never removed from the
/// document once inserted — `status` records an exit instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub is_primary: bool,
    pub is_guest: bool,
    pub status: ParticipantStatus,
    pub first_seen_tick: u64,
    pub last_active_tick: u64,
    pub active_seconds: u64,
    pub coins_earned: u64,
    pub hr_stats: HrStats,
    pub zone_time_seconds: HashMap<String, u64>,
}

impl Participant {
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, tick: u64) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_primary: false,
            is_guest: false,
            status: ParticipantStatus::Absent,
            first_seen_tick: tick,
            last_active_tick: tick,
            active_seconds: 0,
            coins_earned: 0,
            hr_stats: HrStats::default(),
            zone_time_seconds: HashMap::new(),
        }
    }
}

/// A derived dropout event: ACTIVE → IDLE transition recorded for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropoutEvent {
    pub participant_id: String,
    pub tick: u64,
    pub value: u64,
    pub instant: Instant,
    pub id: String,
}

impl DropoutEvent {
    #[must_use]
    pub fn new(participant_id: &str, tick: u64, value: u64, instant: Instant) -> Self {
        Self {
            id: dropout_id(participant_id, tick),
            participant_id: participant_id.to_string(),
            tick,
            value,
            instant,
        }
    }
}

/// Builds the idempotent dropout event id shared by live recording and
/// reconstruction from a persisted document.
#[must_use]
pub fn dropout_id(participant_id: &str, tick: u64) -> String {
    format!("{participant_id}-dropout-{tick}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Zone Classifier (§3, §4.C)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub min: u32,
    pub color: Option<String>,
    pub label: Option<String>,
}

/// Ordered list of zones with strictly increasing `min`. Construction is
/// validated by [`crate::zones::ZoneTable::new`]; this is the plain data
/// shape consumed/produced at configuration boundaries.
pub type ZoneConfig = Vec<Zone>;

// ─────────────────────────────────────────────────────────────────────────────
// Timeline Store (§3, §4.E)
// ─────────────────────────────────────────────────────────────────────────────

/// One element of a dense per-(subject, metric) series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesValue {
    Number(f64),
    Categorical(String),
    Bool(bool),
}

/// A dense, tick-aligned series. `series[i] == None` means a dropout at tick `i`.
pub type Series = Vec<Option<SeriesValue>>;

// ─────────────────────────────────────────────────────────────────────────────
// Governance Engine (§3, §4.H)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChallengePhase {
    Running,
    Won,
    Failed,
}

impl ChallengePhase {
    /// WON and FAILED are terminal: once reached, the phase never changes again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Won | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub phase: ChallengePhase,
    pub deadline: Instant,
    pub target: f64,
    pub progress: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceState {
    pub status: String,
    pub active_policy_id: Option<String>,
    pub challenge: Option<Challenge>,
    pub mode: String,
    pub pause_intent: bool,
}

impl Default for GovernanceState {
    fn default() -> Self {
        Self {
            status: "idle".to_string(),
            active_policy_id: None,
            challenge: None,
            mode: "normal".to_string(),
            pause_intent: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Screenshot / Event Log (§3, §4.I)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    ScreenshotTaken {
        filename: String,
        instant: Instant,
        index: u64,
    },
    VoiceMemo {
        id: String,
        transcript: Option<String>,
        instant: Instant,
        duration_seconds: u64,
    },
    AudioPlayed {
        title: String,
        artist: Option<String>,
        plex_id: Option<String>,
        instant: Instant,
        duration_seconds: u64,
    },
    VideoPlayed {
        title: String,
        show: Option<String>,
        season: Option<u32>,
        plex_id: Option<String>,
        instant: Instant,
        duration_seconds: u64,
    },
}

impl SessionEvent {
    /// The field used to de-duplicate `ScreenshotTaken` entries; other
    /// variants are not deduplicated by the Event Log.
    #[must_use]
    pub fn dedupe_key(&self) -> Option<&str> {
        match self {
            Self::ScreenshotTaken { filename, .. } => Some(filename),
            _ => None,
        }
    }

    #[must_use]
    pub fn instant(&self) -> Instant {
        match self {
            Self::ScreenshotTaken { instant, .. }
            | Self::VoiceMemo { instant, .. }
            | Self::AudioPlayed { instant, .. }
            | Self::VideoPlayed { instant, .. } => *instant,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session (§3)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    New,
    Running,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub date: String,
    pub start_instant: Instant,
    pub end_instant: Option<Instant>,
    pub duration_seconds: Option<u64>,
    pub timezone: String,
    pub version: u32,
}

impl Session {
    /// Formats the canonical `YYYYMMDDhhmmss` session id from a start instant.
    #[must_use]
    pub fn canonical_id(start: Instant) -> String {
        start.format("%Y%m%d%H%M%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dropout_id_is_stable() {
        assert_eq!(dropout_id("alice", 2), "alice-dropout-2");
    }

    #[test]
    fn hr_stats_fold_tracks_min_max_avg() {
        let mut stats = HrStats::default();
        stats.fold(100);
        stats.fold(120);
        stats.fold(80);
        assert_eq!(stats.min, Some(80));
        assert_eq!(stats.max, Some(120));
        assert!((stats.avg - 100.0).abs() < 1e-9);
    }

    #[test]
    fn challenge_phase_terminality() {
        assert!(!ChallengePhase::Running.is_terminal());
        assert!(ChallengePhase::Won.is_terminal());
        assert!(ChallengePhase::Failed.is_terminal());
    }

    #[test]
    fn session_canonical_id_format() {
        let start = Utc.with_ymd_and_hms(2026, 7, 28, 9, 30, 5).unwrap();
        assert_eq!(Session::canonical_id(start), "20260728093005");
    }
}
