//! Fixed protocol and domain constants that should NOT be changed lightly.
//!
//! Values here are defined by the wire protocols in `SPEC_FULL.md` §6 or by
//! the domain design in §4; changing them changes on-the-wire or on-disk
//! compatibility.

// ─────────────────────────────────────────────────────────────────────────────
// Sample validation ranges (§4.A)
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum accepted heart rate (bpm). Samples outside `[MIN_HR, MAX_HR]` are
/// rejected as malformed.
pub const MIN_HEART_RATE: u32 = 40;

/// Maximum accepted heart rate (bpm).
pub const MAX_HEART_RATE: u32 = 220;

/// Minimum accepted cadence (rpm).
pub const MIN_CADENCE: u32 = 0;

/// Maximum accepted cadence (rpm).
pub const MAX_CADENCE: u32 = 300;

/// Maximum gap between a vibration pulse (`true`) and its matching idle edge
/// (`false`) for the pair to coalesce into a single `VibrationPulse` event.
pub const VIBRATION_COALESCE_WINDOW_MS: u64 = 200;

// ─────────────────────────────────────────────────────────────────────────────
// Device Roster (§4.B)
// ─────────────────────────────────────────────────────────────────────────────

/// A device is considered active iff `now - lastSeenInstant < DEVICE_LIVENESS_SECS`.
pub const DEVICE_LIVENESS_SECS: i64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Timebase (§4.D)
// ─────────────────────────────────────────────────────────────────────────────

/// Default tick interval, in seconds.
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 5;

/// Maximum number of missed ticks the Timebase will emit back-to-back to
/// catch up on wall-clock skew before marking the session degraded.
pub const MAX_CATCH_UP_TICKS: u64 = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Participant State Machine (§4.F)
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of ticks with no sample before ACTIVE transitions to IDLE.
pub const DEFAULT_IDLE_THRESHOLD_TICKS: u64 = 2;

/// Default wall-clock timeout (ms) after which an ACTIVE or IDLE participant
/// transitions to REMOVED.
pub const DEFAULT_REMOVAL_TIMEOUT_MS: i64 = 120_000;

// ─────────────────────────────────────────────────────────────────────────────
// Aggregator (§4.G)
// ─────────────────────────────────────────────────────────────────────────────

/// Divisor used to convert heart rate into a coin delta: `round(hr / COIN_DIVISOR)`.
pub const COIN_DIVISOR: f64 = 30.0;

// ─────────────────────────────────────────────────────────────────────────────
// Governance Engine (§4.H)
// ─────────────────────────────────────────────────────────────────────────────

/// Default grace period before `require_zone_at_least` raises `pauseIntent`.
pub const DEFAULT_POLICY_GRACE_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Session Coordinator (§4.J)
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between periodic persistence writes.
pub const PERSISTENCE_INTERVAL_SECS: u64 = 30;

/// Capacity of the discrete session-event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the bounded command queue the Coordinator drains on its own task.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Persistence (§4.K, §7)
// ─────────────────────────────────────────────────────────────────────────────

/// Current persisted session document version. Only this version is written;
/// v2 documents are read and normalized but never round-tripped through v2.
pub const SESSION_DOCUMENT_VERSION: u32 = 3;

/// Retry backoff schedule (ms) for persistence write failures, per §7.
pub const PERSISTENCE_RETRY_BACKOFF_MS: [u64; 3] = [100, 500, 2_000];

/// Null-value sentinel used in RLE-encoded series.
pub const RLE_NULL_SENTINEL: &str = "~";

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in log lines and the persisted document's generator tag.
pub const APP_NAME: &str = "Fitness Session Core";
