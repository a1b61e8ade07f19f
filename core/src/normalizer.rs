//! Frame Normalizer (§4.A).
//!
//! Decodes the two inbound wire formats (§6) into a uniform [`Sample`].
//! Malformed frames are dropped and counted, never surfaced as fatal —
//! callers get a [`CoreError::MalformedFrame`] they are expected to log and
//! skip rather than treat as a fatal ingestion error.

use dashmap::DashMap;
use serde::Deserialize;

use crate::constants::{
    MAX_CADENCE, MAX_HEART_RATE, MIN_CADENCE, MIN_HEART_RATE, VIBRATION_COALESCE_WINDOW_MS,
};
use crate::error::{CoreError, CoreResult};
use crate::model::{Instant, Sample, SampleKind, SampleValue};

#[derive(Debug, Deserialize)]
struct AntFrame {
    profile: String,
    #[serde(rename = "deviceId")]
    device_id: String,
    timestamp: Instant,
    data: AntData,
}

#[derive(Debug, Default, Deserialize)]
struct AntData {
    #[serde(rename = "ComputedHeartRate", default)]
    computed_heart_rate: Option<f64>,
    #[serde(rename = "CalculatedCadence", default)]
    calculated_cadence: Option<f64>,
}

/// Decodes an ANT+ HR or cadence frame (`profile: "HR"` or `"CAD"`).
/// Rejects (does not clamp) heart rate outside `[40, 220]` and cadence
/// outside `[0, 300]`.
pub fn decode_ant_frame(raw: &[u8]) -> CoreResult<Sample> {
    let frame: AntFrame =
        serde_json::from_slice(raw).map_err(|e| CoreError::MalformedFrame(e.to_string()))?;

    match frame.profile.as_str() {
        "HR" => {
            let hr = frame.data.computed_heart_rate.ok_or_else(|| {
                CoreError::MalformedFrame("HR frame missing data.ComputedHeartRate".to_string())
            })?;
            if hr < MIN_HEART_RATE as f64 || hr > MAX_HEART_RATE as f64 {
                return Err(CoreError::MalformedFrame(format!(
                    "heart rate {hr} outside [{MIN_HEART_RATE}, {MAX_HEART_RATE}]"
                )));
            }
            Ok(Sample {
                device_id: frame.device_id,
                kind: SampleKind::HeartRate,
                value: SampleValue::Number(hr),
                instant: frame.timestamp,
            })
        }
        "CAD" => {
            let cadence = frame.data.calculated_cadence.ok_or_else(|| {
                CoreError::MalformedFrame("CAD frame missing data.CalculatedCadence".to_string())
            })?;
            if cadence < MIN_CADENCE as f64 || cadence > MAX_CADENCE as f64 {
                return Err(CoreError::MalformedFrame(format!(
                    "cadence {cadence} outside [{MIN_CADENCE}, {MAX_CADENCE}]"
                )));
            }
            Ok(Sample {
                device_id: frame.device_id,
                kind: SampleKind::Cadence,
                value: SampleValue::Number(cadence),
                instant: frame.timestamp,
            })
        }
        other => Err(CoreError::MalformedFrame(format!(
            "unrecognized ANT+ profile: {other}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct VibrationFrame {
    vibration: bool,
}

/// Decodes the boolean edge out of an MQTT vibration frame. The coalescing
/// into a [`Sample`] happens separately via [`VibrationCoalescer`], since a
/// single edge cannot decide the pulse's outcome on its own.
pub fn decode_vibration_edge(raw: &[u8]) -> CoreResult<bool> {
    let frame: VibrationFrame =
        serde_json::from_slice(raw).map_err(|e| CoreError::MalformedFrame(e.to_string()))?;
    Ok(frame.vibration)
}

/// Coalesces vibration edges into discrete pulses, one per device.
///
/// A `true` edge opens a window; a `false` edge arriving within
/// [`VIBRATION_COALESCE_WINDOW_MS`] closes it into a single `VibrationPulse`
/// sample timestamped at the `true` edge. Coalescing is strictly pairwise: a
/// second `true` edge arriving before the window closes simply replaces the
/// pending one, so there is never more than one pulse in flight per device.
/// A window that is never closed by a `false` edge is flushed as a
/// standalone pulse by [`Self::sweep_expired`].
pub struct VibrationCoalescer {
    pending: DashMap<String, Instant>,
}

impl VibrationCoalescer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Feeds one decoded edge for `device_id` at `instant`. Returns a pulse
    /// sample, timestamped at the opening `true` edge, whenever a `false`
    /// edge closes a pending window — whether or not it closes in time. A
    /// `false` arriving beyond the coalescing window still yields a
    /// standalone pulse rather than being silently dropped.
    pub fn ingest(&self, device_id: &str, edge: bool, instant: Instant) -> Option<Sample> {
        if edge {
            self.pending.insert(device_id.to_string(), instant);
            return None;
        }

        let (_, opened_at) = self.pending.remove(device_id)?;
        Some(Sample {
            device_id: device_id.to_string(),
            kind: SampleKind::Vibration,
            value: SampleValue::Bool(true),
            instant: opened_at,
        })
    }

    /// Flushes any pending `true` edges older than the coalescing window as
    /// standalone pulses. Called once per tick by the Coordinator.
    #[must_use]
    pub fn sweep_expired(&self, now: Instant) -> Vec<Sample> {
        let mut expired = Vec::new();
        self.pending.retain(|device_id, opened_at| {
            let elapsed_ms = (now - *opened_at).num_milliseconds();
            if elapsed_ms > VIBRATION_COALESCE_WINDOW_MS as i64 {
                expired.push(Sample {
                    device_id: device_id.clone(),
                    kind: SampleKind::Vibration,
                    value: SampleValue::Bool(true),
                    instant: *opened_at,
                });
                false
            } else {
                true
            }
        });
        expired
    }
}

impl Default for VibrationCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn decodes_hr_frame() {
        let raw = br#"{
            "topic": "fitness", "type": "ant", "profile": "HR",
            "deviceId": "12345", "timestamp": "2026-01-01T00:00:00Z", "dongleIndex": 0,
            "data": { "DeviceID": 12345, "ComputedHeartRate": 142, "BeatCount": 9001, "BeatTime": 1, "BatteryLevel": 80 }
        }"#;
        let sample = decode_ant_frame(raw).unwrap();
        assert_eq!(sample.device_id, "12345");
        assert_eq!(sample.kind, SampleKind::HeartRate);
        assert_eq!(sample.value.as_number(), Some(142.0));
    }

    #[test]
    fn decodes_cadence_frame() {
        let raw = br#"{
            "topic": "fitness", "type": "ant", "profile": "CAD",
            "deviceId": "999", "timestamp": "2026-01-01T00:00:00Z",
            "data": { "CalculatedCadence": 88, "CumulativeCadenceRevolutionCount": 10 }
        }"#;
        let sample = decode_ant_frame(raw).unwrap();
        assert_eq!(sample.kind, SampleKind::Cadence);
        assert_eq!(sample.value.as_number(), Some(88.0));
    }

    #[test]
    fn rejects_heart_rate_outside_range() {
        let raw = br#"{
            "profile": "HR", "deviceId": "1", "timestamp": "2026-01-01T00:00:00Z",
            "data": { "ComputedHeartRate": 255 }
        }"#;
        assert!(matches!(
            decode_ant_frame(raw),
            Err(CoreError::MalformedFrame(_))
        ));
    }

    #[test]
    fn rejects_cadence_outside_range() {
        let raw = br#"{
            "profile": "CAD", "deviceId": "1", "timestamp": "2026-01-01T00:00:00Z",
            "data": { "CalculatedCadence": 301 }
        }"#;
        assert!(matches!(
            decode_ant_frame(raw),
            Err(CoreError::MalformedFrame(_))
        ));
    }

    #[test]
    fn rejects_unrecognized_profile() {
        let raw = br#"{
            "profile": "PWR", "deviceId": "1", "timestamp": "2026-01-01T00:00:00Z",
            "data": {}
        }"#;
        assert!(decode_ant_frame(raw).is_err());
    }

    #[test]
    fn decodes_vibration_edge() {
        let raw = br#"{ "vibration": true, "x_axis": 0.1, "battery": 90, "linkquality": 180 }"#;
        assert!(decode_vibration_edge(raw).unwrap());
    }

    #[test]
    fn coalesces_pulse_within_window() {
        let coalescer = VibrationCoalescer::new();
        let t0 = chrono::Utc::now();
        assert!(coalescer.ingest("rower", true, t0).is_none());
        let sample = coalescer
            .ingest("rower", false, t0 + Duration::milliseconds(150))
            .unwrap();
        assert_eq!(sample.kind, SampleKind::Vibration);
        assert_eq!(sample.instant, t0);
    }

    #[test]
    fn late_false_edge_emits_standalone_pulse() {
        let coalescer = VibrationCoalescer::new();
        let t0 = chrono::Utc::now();
        coalescer.ingest("rower", true, t0);
        let sample = coalescer
            .ingest("rower", false, t0 + Duration::milliseconds(500))
            .unwrap();
        assert_eq!(sample.kind, SampleKind::Vibration);
        assert_eq!(sample.instant, t0);
    }

    #[test]
    fn second_true_edge_replaces_pending_window() {
        let coalescer = VibrationCoalescer::new();
        let t0 = chrono::Utc::now();
        coalescer.ingest("rower", true, t0);
        coalescer.ingest("rower", true, t0 + Duration::milliseconds(50));
        let sample = coalescer
            .ingest("rower", false, t0 + Duration::milliseconds(100))
            .unwrap();
        // The pulse is timestamped at the second (replacing) true edge.
        assert_eq!(sample.instant, t0 + Duration::milliseconds(50));
    }

    #[test]
    fn sweep_flushes_stale_pending_edge_as_standalone_pulse() {
        let coalescer = VibrationCoalescer::new();
        let t0 = chrono::Utc::now();
        coalescer.ingest("rower", true, t0);
        let expired = coalescer.sweep_expired(t0 + Duration::milliseconds(500));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].instant, t0);
        // Already flushed; a later sweep finds nothing left.
        assert!(coalescer.sweep_expired(t0 + Duration::seconds(10)).is_empty());
    }
}
