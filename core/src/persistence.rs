//! Persistence & Reconstruction (§4.K).
//!
//! Writes the v3 session document via an atomic temp-file-then-rename
//! discipline, with the retry/backoff schedule from §7 on write failure.
//! Reads detect
//! v2 vs v3 and normalize v2 into the v3 runtime shape; dropout
//! reconstruction re-derives `DropoutEvent`s from a persisted series so a
//! restarted process recovers the same events it would have recorded live.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{PERSISTENCE_RETRY_BACKOFF_MS, SESSION_DOCUMENT_VERSION};
use crate::error::{CoreError, CoreResult};
use crate::model::{DropoutEvent, HrStats, Instant, SeriesValue};
use crate::timeline::{decode_rle, encode_rle};

// ─────────────────────────────────────────────────────────────────────────────
// v3 document shape (§6)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    pub version: u32,
    pub session: SessionDoc,
    pub totals: TotalsDoc,
    pub participants: HashMap<String, ParticipantDoc>,
    pub timeline: TimelineDoc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<EventsDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDoc {
    pub id: String,
    pub date: String,
    pub start: Instant,
    pub end: Option<Instant>,
    pub duration_seconds: Option<u64>,
    pub timezone: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TotalsDoc {
    pub coins: u64,
    pub buckets: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantDoc {
    pub display_name: String,
    pub is_primary: bool,
    pub is_guest: bool,
    pub coins_earned: u64,
    pub active_seconds: u64,
    pub zone_time_seconds: HashMap<String, u64>,
    pub hr_stats: HrStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineDoc {
    pub interval_seconds: u64,
    pub tick_count: u64,
    pub encoding: String,
    pub participants: HashMap<String, ParticipantSeriesDoc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub equipment: HashMap<String, HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub global: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSeriesDoc {
    pub hr: String,
    pub zone: String,
    pub coins_total: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsDoc {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio: Vec<AudioEventDoc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video: Vec<VideoEventDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioEventDoc {
    pub at: Instant,
    pub title: String,
    pub artist: Option<String>,
    pub plex_id: Option<String>,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoEventDoc {
    pub at: Instant,
    pub title: String,
    pub show: Option<String>,
    pub season: Option<u32>,
    pub plex_id: Option<String>,
    pub duration_seconds: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Write path
// ─────────────────────────────────────────────────────────────────────────────

fn document_path(output_dir: &Path, session_id: &str) -> PathBuf {
    output_dir.join(format!("{session_id}.json"))
}

/// Writes `document` atomically (temp file + rename), retrying on failure
/// per [`PERSISTENCE_RETRY_BACKOFF_MS`]. Legacy fields (`voiceMemos`,
/// `deviceAssignments`, `seriesMeta`, `_persistWarnings`) never appear here —
/// there is nothing to strip, since the document is built fresh every write.
pub async fn write_document(output_dir: &Path, document: &SessionDocument) -> CoreResult<()> {
    let mut last_err = None;
    for (attempt, backoff_ms) in std::iter::once(&0u64)
        .chain(PERSISTENCE_RETRY_BACKOFF_MS.iter())
        .enumerate()
    {
        if attempt > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(*backoff_ms)).await;
        }
        match write_document_once(output_dir, document) {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        CoreError::PersistenceError("exhausted retries with no recorded error".to_string())
    }))
}

fn write_document_once(output_dir: &Path, document: &SessionDocument) -> CoreResult<()> {
    std::fs::create_dir_all(output_dir)
        .map_err(|e| CoreError::PersistenceError(format!("create_dir_all: {e}")))?;

    let path = document_path(output_dir, &document.session.id);
    let temp_path = output_dir.join(format!("{}.json.tmp", document.session.id));
    let contents = serde_json::to_string_pretty(document)
        .map_err(|e| CoreError::PersistenceError(format!("serialize: {e}")))?;

    std::fs::write(&temp_path, contents)
        .map_err(|e| CoreError::PersistenceError(format!("write temp file: {e}")))?;
    std::fs::rename(&temp_path, &path)
        .map_err(|e| CoreError::PersistenceError(format!("rename: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Read path: version detection and v2 normalization
// ─────────────────────────────────────────────────────────────────────────────

const V3_SESSION_KEYS: [&str; 6] = ["id", "date", "start", "end", "duration_seconds", "timezone"];

/// A document is v3 iff `version == 3` and `session` carries every canonical
/// key (possibly null, but present).
#[must_use]
pub fn is_v3_document(raw: &Value) -> bool {
    let version_is_3 = raw.get("version").and_then(Value::as_u64) == Some(u64::from(SESSION_DOCUMENT_VERSION));
    let session_complete = raw
        .get("session")
        .is_some_and(|s| V3_SESSION_KEYS.iter().all(|k| s.get(k).is_some()));
    version_is_3 && session_complete
}

/// Reads a persisted document from `path`, normalizing a legacy (v2) layout
/// into the v3 runtime shape if needed. The next write always emits v3.
pub fn read_document(path: &Path) -> CoreResult<SessionDocument> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CoreError::PersistenceError(format!("read {}: {e}", path.display())))?;
    let raw: Value = serde_json::from_str(&contents)
        .map_err(|e| CoreError::InvalidDocument(format!("invalid json: {e}")))?;

    if is_v3_document(&raw) {
        serde_json::from_value(raw)
            .map_err(|e| CoreError::InvalidDocument(format!("v3 document: {e}")))
    } else {
        normalize_legacy_document(raw)
    }
}

/// Best-effort normalization of a pre-v3 document. The legacy schema isn't
/// fully specified; this recovers the one field known to be stable across
/// versions (`sessionId` at top level) and defaults everything else to an
/// empty v3 document shape so `write_document` always emits a well-formed
/// v3 file on the next persistence cycle.
fn normalize_legacy_document(raw: Value) -> CoreResult<SessionDocument> {
    let id = raw
        .get("sessionId")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::InvalidDocument("legacy document missing sessionId".to_string()))?
        .to_string();

    Ok(SessionDocument {
        version: SESSION_DOCUMENT_VERSION,
        session: SessionDoc {
            id,
            date: String::new(),
            start: chrono::Utc::now(),
            end: None,
            duration_seconds: None,
            timezone: "UTC".to_string(),
        },
        totals: TotalsDoc::default(),
        participants: HashMap::new(),
        timeline: TimelineDoc {
            interval_seconds: crate::constants::DEFAULT_TICK_INTERVAL_SECS,
            tick_count: 0,
            encoding: "rle".to_string(),
            participants: HashMap::new(),
            equipment: HashMap::new(),
            global: HashMap::new(),
        },
        events: None,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Dropout reconstruction (§4.F redux, §4.K)
// ─────────────────────────────────────────────────────────────────────────────

/// Walks each participant's `heart_rate` series; whenever a `null` follows a
/// non-null, emits a `DropoutEvent` at the last non-null tick with the coin
/// total read from `coins_total` at that same tick. A never-active prefix of
/// nulls is not a dropout.
pub fn reconstruct_dropouts(document: &SessionDocument) -> CoreResult<Vec<DropoutEvent>> {
    let mut events = Vec::new();

    for (participant_id, series) in &document.timeline.participants {
        let hr_series = decode_rle(&series.hr)?;
        let coins_series = decode_rle(&series.coins_total)?;
        let mut last_active_tick: Option<usize> = None;

        for (idx, value) in hr_series.iter().enumerate() {
            if value.is_some() {
                last_active_tick = Some(idx);
                continue;
            }
            let Some(tick) = last_active_tick.take() else {
                continue;
            };
            let coin_value = coins_series
                .get(tick)
                .and_then(Clone::clone)
                .and_then(|v| match v {
                    SeriesValue::Number(n) => Some(n as u64),
                    _ => None,
                })
                .unwrap_or(0);
            let instant = document.session.start
                + ChronoDuration::seconds((tick as u64 * document.timeline.interval_seconds) as i64);
            events.push(DropoutEvent::new(participant_id, tick as u64, coin_value, instant));
        }
    }

    events.sort_by_key(|e| (e.participant_id.clone(), e.tick));
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn t0() -> Instant {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn sample_document() -> SessionDocument {
        let mut participants = HashMap::new();
        participants.insert(
            "alice".to_string(),
            ParticipantDoc {
                display_name: "Alice".to_string(),
                is_primary: true,
                is_guest: false,
                coins_earned: 9,
                active_seconds: 15,
                zone_time_seconds: HashMap::new(),
                hr_stats: HrStats::default(),
            },
        );
        let mut timeline_participants = HashMap::new();
        timeline_participants.insert(
            "alice".to_string(),
            ParticipantSeriesDoc {
                hr: encode_rle(&vec![
                    Some(SeriesValue::Number(80.0)),
                    Some(SeriesValue::Number(82.0)),
                    Some(SeriesValue::Number(85.0)),
                    None,
                    None,
                    None,
                ]),
                zone: encode_rle(&vec![None; 6]),
                coins_total: encode_rle(&vec![
                    Some(SeriesValue::Number(3.0)),
                    Some(SeriesValue::Number(6.0)),
                    Some(SeriesValue::Number(9.0)),
                    None,
                    None,
                    None,
                ]),
            },
        );
        SessionDocument {
            version: 3,
            session: SessionDoc {
                id: "20260101000000".to_string(),
                date: "2026-01-01".to_string(),
                start: t0(),
                end: None,
                duration_seconds: None,
                timezone: "UTC".to_string(),
            },
            totals: TotalsDoc {
                coins: 9,
                buckets: HashMap::new(),
            },
            participants,
            timeline: TimelineDoc {
                interval_seconds: 5,
                tick_count: 6,
                encoding: "rle".to_string(),
                participants: timeline_participants,
                equipment: HashMap::new(),
                global: HashMap::new(),
            },
            events: None,
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let document = sample_document();
        write_document(dir.path(), &document).await.unwrap();

        let path = document_path(dir.path(), &document.session.id);
        let read_back = read_document(&path).unwrap();
        assert_eq!(read_back.session.id, document.session.id);
        assert_eq!(read_back.totals.coins, 9);
    }

    #[test]
    fn detects_v3_document() {
        let value = serde_json::to_value(sample_document()).unwrap();
        assert!(is_v3_document(&value));
    }

    // S6 — version detect.
    #[test]
    fn s6_legacy_document_without_version_is_not_v3() {
        let value = serde_json::json!({ "sessionId": "abc123" });
        assert!(!is_v3_document(&value));
    }

    #[test]
    fn legacy_document_normalizes_to_v3_shape() {
        let value = serde_json::json!({ "sessionId": "abc123" });
        let normalized = normalize_legacy_document(value).unwrap();
        assert_eq!(normalized.version, 3);
        assert_eq!(normalized.session.id, "abc123");
    }

    // S1 — single HR dropout recovered, reconstructed.
    #[test]
    fn s1_reconstructs_single_dropout() {
        let document = sample_document();
        let events = reconstruct_dropouts(&document).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].participant_id, "alice");
        assert_eq!(events[0].tick, 2);
        assert_eq!(events[0].value, 9);
        assert_eq!(events[0].id, "alice-dropout-2");
    }

    #[test]
    fn leading_nulls_are_not_dropouts() {
        let mut document = sample_document();
        document.timeline.participants.insert(
            "bob".to_string(),
            ParticipantSeriesDoc {
                hr: encode_rle(&vec![None, None, Some(SeriesValue::Number(100.0))]),
                zone: encode_rle(&vec![None; 3]),
                coins_total: encode_rle(&vec![None, None, Some(SeriesValue::Number(3.0))]),
            },
        );
        let events = reconstruct_dropouts(&document).unwrap();
        assert!(events.iter().all(|e| e.participant_id != "bob"));
    }
}
