//! Timeline Store (§4.E): per-(participant, metric) dense series aligned to
//! the timebase, with run-length encoding for persistence.
//!
//! A `DashMap`-keyed index over a composite key, with entry-level mutation
//! rather than a single coarse lock. Series are mutated exclusively from
//! the Coordinator's single-writer task (§5), so no secondary index is
//! needed, just `DashMap::entry` for per-key append.

use dashmap::DashMap;
use serde_json::{Number, Value};

use crate::constants::RLE_NULL_SENTINEL;
use crate::error::{CoreError, CoreResult};
use crate::model::{Series, SeriesValue};

/// Composite key identifying one dense series: a subject (participant id,
/// device id, or `"global"`) and a metric name.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct SeriesKey {
    pub subject_id: String,
    pub metric: String,
}

impl SeriesKey {
    #[must_use]
    pub fn new(subject_id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            metric: metric.into(),
        }
    }
}

/// How a second write within the same tick combines with the first.
#[derive(Debug, Clone, Copy)]
pub enum CombineRule {
    /// The later write replaces the earlier one (numeric metrics).
    LastWriteWins,
    /// The two boolean values are OR'd together (vibration pulses).
    LogicalOr,
}

/// Indexed storage for dense, tick-aligned series.
pub struct TimelineStore {
    series: DashMap<SeriesKey, Series>,
}

impl TimelineStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            series: DashMap::new(),
        }
    }

    /// Writes `value` into `series[key][tick_index]`, extending the series
    /// with `null` as needed. A second write to the same tick combines with
    /// the first per `rule`.
    pub fn record(
        &self,
        subject_id: &str,
        metric: &str,
        tick_index: u64,
        value: SeriesValue,
        rule: CombineRule,
    ) {
        let key = SeriesKey::new(subject_id, metric);
        let idx = tick_index as usize;
        let mut entry = self.series.entry(key).or_default();
        if entry.len() <= idx {
            entry.resize(idx + 1, None);
        }
        entry[idx] = Some(combine(entry[idx].take(), value, rule));
    }

    /// For every series already known to the store, pads it to length
    /// `tick_index + 1` with `null` where no sample landed this tick.
    /// New (subject, metric) pairs are not created here — only `record`
    /// introduces a series.
    pub fn finalize_tick(&self, tick_index: u64) {
        let target_len = tick_index as usize + 1;
        for mut entry in self.series.iter_mut() {
            if entry.len() < target_len {
                entry.resize(target_len, None);
            }
        }
    }

    /// A stable copy of one series.
    #[must_use]
    pub fn snapshot(&self, subject_id: &str, metric: &str) -> Series {
        self.series
            .get(&SeriesKey::new(subject_id, metric))
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// All (key, length) pairs currently tracked; used by Persistence to
    /// enumerate what to write without cloning every series up front.
    #[must_use]
    pub fn keys(&self) -> Vec<SeriesKey> {
        self.series.iter().map(|r| r.key().clone()).collect()
    }
}

impl Default for TimelineStore {
    fn default() -> Self {
        Self::new()
    }
}

fn combine(existing: Option<SeriesValue>, incoming: SeriesValue, rule: CombineRule) -> SeriesValue {
    match (existing, rule) {
        (Some(SeriesValue::Bool(prev)), CombineRule::LogicalOr) => {
            let next = incoming.eq(&SeriesValue::Bool(true)) || prev;
            SeriesValue::Bool(next)
        }
        _ => incoming,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run-length encoding (§4.E, §6)
// ─────────────────────────────────────────────────────────────────────────────

/// Encodes a dense series as a JSON array of `[value, runLength]` pairs.
/// `null` is encoded as the sentinel string `"~"`. Sequential equal values
/// collapse into a single run.
#[must_use]
pub fn encode_rle(series: &Series) -> String {
    let mut runs: Vec<(Value, u64)> = Vec::new();
    for item in series {
        let v = to_json(item);
        match runs.last_mut() {
            Some((last, count)) if *last == v => *count += 1,
            _ => runs.push((v, 1)),
        }
    }
    let array: Vec<Value> = runs
        .into_iter()
        .map(|(v, count)| Value::Array(vec![v, Value::Number(Number::from(count))]))
        .collect();
    Value::Array(array).to_string()
}

/// Inverse of [`encode_rle`].
pub fn decode_rle(rle: &str) -> CoreResult<Series> {
    let parsed: Value = serde_json::from_str(rle)
        .map_err(|e| CoreError::InvalidDocument(format!("invalid RLE json: {e}")))?;
    let pairs = parsed
        .as_array()
        .ok_or_else(|| CoreError::InvalidDocument("RLE root must be an array".to_string()))?;

    let mut series = Series::new();
    for pair in pairs {
        let pair = pair
            .as_array()
            .ok_or_else(|| CoreError::InvalidDocument("RLE entry must be a pair".to_string()))?;
        let (value, run) = match pair.as_slice() {
            [v, n] => (v, n),
            _ => {
                return Err(CoreError::InvalidDocument(
                    "RLE entry must have exactly 2 elements".to_string(),
                ))
            }
        };
        let run = run
            .as_u64()
            .ok_or_else(|| CoreError::InvalidDocument("RLE run length must be an integer".to_string()))?;
        let decoded = from_json(value)?;
        series.extend(std::iter::repeat(decoded).take(run as usize));
    }
    Ok(series)
}

fn to_json(value: &Option<SeriesValue>) -> Value {
    match value {
        None => Value::String(RLE_NULL_SENTINEL.to_string()),
        Some(SeriesValue::Bool(b)) => Value::Bool(*b),
        Some(SeriesValue::Categorical(s)) => Value::String(s.clone()),
        Some(SeriesValue::Number(n)) => numeric_json(*n),
    }
}

fn numeric_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < (1i64 << 53) as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn from_json(value: &Value) -> CoreResult<Option<SeriesValue>> {
    match value {
        Value::String(s) if s == RLE_NULL_SENTINEL => Ok(None),
        Value::String(s) => Ok(Some(SeriesValue::Categorical(s.clone()))),
        Value::Bool(b) => Ok(Some(SeriesValue::Bool(*b))),
        Value::Number(n) => n
            .as_f64()
            .map(|f| Some(SeriesValue::Number(f)))
            .ok_or_else(|| CoreError::InvalidDocument("non-finite RLE number".to_string())),
        other => Err(CoreError::InvalidDocument(format!(
            "unsupported RLE value: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: f64) -> Option<SeriesValue> {
        Some(SeriesValue::Number(v))
    }

    // S2 — RLE round-trip.
    #[test]
    fn s2_rle_round_trip() {
        let series: Series = vec![n(120.0), n(120.0), n(120.0), None, None, n(130.0), n(130.0)];
        let encoded = encode_rle(&series);
        assert_eq!(encoded, r#"[[120,3],["~",2],[130,2]]"#);
        let decoded = decode_rle(&encoded).unwrap();
        assert_eq!(decoded, series);
    }

    #[test]
    fn decode_then_encode_is_stable_for_categorical() {
        let rle = r#"[["c",2],["a",1]]"#;
        let decoded = decode_rle(rle).unwrap();
        assert_eq!(encode_rle(&decoded), rle);
    }

    #[test]
    fn record_pads_with_null_to_reach_index() {
        let store = TimelineStore::new();
        store.record("alice", "heart_rate", 2, SeriesValue::Number(100.0), CombineRule::LastWriteWins);
        let snap = store.snapshot("alice", "heart_rate");
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0], None);
        assert_eq!(snap[2], Some(SeriesValue::Number(100.0)));
    }

    #[test]
    fn record_last_write_wins_for_numeric() {
        let store = TimelineStore::new();
        store.record("alice", "heart_rate", 0, SeriesValue::Number(100.0), CombineRule::LastWriteWins);
        store.record("alice", "heart_rate", 0, SeriesValue::Number(105.0), CombineRule::LastWriteWins);
        assert_eq!(store.snapshot("alice", "heart_rate")[0], Some(SeriesValue::Number(105.0)));
    }

    #[test]
    fn record_logical_or_for_vibration() {
        let store = TimelineStore::new();
        store.record("rower", "vibration", 0, SeriesValue::Bool(true), CombineRule::LogicalOr);
        store.record("rower", "vibration", 0, SeriesValue::Bool(false), CombineRule::LogicalOr);
        assert_eq!(store.snapshot("rower", "vibration")[0], Some(SeriesValue::Bool(true)));
    }

    #[test]
    fn finalize_tick_fills_gap_for_known_series() {
        let store = TimelineStore::new();
        store.record("alice", "heart_rate", 0, SeriesValue::Number(100.0), CombineRule::LastWriteWins);
        store.finalize_tick(1);
        let snap = store.snapshot("alice", "heart_rate");
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[1], None);
    }

    #[test]
    fn finalize_tick_is_noop_for_unknown_series() {
        let store = TimelineStore::new();
        store.finalize_tick(5);
        assert!(store.keys().is_empty());
    }
}
