//! Aggregator (§4.G): per-tick accumulation of coins, zone time, and bucket
//! totals.
//!
//! A pure function over `Participant` plus the session-wide totals, called
//! once per tick per ACTIVE participant by the Coordinator. Kept
//! side-effect-free (no I/O, no locking) so reconstruction (§4.K) can replay
//! the exact same math from a persisted series. A free function rather than
//! a stateful struct, since there is no resource here to own.

use std::collections::HashMap;

use serde::Serialize;

use crate::constants::COIN_DIVISOR;
use crate::model::Participant;

/// Session-wide running totals, mirrored in the persisted document's
/// `totals` block (§6).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionTotals {
    pub coins: u64,
    pub buckets: HashMap<String, u64>,
}

/// Applies one tick of accumulation for an ACTIVE participant with heart
/// rate `hr`, already classified into `zone_id`.
///
/// - `coinDelta = round(hr / 30)`, added to the participant's and session's
///   coin totals, and to the bucket `zone_bucket_map` maps `zone_id` to (if any).
/// - `zoneTimeSeconds[zone_id] += interval_seconds`.
/// - `hrStats` folds in `hr` (ACTIVE-only, per [`crate::model::HrStats`]).
pub fn apply_tick(
    participant: &mut Participant,
    hr: u32,
    zone_id: &str,
    interval_seconds: u64,
    zone_bucket_map: &HashMap<String, String>,
    totals: &mut SessionTotals,
) {
    let coin_delta = (f64::from(hr) / COIN_DIVISOR).round() as u64;

    participant.coins_earned += coin_delta;
    totals.coins += coin_delta;

    if let Some(bucket) = zone_bucket_map.get(zone_id) {
        *totals.buckets.entry(bucket.clone()).or_insert(0) += coin_delta;
    }

    *participant
        .zone_time_seconds
        .entry(zone_id.to_string())
        .or_insert(0) += interval_seconds;

    participant.hr_stats.fold(hr);
    participant.active_seconds += interval_seconds;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParticipantStatus;

    fn participant() -> Participant {
        let mut p = Participant::new("alice", "Alice", 0);
        p.status = ParticipantStatus::Active;
        p
    }

    #[test]
    fn coin_delta_rounds_hr_over_thirty() {
        let mut totals = SessionTotals::default();
        let mut p = participant();
        apply_tick(&mut p, 100, "a", 5, &HashMap::new(), &mut totals);
        // round(100/30) == round(3.333) == 3
        assert_eq!(p.coins_earned, 3);
        assert_eq!(totals.coins, 3);
    }

    // S4 — two-participant session, 3 ticks.
    #[test]
    fn s4_two_participant_three_ticks() {
        let mut totals = SessionTotals::default();
        let mut alice = Participant::new("alice", "Alice", 0);
        alice.status = ParticipantStatus::Active;
        let mut bob = Participant::new("bob", "Bob", 0);
        bob.status = ParticipantStatus::Active;

        for _ in 0..3 {
            apply_tick(&mut alice, 100, "a", 5, &HashMap::new(), &mut totals);
            apply_tick(&mut bob, 130, "w", 5, &HashMap::new(), &mut totals);
        }

        assert_eq!(totals.coins, 3 * 3 + 3 * 4);
        assert_eq!(*alice.zone_time_seconds.get("a").unwrap(), 15);
        assert_eq!(*bob.zone_time_seconds.get("w").unwrap(), 15);
    }

    #[test]
    fn bucket_total_accumulates_from_zone_bucket_map() {
        let mut totals = SessionTotals::default();
        let mut p = participant();
        let mut map = HashMap::new();
        map.insert("a".to_string(), "exercise".to_string());
        apply_tick(&mut p, 100, "a", 5, &map, &mut totals);
        assert_eq!(*totals.buckets.get("exercise").unwrap(), 3);
    }

    #[test]
    fn unmapped_zone_does_not_create_bucket_entry() {
        let mut totals = SessionTotals::default();
        let mut p = participant();
        apply_tick(&mut p, 100, "a", 5, &HashMap::new(), &mut totals);
        assert!(totals.buckets.is_empty());
    }

    #[test]
    fn hr_stats_only_folds_from_aggregator_call() {
        let mut totals = SessionTotals::default();
        let mut p = participant();
        apply_tick(&mut p, 80, "c", 5, &HashMap::new(), &mut totals);
        apply_tick(&mut p, 120, "h", 5, &HashMap::new(), &mut totals);
        assert_eq!(p.hr_stats.min, Some(80));
        assert_eq!(p.hr_stats.max, Some(120));
    }
}
