//! Participant State Machine (§4.F).
//!
//! Drives ABSENT → ACTIVE → IDLE → REMOVED transitions. Sample arrival
//! transitions (ABSENT/IDLE → ACTIVE) are edge-triggered on ingest; the
//! idle/removal timeouts are evaluated once per tick by the Coordinator.
//! Uses the same `DashMap`-per-key runtime state pattern as the Device
//! Roster: one entry per participant, updated in place as ticks arrive.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::model::{dropout_id, Instant, ParticipantStatus};

struct ParticipantRuntime {
    status: ParticipantStatus,
    first_seen_tick: u64,
    last_sample_tick: Option<u64>,
    last_active_instant: Option<Instant>,
    /// Dropout ids already emitted for this participant, so a repeated
    /// tick sweep (or a document reconstruction re-walk) cannot double-count.
    emitted_dropout_ids: HashSet<String>,
}

impl ParticipantRuntime {
    fn new(tick_index: u64) -> Self {
        Self {
            status: ParticipantStatus::Absent,
            first_seen_tick: tick_index,
            last_sample_tick: None,
            last_active_instant: None,
            emitted_dropout_ids: HashSet::new(),
        }
    }
}

/// Result of feeding a sample arrival through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    BecameActive,
    Reactivated,
    /// Already ACTIVE; the sample only refreshes liveness.
    StillActive,
    /// REMOVED is terminal and resurrection is disabled; sample dropped.
    Ignored,
    /// REMOVED participant re-entering with `resurrect_removed_participants` enabled.
    Resurrected,
}

/// Result of the per-tick idle/removal sweep for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    BecameIdle { last_active_tick: u64, dropout_id: String },
    Removed,
    NoChange,
}

/// Tracks state machine runtime for every participant in the session.
pub struct ParticipantTable {
    runtimes: DashMap<String, ParticipantRuntime>,
}

impl ParticipantTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            runtimes: DashMap::new(),
        }
    }

    #[must_use]
    pub fn status_of(&self, user_id: &str) -> Option<ParticipantStatus> {
        self.runtimes.get(user_id).map(|r| r.status)
    }

    #[must_use]
    pub fn first_seen_tick(&self, user_id: &str) -> Option<u64> {
        self.runtimes.get(user_id).map(|r| r.first_seen_tick)
    }

    #[must_use]
    pub fn is_known(&self, user_id: &str) -> bool {
        self.runtimes.contains_key(user_id)
    }

    #[must_use]
    pub fn active_participant_ids(&self) -> Vec<String> {
        self.runtimes
            .iter()
            .filter(|r| r.value().status == ParticipantStatus::Active)
            .map(|r| r.key().clone())
            .collect()
    }

    /// Feeds a sample arrival for `user_id` at `tick_index`/`instant` through
    /// the state machine. Fails with [`SampleOutcome::Ignored`] (not fatal)
    /// when the participant is REMOVED and resurrection is disabled.
    pub fn ingest_sample(
        &self,
        user_id: &str,
        tick_index: u64,
        instant: Instant,
        resurrect_removed: bool,
    ) -> SampleOutcome {
        let mut entry = self
            .runtimes
            .entry(user_id.to_string())
            .or_insert_with(|| ParticipantRuntime::new(tick_index));

        let outcome = match entry.status {
            ParticipantStatus::Removed if resurrect_removed => {
                entry.status = ParticipantStatus::Active;
                SampleOutcome::Resurrected
            }
            ParticipantStatus::Removed => return SampleOutcome::Ignored,
            ParticipantStatus::Absent => {
                entry.status = ParticipantStatus::Active;
                entry.first_seen_tick = tick_index;
                SampleOutcome::BecameActive
            }
            ParticipantStatus::Idle => {
                entry.status = ParticipantStatus::Active;
                SampleOutcome::Reactivated
            }
            ParticipantStatus::Active => SampleOutcome::StillActive,
        };

        entry.last_sample_tick = Some(tick_index);
        entry.last_active_instant = Some(instant);
        outcome
    }

    /// Evaluates the idle and removal timeouts for `user_id` at tick
    /// `tick_index`/`tick_instant`. No-op for unknown or REMOVED participants.
    pub fn advance_tick(
        &self,
        user_id: &str,
        tick_index: u64,
        tick_instant: Instant,
        idle_threshold_ticks: u64,
        removal_timeout_ms: i64,
    ) -> TickOutcome {
        let Some(mut entry) = self.runtimes.get_mut(user_id) else {
            return TickOutcome::NoChange;
        };
        if entry.status == ParticipantStatus::Removed {
            return TickOutcome::NoChange;
        }

        if entry.status == ParticipantStatus::Active {
            if let Some(last_sample_tick) = entry.last_sample_tick {
                let ticks_since = tick_index.saturating_sub(last_sample_tick);
                if ticks_since >= idle_threshold_ticks {
                    entry.status = ParticipantStatus::Idle;
                    let last_active_tick = tick_index.saturating_sub(idle_threshold_ticks);
                    let id = dropout_id(user_id, last_active_tick);
                    if entry.emitted_dropout_ids.insert(id.clone()) {
                        return TickOutcome::BecameIdle {
                            last_active_tick,
                            dropout_id: id,
                        };
                    }
                    return TickOutcome::NoChange;
                }
            }
        }

        if matches!(
            entry.status,
            ParticipantStatus::Active | ParticipantStatus::Idle
        ) {
            if let Some(last_active) = entry.last_active_instant {
                if (tick_instant - last_active).num_milliseconds() > removal_timeout_ms {
                    entry.status = ParticipantStatus::Removed;
                    return TickOutcome::Removed;
                }
            }
        }

        TickOutcome::NoChange
    }
}

impl Default for ParticipantTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn t0() -> Instant {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn absent_becomes_active_on_first_sample() {
        let table = ParticipantTable::new();
        let outcome = table.ingest_sample("alice", 0, t0(), false);
        assert_eq!(outcome, SampleOutcome::BecameActive);
        assert_eq!(table.status_of("alice"), Some(ParticipantStatus::Active));
    }

    // S1 — single HR dropout recovered: idle after 2 missed ticks (10s at 5s interval).
    #[test]
    fn s1_active_to_idle_after_idle_threshold() {
        let table = ParticipantTable::new();
        table.ingest_sample("alice", 0, t0(), false);

        let outcome = table.advance_tick("alice", 2, t0() + Duration::seconds(10), 2, 120_000);
        match outcome {
            TickOutcome::BecameIdle { last_active_tick, .. } => assert_eq!(last_active_tick, 0),
            other => panic!("expected BecameIdle, got {other:?}"),
        }
        assert_eq!(table.status_of("alice"), Some(ParticipantStatus::Idle));
    }

    #[test]
    fn idle_becomes_active_on_any_sample() {
        let table = ParticipantTable::new();
        table.ingest_sample("alice", 0, t0(), false);
        table.advance_tick("alice", 2, t0() + Duration::seconds(10), 2, 120_000);
        assert_eq!(table.status_of("alice"), Some(ParticipantStatus::Idle));

        let outcome = table.ingest_sample("alice", 6, t0() + Duration::seconds(30), false);
        assert_eq!(outcome, SampleOutcome::Reactivated);
        assert_eq!(table.status_of("alice"), Some(ParticipantStatus::Active));
    }

    #[test]
    fn removal_after_timeout() {
        let table = ParticipantTable::new();
        table.ingest_sample("alice", 0, t0(), false);
        let outcome = table.advance_tick("alice", 25, t0() + Duration::seconds(125), 2, 120_000);
        assert_eq!(outcome, TickOutcome::Removed);
        assert_eq!(table.status_of("alice"), Some(ParticipantStatus::Removed));
    }

    #[test]
    fn removed_is_terminal_without_resurrection() {
        let table = ParticipantTable::new();
        table.ingest_sample("alice", 0, t0(), false);
        table.advance_tick("alice", 25, t0() + Duration::seconds(125), 2, 120_000);
        let outcome = table.ingest_sample("alice", 30, t0() + Duration::seconds(150), false);
        assert_eq!(outcome, SampleOutcome::Ignored);
        assert_eq!(table.status_of("alice"), Some(ParticipantStatus::Removed));
    }

    #[test]
    fn removed_resurrects_when_configured() {
        let table = ParticipantTable::new();
        table.ingest_sample("alice", 0, t0(), false);
        table.advance_tick("alice", 25, t0() + Duration::seconds(125), 2, 120_000);
        let outcome = table.ingest_sample("alice", 30, t0() + Duration::seconds(150), true);
        assert_eq!(outcome, SampleOutcome::Resurrected);
        assert_eq!(table.status_of("alice"), Some(ParticipantStatus::Active));
    }

    #[test]
    fn dropout_emission_is_idempotent() {
        let table = ParticipantTable::new();
        table.ingest_sample("alice", 0, t0(), false);
        let first = table.advance_tick("alice", 2, t0() + Duration::seconds(10), 2, 120_000);
        assert!(matches!(first, TickOutcome::BecameIdle { .. }));

        // Re-running the same tick sweep (e.g. a retry) must not re-emit.
        let second = table.advance_tick("alice", 2, t0() + Duration::seconds(10), 2, 120_000);
        assert_eq!(second, TickOutcome::NoChange);
    }
}
