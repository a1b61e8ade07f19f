//! Governance Engine (§4.H).
//!
//! Evaluates `require_zone_at_least` and `challenge` policies every tick and
//! publishes `pauseIntent`/`challenge` state. Never writes to the Timeline —
//! it only reads zone rank and an externally-computed metric progress value,
//! keeping it decoupled from how those are derived (grounded in the
//! teacher's `services/sync_group_manager.rs` pattern of a policy engine
//! that observes state and republishes a derived verdict without owning the
//! underlying resource).

use std::collections::HashMap;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;

use crate::config::PolicyConfig;
use crate::model::{Challenge, ChallengePhase, GovernanceState, Instant};

/// One primary-participant's zone rank as of the current tick (0 = highest
/// zone). Non-primary participants are exempt from `require_zone_at_least`.
pub struct ParticipantZoneRank {
    pub user_id: String,
    pub is_primary: bool,
    pub rank: usize,
}

/// Stateful evaluator: remembers, per (policy, participant), the instant a
/// participant first fell below a `require_zone_at_least` threshold, so the
/// grace period can be measured across ticks.
pub struct GovernanceEngine {
    policies: Vec<PolicyConfig>,
    below_since: DashMap<(usize, String), Instant>,
}

impl GovernanceEngine {
    #[must_use]
    pub fn new(policies: Vec<PolicyConfig>) -> Self {
        Self {
            policies,
            below_since: DashMap::new(),
        }
    }

    /// Evaluates every configured policy for the current tick and updates
    /// `state` in place.
    ///
    /// - `participants`: current zone rank for every primary participant.
    /// - `target_rank_of(user_id, zone_id)`: resolves a threshold zone's rank
    ///   within the table that classified `user_id` (participants may use
    ///   different per-user tables).
    /// - `metric_progress(metric)`: current value of a named aggregate
    ///   (e.g. `"coins"`), used by `challenge` policies.
    pub fn evaluate_tick(
        &self,
        now: Instant,
        session_start: Instant,
        participants: &[ParticipantZoneRank],
        target_rank_of: impl Fn(&str, &str) -> Option<usize>,
        metric_progress: impl Fn(&str) -> f64,
        state: &mut GovernanceState,
    ) {
        let mut pause_intent = false;

        for (idx, policy) in self.policies.iter().enumerate() {
            match policy {
                PolicyConfig::RequireZoneAtLeast {
                    zone_id,
                    grace_seconds,
                } => {
                    for p in participants {
                        if !p.is_primary {
                            continue;
                        }
                        let Some(target_rank) = target_rank_of(&p.user_id, zone_id) else {
                            continue;
                        };
                        let key = (idx, p.user_id.clone());
                        if p.rank > target_rank {
                            let since = *self.below_since.entry(key).or_insert(now);
                            if (now - since).num_seconds() > *grace_seconds as i64 {
                                pause_intent = true;
                            }
                        } else {
                            self.below_since.remove(&key);
                        }
                    }
                }
                PolicyConfig::Challenge {
                    id,
                    metric,
                    target,
                    duration_seconds,
                } => {
                    if let Some(existing) = &state.challenge {
                        if existing.id == *id && existing.phase.is_terminal() {
                            continue;
                        }
                    }
                    let progress = metric_progress(metric);
                    let deadline = session_start + ChronoDuration::seconds(*duration_seconds as i64);
                    let phase = if progress >= *target {
                        ChallengePhase::Won
                    } else if now >= deadline {
                        ChallengePhase::Failed
                    } else {
                        ChallengePhase::Running
                    };
                    state.challenge = Some(Challenge {
                        id: id.clone(),
                        phase,
                        deadline,
                        target: *target,
                        progress,
                    });
                }
            }
        }

        state.pause_intent = pause_intent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t0() -> Instant {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    // S3 zone ranks: f=0, h=1, w=2, a=3, c=4.
    fn rank_of(_user: &str, zone_id: &str) -> Option<usize> {
        match zone_id {
            "f" => Some(0),
            "h" => Some(1),
            "w" => Some(2),
            "a" => Some(3),
            "c" => Some(4),
            _ => None,
        }
    }

    // S5 — require_zone_at_least("a"), grace 10s.
    #[test]
    fn s5_pause_intent_after_grace_then_clears() {
        let engine = GovernanceEngine::new(vec![PolicyConfig::RequireZoneAtLeast {
            zone_id: "a".to_string(),
            grace_seconds: 10,
        }]);
        let mut state = GovernanceState::default();

        // Ticks at t=0,4,8,12 — alice stays in zone "c" (rank 4, below "a"'s rank 3).
        for t in [0, 4, 8] {
            engine.evaluate_tick(
                t0() + ChronoDuration::seconds(t),
                t0(),
                &[ParticipantZoneRank {
                    user_id: "alice".to_string(),
                    is_primary: true,
                    rank: 4,
                }],
                rank_of,
                |_| 0.0,
                &mut state,
            );
            assert!(!state.pause_intent, "should not pause before grace elapses (t={t})");
        }

        engine.evaluate_tick(
            t0() + ChronoDuration::seconds(12),
            t0(),
            &[ParticipantZoneRank {
                user_id: "alice".to_string(),
                is_primary: true,
                rank: 4,
            }],
            rank_of,
            |_| 0.0,
            &mut state,
        );
        assert!(state.pause_intent, "pause should trigger once below grace_seconds elapses");

        // Alice's HR rises into zone "a" (rank 3) on the next tick — no longer below.
        engine.evaluate_tick(
            t0() + ChronoDuration::seconds(16),
            t0(),
            &[ParticipantZoneRank {
                user_id: "alice".to_string(),
                is_primary: true,
                rank: 3,
            }],
            rank_of,
            |_| 0.0,
            &mut state,
        );
        assert!(!state.pause_intent);
    }

    #[test]
    fn non_primary_participants_are_exempt() {
        let engine = GovernanceEngine::new(vec![PolicyConfig::RequireZoneAtLeast {
            zone_id: "a".to_string(),
            grace_seconds: 0,
        }]);
        let mut state = GovernanceState::default();
        engine.evaluate_tick(
            t0() + ChronoDuration::seconds(100),
            t0(),
            &[ParticipantZoneRank {
                user_id: "guest".to_string(),
                is_primary: false,
                rank: 4,
            }],
            rank_of,
            |_| 0.0,
            &mut state,
        );
        assert!(!state.pause_intent);
    }

    #[test]
    fn union_of_multiple_policies_triggers_pause() {
        let engine = GovernanceEngine::new(vec![
            PolicyConfig::RequireZoneAtLeast {
                zone_id: "f".to_string(),
                grace_seconds: 0,
            },
            PolicyConfig::RequireZoneAtLeast {
                zone_id: "h".to_string(),
                grace_seconds: 0,
            },
        ]);
        let mut state = GovernanceState::default();
        // alice satisfies the first policy's threshold but not the second's.
        engine.evaluate_tick(
            t0() + ChronoDuration::seconds(1),
            t0(),
            &[ParticipantZoneRank {
                user_id: "alice".to_string(),
                is_primary: true,
                rank: 2, // below both "f" (rank 0) and "h" (rank 1)
            }],
            rank_of,
            |_| 0.0,
            &mut state,
        );
        assert!(state.pause_intent);
    }

    #[test]
    fn challenge_reaches_won_and_then_freezes() {
        let engine = GovernanceEngine::new(vec![PolicyConfig::Challenge {
            id: "c1".to_string(),
            metric: "coins".to_string(),
            target: 10.0,
            duration_seconds: 60,
        }]);
        let mut state = GovernanceState::default();

        engine.evaluate_tick(t0(), t0(), &[], rank_of, |_| 5.0, &mut state);
        assert_eq!(state.challenge.as_ref().unwrap().phase, ChallengePhase::Running);

        engine.evaluate_tick(
            t0() + ChronoDuration::seconds(10),
            t0(),
            &[],
            rank_of,
            |_| 12.0,
            &mut state,
        );
        assert_eq!(state.challenge.as_ref().unwrap().phase, ChallengePhase::Won);

        // Progress regressing afterward must not un-freeze the challenge.
        engine.evaluate_tick(
            t0() + ChronoDuration::seconds(20),
            t0(),
            &[],
            rank_of,
            |_| 2.0,
            &mut state,
        );
        assert_eq!(state.challenge.as_ref().unwrap().phase, ChallengePhase::Won);
        assert_eq!(state.challenge.as_ref().unwrap().progress, 12.0);
    }

    #[test]
    fn challenge_fails_at_deadline_without_reaching_target() {
        let engine = GovernanceEngine::new(vec![PolicyConfig::Challenge {
            id: "c1".to_string(),
            metric: "coins".to_string(),
            target: 100.0,
            duration_seconds: 10,
        }]);
        let mut state = GovernanceState::default();
        engine.evaluate_tick(
            t0() + ChronoDuration::seconds(11),
            t0(),
            &[],
            rank_of,
            |_| 5.0,
            &mut state,
        );
        assert_eq!(state.challenge.as_ref().unwrap().phase, ChallengePhase::Failed);
    }
}
