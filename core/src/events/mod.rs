//! Discrete session events broadcast to subscribers.
//!
//! Distinct from the coalescing `Snapshot` channel (one latest-value slot
//! per tick, carried separately via `tokio::sync::watch` in
//! `coordinator.rs`): these are point-in-time occurrences a listener should
//! never miss: lifecycle transitions, dropouts, governance changes. Modeled
//! as a category/variant split by event kind.

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::model::{ChallengePhase, DropoutEvent, Instant};

/// Events broadcast to session subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Session lifecycle transitions (§4.J state machine).
    Lifecycle(LifecycleEvent),
    /// A participant dropout, derived by §4.F.
    Dropout(DropoutEvent),
    /// Governance state changes (§4.H).
    Governance(GovernanceEvent),
}

/// Session lifecycle transitions.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LifecycleEvent {
    Started {
        session_id: String,
        instant: Instant,
    },
    Paused {
        instant: Instant,
    },
    Resumed {
        instant: Instant,
    },
    Ended {
        instant: Instant,
    },
    /// Wall-clock skew exceeded the Timebase's catch-up cap.
    Degraded {
        resumed_at_tick: u64,
        instant: Instant,
    },
}

/// Governance state transitions worth notifying subscribers about
/// immediately, rather than waiting for the next coalesced snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GovernanceEvent {
    PauseIntentChanged {
        pause_intent: bool,
        instant: Instant,
    },
    ChallengePhaseChanged {
        challenge_id: String,
        phase: ChallengePhase,
        instant: Instant,
    },
}

impl From<LifecycleEvent> for BroadcastEvent {
    fn from(event: LifecycleEvent) -> Self {
        Self::Lifecycle(event)
    }
}

impl From<DropoutEvent> for BroadcastEvent {
    fn from(event: DropoutEvent) -> Self {
        Self::Dropout(event)
    }
}

impl From<GovernanceEvent> for BroadcastEvent {
    fn from(event: GovernanceEvent) -> Self {
        Self::Governance(event)
    }
}
