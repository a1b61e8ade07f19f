//! Event emitter abstraction for decoupling components from transport.
//!
//! Components depend on the [`EventEmitter`] trait rather than a concrete
//! broadcast channel, enabling testing and alternative transports.

use super::{DropoutEvent, GovernanceEvent, LifecycleEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a session lifecycle transition.
    fn emit_lifecycle(&self, event: LifecycleEvent);

    /// Emits a participant dropout.
    fn emit_dropout(&self, event: DropoutEvent);

    /// Emits a governance state change.
    fn emit_governance(&self, event: GovernanceEvent);
}

/// No-op emitter for testing or a headless run with no subscribers.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_lifecycle(&self, _event: LifecycleEvent) {}
    fn emit_dropout(&self, _event: DropoutEvent) {}
    fn emit_governance(&self, _event: GovernanceEvent) {}
}

/// Logging emitter for debugging and development.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_lifecycle(&self, event: LifecycleEvent) {
        tracing::debug!(?event, "lifecycle_event");
    }

    fn emit_dropout(&self, event: DropoutEvent) {
        tracing::debug!(?event, "dropout_event");
    }

    fn emit_governance(&self, event: GovernanceEvent) {
        tracing::debug!(?event, "governance_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Instant;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn t0() -> Instant {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    struct CountingEventEmitter {
        lifecycle_count: AtomicUsize,
        dropout_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                lifecycle_count: AtomicUsize::new(0),
                dropout_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_lifecycle(&self, _event: LifecycleEvent) {
            self.lifecycle_count.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_dropout(&self, _event: DropoutEvent) {
            self.dropout_count.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_governance(&self, _event: GovernanceEvent) {}
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter::new());

        emitter.emit_lifecycle(LifecycleEvent::Started {
            session_id: "20260101000000".to_string(),
            instant: t0(),
        });
        emitter.emit_lifecycle(LifecycleEvent::Ended { instant: t0() });
        emitter.emit_dropout(DropoutEvent::new("alice", 2, 9, t0()));

        assert_eq!(emitter.lifecycle_count.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.dropout_count.load(Ordering::SeqCst), 1);
    }
}
