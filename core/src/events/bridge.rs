//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between the
//! Coordinator and transport concerns, mapping typed domain events to a
//! `tokio::sync::broadcast` channel that subscribers (UI, logging, an
//! external sink) consume on their own tasks.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, DropoutEvent, GovernanceEvent, LifecycleEvent};

/// Bridges domain events to the broadcast channel.
///
/// Also forwards to an optional external emitter (e.g. a structured logger
/// or metrics sink) that can be set after construction — useful when that
/// handle isn't available until later in bootstrap.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter for additional event delivery.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external
/// emitter (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] no broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_lifecycle, LifecycleEvent, Lifecycle);
    impl_emit!(emit_dropout, DropoutEvent, Dropout);
    impl_emit!(emit_governance, GovernanceEvent, Governance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Instant;
    use chrono::{TimeZone, Utc};

    fn t0() -> Instant {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn subscriber_receives_forwarded_event() {
        let bridge = BroadcastEventBridge::new(16);
        let mut rx = bridge.subscribe();
        bridge.emit_lifecycle(LifecycleEvent::Started {
            session_id: "20260101000000".to_string(),
            instant: t0(),
        });
        let received = rx.try_recv().unwrap();
        assert!(matches!(
            received,
            BroadcastEvent::Lifecycle(LifecycleEvent::Started { .. })
        ));
    }

    #[test]
    fn send_with_no_receivers_does_not_panic() {
        let bridge = BroadcastEventBridge::new(16);
        bridge.emit_dropout(DropoutEvent::new("alice", 2, 9, t0()));
    }
}
