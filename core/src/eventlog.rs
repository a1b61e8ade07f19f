//! Screenshot / Event Log (§4.I).
//!
//! An append-only, instant-ordered list of [`SessionEvent`]s stored within
//! the session document. `ScreenshotTaken` entries are deduplicated on
//! filename; other variants are not (a second `VoiceMemo`/`AudioPlayed` with
//! the same id is a distinct event, not a repeat). A plain
//! `parking_lot::Mutex<Vec<_>>` is enough since ordering, not broadcast, is
//! the only invariant here.

use parking_lot::Mutex;

use crate::model::SessionEvent;

/// Append-only session event log.
pub struct EventLog {
    events: Mutex<Vec<SessionEvent>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Appends `event` unless it is a duplicate `ScreenshotTaken` filename.
    /// Returns `true` if the event was recorded.
    pub fn append(&self, event: SessionEvent) -> bool {
        let mut events = self.events.lock();
        if let Some(key) = event.dedupe_key() {
            if events.iter().any(|e| e.dedupe_key() == Some(key)) {
                return false;
            }
        }
        events.push(event);
        true
    }

    /// A stable, instant-ordered copy of the log, for snapshots and persistence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionEvent> {
        let mut events = self.events.lock().clone();
        events.sort_by_key(SessionEvent::instant);
        events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t(offset_secs: i64) -> crate::model::Instant {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
    }

    #[test]
    fn appends_distinct_events() {
        let log = EventLog::new();
        assert!(log.append(SessionEvent::ScreenshotTaken {
            filename: "a.jpg".to_string(),
            instant: t(0),
            index: 0,
        }));
        assert!(log.append(SessionEvent::ScreenshotTaken {
            filename: "b.jpg".to_string(),
            instant: t(1),
            index: 1,
        }));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn duplicate_screenshot_filename_is_ignored() {
        let log = EventLog::new();
        assert!(log.append(SessionEvent::ScreenshotTaken {
            filename: "a.jpg".to_string(),
            instant: t(0),
            index: 0,
        }));
        assert!(!log.append(SessionEvent::ScreenshotTaken {
            filename: "a.jpg".to_string(),
            instant: t(5),
            index: 1,
        }));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn snapshot_is_ordered_by_instant() {
        let log = EventLog::new();
        log.append(SessionEvent::ScreenshotTaken {
            filename: "later.jpg".to_string(),
            instant: t(10),
            index: 1,
        });
        log.append(SessionEvent::ScreenshotTaken {
            filename: "earlier.jpg".to_string(),
            instant: t(1),
            index: 0,
        });
        let snapshot = log.snapshot();
        assert_eq!(snapshot[0].dedupe_key(), Some("earlier.jpg"));
        assert_eq!(snapshot[1].dedupe_key(), Some("later.jpg"));
    }
}
