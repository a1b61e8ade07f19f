//! Device Roster (§4.B).
//!
//! Maps `deviceId -> userId` (from configuration plus session overrides),
//! tracks last-seen instants, and reports liveness. Uses `DashMap` for
//! fine-grained per-key concurrent access, with `lastSeenInstant` updated
//! via an atomic compare-and-set discipline per device.

use dashmap::DashMap;

use crate::constants::DEVICE_LIVENESS_SECS;
use crate::model::{Device, DeviceKind, Instant, UserRole};

/// An assignment of a device to a user, with the role used to break ties.
#[derive(Debug, Clone)]
struct Assignment {
    user_id: String,
    role: UserRole,
}

/// Thread-safe device registry. Devices are declared in session config or
/// discovered live (first sample from an unassigned device creates an entry
/// with no owner, which `ingest` treats as `UnknownDevice`).
#[derive(Debug, Default)]
pub struct DeviceRoster {
    devices: DashMap<String, Device>,
    assignments: DashMap<String, Assignment>,
}

impl DeviceRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `deviceId` to `userId`. Tie-break for duplicate assignments:
    /// primary users win over secondary; first-come-first-served within a
    /// tier (a later assignment of the same role is ignored).
    pub fn assign(&self, device_id: &str, user_id: &str, role: UserRole) {
        let should_replace = match self.assignments.get(device_id) {
            None => true,
            Some(existing) => role > existing.role,
        };
        if should_replace {
            self.assignments.insert(
                device_id.to_string(),
                Assignment {
                    user_id: user_id.to_string(),
                    role,
                },
            );
        }
        self.devices
            .entry(device_id.to_string())
            .and_modify(|d| d.owner_user_id = Some(user_id.to_string()))
            .or_insert_with(|| {
                let mut d = Device::new(device_id, DeviceKind::HeartRate);
                d.owner_user_id = Some(user_id.to_string());
                d
            });
    }

    /// Registers a device's kind without assigning an owner (discovery path).
    pub fn declare(&self, device_id: &str, kind: DeviceKind) {
        self.devices
            .entry(device_id.to_string())
            .or_insert_with(|| Device::new(device_id, kind));
    }

    /// Sets a device's display color (from `ant_devices.hr`/`ant_devices.cadence`
    /// configuration), creating the device entry if it hasn't been seen yet.
    pub fn set_color(&self, device_id: &str, kind: DeviceKind, color: impl Into<String>) {
        self.devices
            .entry(device_id.to_string())
            .or_insert_with(|| Device::new(device_id, kind))
            .color = Some(color.into());
    }

    #[must_use]
    pub fn lookup(&self, device_id: &str) -> Option<Device> {
        self.devices.get(device_id).map(|r| r.value().clone())
    }

    /// Returns the user id owning `device_id`, if assigned.
    #[must_use]
    pub fn owner_of(&self, device_id: &str) -> Option<String> {
        self.assignments.get(device_id).map(|a| a.user_id.clone())
    }

    /// Updates `lastSeenInstant` for a device. Uses `entry` for an atomic
    /// read-modify-write per device, matching the compare-and-set discipline
    /// named in §5 ("Shared Resources").
    pub fn mark_seen(&self, device_id: &str, instant: Instant) {
        self.devices.entry(device_id.to_string()).and_modify(|d| {
            let should_update = match d.last_seen_instant {
                Some(prev) => instant > prev,
                None => true,
            };
            if should_update {
                d.last_seen_instant = Some(instant);
            }
        });
    }

    /// A device is active iff `now - lastSeenInstant < 5s`.
    #[must_use]
    pub fn is_active(&self, device_id: &str, now: Instant) -> bool {
        self.devices
            .get(device_id)
            .and_then(|d| d.last_seen_instant)
            .is_some_and(|last| (now - last).num_seconds() < DEVICE_LIVENESS_SECS)
    }

    #[must_use]
    pub fn get_active(&self, now: Instant) -> Vec<Device> {
        self.devices
            .iter()
            .filter(|r| {
                r.value()
                    .last_seen_instant
                    .is_some_and(|last| (now - last).num_seconds() < DEVICE_LIVENESS_SECS)
            })
            .map(|r| r.value().clone())
            .collect()
    }

    #[must_use]
    pub fn all(&self) -> Vec<Device> {
        self.devices.iter().map(|r| r.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn primary_wins_over_secondary_assignment() {
        let roster = DeviceRoster::new();
        roster.assign("hr1", "bob", UserRole::Secondary);
        roster.assign("hr1", "alice", UserRole::Primary);
        assert_eq!(roster.owner_of("hr1"), Some("alice".to_string()));
    }

    #[test]
    fn first_come_first_served_within_tier() {
        let roster = DeviceRoster::new();
        roster.assign("hr1", "alice", UserRole::Primary);
        roster.assign("hr1", "bob", UserRole::Primary);
        assert_eq!(roster.owner_of("hr1"), Some("alice".to_string()));
    }

    #[test]
    fn secondary_cannot_displace_primary() {
        let roster = DeviceRoster::new();
        roster.assign("hr1", "alice", UserRole::Primary);
        roster.assign("hr1", "bob", UserRole::Secondary);
        assert_eq!(roster.owner_of("hr1"), Some("alice".to_string()));
    }

    #[test]
    fn liveness_respects_five_second_window() {
        let roster = DeviceRoster::new();
        let now = Utc::now();
        roster.mark_seen("hr1", now - Duration::seconds(3));
        assert!(roster.is_active("hr1", now));

        roster.mark_seen("hr2", now - Duration::seconds(6));
        assert!(!roster.is_active("hr2", now));
    }

    #[test]
    fn mark_seen_does_not_go_backwards() {
        let roster = DeviceRoster::new();
        let now = Utc::now();
        roster.mark_seen("hr1", now);
        roster.mark_seen("hr1", now - Duration::seconds(10));
        let device = roster.lookup("hr1").unwrap();
        assert_eq!(device.last_seen_instant, Some(now));
    }

    #[test]
    fn lookup_unknown_device_is_none() {
        let roster = DeviceRoster::new();
        assert!(roster.lookup("unknown").is_none());
    }

    #[test]
    fn set_color_creates_device_entry() {
        let roster = DeviceRoster::new();
        roster.set_color("hr1", DeviceKind::HeartRate, "#ff0000");
        assert_eq!(roster.lookup("hr1").unwrap().color, Some("#ff0000".to_string()));
    }
}
