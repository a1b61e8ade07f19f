//! Zone Classifier (§4.C).
//!
//! Classifies a heart rate into a user's configured zone table, falling back
//! to a `"default"` table when the user has no override. Grounded in the
//! teacher's small, single-purpose service modules (`services/volume.rs`):
//! one struct, a constructor that validates its input, a couple of pure
//! lookup methods.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::model::{Zone, ZoneConfig};

/// A validated, per-user zone classifier.
///
/// Construction fails only on an empty zone table (`UnknownZone`, fatal at
/// Classifier startup per §4.C); `Config::validate` additionally checks that
/// every table is strictly increasing, so by the time a `ZoneTable` is built
/// from a validated `Config` this should never happen in practice.
#[derive(Debug, Clone)]
pub struct ZoneTable {
    /// Zones sorted by descending `min`, so `classify` can scan top-down and
    /// return on the first match.
    descending: Vec<Zone>,
}

impl ZoneTable {
    pub fn new(zones: ZoneConfig) -> CoreResult<Self> {
        if zones.is_empty() {
            return Err(CoreError::UnknownZone(
                "zone configuration is empty".to_string(),
            ));
        }
        let mut descending = zones;
        descending.sort_by(|a, b| b.min.cmp(&a.min));
        Ok(Self { descending })
    }

    /// Scans from the highest `min` downward; returns the first zone whose
    /// `min <= hr`. Falls back to the lowest zone (last in descending order)
    /// when `hr` is below every configured `min`.
    #[must_use]
    pub fn classify(&self, hr: u32) -> &str {
        self.descending
            .iter()
            .find(|z| z.min <= hr)
            .or_else(|| self.descending.last())
            .map(|z| z.id.as_str())
            .expect("zone table validated non-empty at construction")
    }

    /// Rank of a zone within this table: 0 is the highest (best) zone,
    /// increasing toward the lowest. Used by the Governance Engine to
    /// compare "is this participant below zone X" without hardcoding zone
    /// order.
    #[must_use]
    pub fn rank_of(&self, zone_id: &str) -> Option<usize> {
        self.descending.iter().position(|z| z.id == zone_id)
    }

    /// Midpoint of the zone with the given id, for simulator use (§4.C).
    /// The last (highest-min) zone's midpoint is `min + 15`; others are the
    /// midpoint between this zone's `min` and the next higher zone's `min`.
    #[must_use]
    pub fn midpoint_for(&self, zone_id: &str) -> Option<f64> {
        // `descending` is sorted high-to-low, so the "next higher" zone for
        // index i is at i - 1.
        let idx = self.descending.iter().position(|z| z.id == zone_id)?;
        let zone = &self.descending[idx];
        if idx == 0 {
            Some(f64::from(zone.min) + 15.0)
        } else {
            let next_higher = &self.descending[idx - 1];
            Some((f64::from(zone.min) + f64::from(next_higher.min)) / 2.0)
        }
    }
}

/// Per-user zone classifiers, built once from [`crate::config::Config::zones`].
pub struct ZoneClassifier {
    tables: HashMap<String, ZoneTable>,
}

impl ZoneClassifier {
    pub fn new(zones: &HashMap<String, ZoneConfig>) -> CoreResult<Self> {
        let mut tables = HashMap::with_capacity(zones.len());
        for (user_id, table) in zones {
            tables.insert(user_id.clone(), ZoneTable::new(table.clone())?);
        }
        Ok(Self { tables })
    }

    /// Classifies `hr` for `user_id`, falling back to the `"default"` table
    /// when no user-specific table is configured.
    pub fn classify(&self, user_id: &str, hr: u32) -> CoreResult<String> {
        let table = self
            .tables
            .get(user_id)
            .or_else(|| self.tables.get("default"))
            .ok_or_else(|| CoreError::UnknownZone(user_id.to_string()))?;
        Ok(table.classify(hr).to_string())
    }

    #[must_use]
    pub fn midpoint_for(&self, user_id: &str, zone_id: &str) -> Option<f64> {
        self.tables
            .get(user_id)
            .or_else(|| self.tables.get("default"))
            .and_then(|t| t.midpoint_for(zone_id))
    }

    /// Rank of `zone_id` within `user_id`'s table (or the `"default"` table).
    #[must_use]
    pub fn rank_of(&self, user_id: &str, zone_id: &str) -> Option<usize> {
        self.tables
            .get(user_id)
            .or_else(|| self.tables.get("default"))
            .and_then(|t| t.rank_of(zone_id))
    }
}
