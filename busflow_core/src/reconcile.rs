//! The Reconciliation Cycle
//!
//! One pass per feed batch: validate every record, fold the accepted ones
//! into the registry in feed order, then sweep. A failed fetch or an empty
//! batch still sweeps, so vehicles age out while the feed is down.
//!
//! A batch that is value-for-value identical to the last non-empty one is
//! not reconciled again (the feed often republishes a snapshot unchanged).
//! Re-applying it would only restart finished tweens from where they ended.

use crate::config::TrackerConfig;
use crate::metrics::{CycleReport, FrameSummary, TrackerStats};
use crate::registry::{EntityRegistry, ReconcileOutcome};
use crate::validation::validate_record;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ReconciliationCycle {
    config: TrackerConfig,
    registry: EntityRegistry,
    /// Last non-empty batch, for duplicate detection
    previous_batch: Option<Vec<Value>>,
    stats: TrackerStats,
}

impl ReconciliationCycle {
    /// Expects a validated config (see `TrackerConfig::validate`).
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            registry: EntityRegistry::from_config(&config),
            config,
            previous_batch: None,
            stats: TrackerStats::default(),
        }
    }

    /// Runs one cycle at tracker time `now`.
    ///
    /// `None` means the fetch failed; it is handled like an empty batch.
    pub fn run_cycle(&mut self, batch: Option<&[Value]>, now: Duration) -> CycleReport {
        let mut report = CycleReport::default();

        match batch {
            None => debug!("no batch this cycle, eviction only"),
            Some([]) => debug!("empty batch, eviction only"),
            Some(records) if self.previous_batch.as_deref() == Some(records) => {
                report.records = records.len();
                report.skipped_identical = true;
                debug!(records = records.len(), "batch identical to previous, skipping");
            }
            Some(records) => {
                report.records = records.len();
                self.apply(records, now, &mut report);
                self.previous_batch = Some(records.to_vec());
            }
        }

        report.evicted = self.registry.sweep(now, self.config.grace_period());
        report.tracked = self.registry.len();
        self.stats.absorb(&report);

        info!(
            records = report.records,
            accepted = report.accepted,
            rejected = report.rejected(),
            created = report.created,
            evicted = report.evicted.len(),
            tracked = report.tracked,
            skipped = report.skipped_identical,
            "reconciliation cycle"
        );
        report
    }

    fn apply(&mut self, records: &[Value], now: Duration, report: &mut CycleReport) {
        let mut seen: HashSet<String> = HashSet::with_capacity(records.len());

        for (index, raw) in records.iter().enumerate() {
            let record = match validate_record(raw) {
                Ok(record) => record,
                Err(reason) => {
                    warn!(index, reason = reason.code(), "rejected feed record");
                    report.record_rejection(reason);
                    continue;
                }
            };

            report.accepted += 1;
            if !seen.insert(record.id.clone()) {
                report.duplicates += 1;
                debug!(vehicle = %record.id, index, "identity repeated within batch");
            }

            match self.registry.reconcile(record, now) {
                ReconcileOutcome::Created => report.created += 1,
                ReconcileOutcome::Updated { .. } => report.updated += 1,
            }
        }
    }

    /// Advances every tween to frame time `now`.
    pub fn frame(&mut self, now: Duration) -> FrameSummary {
        self.stats.record_frame();
        self.registry.tick(now)
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    #[cfg(test)]
    pub(crate) fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_point::GeoPoint;
    use crate::registry::EvictionReason;
    use serde_json::json;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn cycle_with_grace(grace_ms: u64) -> ReconciliationCycle {
        ReconciliationCycle::new(TrackerConfig {
            grace_period_ms: grace_ms,
            ..TrackerConfig::default()
        })
    }

    fn feature(b: &str, r: &str, lng: f64, lat: f64) -> Value {
        json!({
            "type": "Feature",
            "properties": { "b": b, "r": r },
            "geometry": { "type": "Point", "coordinates": [lng, lat] }
        })
    }

    #[test]
    fn test_end_to_end_single_vehicle() {
        let mut cycle = cycle_with_grace(20_000);

        let report = cycle.run_cycle(Some(&[feature("B1", "7", -104.61, 50.45)]), ms(1000));
        assert_eq!(report.created, 1);
        let b1 = cycle.registry().get("B1").unwrap();
        assert_eq!(b1.current_position, GeoPoint::new(50.45, -104.61));
        assert_eq!(b1.heading, 0.0);

        let report = cycle.run_cycle(Some(&[feature("B1", "7", -104.60, 50.46)]), ms(1005));
        assert_eq!(report.updated, 1);
        let b1 = cycle.registry().get("B1").unwrap();
        assert_eq!(b1.target_position, GeoPoint::new(50.46, -104.60));
        assert!(b1.heading > 30.0 && b1.heading < 50.0);
        assert_eq!(b1.last_seen_at, ms(1005));
        assert!(b1.active_tween().is_some());

        // Feed goes quiet
        assert!(cycle.run_cycle(Some(&[]), ms(1005 + 20_000)).evicted.is_empty());
        let report = cycle.run_cycle(None, ms(1005 + 20_001));
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.evicted[0].reason, EvictionReason::GraceExpired);
        assert!(cycle.registry().is_empty());
    }

    #[test]
    fn test_malformed_records_never_reach_registry() {
        let mut cycle = cycle_with_grace(60_000);
        let batch = vec![
            json!({ "properties": { "r": "7" }, "geometry": { "coordinates": [0.0, 0.0] } }),
            json!({ "properties": { "b": "B2" }, "geometry": { "coordinates": [0.0, 0.0] } }),
            json!({ "properties": { "b": "B3", "r": "7" }, "geometry": { "coordinates": ["x", 0.0] } }),
            json!(null),
            feature("B4", "7", -104.61, 50.45),
        ];

        let report = cycle.run_cycle(Some(&batch), ms(0));
        assert_eq!(report.records, 5);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.missing_identity, 2);
        assert_eq!(report.missing_route, 1);
        assert_eq!(report.malformed_coordinates, 1);
        assert_eq!(cycle.registry().len(), 1);
        assert!(cycle.registry().contains("B4"));
    }

    #[test]
    fn test_identical_batch_is_skipped_but_swept() {
        let mut cycle = cycle_with_grace(20_000);
        let batch = vec![feature("B1", "7", -104.61, 50.45), feature("B2", "9", -104.62, 50.44)];

        cycle.run_cycle(Some(&batch), ms(0));
        let report = cycle.run_cycle(Some(&batch), ms(5000));
        assert!(report.skipped_identical);
        assert_eq!(report.accepted, 0);
        // Timestamps were not refreshed
        assert_eq!(cycle.registry().get("B1").unwrap().last_seen_at, ms(0));

        let report = cycle.run_cycle(Some(&batch), ms(20_001));
        assert!(report.skipped_identical);
        assert_eq!(report.evicted.len(), 2);
        assert_eq!(cycle.stats().skipped_cycles, 2);
    }

    #[test]
    fn test_empty_batch_does_not_reset_duplicate_detection() {
        let mut cycle = cycle_with_grace(60_000);
        let batch = vec![feature("B1", "7", -104.61, 50.45)];

        cycle.run_cycle(Some(&batch), ms(0));
        cycle.run_cycle(Some(&[]), ms(5000));
        assert!(cycle.run_cycle(Some(&batch), ms(10_000)).skipped_identical);
    }

    #[test]
    fn test_identical_batch_same_now_is_idempotent() {
        let batch = vec![feature("B1", "7", -104.61, 50.45), feature("B1", "7", -104.60, 50.46)];

        let mut a = cycle_with_grace(60_000);
        a.run_cycle(Some(&batch), ms(100));

        let mut b = cycle_with_grace(60_000);
        b.run_cycle(Some(&batch), ms(100));
        b.run_cycle(Some(&batch), ms(100));

        let ea = a.registry().get("B1").unwrap();
        let eb = b.registry().get("B1").unwrap();
        assert_eq!(ea.target_position, eb.target_position);
        assert_eq!(ea.current_position, eb.current_position);
        assert_eq!(ea.heading, eb.heading);
        assert_eq!(ea.last_seen_at, eb.last_seen_at);
        assert_eq!(a.registry().len(), b.registry().len());
    }

    #[test]
    fn test_duplicate_ids_applied_in_order() {
        let mut cycle = cycle_with_grace(60_000);
        let batch = vec![
            feature("B1", "7", -104.61, 50.45),
            feature("B1", "8", -104.60, 50.46),
        ];

        let report = cycle.run_cycle(Some(&batch), ms(0));
        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.duplicates, 1);

        let b1 = cycle.registry().get("B1").unwrap();
        assert_eq!(b1.route_id, "8");
        assert_eq!(b1.target_position, GeoPoint::new(50.46, -104.60));
    }

    #[test]
    fn test_vehicle_updated_this_cycle_survives_sweep() {
        let mut cycle = cycle_with_grace(20_000);
        cycle.run_cycle(Some(&[feature("B1", "7", -104.61, 50.45)]), ms(0));

        let report = cycle.run_cycle(Some(&[feature("B1", "7", -104.60, 50.46)]), ms(50_000));
        assert!(report.evicted.is_empty());
        assert!(cycle.registry().contains("B1"));
    }

    #[test]
    fn test_mid_tween_update_restarts_from_drawn_position() {
        let mut cycle = cycle_with_grace(60_000);
        cycle.run_cycle(Some(&[feature("B1", "7", 0.0, 0.0)]), ms(0));
        cycle.run_cycle(Some(&[feature("B1", "7", 0.0, 1.0)]), ms(0));
        cycle.frame(ms(750));
        let drawn = cycle.registry().get("B1").unwrap().current_position;
        assert!(drawn.lat > 0.0 && drawn.lat < 1.0);

        cycle.run_cycle(Some(&[feature("B1", "7", 1.0, 1.0)]), ms(750));
        cycle.frame(ms(751));
        let b1 = cycle.registry().get("B1").unwrap();
        assert!((b1.current_position.lat - drawn.lat).abs() < 0.01);

        cycle.frame(ms(750 + 1500));
        let b1 = cycle.registry().get("B1").unwrap();
        assert_eq!(b1.current_position, GeoPoint::new(1.0, 1.0));
        assert!(b1.active_tween().is_none());
    }

    #[test]
    fn test_inconsistent_state_evicted_on_next_cycle() {
        let mut cycle = cycle_with_grace(60_000);
        cycle.run_cycle(Some(&[feature("B1", "7", 0.0, 0.0)]), ms(0));
        if let Some(e) = cycle.registry_mut().get_mut("B1") {
            e.heading = 400.0;
        }

        let report = cycle.run_cycle(None, ms(10));
        assert_eq!(report.evicted_for(EvictionReason::Inconsistent), 1);
        assert!(cycle.registry().is_empty());
    }
}
