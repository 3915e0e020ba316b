//! The Entity Registry - vehicle identity → tracked state
//!
//! Owns the lifecycle of every tracked vehicle:
//! - **Create** on the first accepted record for an identity
//! - **Update** target, heading, route and timestamp on later records, and
//!   hand the vehicle to the interpolation driver
//! - **Evict** once the grace period passes without an accepted record, or
//!   defensively when the stored state is inconsistent
//!
//! An H3 index over target positions backs proximity queries.

use crate::bearing::bearing;
use crate::config::TrackerConfig;
use crate::geo_point::GeoPoint;
use crate::interpolation::{ActiveTween, InterpolationDriver, TweenHandle, TweenStats, TweenStep};
use crate::metrics::FrameSummary;
use crate::validation::ValidatedRecord;
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// TRACKED ENTITY
// ============================================================================

/// One vehicle as the tracker currently believes it to be.
#[derive(Debug, Clone)]
pub struct TrackedEntity {
    // === Identity ===

    /// Stable identity from the feed (`properties.b`)
    pub id: String,

    /// Route label (`properties.r`); may change between updates
    pub route_id: String,

    /// Optional display label (`properties.line`)
    pub line: Option<String>,

    // === Position ===

    /// Last drawn position; written by the interpolation driver
    pub current_position: GeoPoint,

    /// Last confirmed position from the feed
    pub target_position: GeoPoint,

    /// Compass heading in `[0, 360)`; 0 is a real value, not "unknown"
    pub heading: f64,

    // === Bookkeeping ===

    /// Tracker-clock time of the last accepted record
    pub last_seen_at: Duration,

    /// Tracker-clock time the entity was created
    pub first_seen_at: Duration,

    /// Number of accepted records, including the one that created it
    pub update_count: u64,

    /// H3 cell of `target_position`, if one could be computed
    pub h3_cell: Option<CellIndex>,

    /// Owned by the interpolation driver
    pub(crate) tween: Option<ActiveTween>,
}

impl TrackedEntity {
    /// Creates an entity at rest: current == target, heading 0, no tween.
    pub fn new(
        id: impl Into<String>,
        route_id: impl Into<String>,
        line: Option<String>,
        position: GeoPoint,
        now: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            route_id: route_id.into(),
            line,
            current_position: position,
            target_position: position,
            heading: bearing(None, position, 0.0),
            last_seen_at: now,
            first_seen_at: now,
            update_count: 1,
            h3_cell: None,
            tween: None,
        }
    }

    /// Handle of the running tween, if any.
    pub fn active_tween(&self) -> Option<TweenHandle> {
        self.tween.as_ref().map(|t| t.handle)
    }

    /// True while a tween is moving the drawn position.
    pub fn is_tweening(&self) -> bool {
        self.tween.is_some()
    }

    /// Time since the last accepted record.
    pub fn idle_for(&self, now: Duration) -> Duration {
        now.saturating_sub(self.last_seen_at)
    }

    /// Checks the invariants the rest of the tracker relies on.
    ///
    /// A `last_seen_at` more than one grace period in the future cannot be
    /// aged out normally, so it counts as unusable.
    pub fn is_consistent(&self, now: Duration, grace_period: Duration) -> bool {
        self.current_position.is_finite()
            && self.target_position.is_finite()
            && self.heading.is_finite()
            && (0.0..360.0).contains(&self.heading)
            && self.last_seen_at <= now.saturating_add(grace_period)
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// What `reconcile` did with a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    Created,
    Updated { heading: f64, tween: Option<TweenHandle> },
}

/// Why an entity left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvictionReason {
    /// No accepted record for longer than the grace period
    GraceExpired,
    /// Stored state violated a registry invariant
    Inconsistent,
}

/// One evicted entity, reported by `sweep`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eviction {
    pub id: String,
    pub reason: EvictionReason,
    /// Time since the entity's last accepted record
    pub idle: Duration,
}

/// Statistics about the spatial index.
#[derive(Debug, Clone)]
pub struct SpatialIndexStats {
    pub total_cells: usize,
    pub total_entries: usize,
    pub unindexed: usize,
}

// ============================================================================
// REGISTRY
// ============================================================================

/// All tracked vehicles, keyed by identity.
pub struct EntityRegistry {
    // === Entity Store ===

    entities: HashMap<String, TrackedEntity>,

    // === Spatial Index (H3 → vehicle ids) ===

    spatial_index: HashMap<CellIndex, HashSet<String>>,

    resolution: Resolution,

    // === Motion ===

    driver: InterpolationDriver,
}

impl EntityRegistry {
    pub fn new(tween_duration: Duration, resolution: Resolution) -> Self {
        Self {
            entities: HashMap::new(),
            spatial_index: HashMap::new(),
            resolution,
            driver: InterpolationDriver::new(tween_duration),
        }
    }

    /// Builds a registry from an already validated config.
    pub fn from_config(config: &TrackerConfig) -> Self {
        let resolution = Resolution::try_from(config.h3_resolution).unwrap_or(Resolution::Ten);
        Self::new(config.tween_duration(), resolution)
    }

    // ========================================================================
    // SPATIAL INDEX OPERATIONS
    // ========================================================================

    /// H3 cell for a coordinate, or `None` if h3o rejects it.
    pub fn position_to_cell(&self, point: &GeoPoint) -> Option<CellIndex> {
        LatLng::new(point.lat, point.lng)
            .ok()
            .map(|ll| ll.to_cell(self.resolution))
    }

    fn spatial_index_insert(&mut self, cell: CellIndex, id: &str) {
        self.spatial_index
            .entry(cell)
            .or_default()
            .insert(id.to_string());
    }

    fn spatial_index_remove(&mut self, cell: CellIndex, id: &str) {
        if let Some(set) = self.spatial_index.get_mut(&cell) {
            set.remove(id);
            // Clean up empty cells
            if set.is_empty() {
                self.spatial_index.remove(&cell);
            }
        }
    }

    fn reindex(&mut self, id: &str, old_cell: Option<CellIndex>, new_cell: Option<CellIndex>) {
        if old_cell == new_cell {
            return;
        }
        if let Some(cell) = old_cell {
            self.spatial_index_remove(cell, id);
        }
        if let Some(cell) = new_cell {
            self.spatial_index_insert(cell, id);
        }
    }

    /// Vehicles whose confirmed position lies within `k` rings of `point`'s cell.
    pub fn vehicles_near(&self, point: &GeoPoint, k: u32) -> Vec<&TrackedEntity> {
        let Some(center) = self.position_to_cell(point) else {
            return Vec::new();
        };

        let mut found: Vec<&TrackedEntity> = center
            .grid_disk_safe(k)
            .filter_map(|cell| self.spatial_index.get(&cell))
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.entities.get(id))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Applies one validated record at tracker time `now`.
    pub fn reconcile(&mut self, record: ValidatedRecord, now: Duration) -> ReconcileOutcome {
        let new_cell = self.position_to_cell(&record.position);

        let Some(entity) = self.entities.get_mut(&record.id) else {
            let mut entity = TrackedEntity::new(
                record.id.clone(),
                record.route_id,
                record.line,
                record.position,
                now,
            );
            entity.h3_cell = new_cell;
            debug!(vehicle = %record.id, route = %entity.route_id, "vehicle created");

            if let Some(cell) = new_cell {
                self.spatial_index_insert(cell, &record.id);
            }
            self.entities.insert(record.id, entity);
            return ReconcileOutcome::Created;
        };

        // Bearing runs from the last confirmed fix, not the drawn position
        let heading = bearing(Some(entity.target_position), record.position, entity.heading);
        let old_cell = entity.h3_cell;

        entity.target_position = record.position;
        entity.heading = heading;
        entity.route_id = record.route_id;
        if record.line.is_some() {
            entity.line = record.line;
        }
        entity.last_seen_at = entity.last_seen_at.max(now);
        entity.update_count += 1;
        entity.h3_cell = new_cell;

        let tween = self.driver.start(entity, now);
        self.reindex(&record.id, old_cell, new_cell);

        ReconcileOutcome::Updated { heading, tween }
    }

    /// Evicts every entity idle for longer than `grace_period`, plus any
    /// entity found in an inconsistent state.
    ///
    /// Tweens are cancelled before removal. Returned in id order.
    pub fn sweep(&mut self, now: Duration, grace_period: Duration) -> Vec<Eviction> {
        let mut doomed: Vec<(String, EvictionReason)> = self
            .entities
            .values()
            .filter_map(|e| {
                if !e.is_consistent(now, grace_period) {
                    Some((e.id.clone(), EvictionReason::Inconsistent))
                } else if e.idle_for(now) > grace_period {
                    Some((e.id.clone(), EvictionReason::GraceExpired))
                } else {
                    None
                }
            })
            .collect();
        doomed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut evicted = Vec::with_capacity(doomed.len());
        for (id, reason) in doomed {
            if let Some(eviction) = self.evict(&id, now, reason) {
                evicted.push(eviction);
            }
        }
        evicted
    }

    /// Removes one entity, cancelling its tween first.
    pub fn evict(&mut self, id: &str, now: Duration, reason: EvictionReason) -> Option<Eviction> {
        let entity = self.entities.get_mut(id)?;
        self.driver.cancel(entity);
        let cell = entity.h3_cell;
        let idle = entity.idle_for(now);

        if let Some(cell) = cell {
            self.spatial_index_remove(cell, id);
        }
        self.entities.remove(id);

        match reason {
            EvictionReason::GraceExpired => {
                debug!(vehicle = %id, idle_secs = idle.as_secs(), "vehicle evicted after grace period")
            }
            EvictionReason::Inconsistent => {
                warn!(vehicle = %id, "evicting vehicle with inconsistent state")
            }
        }

        Some(Eviction {
            id: id.to_string(),
            reason,
            idle,
        })
    }

    /// Advances every running tween to frame time `now`.
    pub fn tick(&mut self, now: Duration) -> FrameSummary {
        let mut summary = FrameSummary::default();
        for entity in self.entities.values_mut() {
            match self.driver.step(entity, now) {
                TweenStep::Idle => {}
                TweenStep::Advanced { .. } => summary.advanced += 1,
                TweenStep::Completed => summary.completed += 1,
                TweenStep::Halted => summary.halted += 1,
            }
        }
        summary
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn get(&self, id: &str) -> Option<&TrackedEntity> {
        self.entities.get(id)
    }

    #[cfg(test)]
    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut TrackedEntity> {
        self.entities.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// All entities, in no particular order.
    pub fn entities(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of entities with a tween in flight.
    pub fn tweening_count(&self) -> usize {
        self.entities.values().filter(|e| e.is_tweening()).count()
    }

    pub fn tween_stats(&self) -> TweenStats {
        self.driver.stats()
    }

    pub fn tween_duration(&self) -> Duration {
        self.driver.duration()
    }

    pub fn spatial_stats(&self) -> SpatialIndexStats {
        SpatialIndexStats {
            total_cells: self.spatial_index.len(),
            total_entries: self.spatial_index.values().map(|s| s.len()).sum(),
            unindexed: self.entities.values().filter(|e| e.h3_cell.is_none()).count(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
