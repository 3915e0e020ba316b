//! The Interpolation Driver - per-vehicle position tweening
//!
//! Displayed positions move toward the last confirmed fix on the frame
//! clock, not the feed clock. Per vehicle:
//!
//! ```text
//!            start()                 step(): fraction == 1
//!   Idle ─────────────► Tweening ─────────────────────────► Idle
//!     ▲                  │  │
//!     │   cancel()       │  │ start(): old tween dropped,
//!     └──────────────────┘  └── new one begins at the current position
//! ```
//!
//! A vehicle holds at most one `ActiveTween`. Starting a new one always
//! clears the old handle first.

use crate::geo_point::GeoPoint;
use crate::registry::TrackedEntity;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Identifies one interpolation run. Never reused within a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TweenHandle(pub u64);

impl std::fmt::Display for TweenHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tween#{}", self.0)
    }
}

/// An in-flight tween, stored on the entity it drives.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTween {
    pub handle: TweenHandle,
    /// Interpolated position at the moment the tween started
    pub start: GeoPoint,
    /// Frame-clock time the tween started
    pub started_at: Duration,
}

/// Result of advancing one entity by one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TweenStep {
    /// No tween running
    Idle,
    /// Position moved; `fraction` in `(0, 1)`
    Advanced { fraction: f64 },
    /// Reached the target this frame
    Completed,
    /// Interpolation produced a non-finite value; snapped to target
    Halted,
}

/// Lifetime counters for the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TweenStats {
    pub started: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub halted: u64,
    pub skipped_stationary: u64,
}

/// Drives every vehicle's displayed position toward its target.
#[derive(Debug, Clone)]
pub struct InterpolationDriver {
    duration: Duration,
    next_handle: u64,
    stats: TweenStats,
}

impl InterpolationDriver {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            next_handle: 1,
            stats: TweenStats::default(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn stats(&self) -> TweenStats {
        self.stats
    }

    /// Starts a tween from the entity's current position toward its target.
    ///
    /// Any running tween is cancelled first and its progress discarded; the
    /// new one begins where the vehicle is currently drawn, so motion stays
    /// continuous under rapid updates. Returns `None` when the vehicle is
    /// already at its target.
    pub fn start(&mut self, entity: &mut TrackedEntity, now: Duration) -> Option<TweenHandle> {
        self.cancel(entity);

        let start = entity.current_position;
        if start == entity.target_position {
            self.stats.skipped_stationary += 1;
            return None;
        }

        let handle = TweenHandle(self.next_handle);
        self.next_handle += 1;
        self.stats.started += 1;

        entity.tween = Some(ActiveTween {
            handle,
            start,
            started_at: now,
        });
        Some(handle)
    }

    /// Cancels the entity's tween, if any, leaving the position where it is.
    pub fn cancel(&mut self, entity: &mut TrackedEntity) -> Option<TweenHandle> {
        let cancelled = entity.tween.take().map(|t| t.handle);
        if cancelled.is_some() {
            self.stats.cancelled += 1;
        }
        cancelled
    }

    /// Advances one entity to frame time `now`.
    pub fn step(&mut self, entity: &mut TrackedEntity, now: Duration) -> TweenStep {
        let tween = match &entity.tween {
            Some(t) => t.clone(),
            None => return TweenStep::Idle,
        };

        let fraction = self.fraction(tween.started_at, now);
        if fraction >= 1.0 {
            entity.current_position = entity.target_position;
            entity.tween = None;
            self.stats.completed += 1;
            return TweenStep::Completed;
        }

        let next = tween.start.lerp(&entity.target_position, fraction);
        if !next.is_finite() {
            warn!(
                vehicle = %entity.id,
                handle = %tween.handle,
                "non-finite interpolated position, snapping to target"
            );
            entity.current_position = entity.target_position;
            entity.tween = None;
            self.stats.halted += 1;
            return TweenStep::Halted;
        }

        entity.current_position = next;
        TweenStep::Advanced { fraction }
    }

    /// `min(elapsed / duration, 1)`; a zero duration finishes immediately.
    fn fraction(&self, started_at: Duration, now: Duration) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_sub(started_at);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn moving_entity() -> TrackedEntity {
        let mut e = TrackedEntity::new("B1", "7", None, GeoPoint::new(50.0, -104.0), ms(0));
        e.target_position = GeoPoint::new(51.0, -105.0);
        e
    }

    #[test]
    fn test_tween_progress_and_completion() {
        let mut driver = InterpolationDriver::new(ms(1000));
        let mut e = moving_entity();

        let handle = driver.start(&mut e, ms(0));
        assert!(handle.is_some());
        assert_eq!(e.active_tween(), handle);

        let step = driver.step(&mut e, ms(250));
        assert_eq!(step, TweenStep::Advanced { fraction: 0.25 });
        assert_relative_eq!(e.current_position.lat, 50.25, epsilon = 1e-12);
        assert_relative_eq!(e.current_position.lng, -104.25, epsilon = 1e-12);

        assert_eq!(driver.step(&mut e, ms(1000)), TweenStep::Completed);
        assert_eq!(e.current_position, e.target_position);
        assert!(e.active_tween().is_none());

        // Idle afterwards
        assert_eq!(driver.step(&mut e, ms(2000)), TweenStep::Idle);
    }

    #[test]
    fn test_overshoot_snaps_exactly_to_target() {
        let mut driver = InterpolationDriver::new(ms(1500));
        let mut e = moving_entity();
        driver.start(&mut e, ms(0));

        assert_eq!(driver.step(&mut e, ms(99_999)), TweenStep::Completed);
        assert_eq!(e.current_position, GeoPoint::new(51.0, -105.0));
    }

    #[test]
    fn test_stationary_skips_tween() {
        let mut driver = InterpolationDriver::new(ms(1000));
        let mut e = TrackedEntity::new("B1", "7", None, GeoPoint::new(50.0, -104.0), ms(0));

        assert!(driver.start(&mut e, ms(0)).is_none());
        assert!(e.active_tween().is_none());
        assert_eq!(driver.stats().skipped_stationary, 1);
    }

    #[test]
    fn test_restart_begins_from_interpolated_position() {
        let mut driver = InterpolationDriver::new(ms(1000));
        let mut e = moving_entity();

        let first = driver.start(&mut e, ms(0)).unwrap();
        driver.step(&mut e, ms(500));
        let midway = e.current_position;

        // New fix arrives mid-tween
        e.target_position = GeoPoint::new(52.0, -104.0);
        let second = driver.start(&mut e, ms(500)).unwrap();
        assert_ne!(first, second);
        assert_eq!(driver.stats().cancelled, 1);

        let tween = e.tween.clone().unwrap();
        assert_eq!(tween.start, midway);

        driver.step(&mut e, ms(1500));
        assert_eq!(e.current_position, GeoPoint::new(52.0, -104.0));
    }

    #[test]
    fn test_cancel_clears_handle() {
        let mut driver = InterpolationDriver::new(ms(1000));
        let mut e = moving_entity();
        let handle = driver.start(&mut e, ms(0));

        assert_eq!(driver.cancel(&mut e), handle);
        assert!(e.active_tween().is_none());
        assert_eq!(driver.cancel(&mut e), None);
    }

    #[test]
    fn test_non_finite_intermediate_halts() {
        let mut driver = InterpolationDriver::new(ms(1000));
        let mut e = moving_entity();
        driver.start(&mut e, ms(0));

        // Corrupt the tween's start; the driver must not publish NaN
        if let Some(t) = e.tween.as_mut() {
            t.start = GeoPoint::new(f64::NAN, -104.0);
        }
        assert_eq!(driver.step(&mut e, ms(100)), TweenStep::Halted);
        assert_eq!(e.current_position, e.target_position);
        assert!(e.active_tween().is_none());
    }

    #[test]
    fn test_zero_duration_completes_on_first_tick() {
        let mut driver = InterpolationDriver::new(Duration::ZERO);
        let mut e = moving_entity();
        driver.start(&mut e, ms(10));
        assert_eq!(driver.step(&mut e, ms(10)), TweenStep::Completed);
    }
}
