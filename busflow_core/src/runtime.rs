//! Fleet Tracker Runtime
//!
//! Drives a `ReconciliationCycle` from two clocks: the feed cadence (fetch,
//! reconcile, sweep) and the frame cadence (advance tweens). Both run on one
//! logical task. Each callback runs to completion on `&mut self`; the only
//! suspension points are `feed.fetch()` and `ctx.sleep()` between callbacks,
//! so no other writer can observe a half-applied batch.
//!
//! Generic over the context and transport so the same loop runs in
//! production (tokio) and under the simulator's virtual clock.

use crate::config::{ConfigError, TrackerConfig};
use crate::geo_point::GeoPoint;
use crate::metrics::{CycleReport, FrameSummary, TrackerStats};
use crate::palette::color_for;
use crate::reconcile::ReconciliationCycle;
use crate::registry::{EntityRegistry, TrackedEntity};
use busflow_env::{FeedTransport, FleetContext};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the map draws for one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleView {
    pub id: String,
    pub route_id: String,
    pub line: Option<String>,
    /// Interpolated (drawn) position
    pub position: GeoPoint,
    pub heading: f64,
    pub color: &'static str,
}

impl VehicleView {
    pub fn from_entity(entity: &TrackedEntity) -> Self {
        Self {
            id: entity.id.clone(),
            route_id: entity.route_id.clone(),
            line: entity.line.clone(),
            position: entity.current_position,
            heading: entity.heading,
            color: color_for(&entity.route_id),
        }
    }
}

/// Receives the vehicle list after every frame and every reconciliation.
pub trait RenderSink: Send {
    fn render(&mut self, vehicles: &[VehicleView]);
}

impl<F> RenderSink for F
where
    F: FnMut(&[VehicleView]) + Send,
{
    fn render(&mut self, vehicles: &[VehicleView]) {
        self(vehicles)
    }
}

/// The live tracker: one feed, one clock, one registry.
pub struct FleetTracker<Ctx, Feed>
where
    Ctx: FleetContext,
    Feed: FeedTransport,
{
    /// Environment context
    pub context: Arc<Ctx>,

    /// Feed transport
    pub feed: Arc<Feed>,

    cycle: ReconciliationCycle,

    sink: Option<Box<dyn RenderSink>>,

    /// Fetches that returned an error
    fetch_failures: u64,
}

impl<Ctx, Feed> FleetTracker<Ctx, Feed>
where
    Ctx: FleetContext,
    Feed: FeedTransport,
{
    /// Creates a tracker, rejecting an invalid config.
    pub fn new(context: Arc<Ctx>, feed: Arc<Feed>, config: TrackerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            context,
            feed,
            cycle: ReconciliationCycle::new(config),
            sink: None,
            fetch_failures: 0,
        })
    }

    pub fn with_sink(mut self, sink: impl RenderSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Fetches one batch and reconciles it.
    ///
    /// A failed fetch is logged and handled as an eviction-only cycle.
    pub async fn poll_feed(&mut self) -> CycleReport {
        let fetched = self.feed.fetch().await;
        let now = self.context.now();

        let report = match fetched {
            Ok(batch) => {
                debug!(
                    source = self.feed.source_name(),
                    sequence = batch.sequence,
                    records = batch.len(),
                    "fetched batch"
                );
                self.cycle.run_cycle(Some(&batch.records), now)
            }
            Err(e) => {
                self.fetch_failures += 1;
                warn!(source = self.feed.source_name(), error = %e, "feed fetch failed");
                self.cycle.run_cycle(None, now)
            }
        };

        self.publish();
        report
    }

    /// Advances every tween to the context's current time and publishes.
    pub fn frame(&mut self) -> FrameSummary {
        let summary = self.cycle.frame(self.context.now());
        self.publish();
        summary
    }

    /// Runs both cadences until `duration` of context time has passed.
    ///
    /// A callback that overruns its slot is not replayed; the next deadline
    /// is pushed past the current time instead.
    pub async fn run_for(&mut self, duration: Duration) -> TrackerStats {
        let feed_interval = self.cycle.config().feed_interval();
        let frame_interval = self.cycle.config().frame_interval();

        let start = self.context.now();
        let end = start + duration;
        let mut next_feed = start;
        let mut next_frame = start;

        info!(
            seed = self.context.seed(),
            source = self.feed.source_name(),
            duration_ms = duration.as_millis() as u64,
            "tracker loop started"
        );

        loop {
            if self.context.now() >= end {
                break;
            }

            if self.context.now() >= next_feed {
                self.poll_feed().await;
                next_feed = next_deadline(next_feed, feed_interval, self.context.now());
            }

            if self.context.now() >= next_frame {
                self.frame();
                next_frame = next_deadline(next_frame, frame_interval, self.context.now());
            }

            let wake = next_feed.min(next_frame).min(end);
            let now = self.context.now();
            if wake > now {
                self.context.sleep(wake - now).await;
            }
        }

        info!(
            cycles = self.stats().cycles,
            frames = self.stats().frames,
            tracked = self.registry().len(),
            fetch_failures = self.fetch_failures,
            "tracker loop finished"
        );
        self.stats().clone()
    }

    /// All tracked vehicles as drawn right now, sorted by id.
    pub fn snapshot(&self) -> Vec<VehicleView> {
        let mut views: Vec<VehicleView> = self
            .cycle
            .registry()
            .entities()
            .map(VehicleView::from_entity)
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    fn publish(&mut self) {
        if self.sink.is_none() {
            return;
        }
        let views = self.snapshot();
        if let Some(sink) = self.sink.as_mut() {
            sink.render(&views);
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        self.cycle.registry()
    }

    pub fn stats(&self) -> &TrackerStats {
        self.cycle.stats()
    }

    pub fn config(&self) -> &TrackerConfig {
        self.cycle.config()
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures
    }
}

/// Next deadline after `previous`, never at or before `now`.
fn next_deadline(previous: Duration, interval: Duration, now: Duration) -> Duration {
    let next = previous + interval;
    if next > now {
        next
    } else {
        now + interval
    }
}
