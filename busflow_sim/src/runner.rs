//! Scenario runner - executes fleet tracker scenarios against the oracle.

use crate::context::SimContext;
use crate::exporter::{SimEvent, SimExport, SimFrame, TrackedPosition, VehiclePosition};
use crate::feed::{SimFeed, SimFeedController};
use crate::oracle::{LocalFrame, Oracle, DEFAULT_ORIGIN, MAX_SPEED_MPS, ROUTES};
use crate::scenarios::ScenarioId;

use busflow_core::{
    color_for, EntityRegistry, Eviction, EvictionReason, FleetTracker, GeoPoint,
    ReconciliationCycle, TrackerConfig, VehicleView,
};
use busflow_env::{FeedController, FleetContext};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// RNG stream for the oracle.
const PHYSICS_STREAM: u64 = 0;

/// Buses spawn within this distance of the origin on each axis.
const FLEET_RADIUS_M: f64 = 4000.0;

/// Slack for GPS noise when bounding per-frame motion.
const NOISE_SPREAD_M: f64 = 60.0;

/// Intervals of healthy feed before a fault is injected.
const WARMUP_INTERVALS: u64 = 3;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Reconciliation cycles executed
    pub total_cycles: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Vehicles tracked at the end
    pub final_vehicle_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub records: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub created: u64,
    pub evicted: u64,
    pub skipped_cycles: u64,
    pub fetch_failures: u64,
    pub corrupted_records: u64,
    pub frames: u64,
    pub tweens_cancelled: u64,

    /// Distance between freshly confirmed and true positions (metres)
    pub mean_error_m: f64,
    pub max_error_m: f64,

    /// Largest drawn displacement in a single frame (metres)
    pub max_frame_jump_m: f64,
}

/// Runs fleet scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Buses in the simulated fleet
    num_vehicles: usize,

    /// Duration of open-ended scenarios in seconds
    max_duration_secs: f64,

    /// Tracker configuration under test
    config: TrackerConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_vehicles: usize) -> Self {
        Self {
            seed,
            num_vehicles,
            max_duration_secs: 60.0,
            config: TrackerConfig::default(),
        }
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs.max(0.0);
        self
    }

    /// Sets the tracker configuration. It must already be validated.
    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, false).0
    }

    /// Runs a scenario and records frames for replay.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let (result, export) = self.execute(scenario, true);
        let export = export.unwrap_or_else(|| SimExport::new(scenario.name(), self.seed));
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, export: bool) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let export = export.then(|| SimExport::new(scenario.name(), self.seed));
        let mut h = match scenario {
            ScenarioId::LiveLoop => return self.run_live_loop(export),
            _ => Harness::new(self.seed, &self.config, self.num_vehicles, export),
        };

        match scenario {
            ScenarioId::SteadyFleet => self.run_steady_fleet(&mut h),
            ScenarioId::MalformedStorm => self.run_malformed_storm(&mut h),
            ScenarioId::FeedOutage => self.run_feed_outage(&mut h),
            ScenarioId::StaleFeed => self.run_stale_feed(&mut h),
            ScenarioId::RapidUpdates => self.run_rapid_updates(&mut h),
            ScenarioId::Dropout => self.run_dropout(&mut h),
            ScenarioId::RouteChange => self.run_route_change(&mut h),
            ScenarioId::LiveLoop => {}
        }

        h.finish(scenario, self.seed)
    }

    /// Feed intervals covering the configured duration (at least one).
    fn intervals(&self, interval: Duration) -> u64 {
        let total_ms = (self.max_duration_secs * 1000.0) as u64;
        let step_ms = interval.as_millis().max(1) as u64;
        total_ms.div_ceil(step_ms).max(1)
    }

    /// Fetches needed for an unrefreshed entity to age out.
    fn intervals_to_expire(&self) -> u64 {
        self.config.grace_period_ms / self.config.feed_interval_ms + 1
    }

    /// SIM-001: shuffled healthy feed.
    fn run_steady_fleet(&self, h: &mut Harness) {
        let feed_interval = self.config.feed_interval();
        h.controller.set_shuffle(true);
        h.continuity_limit = Some(h.jump_limit(feed_interval));

        h.run_intervals(self.intervals(feed_interval), feed_interval);

        let active = h.active_count();
        if h.registry().len() != active {
            h.fail(format!("tracking {} of {} buses", h.registry().len(), active));
        }
        if h.cycle.stats().rejected > 0 {
            h.fail(format!("{} records rejected on a clean feed", h.cycle.stats().rejected));
        }
        if h.cycle.stats().total_evicted() > 0 {
            h.fail(format!("{} buses evicted on a healthy feed", h.cycle.stats().total_evicted()));
        }
        let mean = h.mean_error();
        if mean > 10.0 {
            h.fail(format!("mean position error {:.2}m exceeds 10m", mean));
        }

        info!("✓ SteadyFleet: {} buses, mean error {:.2}m", active, mean);
    }

    /// SIM-002: 30% of records corrupted.
    fn run_malformed_storm(&self, h: &mut Harness) {
        let feed_interval = self.config.feed_interval();
        h.controller.set_corruption_rate(0.3);
        h.event(SimEvent::warn("corruption rate 30%"));

        h.run_intervals(self.intervals(feed_interval).max(WARMUP_INTERVALS), feed_interval);

        let corrupted = h.feed.stats().corrupted;
        let rejected = h.cycle.stats().rejected;
        if rejected != corrupted {
            h.fail(format!("{} corrupted records but {} rejections", corrupted, rejected));
        }
        if corrupted == 0 {
            h.fail("no records were corrupted".to_string());
        }
        if h.registry().len() > h.active_count() {
            h.fail(format!(
                "{} tracked entities for {} buses",
                h.registry().len(),
                h.active_count()
            ));
        }

        info!("✓ MalformedStorm: {} corrupted, {} rejected", corrupted, rejected);
    }

    /// SIM-003: outage longer than the grace period.
    fn run_feed_outage(&self, h: &mut Harness) {
        let feed_interval = self.config.feed_interval();
        let expire = self.intervals_to_expire();
        let fleet = h.active_count();

        h.run_intervals(WARMUP_INTERVALS, feed_interval);
        h.expect_tracked(fleet, "before outage");

        h.controller.start_outage();
        h.event(SimEvent::warn("feed outage"));
        h.run_intervals(expire - 1, feed_interval);
        h.expect_tracked(fleet, "within grace period");

        h.run_intervals(1, feed_interval);
        h.expect_tracked(0, "after grace period");
        h.expect_all_evictions(EvictionReason::GraceExpired);

        h.controller.restore();
        h.event(SimEvent::info("feed restored"));
        h.run_intervals(2, feed_interval);
        h.expect_tracked(fleet, "after recovery");

        if h.fetch_failures != expire {
            h.fail(format!("{} failed fetches, expected {}", h.fetch_failures, expire));
        }

        info!("✓ FeedOutage: {} buses evicted and rebuilt", fleet);
    }

    /// SIM-004: frozen feed ages out like an outage.
    fn run_stale_feed(&self, h: &mut Harness) {
        let feed_interval = self.config.feed_interval();
        let expire = self.intervals_to_expire();
        let fleet = h.active_count();

        h.run_intervals(WARMUP_INTERVALS, feed_interval);
        h.controller.freeze();
        h.event(SimEvent::warn("feed frozen"));
        h.run_intervals(expire, feed_interval);
        h.expect_tracked(0, "after frozen grace period");

        let skipped = h.cycle.stats().skipped_cycles;
        if skipped != expire {
            h.fail(format!("{} cycles skipped, expected {}", skipped, expire));
        }

        h.controller.restore();
        h.event(SimEvent::info("feed restored"));
        h.run_intervals(1, feed_interval);
        h.expect_tracked(fleet, "after recovery");

        info!("✓ StaleFeed: {} identical batches skipped", skipped);
    }

    /// SIM-005: fixes arrive three times per tween.
    fn run_rapid_updates(&self, h: &mut Harness) {
        let update_interval = (self.config.tween_duration() / 3).max(Duration::from_millis(1));
        h.continuity_limit = Some(h.jump_limit(update_interval));

        h.run_intervals(self.intervals(update_interval), update_interval);

        let tweens = h.registry().tween_stats();
        if h.registry().len() > 0 && tweens.cancelled == 0 {
            h.fail("no tween was ever interrupted".to_string());
        }
        if tweens.halted > 0 {
            h.fail(format!("{} tweens halted on non-finite positions", tweens.halted));
        }
        h.expect_tracked(h.active_count(), "at end");

        info!(
            "✓ RapidUpdates: {} tweens restarted, max frame jump {:.2}m",
            tweens.cancelled, h.max_jump
        );
    }

    /// SIM-006: a third of the fleet leaves service.
    fn run_dropout(&self, h: &mut Harness) {
        let feed_interval = self.config.feed_interval();
        let grace = self.config.grace_period();

        h.run_intervals(WARMUP_INTERVALS, feed_interval);

        let retired: HashSet<String> = h.with_oracle(|oracle| {
            let ids: Vec<String> = oracle.active_vehicles().map(|v| v.id.clone()).collect();
            ids.into_iter()
                .step_by(3)
                .filter(|id| oracle.retire(id))
                .collect()
        });
        h.event(SimEvent::info(format!("{} buses left service", retired.len())));

        h.run_intervals(self.intervals_to_expire() + 1, feed_interval);

        let evicted: Vec<Eviction> = h.evictions.iter().map(|(_, e)| e.clone()).collect();
        for eviction in &evicted {
            if !retired.contains(&eviction.id) {
                h.fail(format!("in-service bus {} was evicted", eviction.id));
            } else if eviction.idle <= grace || eviction.idle > grace + feed_interval {
                h.fail(format!(
                    "bus {} evicted after {:?} idle, grace is {:?}",
                    eviction.id, eviction.idle, grace
                ));
            }
        }
        if evicted.len() != retired.len() {
            h.fail(format!("{} of {} retired buses evicted", evicted.len(), retired.len()));
        }
        h.expect_tracked(h.active_count(), "after dropout");

        info!("✓ Dropout: {} retired buses evicted", evicted.len());
    }

    /// SIM-007: route switches mid-run.
    fn run_route_change(&self, h: &mut Harness) {
        let feed_interval = self.config.feed_interval();
        let fleet = h.active_count();

        h.run_intervals(WARMUP_INTERVALS, feed_interval);

        let switched = h.with_oracle(|oracle| {
            let changes: Vec<(String, String)> = oracle
                .active_vehicles()
                .step_by(2)
                .map(|v| {
                    let at = ROUTES.iter().position(|r| *r == v.route_id).unwrap_or(0);
                    (v.id.clone(), ROUTES[(at + 1) % ROUTES.len()].to_string())
                })
                .collect();
            for (id, route) in &changes {
                oracle.change_route(id, route);
            }
            changes.len()
        });
        h.event(SimEvent::info(format!("{} buses switched route", switched)));

        h.run_intervals(2, feed_interval);

        let truth: HashMap<String, String> = h.with_oracle(|oracle| {
            oracle
                .active_vehicles()
                .map(|v| (v.id.clone(), v.route_id.clone()))
                .collect()
        });
        let mismatched: Vec<String> = h
            .views()
            .into_iter()
            .filter(|v| truth.get(&v.id) != Some(&v.route_id) || v.color != color_for(&v.route_id))
            .map(|v| v.id)
            .collect();
        if !mismatched.is_empty() {
            h.fail(format!("stale route on {:?}", mismatched));
        }

        let created = h.cycle.stats().created;
        if created != fleet as u64 {
            h.fail(format!("{} entities created for {} buses", created, fleet));
        }
        h.expect_tracked(fleet, "after route change");

        info!("✓ RouteChange: {} buses switched in place", switched);
    }

    /// SIM-008: the async runtime under the virtual clock.
    fn run_live_loop(&self, export: Option<SimExport>) -> (ScenarioResult, Option<SimExport>) {
        let context = SimContext::shared(self.seed);
        let mut oracle = Oracle::new(context.derive_rng(PHYSICS_STREAM), DEFAULT_ORIGIN);
        oracle.spawn_fleet(self.num_vehicles, FLEET_RADIUS_M);
        let frame = oracle.frame();
        let feed = Arc::new(SimFeed::new(Arc::clone(&context), oracle));
        feed.controller().set_shuffle(true);

        let probe = Arc::new(Mutex::new(LiveProbe {
            export,
            ..LiveProbe::default()
        }));
        let stride = (self.config.feed_interval_ms / self.config.frame_interval_ms).max(1);
        let sink = {
            let probe = Arc::clone(&probe);
            let oracle = feed.oracle();
            let context = Arc::clone(&context);
            move |views: &[VehicleView]| {
                let mut probe = probe.lock().unwrap();
                probe.observe(views);
                if (probe.renders - 1) % stride == 0 {
                    let ground_truth = ground_truth_positions(&oracle.lock().unwrap());
                    let time_sec = context.now().as_secs_f64();
                    if let Some(export) = probe.export.as_mut() {
                        export.add_frame(SimFrame {
                            time_sec,
                            ground_truth,
                            tracked: views.iter().map(TrackedPosition::from).collect(),
                            events: Vec::new(),
                        });
                    }
                }
            }
        };

        let tracker = FleetTracker::new(Arc::clone(&context), Arc::clone(&feed), self.config.clone());
        let mut tracker = match tracker {
            Ok(tracker) => tracker.with_sink(sink),
            Err(e) => return self.setup_failure(ScenarioId::LiveLoop, format!("invalid config: {}", e)),
        };

        let runtime = match tokio::runtime::Builder::new_current_thread().build() {
            Ok(rt) => rt,
            Err(e) => return self.setup_failure(ScenarioId::LiveLoop, format!("runtime: {}", e)),
        };

        let duration = Duration::from_secs_f64(self.max_duration_secs);
        let stats = runtime.block_on(tracker.run_for(duration));

        let mut failures = Vec::new();
        let feed_ns = self.config.feed_interval().as_nanos().max(1);
        let expected_cycles = duration.as_nanos().div_ceil(feed_ns) as u64;
        if stats.cycles != expected_cycles {
            failures.push(format!("{} cycles, expected {}", stats.cycles, expected_cycles));
        }
        let fleet = feed.oracle().lock().unwrap().active_count();
        if tracker.registry().len() != fleet {
            failures.push(format!("tracking {} of {} buses", tracker.registry().len(), fleet));
        }

        let (error, mut export) = {
            let mut probe = probe.lock().unwrap();
            if probe.invalid_views > 0 {
                failures.push(format!("{} rendered views were invalid", probe.invalid_views));
            }
            if probe.renders != stats.cycles + stats.frames {
                failures.push(format!(
                    "{} renders for {} cycles and {} frames",
                    probe.renders, stats.cycles, stats.frames
                ));
            }
            let error = confirmed_error(tracker.registry(), &feed.oracle().lock().unwrap(), &frame, None);
            (error, probe.export.take())
        };

        let passed = failures.is_empty();
        let feed_stats = feed.stats();
        let metrics = ScenarioMetrics {
            records: stats.records,
            accepted: stats.accepted,
            rejected: stats.rejected,
            created: stats.created,
            evicted: stats.total_evicted(),
            skipped_cycles: stats.skipped_cycles,
            fetch_failures: tracker.fetch_failures(),
            corrupted_records: feed_stats.corrupted,
            frames: stats.frames,
            tweens_cancelled: tracker.registry().tween_stats().cancelled,
            mean_error_m: error.mean(),
            max_error_m: error.max,
            max_frame_jump_m: 0.0,
        };

        info!(
            "✓ LiveLoop: {} cycles, {} frames, {} buses",
            stats.cycles,
            stats.frames,
            tracker.registry().len()
        );

        if let Some(export) = export.as_mut() {
            export.finalize(passed, Some(metrics.mean_error_m));
        }

        let result = ScenarioResult {
            scenario: ScenarioId::LiveLoop,
            seed: self.seed,
            passed,
            total_cycles: stats.cycles,
            final_time_secs: context.now().as_secs_f64(),
            final_vehicle_count: tracker.registry().len(),
            failure_reason: (!passed).then(|| failures.join("; ")),
            metrics,
        };
        (result, export)
    }

    fn setup_failure(&self, scenario: ScenarioId, reason: String) -> (ScenarioResult, Option<SimExport>) {
        warn!("{} could not start: {}", scenario.name(), reason);
        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_cycles: 0,
            final_time_secs: 0.0,
            final_vehicle_count: 0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        };
        (result, None)
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// Drives a `ReconciliationCycle` against the simulated feed, one feed
/// interval at a time, checking tracker invariants after every cycle.
struct Harness {
    context: Arc<SimContext>,
    feed: SimFeed,
    controller: SimFeedController,
    frame: LocalFrame,
    cycle: ReconciliationCycle,

    /// Every id the oracle ever put in the feed
    known_ids: HashSet<String>,

    /// Evictions with the tracker time they happened
    evictions: Vec<(Duration, Eviction)>,

    failures: Vec<String>,
    fetch_failures: u64,
    error: ErrorSummary,
    max_jump: f64,

    /// Fail if a drawn position moves further than this in one frame
    continuity_limit: Option<f64>,

    export: Option<SimExport>,
    pending_events: Vec<SimEvent>,
}

impl Harness {
    fn new(seed: u64, config: &TrackerConfig, vehicles: usize, export: Option<SimExport>) -> Self {
        let context = SimContext::shared(seed);
        let mut oracle = Oracle::new(context.derive_rng(PHYSICS_STREAM), DEFAULT_ORIGIN);
        let known_ids = oracle.spawn_fleet(vehicles, FLEET_RADIUS_M).into_iter().collect();
        let frame = oracle.frame();
        let feed = SimFeed::new(Arc::clone(&context), oracle);
        let controller = feed.controller();

        Self {
            context,
            feed,
            controller,
            frame,
            cycle: ReconciliationCycle::new(config.clone()),
            known_ids,
            evictions: Vec::new(),
            failures: Vec::new(),
            fetch_failures: 0,
            error: ErrorSummary::default(),
            max_jump: 0.0,
            continuity_limit: None,
            export,
            pending_events: Vec::new(),
        }
    }

    fn registry(&self) -> &EntityRegistry {
        self.cycle.registry()
    }

    fn with_oracle<R>(&self, f: impl FnOnce(&mut Oracle) -> R) -> R {
        let oracle = self.feed.oracle();
        let mut guard = oracle.lock().unwrap();
        f(&mut guard)
    }

    fn active_count(&self) -> usize {
        self.with_oracle(|oracle| oracle.active_count())
    }

    fn views(&self) -> Vec<VehicleView> {
        let mut views: Vec<VehicleView> = self.registry().entities().map(VehicleView::from_entity).collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    fn fail(&mut self, message: String) {
        warn!("  ✗ {}", message);
        if self.failures.len() < 8 {
            self.failures.push(message);
        }
    }

    fn event(&mut self, event: SimEvent) {
        info!("  t={:.1}s | {}", self.context.now().as_secs_f64(), event.message);
        self.pending_events.push(event);
    }

    fn expect_tracked(&mut self, expected: usize, when: &str) {
        let tracked = self.registry().len();
        if tracked != expected {
            self.fail(format!("{} buses tracked {}, expected {}", tracked, when, expected));
        }
    }

    fn expect_all_evictions(&mut self, reason: EvictionReason) {
        let wrong = self.evictions.iter().filter(|(_, e)| e.reason != reason).count();
        if wrong > 0 {
            self.fail(format!("{} evictions not {:?}", wrong, reason));
        }
    }

    fn mean_error(&self) -> f64 {
        self.error.mean()
    }

    /// Largest plausible per-frame motion when fixes arrive every `update_interval`.
    fn jump_limit(&self, update_interval: Duration) -> f64 {
        let config = self.cycle.config();
        let spread = MAX_SPEED_MPS * update_interval.as_secs_f64() + NOISE_SPREAD_M;
        let ratio = if config.tween_duration_ms == 0 {
            1.0
        } else {
            (config.frame_interval_ms as f64 / config.tween_duration_ms as f64).min(1.0)
        };
        spread * ratio
    }

    fn run_intervals(&mut self, count: u64, interval: Duration) {
        for _ in 0..count {
            self.run_interval(interval);
        }
    }

    /// One fetch and reconciliation, then frames until the next fetch.
    fn run_interval(&mut self, interval: Duration) {
        let fetched = self.feed.next_batch();
        let now = self.context.now();

        let report = match fetched {
            Ok(batch) => self.cycle.run_cycle(Some(&batch.records), now),
            Err(e) => {
                self.fetch_failures += 1;
                debug!("  t={:.1}s | fetch failed: {}", now.as_secs_f64(), e);
                self.cycle.run_cycle(None, now)
            }
        };
        self.evictions
            .extend(report.evicted.iter().cloned().map(|e| (now, e)));

        let fresh = self.with_oracle(|oracle| confirmed_error(self.cycle.registry(), oracle, &self.frame, Some(now)));
        self.error.merge(&fresh);
        self.check_invariants(now);
        self.record_frame(now);
        self.run_frames(now + interval);
    }

    fn run_frames(&mut self, until: Duration) {
        let frame_interval = self.cycle.config().frame_interval();
        let mut drawn: HashMap<String, GeoPoint> = self
            .registry()
            .entities()
            .map(|e| (e.id.clone(), e.current_position))
            .collect();

        let mut worst = 0.0f64;
        while self.context.now() + frame_interval <= until {
            self.context.advance_time(frame_interval);
            self.cycle.frame(self.context.now());

            for entity in self.cycle.registry().entities() {
                if let Some(previous) = drawn.get_mut(&entity.id) {
                    worst = worst.max(self.frame.distance_m(previous, &entity.current_position));
                    *previous = entity.current_position;
                }
            }
        }
        self.context.set_time(until.as_nanos() as u64);

        self.max_jump = self.max_jump.max(worst);
        if let Some(limit) = self.continuity_limit {
            if worst > limit {
                self.fail(format!("drawn position jumped {:.2}m in one frame (limit {:.2}m)", worst, limit));
            }
        }
    }

    fn check_invariants(&mut self, now: Duration) {
        let grace = self.cycle.config().grace_period();
        let mut problems = Vec::new();

        for e in self.registry().entities() {
            if !e.current_position.is_finite() || !e.target_position.is_finite() {
                problems.push(format!("bus {} has a non-finite position", e.id));
            }
            if !(0.0..360.0).contains(&e.heading) {
                problems.push(format!("bus {} has heading {}", e.id, e.heading));
            }
            if e.idle_for(now) > grace {
                problems.push(format!("bus {} survived the sweep after {:?} idle", e.id, e.idle_for(now)));
            }
            if !self.known_ids.contains(&e.id) {
                problems.push(format!("phantom bus {}", e.id));
            }
        }
        if self.registry().tweening_count() > self.registry().len() {
            problems.push("more tweens than vehicles".to_string());
        }

        for problem in problems {
            self.fail(problem);
        }
    }

    fn record_frame(&mut self, now: Duration) {
        if self.export.is_none() {
            return;
        }
        let ground_truth = self.with_oracle(|oracle| ground_truth_positions(oracle));
        let tracked = self.views().iter().map(TrackedPosition::from).collect();
        let events = std::mem::take(&mut self.pending_events);

        if let Some(export) = self.export.as_mut() {
            export.add_frame(SimFrame {
                time_sec: now.as_secs_f64(),
                ground_truth,
                tracked,
                events,
            });
        }
    }

    fn finish(self, scenario: ScenarioId, seed: u64) -> (ScenarioResult, Option<SimExport>) {
        let stats = self.cycle.stats().clone();
        let feed_stats = self.feed.stats();
        let tweens = self.registry().tween_stats();

        let metrics = ScenarioMetrics {
            records: stats.records,
            accepted: stats.accepted,
            rejected: stats.rejected,
            created: stats.created,
            evicted: stats.total_evicted(),
            skipped_cycles: stats.skipped_cycles,
            fetch_failures: self.fetch_failures,
            corrupted_records: feed_stats.corrupted,
            frames: stats.frames,
            tweens_cancelled: tweens.cancelled,
            mean_error_m: self.error.mean(),
            max_error_m: self.error.max,
            max_frame_jump_m: self.max_jump,
        };

        let passed = self.failures.is_empty();
        let mut export = self.export;
        if let Some(export) = export.as_mut() {
            export.finalize(passed, Some(metrics.mean_error_m));
        }

        let result = ScenarioResult {
            scenario,
            seed,
            passed,
            total_cycles: stats.cycles,
            final_time_secs: self.context.now().as_secs_f64(),
            final_vehicle_count: self.cycle.registry().len(),
            failure_reason: (!passed).then(|| self.failures.join("; ")),
            metrics,
        };
        (result, export)
    }
}

// ============================================================================
// MEASUREMENT
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct ErrorSummary {
    sum: f64,
    samples: u64,
    max: f64,
}

impl ErrorSummary {
    fn merge(&mut self, other: &ErrorSummary) {
        self.sum += other.sum;
        self.samples += other.samples;
        self.max = self.max.max(other.max);
    }

    fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sum / self.samples as f64
        }
    }
}

/// Distance between each confirmed position and the bus's true position.
///
/// With `seen_at`, only entities confirmed at that instant are measured,
/// since older fixes lag the truth by design.
fn confirmed_error(
    registry: &EntityRegistry,
    oracle: &Oracle,
    frame: &LocalFrame,
    seen_at: Option<Duration>,
) -> ErrorSummary {
    let mut summary = ErrorSummary::default();
    for entity in registry.entities() {
        if seen_at.is_some_and(|t| entity.last_seen_at != t) {
            continue;
        }
        if let Some(truth) = oracle.true_position(&entity.id) {
            let error = frame.distance_m(&entity.target_position, &truth);
            summary.sum += error;
            summary.samples += 1;
            summary.max = summary.max.max(error);
        }
    }
    summary
}

fn ground_truth_positions(oracle: &Oracle) -> Vec<VehiclePosition> {
    oracle
        .ground_truth()
        .iter()
        .map(|(id, route, position)| VehiclePosition::new(id, route, *position))
        .collect()
}

/// What the live loop's render sink saw.
#[derive(Default)]
struct LiveProbe {
    renders: u64,
    invalid_views: u64,
    export: Option<SimExport>,
}

impl LiveProbe {
    fn observe(&mut self, views: &[VehicleView]) {
        self.renders += 1;
        self.invalid_views += views
            .iter()
            .filter(|v| !v.position.is_finite() || !(0.0..360.0).contains(&v.heading))
            .count() as u64;
    }
}
