//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the simulated fleet:
//! - True positions of all buses in a local east/north metre frame
//! - Constant-velocity kinematics
//! - Feed records with GPS noise, in the live feed's wire format

use busflow_core::{FeedFeature, GeoPoint};
use nalgebra::Vector2;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Downtown Regina.
pub const DEFAULT_ORIGIN: GeoPoint = GeoPoint { lat: 50.4452, lng: -104.6189 };

/// Top speed of a spawned bus.
pub const MAX_SPEED_MPS: f64 = 14.0;

/// Route labels handed out to spawned buses.
pub const ROUTES: [&str; 12] = ["1", "2", "3", "4", "7", "8", "9", "10", "12", "18", "21", "30"];

// ============================================================================
// LOCAL FRAME
// ============================================================================

/// Equirectangular projection around an origin.
///
/// Accurate to well under a metre across a city, which is all the
/// simulation needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    pub origin: GeoPoint,
}

impl LocalFrame {
    pub fn new(origin: GeoPoint) -> Self {
        Self { origin }
    }

    /// East/north metres → WGS84.
    pub fn to_geo(&self, local: &Vector2<f64>) -> GeoPoint {
        let lat = self.origin.lat + (local.y / EARTH_RADIUS_M).to_degrees();
        let lng = self.origin.lng
            + (local.x / (EARTH_RADIUS_M * self.origin.lat.to_radians().cos())).to_degrees();
        GeoPoint::new(lat, lng)
    }

    /// WGS84 → east/north metres.
    pub fn to_local(&self, point: &GeoPoint) -> Vector2<f64> {
        let north = (point.lat - self.origin.lat).to_radians() * EARTH_RADIUS_M;
        let east = (point.lng - self.origin.lng).to_radians()
            * EARTH_RADIUS_M
            * self.origin.lat.to_radians().cos();
        Vector2::new(east, north)
    }

    /// Planar distance between two coordinates, in metres.
    pub fn distance_m(&self, a: &GeoPoint, b: &GeoPoint) -> f64 {
        (self.to_local(a) - self.to_local(b)).norm()
    }
}

// ============================================================================
// GROUND TRUTH
// ============================================================================

/// A ground truth bus in the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthVehicle {
    /// Feed identity (`properties.b`)
    pub id: String,

    /// Current route (`properties.r`)
    pub route_id: String,

    /// Position [east, north] in metres from the origin
    pub position: Vector2<f64>,

    /// Velocity [east, north] in m/s
    pub velocity: Vector2<f64>,

    /// Still reporting to the feed
    pub in_service: bool,
}

/// The Oracle - maintains ground truth and generates feed records.
pub struct Oracle {
    /// RNG for physics (noise, spawn placement)
    physics_rng: ChaCha8Rng,

    /// All vehicles, ordered by id so output is reproducible
    vehicles: BTreeMap<String, GroundTruthVehicle>,

    frame: LocalFrame,

    /// Current simulation time (seconds)
    current_time: f64,

    /// GPS noise standard deviation (metres)
    position_noise_std: f64,
}

impl Oracle {
    /// Creates an empty oracle. Use `SimContext::derive_rng` for the RNG so
    /// physics stays independent of every other random stream.
    pub fn new(physics_rng: ChaCha8Rng, origin: GeoPoint) -> Self {
        Self {
            physics_rng,
            vehicles: BTreeMap::new(),
            frame: LocalFrame::new(origin),
            current_time: 0.0,
            position_noise_std: 3.0, // consumer GPS
        }
    }

    /// Sets the GPS noise standard deviation (negative values clamp to 0).
    pub fn set_position_noise(&mut self, std_dev: f64) {
        self.position_noise_std = std_dev.max(0.0);
    }

    pub fn frame(&self) -> LocalFrame {
        self.frame
    }

    /// Adds a bus with an explicit state.
    pub fn spawn_vehicle(
        &mut self,
        id: &str,
        route_id: &str,
        position: Vector2<f64>,
        velocity: Vector2<f64>,
    ) {
        self.vehicles.insert(
            id.to_string(),
            GroundTruthVehicle {
                id: id.to_string(),
                route_id: route_id.to_string(),
                position,
                velocity,
                in_service: true,
            },
        );
    }

    /// Spawns `count` buses scattered within `radius_m` of the origin, each
    /// heading in a random direction at 4 m/s up to `MAX_SPEED_MPS`.
    /// Returns their ids.
    pub fn spawn_fleet(&mut self, count: usize, radius_m: f64) -> Vec<String> {
        let base = 1000 + self.vehicles.len();
        (0..count)
            .map(|i| {
                let id = (base + i).to_string();
                let route = ROUTES[self.physics_rng.gen_range(0..ROUTES.len())];
                let position = Vector2::new(
                    self.physics_rng.gen_range(-radius_m..=radius_m),
                    self.physics_rng.gen_range(-radius_m..=radius_m),
                );
                let angle = self.physics_rng.gen_range(0.0..std::f64::consts::TAU);
                let speed = self.physics_rng.gen_range(4.0..MAX_SPEED_MPS);
                let velocity = Vector2::new(angle.sin(), angle.cos()) * speed;
                self.spawn_vehicle(&id, route, position, velocity);
                id
            })
            .collect()
    }

    /// Takes a bus out of service; it stops appearing in the feed.
    pub fn retire(&mut self, id: &str) -> bool {
        match self.vehicles.get_mut(id) {
            Some(v) if v.in_service => {
                v.in_service = false;
                true
            }
            _ => false,
        }
    }

    /// Moves a bus onto a different route.
    pub fn change_route(&mut self, id: &str, route_id: &str) -> bool {
        match self.vehicles.get_mut(id) {
            Some(v) => {
                v.route_id = route_id.to_string();
                true
            }
            None => false,
        }
    }

    /// Advances physics by dt seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;

        // Simple constant-velocity model
        for vehicle in self.vehicles.values_mut() {
            if vehicle.in_service {
                vehicle.position += vehicle.velocity * dt;
            }
        }
    }

    /// Advances physics up to an absolute time; never steps backwards.
    pub fn advance_to(&mut self, time_secs: f64) {
        let dt = time_secs - self.current_time;
        if dt > 0.0 {
            self.step(dt);
        }
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.current_time
    }

    /// Returns all in-service vehicles, ordered by id.
    pub fn active_vehicles(&self) -> impl Iterator<Item = &GroundTruthVehicle> {
        self.vehicles.values().filter(|v| v.in_service)
    }

    pub fn active_count(&self) -> usize {
        self.active_vehicles().count()
    }

    pub fn vehicle(&self, id: &str) -> Option<&GroundTruthVehicle> {
        self.vehicles.get(id)
    }

    /// True position of a vehicle, in WGS84.
    pub fn true_position(&self, id: &str) -> Option<GeoPoint> {
        self.vehicles.get(id).map(|v| self.frame.to_geo(&v.position))
    }

    /// True positions of every in-service vehicle.
    pub fn ground_truth(&self) -> Vec<(String, String, GeoPoint)> {
        self.active_vehicles()
            .map(|v| (v.id.clone(), v.route_id.clone(), self.frame.to_geo(&v.position)))
            .collect()
    }

    /// One feed record per in-service vehicle, with Gaussian GPS noise.
    pub fn generate_features(&mut self) -> Vec<FeedFeature> {
        let normal = Normal::new(0.0, self.position_noise_std).ok();
        let frame = self.frame;
        let rng = &mut self.physics_rng;

        self.vehicles
            .values()
            .filter(|v| v.in_service)
            .map(|v| {
                let noise = match &normal {
                    Some(n) => Vector2::new(n.sample(&mut *rng), n.sample(&mut *rng)),
                    None => Vector2::zeros(),
                };
                FeedFeature::new(v.id.clone(), v.route_id.clone(), frame.to_geo(&(v.position + noise)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use proptest::prelude::*;

    fn oracle(seed: u64) -> Oracle {
        Oracle::new(SimContext::new(seed).derive_rng(0), DEFAULT_ORIGIN)
    }

    #[test]
    fn test_local_frame_round_trip() {
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let local = Vector2::new(1200.0, -800.0);
        let back = frame.to_local(&frame.to_geo(&local));
        assert!((back - local).norm() < 1e-6);
    }

    #[test]
    fn test_one_km_north() {
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let p = frame.to_geo(&Vector2::new(0.0, 1000.0));
        assert!((p.lat - DEFAULT_ORIGIN.lat - 0.008993).abs() < 1e-5);
        assert_eq!(p.lng, DEFAULT_ORIGIN.lng);
    }

    #[test]
    fn test_oracle_physics_step() {
        let mut oracle = oracle(42);
        oracle.spawn_vehicle("B1", "7", Vector2::zeros(), Vector2::new(10.0, 0.0));

        oracle.step(2.0);
        assert!((oracle.vehicle("B1").unwrap().position.x - 20.0).abs() < 1e-9);

        oracle.advance_to(1.0); // never backwards
        assert_eq!(oracle.time(), 2.0);
    }

    #[test]
    fn test_retired_vehicle_leaves_feed() {
        let mut oracle = oracle(42);
        let ids = oracle.spawn_fleet(3, 1000.0);
        assert!(oracle.retire(&ids[1]));
        assert!(!oracle.retire(&ids[1]));

        let features = oracle.generate_features();
        assert_eq!(features.len(), 2);
        assert!(features.iter().all(|f| f.properties.b != ids[1]));
    }

    #[test]
    fn test_noise_is_deterministic() {
        let mut a = oracle(7);
        let mut b = oracle(7);
        a.spawn_fleet(5, 2000.0);
        b.spawn_fleet(5, 2000.0);
        assert_eq!(a.generate_features(), b.generate_features());
    }

    #[test]
    fn test_noise_magnitude() {
        let mut oracle = oracle(3);
        oracle.spawn_vehicle("B1", "7", Vector2::zeros(), Vector2::zeros());
        let frame = oracle.frame();

        for _ in 0..50 {
            let f = &oracle.generate_features()[0];
            assert!(frame.distance_m(&f.position(), &DEFAULT_ORIGIN) < 25.0);
        }

        oracle.set_position_noise(0.0);
        assert_eq!(oracle.generate_features()[0].position(), DEFAULT_ORIGIN);
    }

    proptest! {
        #[test]
        fn prop_local_frame_round_trip(east in -20_000.0f64..20_000.0, north in -20_000.0f64..20_000.0) {
            let frame = LocalFrame::new(DEFAULT_ORIGIN);
            let local = Vector2::new(east, north);
            let back = frame.to_local(&frame.to_geo(&local));
            prop_assert!((back - local).norm() < 1e-6);
        }

        #[test]
        fn prop_spawned_fleet_within_speed_limit(seed in any::<u64>(), count in 1usize..20) {
            let mut oracle = oracle(seed);
            let ids = oracle.spawn_fleet(count, 5000.0);
            prop_assert_eq!(ids.len(), count);
            for id in &ids {
                let v = oracle.vehicle(id).unwrap();
                prop_assert!(v.velocity.norm() <= MAX_SPEED_MPS + 1e-9);
                prop_assert!(v.position.x.abs() <= 5000.0 && v.position.y.abs() <= 5000.0);
            }
        }
    }
}
