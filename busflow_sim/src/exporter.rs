//! JSON exporter for map replay.
//!
//! Exports simulation frames (ground truth next to what the tracker drew)
//! so a run can be replayed on the web map.

use busflow_core::{GeoPoint, VehicleView};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// True bus positions
    pub ground_truth: Vec<VehiclePosition>,

    /// Vehicles as drawn by the tracker
    pub tracked: Vec<TrackedPosition>,

    /// Events (outages, freezes, route changes, etc.)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub events: Vec<SimEvent>,
}

/// True position of a bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub id: String,
    pub route_id: String,
    pub lat: f64,
    pub lng: f64,
}

impl VehiclePosition {
    pub fn new(id: &str, route_id: &str, position: GeoPoint) -> Self {
        Self {
            id: id.to_string(),
            route_id: route_id.to_string(),
            lat: position.lat,
            lng: position.lng,
        }
    }
}

/// Tracked vehicle, as rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub id: String,
    pub route_id: String,
    pub lat: f64,
    pub lng: f64,
    pub heading: f64,
    pub color: String,
}

impl From<&VehicleView> for TrackedPosition {
    fn from(view: &VehicleView) -> Self {
        Self {
            id: view.id.clone(),
            route_id: view.route_id.clone(),
            lat: view.position.lat,
            lng: view.position.lng,
            heading: view.heading,
            color: view.color.to_string(),
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    /// Mean distance between confirmed and true positions, in metres
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_error_m: Option<f64>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            mean_error_m: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, mean_error_m: Option<f64>) {
        self.passed = passed;
        self.mean_error_m = mean_error_m;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_serializes() {
        let mut export = SimExport::new("steady_fleet", 42);
        export.add_frame(SimFrame {
            time_sec: 5.0,
            ground_truth: vec![VehiclePosition::new("1000", "7", GeoPoint::new(50.0, -104.0))],
            tracked: vec![],
            events: vec![SimEvent::warn("outage")],
        });
        export.finalize(true, Some(2.5));

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["duration_sec"], 5.0);
        assert_eq!(json["frames"][0]["ground_truth"][0]["route_id"], "7");
        assert_eq!(json["frames"][0]["events"][0]["level"], "warn");

        let back: SimExport = serde_json::from_value(json).unwrap();
        assert_eq!(back.frames.len(), 1);
    }
}
