//! BusFlow Deterministic Simulation Harness
//!
//! Runs the fleet tracker against a simulated feed where every source of
//! non-determinism is controlled:
//! - **Time**: virtual clock, advanced by the harness or by `sleep`
//! - **Feed**: outages, frozen snapshots, corrupted records, shuffling
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │  ┌────────────────────┐      ┌────────────────────────┐  │
//! │  │ SimContext         │      │ ReconciliationCycle /  │  │
//! │  │ (virtual clock)    │─────►│ FleetTracker           │  │
//! │  └────────────────────┘      └───────────▲────────────┘  │
//! │                                          │ JSON records  │
//! │  ┌────────────────────┐      ┌───────────┴────────────┐  │
//! │  │ Oracle             │─────►│ SimFeed                │  │
//! │  │ (ground truth)     │      │ (fault injection)      │  │
//! │  └────────────────────┘      └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use busflow_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 20).run(ScenarioId::FeedOutage);
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod exporter;
mod feed;
mod oracle;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use error::SimError;
pub use exporter::{SimEvent, SimExport, SimFrame, TrackedPosition, VehiclePosition};
pub use feed::{FeedStats, SimFeed, SimFeedController};
pub use oracle::{GroundTruthVehicle, LocalFrame, Oracle, DEFAULT_ORIGIN, MAX_SPEED_MPS, ROUTES};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
