//! BusFlow Core - Live Fleet Tracker
//!
//! Turns a periodic, unordered, possibly-malformed vehicle position feed into
//! a set of smoothly moving tracked vehicles:
//! 1. **Validation**: every raw record is checked in isolation; bad records are
//!    skipped, never fatal to a batch
//! 2. **Registry**: stable identities are mapped onto tracked entities that are
//!    created, updated and evicted after a grace period
//! 3. **Heading**: derived from successive confirmed positions
//! 4. **Interpolation**: displayed positions glide toward their targets on a
//!    frame clock that is independent of the feed cadence

pub mod bearing;
pub mod config;
pub mod feed;
pub mod geo_point;
pub mod interpolation;
pub mod metrics;
pub mod palette;
pub mod reconcile;
pub mod registry;
pub mod runtime;
pub mod validation;

// Re-export key types for convenience
pub use bearing::bearing;
pub use config::{ConfigError, TrackerConfig};
pub use feed::{decode_payload, decode_response, FeedError, FeedFeature};
pub use geo_point::GeoPoint;
pub use interpolation::{InterpolationDriver, TweenHandle, TweenStats, TweenStep};
pub use metrics::{CycleReport, FrameSummary, TrackerStats};
pub use palette::color_for;
pub use reconcile::ReconciliationCycle;
pub use registry::{
    EntityRegistry, Eviction, EvictionReason, ReconcileOutcome, SpatialIndexStats, TrackedEntity,
};
pub use runtime::{FleetTracker, RenderSink, VehicleView};
pub use validation::{validate_record, Rejection, ValidatedRecord};
