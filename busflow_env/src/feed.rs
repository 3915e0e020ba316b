//! Feed transport abstraction for the live vehicle feed.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::FeedBatch;

/// Abstraction for fetching snapshot batches from the live feed.
///
/// # Implementations
///
/// - **Production**: supplied by the embedding application (HTTP client,
///   websocket, file replay); `busflow_core::feed::decode_response` turns
///   its status and body into records
/// - **Simulation**: `SimFeed`, generated from a ground-truth oracle with
///   configurable outages, freezes and corruption
///
/// # Batch Flow
///
/// ```text
/// Tracker                    Transport                   Feed endpoint
///   |                           |                             |
///   |-- fetch() --------------->|                             |
///   |                           |-- GET ---------------------->|
///   |                           |<-- JSON array of features ---|
///   |<-- Ok(FeedBatch) ---------|                             |
/// ```
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    /// Fetches the latest snapshot batch.
    ///
    /// # Returns
    /// * `Ok(batch)` - The records as delivered (possibly empty, malformed,
    ///   or a verbatim repeat of the previous batch)
    /// * `Err(EnvError)` - Fetch failed, non-OK status, or unparseable payload
    ///
    /// # Note
    /// A failed fetch is not fatal: the caller treats it as "no batch this
    /// cycle" and still runs eviction.
    async fn fetch(&self) -> Result<FeedBatch, EnvError>;

    /// Returns a short name for the feed source (for logging).
    fn source_name(&self) -> &str;
}

/// Marker trait for feed controllers in simulation.
///
/// Allows injecting faults like outages and stale data.
pub trait FeedController: Send + Sync {
    /// Makes every fetch fail until `restore` is called.
    fn start_outage(&self);

    /// Ends an outage and any freeze.
    fn restore(&self);

    /// Makes every fetch return the last delivered batch verbatim.
    fn freeze(&self);

    /// Sets the probability (0.0 - 1.0) that a single record is corrupted.
    fn set_corruption_rate(&self, rate: f64);
}
