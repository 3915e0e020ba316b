//! BusFlow Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the BusFlow tracker
//! to run in both **Production** (tokio) and **Simulation** (virtual clock)
//! environments.
//!
//! # Core Concept: Two Clocks, One Thread
//!
//! The tracker is driven by two independent timing sources:
//! - the feed cadence (`FeedTransport::fetch`), every few seconds
//! - the frame cadence (`FleetContext::sleep`), as fast as the host allows
//!
//! Both are intercepted here so that a simulation can replace wall-clock
//! time and the live feed with deterministic stand-ins.
//!
//! # Example
//!
//! ```ignore
//! use busflow_env::{FleetContext, FeedTransport};
//!
//! async fn poll_loop<Ctx: FleetContext, Feed: FeedTransport>(ctx: &Ctx, feed: &Feed) {
//!     loop {
//!         match feed.fetch().await {
//!             Ok(batch) => handle_batch(batch),
//!             Err(e) => eprintln!("feed failed: {e}"),
//!         }
//!         ctx.sleep(Duration::from_secs(5)).await;
//!     }
//! }
//! ```

mod context;
mod feed;
mod types;
mod error;
mod tokio_impl;

pub use context::FleetContext;
pub use feed::{FeedTransport, FeedController};
pub use types::FeedBatch;
pub use error::EnvError;
pub use tokio_impl::TokioContext;
