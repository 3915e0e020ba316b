//! Simulated feed transport with fault injection.

use crate::context::SimContext;
use crate::oracle::Oracle;
use async_trait::async_trait;
use busflow_core::{decode_payload, FeedFeature};
use busflow_env::{EnvError, FeedBatch, FeedController, FeedTransport, FleetContext};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

/// RNG stream for feed faults (physics uses stream 0).
const FAULT_STREAM: u64 = 2;

/// Counters for what the feed actually delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub fetches: u64,
    /// Fetches that returned an error (outage or undecodable payload)
    pub failures: u64,
    /// Fetches answered with the previous batch verbatim
    pub frozen_repeats: u64,
    /// Records mutated into a rejectable shape
    pub corrupted: u64,
}

struct FeedState {
    outage: bool,
    frozen: bool,
    garbage: bool,
    corruption_rate: f64,
    shuffle: bool,
    last_delivered: Option<Vec<Value>>,
    sequence: u64,
    rng: ChaCha8Rng,
    stats: FeedStats,
}

/// Feed endpoint backed by the ground-truth oracle.
///
/// Every fetch advances the oracle to the context's clock, renders the
/// fleet as JSON text and decodes it again, so records reach the tracker
/// through the same path as a live payload.
pub struct SimFeed {
    context: Arc<SimContext>,
    oracle: Arc<Mutex<Oracle>>,
    state: Arc<Mutex<FeedState>>,
}

impl SimFeed {
    pub fn new(context: Arc<SimContext>, oracle: Oracle) -> Self {
        let rng = context.derive_rng(FAULT_STREAM);
        Self {
            context,
            oracle: Arc::new(Mutex::new(oracle)),
            state: Arc::new(Mutex::new(FeedState {
                outage: false,
                frozen: false,
                garbage: false,
                corruption_rate: 0.0,
                shuffle: false,
                last_delivered: None,
                sequence: 0,
                rng,
                stats: FeedStats::default(),
            })),
        }
    }

    /// Fault-injection handle sharing this feed's state.
    pub fn controller(&self) -> SimFeedController {
        SimFeedController {
            state: Arc::clone(&self.state),
        }
    }

    /// Shared handle to the ground truth.
    pub fn oracle(&self) -> Arc<Mutex<Oracle>> {
        Arc::clone(&self.oracle)
    }

    pub fn stats(&self) -> FeedStats {
        self.state.lock().unwrap().stats
    }

    /// Synchronous fetch, for harnesses that drive the clock themselves.
    pub fn next_batch(&self) -> Result<FeedBatch, EnvError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.stats.fetches += 1;

        if state.outage {
            state.stats.failures += 1;
            return Err(EnvError::transport("simulated outage"));
        }

        let fetched_at_ms = self
            .context
            .system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        state.sequence += 1;

        if state.frozen {
            if let Some(records) = &state.last_delivered {
                state.stats.frozen_repeats += 1;
                return Ok(FeedBatch::new(records.clone(), fetched_at_ms, state.sequence));
            }
        }

        let mut records: Vec<Value> = {
            let mut oracle = self.oracle.lock().unwrap();
            oracle.advance_to(self.context.now().as_secs_f64());
            oracle.generate_features().iter().map(FeedFeature::to_value).collect()
        };

        if state.corruption_rate > 0.0 {
            for record in records.iter_mut() {
                if state.rng.gen_bool(state.corruption_rate) {
                    corrupt(record, &mut state.rng);
                    state.stats.corrupted += 1;
                }
            }
        }

        if state.shuffle {
            records.shuffle(&mut state.rng);
        }

        let body = if state.garbage {
            r#"{"error":"upstream timeout"}"#.to_string()
        } else {
            serde_json::to_string(&records).map_err(EnvError::payload)?
        };

        match decode_payload(&body) {
            Ok(records) => {
                state.last_delivered = Some(records.clone());
                Ok(FeedBatch::new(records, fetched_at_ms, state.sequence))
            }
            Err(e) => {
                state.stats.failures += 1;
                Err(e.into())
            }
        }
    }
}

/// Breaks one record so it hits exactly one rejection class.
fn corrupt(record: &mut Value, rng: &mut ChaCha8Rng) {
    match rng.gen_range(0..3) {
        0 => {
            if let Some(props) = record.get_mut("properties").and_then(Value::as_object_mut) {
                props.remove("b");
            }
        }
        1 => {
            if let Some(props) = record.get_mut("properties").and_then(Value::as_object_mut) {
                props.insert("r".to_string(), Value::Null);
            }
        }
        _ => {
            if let Some(geometry) = record.get_mut("geometry").and_then(Value::as_object_mut) {
                geometry.insert("coordinates".to_string(), Value::String("n/a".to_string()));
            }
        }
    }
}

#[async_trait]
impl FeedTransport for SimFeed {
    async fn fetch(&self) -> Result<FeedBatch, EnvError> {
        self.next_batch()
    }

    fn source_name(&self) -> &str {
        "sim-feed"
    }
}

/// Feed controller for fault injection.
#[derive(Clone)]
pub struct SimFeedController {
    state: Arc<Mutex<FeedState>>,
}

impl SimFeedController {
    /// Delivers records in random order.
    pub fn set_shuffle(&self, shuffle: bool) {
        self.state.lock().unwrap().shuffle = shuffle;
    }

    /// Makes the endpoint answer with a JSON object instead of an array.
    pub fn set_garbage(&self, garbage: bool) {
        self.state.lock().unwrap().garbage = garbage;
    }

    pub fn is_outage(&self) -> bool {
        self.state.lock().unwrap().outage
    }
}

impl FeedController for SimFeedController {
    fn start_outage(&self) {
        self.state.lock().unwrap().outage = true;
    }

    fn restore(&self) {
        let mut state = self.state.lock().unwrap();
        state.outage = false;
        state.frozen = false;
        state.garbage = false;
    }

    fn freeze(&self) {
        self.state.lock().unwrap().frozen = true;
    }

    fn set_corruption_rate(&self, rate: f64) {
        self.state.lock().unwrap().corruption_rate = rate.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::DEFAULT_ORIGIN;
    use busflow_core::{validate_record, Rejection};
    use std::time::Duration;

    fn feed(vehicles: usize) -> SimFeed {
        let context = SimContext::shared(42);
        let mut oracle = Oracle::new(context.derive_rng(0), DEFAULT_ORIGIN);
        oracle.spawn_fleet(vehicles, 3000.0);
        SimFeed::new(context, oracle)
    }

    #[test]
    fn test_batch_matches_fleet() {
        let feed = feed(8);
        let batch = feed.next_batch().unwrap();
        assert_eq!(batch.len(), 8);
        assert_eq!(batch.sequence, 1);
        assert!(batch.records.iter().all(|r| validate_record(r).is_ok()));
    }

    #[test]
    fn test_fetch_advances_oracle_to_context_clock() {
        let feed = feed(1);
        feed.context.advance_time(Duration::from_secs(5));
        feed.next_batch().unwrap();
        assert_eq!(feed.oracle().lock().unwrap().time(), 5.0);
    }

    #[test]
    fn test_outage_and_restore() {
        let feed = feed(3);
        let ctl = feed.controller();

        ctl.start_outage();
        assert!(ctl.is_outage());
        assert!(matches!(feed.next_batch(), Err(EnvError::TransportError(_))));

        ctl.restore();
        assert_eq!(feed.next_batch().unwrap().len(), 3);
        assert_eq!(feed.stats().failures, 1);
    }

    #[test]
    fn test_freeze_repeats_verbatim() {
        let feed = feed(4);
        let ctl = feed.controller();

        let first = feed.next_batch().unwrap();
        ctl.freeze();
        feed.context.advance_time(Duration::from_secs(5));
        let second = feed.next_batch().unwrap();

        assert_eq!(first.records, second.records);
        assert_ne!(first.sequence, second.sequence);
        assert_eq!(feed.stats().frozen_repeats, 1);
    }

    #[test]
    fn test_full_corruption_rejects_every_record() {
        let feed = feed(30);
        feed.controller().set_corruption_rate(1.0);

        let batch = feed.next_batch().unwrap();
        let rejections: Vec<Rejection> = batch
            .records
            .iter()
            .filter_map(|r| validate_record(r).err())
            .collect();
        assert_eq!(rejections.len(), 30);
        assert_eq!(feed.stats().corrupted, 30);
    }

    #[test]
    fn test_garbage_payload_is_an_error() {
        let feed = feed(2);
        feed.controller().set_garbage(true);
        assert!(matches!(feed.next_batch(), Err(EnvError::PayloadError(_))));
    }

    #[test]
    fn test_shuffle_keeps_records() {
        let plain = feed(10).next_batch().unwrap();
        let shuffled_feed = feed(10);
        shuffled_feed.controller().set_shuffle(true);
        let shuffled = shuffled_feed.next_batch().unwrap();

        let mut a: Vec<String> = plain.records.iter().map(|r| r.to_string()).collect();
        let mut b: Vec<String> = shuffled.records.iter().map(|r| r.to_string()).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }
}
