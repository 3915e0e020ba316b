//! Common types for the BusFlow environment abstraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One fetched set of vehicle position records.
///
/// This is a transport-layer wrapper - the records are raw JSON values and
/// are only interpreted by the tracker's validator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedBatch {
    /// The raw records, in feed order
    pub records: Vec<Value>,

    /// Wall-clock time the batch was fetched (Unix milliseconds)
    pub fetched_at_ms: u64,

    /// Monotonic fetch counter assigned by the transport
    pub sequence: u64,
}

impl FeedBatch {
    /// Creates a new batch from raw records.
    pub fn new(records: Vec<Value>, fetched_at_ms: u64, sequence: u64) -> Self {
        Self {
            records,
            fetched_at_ms,
            sequence,
        }
    }

    /// Returns the number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the feed delivered no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feed_batch_len() {
        let batch = FeedBatch::new(vec![json!({}), json!([])], 0, 1);
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
        assert!(FeedBatch::default().is_empty());
    }
}
