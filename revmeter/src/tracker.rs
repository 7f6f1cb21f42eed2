//! Registry of in-flight streaming calls.
//!
//! A tracker is opened when a stream starts and removed exactly once, when the stream ends,
//! is abandoned, or fails to start. Removal is what guarantees a single report per stream.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::types::{StreamTracker, UsageMetadata};

/// Shared handle to the set of open stream trackers, keyed by transaction id.
///
/// Cloning is cheap and every clone sees the same trackers.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    trackers: Arc<DashMap<String, StreamTracker>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a stream. Replaces any tracker already open under the same id.
    pub fn open(&self, transaction_id: &str, start_time: DateTime<Utc>, usage_metadata: Option<UsageMetadata>) {
        self.trackers.insert(
            transaction_id.to_string(),
            StreamTracker {
                transaction_id: transaction_id.to_string(),
                start_time,
                first_token_time: None,
                is_complete: false,
                usage_metadata,
            },
        );
    }

    /// Record the arrival of the first chunk.
    ///
    /// Only the first call per stream has any effect. Returns whether this call set the time.
    pub fn record_first_token(&self, transaction_id: &str, time: DateTime<Utc>) -> bool {
        match self.trackers.get_mut(transaction_id) {
            Some(mut tracker) if tracker.first_token_time.is_none() => {
                tracker.first_token_time = Some(time);
                true
            }
            _ => false,
        }
    }

    /// Remove the tracker for `transaction_id`, marking it complete.
    ///
    /// Returns `None` if it was never opened or has already been finalized.
    pub fn finalize(&self, transaction_id: &str) -> Option<StreamTracker> {
        self.trackers.remove(transaction_id).map(|(_, mut tracker)| {
            tracker.is_complete = true;
            tracker
        })
    }

    /// Like [`finalize`](Self::finalize), treating a missing tracker as an error.
    pub fn try_finalize(&self, transaction_id: &str) -> Result<StreamTracker> {
        self.finalize(transaction_id).ok_or_else(|| Error::StreamTracking {
            message: format!("no open stream tracker for transaction {transaction_id}"),
        })
    }

    pub fn contains(&self, transaction_id: &str) -> bool {
        self.trackers.contains_key(transaction_id)
    }

    /// Number of streams currently open.
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}
