//! Queue item data model.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::gateway::Method;

/// Replay priority band.
///
/// Replay is FIFO within a band; a high-priority item may overtake an older
/// normal-priority one. There is no cross-band ordering guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Bands in replay order.
    pub const BANDS: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Eviction rank when the queue is full: low-priority items go first.
    pub fn eviction_rank(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
        }
    }
}

/// A pending mutating request awaiting replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub endpoint: String,
    pub method: Method,
    pub payload: Option<Value>,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

impl QueueItem {
    pub fn new(
        endpoint: impl Into<String>,
        method: Method,
        payload: Option<Value>,
        priority: Priority,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            endpoint: endpoint.into(),
            method,
            payload,
            priority,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }

    /// Whether this item has aged past `max_age` and must be discarded
    /// rather than replayed.
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.enqueued_at);
        age >= chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX)
    }

    /// Two items are duplicates when endpoint, method and payload all match.
    pub fn is_duplicate_of(&self, other: &QueueItem) -> bool {
        self.endpoint == other.endpoint
            && self.method == other.method
            && self.payload == other.payload
    }
}
