//! Emotion entry data model.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Valid intensity range, inclusive.
pub const INTENSITY_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

/// A single logged emotion.
///
/// Entries form an append-only per-user log: after creation only the `synced`
/// flag ever changes. An entry is visible in the UI the moment it is written
/// locally, regardless of sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionEntry {
    pub id: String,
    pub user_id: String,
    pub mood: String,
    pub intensity: u8,
    #[serde(default)]
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
}

/// Caller-supplied fields for a new entry.
#[derive(Debug, Clone)]
pub struct EmotionDraft {
    pub mood: String,
    pub intensity: u8,
    pub notes: Option<String>,
}

/// Generates a locally-unique monotonic entry id.
///
/// Epoch milliseconds plus a process-local counter, so two entries created
/// in the same millisecond still get distinct, ordered ids.
pub fn next_entry_id(now: DateTime<Utc>) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{:04}", now.timestamp_millis(), seq % 10_000)
}
