//! Durable FIFO/priority queue of pending mutating requests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::gateway::{Method, RequestGateway};
use crate::queue::model::{Priority, QueueItem};
use crate::store::{KeyValueStore, read_json, write_json};

/// Global store key for the serialized queue. The queue is deliberately not
/// user-scoped: items carry their own endpoint and payload and must survive a
/// logout/login cycle of the same user.
pub const QUEUE_KEY: &str = "offline_queue";

/// Capacity, age and retry limits for the queue.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    /// Maximum items held; oldest low-priority entries are evicted first
    /// when full.
    pub capacity: usize,
    /// Items older than this are discarded without replay.
    pub max_age: Duration,
    /// Items that failed replay this many times are dropped.
    pub max_attempts: u32,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            capacity: 50,
            max_age: Duration::from_secs(24 * 3600),
            max_attempts: 5,
        }
    }
}

/// Outcome of a flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Items confirmed by the backend and removed.
    pub synced: u32,
    /// Items dropped (stale, over attempt budget, or rejected outright).
    pub failed: u32,
}

/// Durable queue of pending mutating operations.
///
/// Enqueue is idempotent on (endpoint, method, payload). Replay is FIFO
/// within a priority band, high band first. Queue state lives in the durable
/// store and survives process restart.
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    policy: QueuePolicy,
    /// Serializes load-modify-save cycles so no concurrent enqueue is lost.
    mutate: Mutex<()>,
    /// A second flush while one is running is a no-op.
    flush_guard: Mutex<()>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_policy(store, QueuePolicy::default())
    }

    pub fn with_policy(store: Arc<dyn KeyValueStore>, policy: QueuePolicy) -> Self {
        Self {
            store,
            policy,
            mutate: Mutex::new(()),
            flush_guard: Mutex::new(()),
        }
    }

    /// Appends a pending request.
    ///
    /// A duplicate of an already-queued item (same endpoint, method and
    /// payload) is ignored. When the queue is full, the oldest entry of the
    /// lowest-priority band present is evicted to make room, but only when
    /// that entry ranks below the incoming item; otherwise the incoming item
    /// is dropped instead.
    ///
    /// # Errors
    ///
    /// Returns an error only for durable-store failures.
    pub async fn enqueue(
        &self,
        endpoint: impl Into<String>,
        method: Method,
        payload: Option<Value>,
        priority: Priority,
    ) -> Result<()> {
        self.enqueue_item(QueueItem::new(endpoint, method, payload, priority))
            .await
    }

    /// Appends a pre-built item. Same semantics as [`Self::enqueue`].
    pub async fn enqueue_item(&self, item: QueueItem) -> Result<()> {
        let _guard = self.mutate.lock().await;
        let mut items = self.load().await?;

        if items.iter().any(|existing| existing.is_duplicate_of(&item)) {
            tracing::debug!(endpoint = %item.endpoint, "duplicate queue item ignored");
            return Ok(());
        }

        if items.len() >= self.policy.capacity {
            let Some(evict) = items
                .iter()
                .enumerate()
                .min_by_key(|(index, i)| (i.priority.eviction_rank(), *index))
                .map(|(index, _)| index)
            else {
                return Ok(());
            };
            // Only evict something strictly easier to lose than the incoming
            // item; otherwise the newcomer is the one rejected.
            if item.priority.eviction_rank() <= items[evict].priority.eviction_rank() {
                tracing::warn!(endpoint = %item.endpoint, "queue full, rejecting incoming item");
                return Ok(());
            }
            let evicted = items.remove(evict);
            tracing::warn!(endpoint = %evicted.endpoint, "queue full, evicted oldest low-priority item");
        }

        tracing::debug!(endpoint = %item.endpoint, priority = ?item.priority, "queued for later delivery");
        items.push(item);
        self.save(&items).await
    }

    /// Number of items currently pending.
    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }

    /// Replays pending items through the gateway.
    ///
    /// Items are processed band by band (high, normal, low), FIFO within a
    /// band. Stale items are discarded without replay. A network failure
    /// leaves the item queued for the next flush unless its attempt budget is
    /// exhausted; a validation rejection drops it permanently. Only one flush
    /// runs at a time; a concurrent call returns an empty outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only for durable-store failures.
    pub async fn flush(&self, gateway: &RequestGateway) -> Result<FlushOutcome> {
        let Ok(_flush) = self.flush_guard.try_lock() else {
            tracing::debug!("flush already in progress, skipping");
            return Ok(FlushOutcome::default());
        };

        let snapshot = self.load().await?;
        if snapshot.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let now = Utc::now();
        let mut outcome = FlushOutcome::default();
        let mut remove: HashSet<String> = HashSet::new();
        let mut bump_attempts: HashMap<String, u32> = HashMap::new();

        'bands: for band in Priority::BANDS {
            for item in snapshot.iter().filter(|i| i.priority == band) {
                if item.is_stale(self.policy.max_age, now) {
                    tracing::info!(endpoint = %item.endpoint, "dropping stale queue item");
                    remove.insert(item.id.clone());
                    outcome.failed += 1;
                    continue;
                }

                match gateway.replay(item).await {
                    Ok(_) => {
                        remove.insert(item.id.clone());
                        outcome.synced += 1;
                    }
                    Err(err) if err.is_network() => {
                        let attempts = item.attempts + 1;
                        if attempts >= self.policy.max_attempts {
                            tracing::warn!(
                                endpoint = %item.endpoint,
                                attempts,
                                "queue item exceeded attempt budget, dropping"
                            );
                            remove.insert(item.id.clone());
                            outcome.failed += 1;
                        } else {
                            bump_attempts.insert(item.id.clone(), attempts);
                        }
                    }
                    Err(err) if err.is_auth_expired() => {
                        // Session just got cleared; remaining items wait for
                        // the next authenticated flush.
                        tracing::info!("session expired mid-flush, stopping");
                        break 'bands;
                    }
                    Err(err) => {
                        // Rejected outright (validation): replaying again can
                        // never succeed.
                        tracing::warn!(endpoint = %item.endpoint, error = %err, "queue item rejected, dropping");
                        remove.insert(item.id.clone());
                        outcome.failed += 1;
                    }
                }
            }
        }

        // Re-load under the mutation lock: items enqueued while replaying
        // must not be lost by the final save.
        {
            let _guard = self.mutate.lock().await;
            let mut current = self.load().await?;
            current.retain(|i| !remove.contains(&i.id));
            for item in current.iter_mut() {
                if let Some(attempts) = bump_attempts.get(&item.id) {
                    item.attempts = *attempts;
                }
            }
            self.save(&current).await?;
        }

        tracing::info!(synced = outcome.synced, failed = outcome.failed, "queue flush finished");
        Ok(outcome)
    }

    async fn load(&self) -> Result<Vec<QueueItem>> {
        Ok(read_json(self.store.as_ref(), QUEUE_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, items: &[QueueItem]) -> Result<()> {
        write_json(self.store.as_ref(), QUEUE_KEY, &items).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::{RecordingTransport, test_gateway};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn item(endpoint: &str, priority: Priority) -> QueueItem {
        QueueItem::new(endpoint, Method::Post, Some(json!({"k": endpoint})), priority)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let queue = OfflineQueue::new(store);

        queue.enqueue_item(item("/emotions", Priority::Normal)).await.unwrap();
        queue.enqueue_item(item("/emotions", Priority::Normal)).await.unwrap();

        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        {
            let queue = OfflineQueue::new(store.clone());
            queue.enqueue_item(item("/emotions", Priority::Normal)).await.unwrap();
        }

        let reopened = OfflineQueue::new(store);
        assert_eq!(reopened.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_low_priority_first() {
        let store = Arc::new(MemoryStore::new());
        let queue = OfflineQueue::with_policy(
            store,
            QueuePolicy {
                capacity: 3,
                ..QueuePolicy::default()
            },
        );

        queue.enqueue_item(item("/a", Priority::Low)).await.unwrap();
        queue.enqueue_item(item("/b", Priority::High)).await.unwrap();
        queue.enqueue_item(item("/c", Priority::Low)).await.unwrap();
        // Full: /a is the oldest low-priority item and must go
        queue.enqueue_item(item("/d", Priority::Normal)).await.unwrap();

        let items: Vec<QueueItem> = read_json(
            queue.store.as_ref(),
            QUEUE_KEY,
        )
        .await
        .unwrap()
        .unwrap();
        let endpoints: Vec<&str> = items.iter().map(|i| i.endpoint.as_str()).collect();
        assert_eq!(endpoints, vec!["/b", "/c", "/d"]);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_item_not_outranking_eviction_candidate() {
        let store = Arc::new(MemoryStore::new());
        let queue = OfflineQueue::with_policy(
            store,
            QueuePolicy {
                capacity: 2,
                ..QueuePolicy::default()
            },
        );

        queue.enqueue_item(item("/a", Priority::High)).await.unwrap();
        queue.enqueue_item(item("/b", Priority::High)).await.unwrap();
        // Full of high-priority work: a low-priority newcomer is dropped
        // rather than displacing either of them.
        queue.enqueue_item(item("/c", Priority::Low)).await.unwrap();

        let items: Vec<QueueItem> = read_json(queue.store.as_ref(), QUEUE_KEY)
            .await
            .unwrap()
            .unwrap();
        let endpoints: Vec<&str> = items.iter().map(|i| i.endpoint.as_str()).collect();
        assert_eq!(endpoints, vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn test_flush_is_fifo_within_priority_band() {
        let store = Arc::new(MemoryStore::new());
        let queue = OfflineQueue::new(store.clone());

        queue.enqueue_item(item("/a", Priority::High)).await.unwrap();
        queue.enqueue_item(item("/b", Priority::Normal)).await.unwrap();
        queue.enqueue_item(item("/c", Priority::High)).await.unwrap();

        let transport = RecordingTransport::all_ok();
        let gateway = test_gateway(store, transport.clone());

        let outcome = queue.flush(&gateway).await.unwrap();

        assert_eq!(outcome.synced, 3);
        assert_eq!(outcome.failed, 0);
        // High band first (FIFO inside it), then normal
        assert_eq!(transport.endpoints().await, vec!["/a", "/c", "/b"]);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_flush_drops_stale_items_without_replay() {
        let store = Arc::new(MemoryStore::new());
        let queue = OfflineQueue::with_policy(
            store.clone(),
            QueuePolicy {
                max_age: Duration::from_secs(60),
                ..QueuePolicy::default()
            },
        );

        let mut stale = item("/old", Priority::Normal);
        stale.enqueued_at = Utc::now() - chrono::Duration::hours(2);
        queue.enqueue_item(stale).await.unwrap();

        let transport = RecordingTransport::all_ok();
        let gateway = test_gateway(store, transport.clone());

        let outcome = queue.flush(&gateway).await.unwrap();

        assert_eq!(outcome, FlushOutcome { synced: 0, failed: 1 });
        // Never hit the network
        assert!(transport.endpoints().await.is_empty());
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_replay_stays_queued_until_attempt_budget() {
        let store = Arc::new(MemoryStore::new());
        let queue = OfflineQueue::with_policy(
            store.clone(),
            QueuePolicy {
                max_attempts: 2,
                ..QueuePolicy::default()
            },
        );
        queue.enqueue_item(item("/flaky", Priority::Normal)).await.unwrap();

        let transport = RecordingTransport::all_unreachable();
        let gateway = test_gateway(store, transport.clone());

        // First flush: network failure, item stays with one attempt recorded
        let outcome = queue.flush(&gateway).await.unwrap();
        assert_eq!(outcome, FlushOutcome { synced: 0, failed: 0 });
        assert_eq!(queue.pending_count().await.unwrap(), 1);

        // Second flush: attempt budget reached, dropped and counted failed
        let outcome = queue.flush(&gateway).await.unwrap();
        assert_eq!(outcome, FlushOutcome { synced: 0, failed: 1 });
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_replay_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        let queue = OfflineQueue::new(store.clone());
        queue.enqueue_item(item("/bad", Priority::Normal)).await.unwrap();

        let transport = RecordingTransport::all_status(422);
        let gateway = test_gateway(store, transport);

        let outcome = queue.flush(&gateway).await.unwrap();

        assert_eq!(outcome, FlushOutcome { synced: 0, failed: 1 });
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }
}
