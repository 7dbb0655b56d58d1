//! Local-first emotion log store.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{Result, SolaceError};
use crate::gateway::{Method, RequestGateway};
use crate::emotion::model::{EmotionDraft, EmotionEntry, INTENSITY_RANGE, next_entry_id};
use crate::queue::Priority;
use crate::store::{KeyValueStore, ScopedStore};

/// Logical name of the per-user log; physical key is `emotion_log_<user_id>`.
const EMOTION_LOG: &str = "emotion_log";

/// Entries kept per user; the oldest is evicted on overflow.
const MAX_ENTRIES: usize = 100;

/// Per-user emotion log with local-first writes.
///
/// `submit` durably stores the entry before any network activity, so a
/// submission can only fail on a storage error. The follow-up sync is
/// best-effort: a network failure lands in the offline queue via the gateway
/// and is never surfaced as a submission failure.
pub struct EmotionStore {
    scoped: ScopedStore,
    gateway: Arc<RequestGateway>,
    /// Serializes load-modify-save cycles; two concurrent submits must not
    /// save from the same stale snapshot.
    mutate: Mutex<()>,
}

impl EmotionStore {
    /// Creates a store for `user_id` over the shared backing store.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        user_id: impl Into<String>,
        gateway: Arc<RequestGateway>,
    ) -> Self {
        Self {
            scoped: ScopedStore::new(store, user_id),
            gateway,
            mutate: Mutex::new(()),
        }
    }

    /// Records a new entry.
    ///
    /// The returned entry's `synced` flag reflects only the immediate sync
    /// attempt, not eventual consistency.
    ///
    /// # Errors
    ///
    /// `Validation` when the intensity is out of range, `Storage` when the
    /// local write fails. Network conditions never fail this call.
    pub async fn submit(&self, draft: EmotionDraft) -> Result<EmotionEntry> {
        if !INTENSITY_RANGE.contains(&draft.intensity) {
            return Err(SolaceError::validation(
                422,
                format!("intensity {} out of range 1..=10", draft.intensity),
            ));
        }

        let now = Utc::now();
        let mut entry = EmotionEntry {
            id: next_entry_id(now),
            user_id: self.scoped.user_id().to_string(),
            mood: draft.mood,
            intensity: draft.intensity,
            notes: draft.notes,
            timestamp: now,
            synced: false,
        };

        // Local-first: the durable write happens before any network attempt
        {
            let _guard = self.mutate.lock().await;
            let mut entries = self.load().await?;
            entries.insert(0, entry.clone());
            entries.truncate(MAX_ENTRIES);
            self.save(&entries).await?;
        }

        match self
            .gateway
            .request_prioritized(
                "/emotions",
                Method::Post,
                Some(serde_json::to_value(&entry)?),
                Priority::High,
            )
            .await
        {
            Ok(_) => {
                self.mark_synced(&entry.id).await?;
                entry.synced = true;
            }
            Err(err) => {
                tracing::debug!(id = %entry.id, error = %err, "entry stored locally, sync deferred");
            }
        }

        Ok(entry)
    }

    /// Returns all entries, newest first.
    pub async fn get_all(&self) -> Result<Vec<EmotionEntry>> {
        self.load().await
    }

    /// Flips the `synced` flag for `id`. Unknown ids and already-synced
    /// entries are no-ops.
    pub async fn mark_synced(&self, id: &str) -> Result<()> {
        let _guard = self.mutate.lock().await;
        let mut entries = self.load().await?;
        let mut changed = false;
        for entry in entries.iter_mut() {
            if entry.id == id && !entry.synced {
                entry.synced = true;
                changed = true;
            }
        }
        if changed {
            self.save(&entries).await?;
        }
        Ok(())
    }

    /// Replaces the stored log. Used by the sync coordinator after merging
    /// server state.
    pub(crate) async fn replace_all(&self, entries: &[EmotionEntry]) -> Result<()> {
        let _guard = self.mutate.lock().await;
        let mut bounded = entries.to_vec();
        bounded.truncate(MAX_ENTRIES);
        self.save(&bounded).await
    }

    async fn load(&self) -> Result<Vec<EmotionEntry>> {
        Ok(self.scoped.get_json(EMOTION_LOG).await?.unwrap_or_default())
    }

    async fn save(&self, entries: &[EmotionEntry]) -> Result<()> {
        self.scoped.set_json(EMOTION_LOG, &entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::{RecordingTransport, test_gateway};
    use crate::store::MemoryStore;

    fn draft(mood: &str, intensity: u8) -> EmotionDraft {
        EmotionDraft {
            mood: mood.to_string(),
            intensity,
            notes: None,
        }
    }

    fn emotion_store(
        store: Arc<MemoryStore>,
        transport: Arc<RecordingTransport>,
    ) -> EmotionStore {
        let gateway = Arc::new(test_gateway(store.clone(), transport));
        EmotionStore::new(store, "user-1", gateway)
    }

    #[tokio::test]
    async fn test_submit_succeeds_and_is_visible_while_offline() {
        let store = Arc::new(MemoryStore::new());
        let transport = RecordingTransport::all_unreachable();
        let emotions = emotion_store(store, transport);

        let entry = emotions.submit(draft("happy", 8)).await.unwrap();

        assert!(!entry.synced);
        let all = emotions.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, entry.id);
        assert_eq!(all[0].mood, "happy");
    }

    #[tokio::test]
    async fn test_submit_marks_synced_when_backend_accepts() {
        let store = Arc::new(MemoryStore::new());
        let transport = RecordingTransport::all_ok();
        let emotions = emotion_store(store, transport);

        let entry = emotions.submit(draft("calm", 5)).await.unwrap();

        assert!(entry.synced);
        let all = emotions.get_all().await.unwrap();
        assert!(all[0].synced);
    }

    #[tokio::test]
    async fn test_submit_rejects_out_of_range_intensity() {
        let store = Arc::new(MemoryStore::new());
        let transport = RecordingTransport::all_ok();
        let emotions = emotion_store(store, transport.clone());

        let err = emotions.submit(draft("happy", 11)).await.unwrap_err();

        assert!(err.is_validation());
        assert!(emotions.get_all().await.unwrap().is_empty());
        // Never hit the network either
        assert_eq!(transport.request_count().await, 0);
    }

    #[tokio::test]
    async fn test_entries_are_newest_first_and_bounded() {
        let store = Arc::new(MemoryStore::new());
        let transport = RecordingTransport::all_unreachable();
        let emotions = emotion_store(store, transport);

        for i in 0..(MAX_ENTRIES + 5) {
            emotions
                .submit(draft(&format!("mood-{i}"), 5))
                .await
                .unwrap();
        }

        let all = emotions.get_all().await.unwrap();
        assert_eq!(all.len(), MAX_ENTRIES);
        // Newest first, oldest evicted
        assert_eq!(all[0].mood, format!("mood-{}", MAX_ENTRIES + 4));
        assert_eq!(all.last().unwrap().mood, "mood-5");
    }

    /// Store that yields to the scheduler after every read, forcing two
    /// in-flight writers to interleave around the load-modify-save cycle.
    struct YieldingStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for YieldingStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            let value = self.inner.get(key).await?;
            tokio::task::yield_now().await;
            Ok(value)
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_submits_are_not_lost() {
        let store = Arc::new(YieldingStore {
            inner: MemoryStore::new(),
        });
        let transport = RecordingTransport::all_unreachable();
        let gateway = Arc::new(test_gateway(store.clone(), transport));
        let emotions = EmotionStore::new(store, "user-1", gateway);

        let (a, b) = tokio::join!(
            emotions.submit(draft("happy", 7)),
            emotions.submit(draft("sad", 3)),
        );
        a.unwrap();
        b.unwrap();

        let all = emotions.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_synced_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let transport = RecordingTransport::all_unreachable();
        let emotions = emotion_store(store, transport);

        let entry = emotions.submit(draft("happy", 7)).await.unwrap();

        emotions.mark_synced(&entry.id).await.unwrap();
        emotions.mark_synced(&entry.id).await.unwrap();
        emotions.mark_synced("no-such-id").await.unwrap();

        let all = emotions.get_all().await.unwrap();
        assert!(all[0].synced);
    }
}
