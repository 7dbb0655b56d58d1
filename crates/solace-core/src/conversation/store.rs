//! Local-first conversation log store.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::conversation::model::{ConversationMessage, MessageRole};
use crate::emotion::model::next_entry_id;
use crate::error::Result;
use crate::gateway::{Method, RequestGateway};
use crate::store::{KeyValueStore, ScopedStore};

/// Logical name of the per-user log; physical key is
/// `conversation_log_<user_id>`.
const CONVERSATION_LOG: &str = "conversation_log";

/// Messages kept per user; the oldest is evicted on overflow.
const MAX_MESSAGES: usize = 200;

/// Per-user conversation log with the same local-first semantics as the
/// emotion store: the durable write always happens before the best-effort
/// sync, and a network failure is never a submission failure.
pub struct ConversationStore {
    scoped: ScopedStore,
    gateway: Arc<RequestGateway>,
    /// Serializes load-modify-save cycles; two concurrent submits must not
    /// save from the same stale snapshot.
    mutate: Mutex<()>,
}

impl ConversationStore {
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

    /// Appends a message, durably first, then best-effort syncs it.
    ///
    /// # Errors
    ///
    /// Only `Storage` errors fail this call.
    pub async fn submit(
        &self,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Result<ConversationMessage> {
        let now = Utc::now();
        let mut message = ConversationMessage {
            id: next_entry_id(now),
            user_id: self.scoped.user_id().to_string(),
            role,
            content: content.into(),
            timestamp: now,
            synced: false,
        };

        {
            let _guard = self.mutate.lock().await;
            let mut messages = self.load().await?;
            messages.insert(0, message.clone());
            messages.truncate(MAX_MESSAGES);
            self.save(&messages).await?;
        }

        match self
            .gateway
            .request(
                "/conversations",
                Method::Post,
                Some(serde_json::to_value(&message)?),
            )
            .await
        {
            Ok(_) => {
                self.mark_synced(&message.id).await?;
                message.synced = true;
            }
            Err(err) => {
                tracing::debug!(id = %message.id, error = %err, "message stored locally, sync deferred");
            }
        }

        Ok(message)
    }

    /// Returns all messages, newest first.
    pub async fn get_all(&self) -> Result<Vec<ConversationMessage>> {
        self.load().await
    }

    /// Flips the `synced` flag for `id`; idempotent.
    pub async fn mark_synced(&self, id: &str) -> Result<()> {
        let _guard = self.mutate.lock().await;
        let mut messages = self.load().await?;
        let mut changed = false;
        for message in messages.iter_mut() {
            if message.id == id && !message.synced {
                message.synced = true;
                changed = true;
            }
        }
        if changed {
            self.save(&messages).await?;
        }
        Ok(())
    }

    /// Replaces the stored log after a server merge.
    pub(crate) async fn replace_all(&self, messages: &[ConversationMessage]) -> Result<()> {
        let _guard = self.mutate.lock().await;
        let mut bounded = messages.to_vec();
        bounded.truncate(MAX_MESSAGES);
        self.save(&bounded).await
    }

    async fn load(&self) -> Result<Vec<ConversationMessage>> {
        Ok(self
            .scoped
            .get_json(CONVERSATION_LOG)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, messages: &[ConversationMessage]) -> Result<()> {
        self.scoped.set_json(CONVERSATION_LOG, &messages).await
    }
}
