//! Sync coordination.
//!
//! The coordinator is the only owner of the offline queue: it flushes the
//! queue and re-pulls server state when connectivity returns, merges results
//! into the entity stores, and publishes per-user sync status. Sync has no
//! terminal error state; every pass returns to idle and the next trigger
//! retries whatever failed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::conversation::{ConversationMessage, ConversationStore};
use crate::emotion::{EmotionEntry, EmotionStore};
use crate::error::Result;
use crate::gateway::{Method, RequestGateway};
use crate::queue::OfflineQueue;
use crate::session::AuthManager;
use crate::store::{KeyValueStore, ScopedStore};

/// Logical name of the per-user status record.
const SYNC_STATUS: &str = "sync_status";

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Online,
    Offline,
}

/// Connectivity observer seam. The infrastructure crate provides a
/// watch-channel implementation driven by the embedding platform.
pub trait NetworkMonitor: Send + Sync {
    /// Receiver that yields on every connectivity transition.
    fn watch(&self) -> watch::Receiver<NetworkState>;

    /// Current connectivity state.
    fn current(&self) -> NetworkState;
}

/// Per-user sync bookkeeping, persisted after every pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_sync: Option<DateTime<Utc>>,
    /// Items still waiting in the offline queue.
    pub pending: u32,
    /// Items dropped or pulls failed during the last pass.
    pub failed: u32,
}

/// Which entity collections a sync pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Emotions,
    Conversations,
}

/// Options for one sync pass.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub include_queue: bool,
    pub data_types: Vec<DataType>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            include_queue: true,
            data_types: vec![DataType::Emotions, DataType::Conversations],
        }
    }
}

/// Events published to sync listeners.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started,
    Finished(SyncStatus),
}

/// Record that can be reconciled against server state by id.
pub(crate) trait SyncRecord: Clone {
    fn record_id(&self) -> &str;
    fn is_synced(&self) -> bool;
    fn set_synced(&mut self);
    fn recorded_at(&self) -> DateTime<Utc>;
}

impl SyncRecord for EmotionEntry {
    fn record_id(&self) -> &str {
        &self.id
    }
    fn is_synced(&self) -> bool {
        self.synced
    }
    fn set_synced(&mut self) {
        self.synced = true;
    }
    fn recorded_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl SyncRecord for ConversationMessage {
    fn record_id(&self) -> &str {
        &self.id
    }
    fn is_synced(&self) -> bool {
        self.synced
    }
    fn set_synced(&mut self) {
        self.synced = true;
    }
    fn recorded_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Merges a server snapshot into the local log.
///
/// Server rows win for the ids they contain and count as synced. Local rows
/// the server does not know about survive only while unsynced (a synced row
/// missing from the server was deleted there). Result is newest first.
pub(crate) fn merge_records<T: SyncRecord>(local: Vec<T>, server: Vec<T>) -> Vec<T> {
    let mut merged: Vec<T> = server
        .into_iter()
        .map(|mut record| {
            record.set_synced();
            record
        })
        .collect();

    let server_ids: std::collections::HashSet<String> = merged
        .iter()
        .map(|r| r.record_id().to_string())
        .collect();

    for record in local {
        if !server_ids.contains(record.record_id()) && !record.is_synced() {
            merged.push(record);
        }
    }

    merged.sort_by(|a, b| b.recorded_at().cmp(&a.recorded_at()));
    merged
}

/// Orchestrates queue flush and server re-pull.
pub struct SyncCoordinator {
    auth: Arc<AuthManager>,
    gateway: Arc<RequestGateway>,
    queue: Arc<OfflineQueue>,
    store: Arc<dyn KeyValueStore>,
    network: Arc<dyn NetworkMonitor>,
    /// In-flight guard: `Idle -> Syncing -> Idle`, nothing else.
    syncing: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
    pub fn new(
        auth: Arc<AuthManager>,
        gateway: Arc<RequestGateway>,
        queue: Arc<OfflineQueue>,
        store: Arc<dyn KeyValueStore>,
        network: Arc<dyn NetworkMonitor>,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            auth,
            gateway,
            queue,
            store,
            network,
            syncing: AtomicBool::new(false),
            events,
        }
    }

    /// Subscribes to sync lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Whether a pass is currently running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Runs one sync pass.
    ///
    /// Skipped entirely when unauthenticated, offline, or already syncing;
    /// none of those are errors. Partial failures land in the status `failed`
    /// count and the pass still completes.
    ///
    /// # Errors
    ///
    /// Returns an error only for durable-store failures.
    pub async fn trigger_sync(&self, options: SyncOptions) -> Result<()> {
        if !self.auth.is_authenticated().await {
            tracing::debug!("sync skipped: not authenticated");
            return Ok(());
        }
        if self.network.current() == NetworkState::Offline {
            tracing::debug!("sync skipped: offline");
            return Ok(());
        }
        if self.syncing.swap(true, Ordering::SeqCst) {
            tracing::debug!("sync skipped: already running");
            return Ok(());
        }

        let _ = self.events.send(SyncEvent::Started);
        let result = self.run_pass(&options).await;
        self.syncing.store(false, Ordering::SeqCst);

        match result {
            Ok(status) => {
                let _ = self.events.send(SyncEvent::Finished(status));
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "sync pass aborted");
                Err(err)
            }
        }
    }

    /// Spawns a task that triggers a sync on every offline-to-online
    /// transition. Going offline is a no-op; the queue keeps growing.
    pub fn spawn_network_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        let mut rx = coordinator.network.watch();
        // Baseline must be captured before the task is polled; a transition
        // landing between spawn and first poll would otherwise go unseen.
        let mut last = *rx.borrow();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow();
                if last == NetworkState::Offline && state == NetworkState::Online {
                    tracing::info!("connectivity restored, triggering sync");
                    if let Err(err) = coordinator.trigger_sync(SyncOptions::default()).await {
                        tracing::warn!(error = %err, "reconnect sync failed");
                    }
                }
                last = state;
            }
        })
    }

    /// Spawns a task that triggers a full sync every `interval`, picking up
    /// anything the reconnect listener missed. Skipped passes (offline,
    /// unauthenticated, already running) cost nothing.
    pub fn spawn_periodic_sync(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the startup sync
            // stays the caller's decision.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = coordinator.trigger_sync(SyncOptions::default()).await {
                    tracing::warn!(error = %err, "periodic sync failed");
                }
            }
        })
    }

    /// The last persisted status for the current user.
    pub async fn status(&self) -> Result<Option<SyncStatus>> {
        let Some(user) = self.auth.current_user().await else {
            return Ok(None);
        };
        ScopedStore::new(self.store.clone(), user.id)
            .get_json(SYNC_STATUS)
            .await
    }

    async fn run_pass(&self, options: &SyncOptions) -> Result<SyncStatus> {
        let mut failed = 0u32;

        if options.include_queue {
            let outcome = self.queue.flush(&self.gateway).await?;
            failed += outcome.failed;
        }

        // The session can disappear mid-pass (token expiry on read); the
        // pull half is simply skipped then.
        if let Some(user) = self.auth.current_user().await {
            for data_type in &options.data_types {
                let pulled = match data_type {
                    DataType::Emotions => self.pull_emotions(&user.id).await,
                    DataType::Conversations => self.pull_conversations(&user.id).await,
                };
                if let Err(err) = pulled {
                    tracing::warn!(?data_type, error = %err, "pull failed");
                    failed += 1;
                }
            }

            let status = SyncStatus {
                last_sync: Some(Utc::now()),
                pending: self.queue.pending_count().await? as u32,
                failed,
            };
            ScopedStore::new(self.store.clone(), user.id)
                .set_json(SYNC_STATUS, &status)
                .await?;
            return Ok(status);
        }

        Ok(SyncStatus {
            last_sync: None,
            pending: self.queue.pending_count().await? as u32,
            failed,
        })
    }

    async fn pull_emotions(&self, user_id: &str) -> Result<()> {
        let body = self.gateway.request("/emotions", Method::Get, None).await?;
        let server = parse_rows::<EmotionEntry>(&body);

        let emotions = EmotionStore::new(self.store.clone(), user_id, self.gateway.clone());
        let merged = merge_records(emotions.get_all().await?, server);
        emotions.replace_all(&merged).await
    }

    async fn pull_conversations(&self, user_id: &str) -> Result<()> {
        let body = self
            .gateway
            .request("/conversations", Method::Get, None)
            .await?;
        let server = parse_rows::<ConversationMessage>(&body);

        let conversations =
            ConversationStore::new(self.store.clone(), user_id, self.gateway.clone());
        let merged = merge_records(conversations.get_all().await?, server);
        conversations.replace_all(&merged).await
    }
}

/// Extracts entity rows from a pull response, accepting either a bare array
/// or an `{"entries": [...]}` envelope. Malformed rows are rejected
/// individually instead of poisoning the whole pull.
fn parse_rows<T: serde::de::DeserializeOwned>(body: &Value) -> Vec<T> {
    let rows = body
        .as_array()
        .or_else(|| body.get("entries").and_then(|e| e.as_array()));

    let Some(rows) = rows else {
        tracing::warn!("pull response had no recognizable rows");
        return Vec::new();
    };

    rows.iter()
        .filter_map(|row| match serde_json::from_value(row.clone()) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(error = %err, "rejecting malformed server row");
                None
            }
        })
        .collect()
}
