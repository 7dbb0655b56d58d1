//! Remote app configuration with a stale-while-revalidate cache.
//!
//! Feature flags, limits, and endpoint overrides come from `GET /config`.
//! Reads never block on the network: [`ConfigCache::get`] always answers from
//! memory, and a snapshot that has aged past the cache window triggers at most
//! one background refresh while the stale value is still served.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};

use crate::error::Result;
use crate::gateway::{Method, RequestGateway};
use crate::session::{AuthEvent, AuthManager};
use crate::store::{KeyValueStore, read_json, write_json};

/// Global persistence key; config is shared across users, not scoped.
pub const CONFIG_KEY: &str = "app_config";

/// Default snapshot validity window in seconds.
const CACHE_DURATION_SECS: i64 = 3600;

/// One fetched configuration document.
///
/// The server body carries everything but `fetched_at`, which is stamped
/// locally when the snapshot is taken and drives the freshness check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub features: HashMap<String, bool>,
    #[serde(default)]
    pub limits: HashMap<String, i64>,
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub fetched_at: DateTime<Utc>,
}

impl ConfigSnapshot {
    /// Baked-in configuration served when nothing was ever fetched.
    ///
    /// `fetched_at` is the epoch so defaults always count as stale and the
    /// first `get` schedules a real fetch.
    pub fn defaults() -> Self {
        Self {
            features: HashMap::from([
                ("chat".to_string(), true),
                ("emotion_tracking".to_string(), true),
                ("weekly_report".to_string(), true),
            ]),
            limits: HashMap::from([
                ("max_message_length".to_string(), 2_000),
                ("max_emotion_entries".to_string(), 100),
            ]),
            endpoints: HashMap::new(),
            version: "default".to_string(),
            fetched_at: DateTime::UNIX_EPOCH,
        }
    }

    /// Whether the snapshot is still inside its validity window at `now`.
    pub fn is_valid(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.fetched_at < window
    }

    /// Looks up a feature flag, defaulting to disabled.
    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }
}

/// Cached remote configuration.
///
/// Cloning is cheap and every clone shares the same snapshot and in-flight
/// guard, so the background refresh stays single-flight process-wide.
#[derive(Clone)]
pub struct ConfigCache {
    store: Arc<dyn KeyValueStore>,
    gateway: Arc<RequestGateway>,
    snapshot: Arc<RwLock<Option<ConfigSnapshot>>>,
    refreshing: Arc<AtomicBool>,
    cache_duration: Duration,
}

impl ConfigCache {
    pub fn new(store: Arc<dyn KeyValueStore>, gateway: Arc<RequestGateway>) -> Self {
        Self {
            store,
            gateway,
            snapshot: Arc::new(RwLock::new(None)),
            refreshing: Arc::new(AtomicBool::new(false)),
            cache_duration: Duration::seconds(CACHE_DURATION_SECS),
        }
    }

    /// Overrides the validity window.
    pub fn with_cache_duration(mut self, window: Duration) -> Self {
        self.cache_duration = window;
        self
    }

    /// Loads config at startup. Serves the persisted snapshot when it is
    /// still valid, otherwise fetches once through the gateway's retry, and
    /// falls back to the stale snapshot or the baked-in defaults when the
    /// fetch fails. Infallible: the app never blocks on configuration.
    pub async fn initialize(&self) {
        let persisted = match read_json::<ConfigSnapshot>(self.store.as_ref(), CONFIG_KEY).await {
            Ok(persisted) => persisted,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load persisted config");
                None
            }
        };

        if let Some(snapshot) = &persisted
            && snapshot.is_valid(Utc::now(), self.cache_duration)
        {
            *self.snapshot.write().await = persisted;
            return;
        }

        if let Err(err) = self.refresh().await {
            tracing::warn!(error = %err, "config fetch failed, serving stale or defaults");
            *self.snapshot.write().await =
                Some(persisted.unwrap_or_else(ConfigSnapshot::defaults));
        }
    }

    /// Returns the current snapshot without touching the network.
    ///
    /// A snapshot older than the cache window is still returned as-is, and a
    /// single background refresh is scheduled to replace it.
    pub async fn get(&self) -> ConfigSnapshot {
        let snapshot = self
            .snapshot
            .read()
            .await
            .clone()
            .unwrap_or_else(ConfigSnapshot::defaults);

        if !snapshot.is_valid(Utc::now(), self.cache_duration) {
            self.spawn_refresh();
        }
        snapshot
    }

    /// Fetches, persists, and serves a fresh snapshot.
    ///
    /// # Errors
    ///
    /// `Network` when the gateway exhausts its retries, `Serialization` for an
    /// unparseable body, `Storage` when persisting fails.
    pub async fn refresh(&self) -> Result<ConfigSnapshot> {
        let body = self.gateway.request("/config", Method::Get, None).await?;
        let mut snapshot: ConfigSnapshot = serde_json::from_value(body)?;
        snapshot.fetched_at = Utc::now();

        write_json(self.store.as_ref(), CONFIG_KEY, &snapshot).await?;
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Drops the in-memory and persisted snapshots. Called on logout so the
    /// next user starts from defaults.
    pub async fn invalidate(&self) -> Result<()> {
        *self.snapshot.write().await = None;
        self.store.remove(CONFIG_KEY).await
    }

    /// Spawns a task that clears the cache whenever the session ends, so the
    /// next user starts from defaults.
    pub fn spawn_auth_listener(&self, auth: &AuthManager) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        let mut events = auth.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AuthEvent::LoggedOut | AuthEvent::Expired) => {
                        if let Err(err) = cache.invalidate().await {
                            tracing::warn!(error = %err, "failed to invalidate config after logout");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Schedules one background refresh; a no-op while one is in flight.
    fn spawn_refresh(&self) {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return;
        }
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(err) = cache.refresh().await {
                tracing::debug!(error = %err, "background config refresh failed");
            }
            cache.refreshing.store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::{RecordingTransport, test_gateway, test_gateway_parts};
    use crate::gateway::HttpResponse;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn snapshot_at(version: &str, fetched_at: DateTime<Utc>) -> ConfigSnapshot {
        ConfigSnapshot {
            features: HashMap::from([("chat".to_string(), true)]),
            limits: HashMap::new(),
            endpoints: HashMap::new(),
            version: version.to_string(),
            fetched_at,
        }
    }

    fn config_cache(store: Arc<MemoryStore>, transport: Arc<RecordingTransport>) -> ConfigCache {
        let gateway = Arc::new(test_gateway(store.clone(), transport));
        ConfigCache::new(store, gateway)
    }

    #[tokio::test]
    async fn test_valid_snapshot_serves_without_fetching() {
        let store = Arc::new(MemoryStore::new());
        write_json(store.as_ref(), CONFIG_KEY, &snapshot_at("v1", Utc::now()))
            .await
            .unwrap();
        let transport = RecordingTransport::all_unreachable();
        let cache = config_cache(store, transport.clone());

        cache.initialize().await;
        assert_eq!(cache.get().await.version, "v1");
        assert_eq!(cache.get().await.version, "v1");

        assert_eq!(transport.request_count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_get_returns_stale_value_and_refreshes_once() {
        let store = Arc::new(MemoryStore::new());
        let transport = RecordingTransport::scripted(vec![Ok(HttpResponse {
            status: 200,
            body: json!({"features": {"chat": false}, "version": "v2"}),
        })]);
        let cache = config_cache(store, transport.clone());
        *cache.snapshot.write().await =
            Some(snapshot_at("v1", Utc::now() - Duration::hours(2)));

        let served = cache.get().await;
        assert_eq!(served.version, "v1");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(transport.endpoints().await, vec!["/config".to_string()]);
        assert_eq!(cache.get().await.version, "v2");
        assert_eq!(transport.request_count().await, 1);
    }

    #[tokio::test]
    async fn test_in_flight_guard_suppresses_second_refresh() {
        let store = Arc::new(MemoryStore::new());
        let transport = RecordingTransport::all_ok();
        let cache = config_cache(store, transport.clone());
        *cache.snapshot.write().await =
            Some(snapshot_at("v1", Utc::now() - Duration::hours(2)));
        cache.refreshing.store(true, Ordering::SeqCst);

        assert_eq!(cache.get().await.version, "v1");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(transport.request_count().await, 0);
    }

    #[tokio::test]
    async fn test_initialize_falls_back_to_defaults_offline() {
        let store = Arc::new(MemoryStore::new());
        let transport = RecordingTransport::all_unreachable();
        let cache = config_cache(store, transport);

        cache.initialize().await;

        let snapshot = cache.snapshot.read().await.clone().unwrap();
        assert_eq!(snapshot.version, "default");
        assert!(snapshot.feature_enabled("chat"));
    }

    #[tokio::test]
    async fn test_initialize_prefers_stale_persisted_over_defaults() {
        let store = Arc::new(MemoryStore::new());
        write_json(
            store.as_ref(),
            CONFIG_KEY,
            &snapshot_at("v1", Utc::now() - Duration::hours(2)),
        )
        .await
        .unwrap();
        let transport = RecordingTransport::all_unreachable();
        let cache = config_cache(store, transport);

        cache.initialize().await;

        assert_eq!(cache.get().await.version, "v1");
    }

    #[tokio::test]
    async fn test_invalidate_clears_memory_and_store() {
        let store = Arc::new(MemoryStore::new());
        let transport = RecordingTransport::all_ok();
        let cache = config_cache(store.clone(), transport);
        cache.refresh().await.unwrap();
        assert!(store.get(CONFIG_KEY).await.unwrap().is_some());

        cache.invalidate().await.unwrap();

        assert!(store.get(CONFIG_KEY).await.unwrap().is_none());
        assert!(cache.snapshot.read().await.is_none());
    }

    #[tokio::test]
    async fn test_logout_invalidates_cache() {
        let store = Arc::new(MemoryStore::new());
        let transport = RecordingTransport::all_ok();
        let (gateway, auth, _) = test_gateway_parts(store.clone(), transport);
        let cache = ConfigCache::new(store.clone(), Arc::new(gateway));
        cache.refresh().await.unwrap();
        assert!(store.get(CONFIG_KEY).await.unwrap().is_some());

        let listener = cache.spawn_auth_listener(&auth);
        auth.logout().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(store.get(CONFIG_KEY).await.unwrap().is_none());
        assert!(cache.snapshot.read().await.is_none());
        listener.abort();
    }
}
