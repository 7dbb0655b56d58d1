//! User-scoped store handle.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::store::{KeyValueStore, read_json, write_json};

/// A store handle scoped to a single user.
///
/// Every physical key is derived as `<name>_<user_id>`, so data written
/// through one user's handle can never be read through another's. Components
/// that hold a `ScopedStore` cannot reach global keys at all.
#[derive(Clone)]
pub struct ScopedStore {
    inner: Arc<dyn KeyValueStore>,
    user_id: String,
}

impl ScopedStore {
    /// Creates a handle for `user_id` over the shared backing store.
    pub fn new(inner: Arc<dyn KeyValueStore>, user_id: impl Into<String>) -> Self {
        Self {
            inner,
            user_id: user_id.into(),
        }
    }

    /// The user this handle is scoped to.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn key(&self, name: &str) -> String {
        format!("{name}_{}", self.user_id)
    }

    /// Reads and validates a scoped record. Malformed records are quarantined
    /// and reported as absent.
    pub async fn get_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        read_json(self.inner.as_ref(), &self.key(name)).await
    }

    /// Serializes and stores a scoped record.
    pub async fn set_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        write_json(self.inner.as_ref(), &self.key(name), value).await
    }

    /// Removes a scoped record.
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.inner.remove(&self.key(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_keys_are_namespaced_per_user() {
        let backing = Arc::new(MemoryStore::new());
        let alice = ScopedStore::new(backing.clone(), "user-a");
        let bob = ScopedStore::new(backing.clone(), "user-b");

        alice.set_json("notes", &vec!["hello"]).await.unwrap();

        let from_bob: Option<Vec<String>> = bob.get_json("notes").await.unwrap();
        assert!(from_bob.is_none());

        let from_alice: Option<Vec<String>> = alice.get_json("notes").await.unwrap();
        assert_eq!(from_alice, Some(vec!["hello".to_string()]));

        // Physical key carries the user id suffix
        assert!(backing.get("notes_user-a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_only_touches_own_namespace() {
        let backing = Arc::new(MemoryStore::new());
        let alice = ScopedStore::new(backing.clone(), "user-a");
        let bob = ScopedStore::new(backing.clone(), "user-b");

        alice.set_json("notes", &1).await.unwrap();
        bob.set_json("notes", &2).await.unwrap();

        alice.remove("notes").await.unwrap();

        let remaining: Option<i32> = bob.get_json("notes").await.unwrap();
        assert_eq!(remaining, Some(2));
    }
}
