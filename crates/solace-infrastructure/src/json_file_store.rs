//! File-backed key-value store, one file per key.
//!
//! Each key maps to `<sanitized-key>.json` under the store directory. Writes
//! go through a temporary file plus atomic rename so a crash mid-write leaves
//! either the old value or the new one, never a torn file.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use solace_core::error::Result;
use solace_core::store::KeyValueStore;

use crate::paths::SolacePaths;

/// Durable [`KeyValueStore`] over a directory of JSON files.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Opens the store at the platform default location, `~/.solace/store`.
    pub async fn at_default_location() -> Result<Self> {
        Self::new(SolacePaths::store_dir()?).await
    }

    /// Maps a key to its backing file.
    ///
    /// Keys are caller-controlled strings like `emotion_log_<user_id>`, so
    /// anything that is not filename-safe is replaced to keep every key
    /// inside the store directory.
    fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '@' => c,
                _ => '_',
            })
            .collect();
        self.root.join(format!("{sanitized}.json"))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");

        let mut tmp = fs::File::create(&tmp_path).await?;
        tmp.write_all(value.as_bytes()).await?;
        tmp.sync_all().await?;
        drop(tmp);

        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
