//! Filesystem locations for Solace data.
//!
//! Everything lives under `~/.solace/`:
//!
//! ```text
//! ~/.solace/
//! ├── store/    # JsonFileStore records (one file per key)
//! └── logs/     # Application logs
//! ```

use std::path::PathBuf;

use solace_core::SolaceError;
use solace_core::error::Result;

/// Path resolution for the Solace data directory.
pub struct SolacePaths;

impl SolacePaths {
    /// Returns the Solace root directory, `~/.solace`.
    ///
    /// # Errors
    ///
    /// `Config` when the home directory cannot be determined.
    pub fn root_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".solace"))
            .ok_or_else(|| SolaceError::config("cannot determine home directory"))
    }

    /// Directory holding the [`crate::JsonFileStore`] records.
    pub fn store_dir() -> Result<PathBuf> {
        Ok(Self::root_dir()?.join("store"))
    }

    /// Directory for application logs.
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::root_dir()?.join("logs"))
    }
}
