//! Platform adapters for the Solace sync core.
//!
//! Concrete implementations of the seams `solace-core` defines:
//! file-backed key-value storage, a `reqwest` HTTP transport, a watch-channel
//! network monitor, and platform path resolution.

pub mod http_transport;
pub mod json_file_store;
pub mod network;
pub mod paths;

pub use crate::http_transport::ReqwestTransport;
pub use crate::json_file_store::JsonFileStore;
pub use crate::network::WatchNetworkMonitor;
pub use crate::paths::SolacePaths;
