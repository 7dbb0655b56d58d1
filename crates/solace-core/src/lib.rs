pub mod config;
pub mod conversation;
pub mod emotion;
pub mod error;
pub mod gateway;
pub mod queue;
pub mod session;
pub mod store;
pub mod sync;

// Re-export common error type
pub use error::SolaceError;
