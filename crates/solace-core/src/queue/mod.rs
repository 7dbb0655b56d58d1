//! Durable offline queue of pending mutating requests.

pub mod model;
pub mod offline_queue;

pub use model::{Priority, QueueItem};
pub use offline_queue::{FlushOutcome, OfflineQueue, QueuePolicy};
