//! Session and authentication state.

pub mod manager;
pub mod model;

pub use manager::AuthManager;
pub use model::{AuthEvent, Credentials, Session, TierInfo, UserRef};
