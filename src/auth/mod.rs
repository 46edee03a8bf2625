//! Session and token lifecycle module.
//!
//! This module provides:
//! - `SessionManager`: the canonical session state machine
//! - `TokenStore`: durable token storage backed by a JSON document and the OS keychain
//! - `RefreshCoordinator`: single-flight access-token refresh
//!
//! A stored session is hydrated optimistically on startup; token validity
//! is discovered lazily when a request first comes back with a 401.

pub mod refresh;
pub mod session;
pub mod store;

pub use refresh::RefreshCoordinator;
pub use session::{Registration, SessionManager, SessionSnapshot, SessionStatus, User};
pub use store::{StoredSession, TokenStore};
