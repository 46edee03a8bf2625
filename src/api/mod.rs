//! Managed REST client module for the storefront API.
//!
//! This module provides the `ApiClient` that every collaborator issues
//! requests through. The pipeline attaches the current bearer credential,
//! detects authorization failures, and replays a failed request exactly
//! once after a transparent session refresh.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;

/// Narrow view of the session granted to the request pipeline.
///
/// The pipeline and the session manager are constructed independently;
/// the manager is handed in through this trait at wiring time, so the
/// module that builds requests never owns the module that owns the
/// credentials. With no token available the pipeline simply sends
/// anonymous requests.
pub trait SessionHandle: Send + Sync {
    /// Current bearer credential, if the session holds one.
    fn bearer_token(&self) -> Option<String>;

    /// Tear the session down after an unrecoverable authorization failure.
    fn invalidate(&self, reason: &str);
}
