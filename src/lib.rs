//! Core library for shopfront - session lifecycle, auth, managed API client.
//!
//! The storefront UI never talks to the backend directly. It dispatches
//! session actions (login, register, logout) on the [`SessionManager`],
//! reads session state through snapshots or the watch channel, and issues
//! every request through the [`ApiClient`], which attaches the current
//! bearer credential, detects authorization failures, refreshes the
//! session transparently, and replays the failed request exactly once.
//!
//! Construct the whole stack with [`Storefront::new`]; the pieces can
//! also be wired by hand when embedding.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, SessionHandle};
pub use auth::{
    Registration, RefreshCoordinator, SessionManager, SessionSnapshot, SessionStatus, User,
};
pub use config::Config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use auth::TokenStore;

/// Wired-up storefront client: the session state machine plus the managed
/// request pipeline, sharing one connection pool.
pub struct Storefront {
    session: Arc<SessionManager>,
    api: ApiClient,
}

impl Storefront {
    /// Build the stack. The session manager is constructed first (and
    /// hydrates any stored session); the pipeline then receives it behind
    /// the narrow [`SessionHandle`] seam, so requests issued before any
    /// login simply go out anonymously.
    pub fn new(config: Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        let session_dir = config
            .session_dir()
            .unwrap_or_else(|_| PathBuf::from("./session"));
        let store = TokenStore::new(session_dir, config.keychain);
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let session = Arc::new(SessionManager::new(client.clone(), base_url.clone(), store));
        let refresher = Arc::new(RefreshCoordinator::new(Arc::clone(&session)));
        let api = ApiClient::new(
            client,
            base_url,
            Arc::clone(&session) as Arc<dyn SessionHandle>,
            refresher,
        );

        Ok(Self { session, api })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }
}
