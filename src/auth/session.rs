//! Session state machine.
//!
//! Owns the canonical authentication state for the process: status, user
//! identity, and the token pair. All mutation goes through the transition
//! methods here; the request pipeline only reads the token (and tears the
//! session down on terminal authorization failures) through the narrow
//! [`crate::api::SessionHandle`] seam.
//!
//! Tokens are mirrored to the [`TokenStore`] on every transition that
//! changes them, and the mirror write always happens before the new state
//! becomes visible to readers.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::ApiError;

use super::store::{StoredSession, TokenStore};

/// Login endpoint path
const LOGIN_PATH: &str = "/auth/login";

/// Registration endpoint path
const REGISTER_PATH: &str = "/auth/register";

/// Refresh endpoint path. The managed client checks this to keep refresh
/// calls out of its own 401 interception.
pub(crate) const REFRESH_PATH: &str = "/auth/refresh";

/// Fallback shown when the server rejects a login without a message
const LOGIN_FALLBACK_ERROR: &str = "Login failed";

/// Fallback shown when the server rejects a registration without a message
const REGISTER_FALLBACK_ERROR: &str = "Registration failed";

/// Publicly visible authentication status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum SessionStatus {
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
    LoggedOut,
}

/// Identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct User {
    pub id: i64,
    pub email: String,
}

/// Access/refresh credential pair held while authenticated.
#[derive(Debug, Clone)]
pub(crate) struct TokenPair {
    pub access: String,
    pub refresh: Option<String>,
}

/// Canonical session state.
///
/// The data-carrying variants are the invariants: a token exists exactly
/// in `Authenticated` and `Refreshing`, and never without its user.
#[derive(Debug, Clone)]
enum SessionState {
    Anonymous { last_error: Option<String> },
    Authenticating,
    Authenticated { user: User, tokens: TokenPair },
    Refreshing { user: User, tokens: TokenPair },
    LoggedOut { last_error: Option<String> },
}

impl SessionState {
    fn status(&self) -> SessionStatus {
        match self {
            SessionState::Anonymous { .. } => SessionStatus::Anonymous,
            SessionState::Authenticating => SessionStatus::Authenticating,
            SessionState::Authenticated { .. } => SessionStatus::Authenticated,
            SessionState::Refreshing { .. } => SessionStatus::Refreshing,
            SessionState::LoggedOut { .. } => SessionStatus::LoggedOut,
        }
    }

    fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated { user, .. } | SessionState::Refreshing { user, .. } => {
                Some(user)
            }
            _ => None,
        }
    }

    fn tokens(&self) -> Option<&TokenPair> {
        match self {
            SessionState::Authenticated { tokens, .. }
            | SessionState::Refreshing { tokens, .. } => Some(tokens),
            _ => None,
        }
    }

    fn last_error(&self) -> Option<&str> {
        match self {
            SessionState::Anonymous { last_error } | SessionState::LoggedOut { last_error } => {
                last_error.as_deref()
            }
            _ => None,
        }
    }
}

/// Read-side projection of the session handed to UI collaborators.
/// Never carries tokens.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Registration form payload. Registering never authenticates the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
    pub surname: String,
    pub phone: String,
    pub dob: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    id: i64,
    email: String,
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
}

/// Owns the session state and performs all transitions.
pub struct SessionManager {
    client: Client,
    base_url: String,
    store: TokenStore,
    state: RwLock<SessionState>,
    events: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    /// Create the manager, hydrating from the token store. A stored access
    /// token starts the session as `Authenticated` optimistically; its
    /// validity is discovered lazily through 401 detection on first use.
    pub fn new(client: Client, base_url: String, store: TokenStore) -> Self {
        let state = match store.load() {
            Some(stored) => {
                debug!(user = stored.user.id, "hydrated session from storage");
                SessionState::Authenticated {
                    user: stored.user,
                    tokens: TokenPair {
                        access: stored.access_token,
                        refresh: stored.refresh_token,
                    },
                }
            }
            None => SessionState::Anonymous { last_error: None },
        };
        let snapshot = SessionSnapshot {
            status: state.status(),
            user: state.user().cloned(),
            last_error: None,
        };
        let (events, _) = watch::channel(snapshot);
        Self {
            client,
            base_url,
            store,
            state: RwLock::new(state),
            events,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn status(&self) -> SessionStatus {
        self.read_state().status()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.read_state();
        SessionSnapshot {
            status: state.status(),
            user: state.user().cloned(),
            last_error: state.last_error().map(str::to_string),
        }
    }

    /// Current bearer credential, present only while authenticated or
    /// refreshing.
    pub fn access_token(&self) -> Option<String> {
        self.read_state().tokens().map(|t| t.access.clone())
    }

    /// Watch session snapshots; a new value is published on every
    /// transition so collaborators can react without polling.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.events.subscribe()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Authenticate against `/auth/login`. On success the tokens are
    /// persisted and the session becomes `Authenticated`; on failure the
    /// session returns to `Anonymous` with the server's message (or a
    /// generic fallback) in `last_error`.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        // A new attempt always clears the previous error.
        self.set_state(SessionState::Authenticating);
        debug!(email, "logging in");

        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        let response = match self
            .client
            .post(&url)
            .json(&LoginRequest { email, password })
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let err = ApiError::from_transport(e);
                self.set_state(SessionState::Anonymous {
                    last_error: Some(err.to_string()),
                });
                return Err(err);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = ApiError::body_message(&body)
                .unwrap_or_else(|| LOGIN_FALLBACK_ERROR.to_string());
            warn!(%status, "login rejected");
            self.set_state(SessionState::Anonymous {
                last_error: Some(message.clone()),
            });
            return Err(ApiError::AuthFailed(message));
        }

        let login: LoginResponse = match response.json().await {
            Ok(l) => l,
            Err(e) => {
                let err = ApiError::Unexpected {
                    status: status.as_u16(),
                    message: format!("malformed login response: {e}"),
                };
                self.set_state(SessionState::Anonymous {
                    last_error: Some(err.to_string()),
                });
                return Err(err);
            }
        };

        let user = User {
            id: login.id,
            email: login.email,
        };
        let tokens = TokenPair {
            access: login.access_token,
            refresh: login.refresh_token,
        };

        // Durable mirror first, then publish the new state.
        self.store.save(StoredSession {
            user: user.clone(),
            access_token: tokens.access.clone(),
            refresh_token: tokens.refresh.clone(),
            saved_at: Utc::now(),
        });
        self.set_state(SessionState::Authenticated {
            user: user.clone(),
            tokens,
        });
        info!(user = user.id, "login successful");
        Ok(user)
    }

    /// Create an account via `/auth/register`. This is a side channel: it
    /// never changes the session status and never authenticates the
    /// caller, whatever the outcome.
    pub async fn register(&self, registration: &Registration) -> Result<(), ApiError> {
        let url = format!("{}{}", self.base_url, REGISTER_PATH);
        let response = self
            .client
            .post(&url)
            .json(registration)
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let status = response.status();
        if status.is_success() {
            info!(email = %registration.email, "registration accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(%status, "registration rejected");
        if status.is_client_error() {
            let message = ApiError::body_message(&body)
                .unwrap_or_else(|| REGISTER_FALLBACK_ERROR.to_string());
            Err(ApiError::AuthFailed(message))
        } else {
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Drop the session unconditionally. Never fails, and calling it on an
    /// already logged-out session just clears storage again.
    pub fn logout(&self) {
        self.store.clear();
        self.set_state(SessionState::LoggedOut { last_error: None });
        info!("logged out");
    }

    /// Terminal authorization failure: drop the session and record why.
    pub(crate) fn invalidate(&self, reason: &str) {
        self.store.clear();
        self.set_state(SessionState::LoggedOut {
            last_error: Some(reason.to_string()),
        });
        warn!(reason, "session invalidated");
    }

    /// Exchange the refresh credential for a new access token.
    ///
    /// Only the [`RefreshCoordinator`](super::RefreshCoordinator) calls
    /// this; going through the coordinator is what guarantees a single
    /// outstanding refresh. Any failure is terminal: the session becomes
    /// `LoggedOut` and storage is cleared.
    pub(crate) async fn refresh(&self) -> Result<String, ApiError> {
        let tokens = {
            let mut state = self.write_state();
            match &*state {
                SessionState::Authenticated { user, tokens }
                | SessionState::Refreshing { user, tokens } => {
                    let (user, tokens) = (user.clone(), tokens.clone());
                    *state = SessionState::Refreshing {
                        user,
                        tokens: tokens.clone(),
                    };
                    tokens
                }
                // Logged out (or never logged in) while the triggering
                // request was in flight: nothing to refresh.
                _ => return Err(ApiError::Unauthorized),
            }
        };
        self.publish();

        let Some(refresh_token) = tokens.refresh else {
            warn!("no refresh credential available");
            self.fail_refresh("Session expired".to_string());
            return Err(ApiError::Unauthorized);
        };

        debug!("refreshing access token");
        let url = format!("{}{}", self.base_url, REFRESH_PATH);
        let response = match self
            .client
            .post(&url)
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let err = ApiError::from_transport(e);
                self.fail_refresh(err.to_string());
                return Err(err);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "refresh rejected");
            let err = ApiError::from_status(status, &body);
            self.fail_refresh(
                ApiError::body_message(&body).unwrap_or_else(|| "Session expired".to_string()),
            );
            return Err(err);
        }

        let refreshed: RefreshResponse = match response.json().await {
            Ok(r) => r,
            Err(e) => {
                let err = ApiError::Unexpected {
                    status: status.as_u16(),
                    message: format!("malformed refresh response: {e}"),
                };
                self.fail_refresh(err.to_string());
                return Err(err);
            }
        };

        let (user, refresh_token) = {
            let state = self.read_state();
            match state.user() {
                Some(user) => (
                    user.clone(),
                    // Keep the old refresh credential unless the server
                    // rotated it.
                    refreshed.refresh_token.or(Some(refresh_token)),
                ),
                // Logged out while the refresh call was on the wire; the
                // new token must not resurrect the session.
                None => return Err(ApiError::Unauthorized),
            }
        };
        let tokens = TokenPair {
            access: refreshed.access_token.clone(),
            refresh: refresh_token,
        };

        // Durable mirror first, then publish: a request built after this
        // returns can only ever read the new token.
        self.store.save(StoredSession {
            user: user.clone(),
            access_token: tokens.access.clone(),
            refresh_token: tokens.refresh.clone(),
            saved_at: Utc::now(),
        });
        self.set_state(SessionState::Authenticated { user, tokens });
        info!("access token refreshed");
        Ok(refreshed.access_token)
    }

    fn fail_refresh(&self, reason: String) {
        self.store.clear();
        self.set_state(SessionState::LoggedOut {
            last_error: Some(reason),
        });
    }

    // =========================================================================
    // State plumbing
    // =========================================================================

    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, new: SessionState) {
        *self.write_state() = new;
        self.publish();
    }

    fn publish(&self) {
        self.events.send_replace(self.snapshot());
    }
}

impl crate::api::SessionHandle for SessionManager {
    fn bearer_token(&self) -> Option<String> {
        self.access_token()
    }

    fn invalidate(&self, reason: &str) {
        SessionManager::invalidate(self, reason);
    }
}
