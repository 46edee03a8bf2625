//! Single-flight refresh coordination.
//!
//! However many requests hit a 401 at the same time, at most one call to
//! the refresh endpoint is ever outstanding. The first caller installs a
//! shared future in the slot; everyone arriving while it is in flight
//! clones the same future and receives the same outcome, success or
//! failure. The slot is emptied the instant the refresh settles, so a
//! later 401 starts a fresh attempt.

use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::ApiError;

use super::session::SessionManager;

type SharedRefresh = Shared<BoxFuture<'static, Result<String, ApiError>>>;

/// The only component allowed to put the session into `Refreshing`.
pub struct RefreshCoordinator {
    session: Arc<SessionManager>,
    in_flight: Arc<Mutex<Option<SharedRefresh>>>,
}

impl RefreshCoordinator {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Obtain a fresh access token, joining the in-flight refresh if one
    /// exists. On failure the session is already logged out by the time
    /// the error is returned; callers must not retry.
    pub async fn fresh_token(&self) -> Result<String, ApiError> {
        let refresh = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("joining in-flight refresh");
                    in_flight.clone()
                }
                None => {
                    let session = Arc::clone(&self.session);
                    let in_flight = Arc::clone(&self.in_flight);
                    let fut = async move {
                        let outcome = session.refresh().await;
                        // The session state (and store) are settled above,
                        // so no waiter released here can read a stale
                        // token. Emptying the slot last keeps late
                        // arrivals joined to this outcome rather than a
                        // half-finished one.
                        in_flight.lock().await.take();
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };
        refresh.await
    }
}
