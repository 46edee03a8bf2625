//! Managed API client for the storefront backend.
//!
//! Every outgoing request flows through one pipeline: read the current
//! access token through the [`SessionHandle`] seam, attach it as a bearer
//! header, send, and classify the response once into [`ApiError`]. On a
//! 401 the pipeline asks the refresh coordinator for a fresh token and
//! replays the request exactly once; a second 401 is terminal and drops
//! the session. Calls to the refresh endpoint itself are never
//! intercepted.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::auth::session::REFRESH_PATH;
use crate::auth::RefreshCoordinator;

use super::{ApiError, SessionHandle};

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
/// 1 second is polite to the server while not making users wait too long.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Per-request state for the replay-after-refresh protocol: the token
/// snapshot attached on first send, and whether the request has already
/// been replayed once.
struct RequestEnvelope {
    token: Option<String>,
    retried: bool,
}

/// Managed request pipeline for the storefront API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<dyn SessionHandle>,
    refresher: Arc<RefreshCoordinator>,
}

impl ApiClient {
    /// Build the pipeline. The session manager exists first and is passed
    /// in behind the narrow [`SessionHandle`] seam; request timeouts come
    /// from the underlying `client`.
    pub fn new(
        client: Client,
        base_url: String,
        session: Arc<dyn SessionHandle>,
        refresher: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            client,
            base_url,
            session,
            refresher,
        }
    }

    /// Send a request through the managed pipeline.
    ///
    /// Transport failures (timeouts included) surface as
    /// [`ApiError::Network`] and never trigger a refresh; only a 401 on a
    /// request that carried a token does.
    pub async fn request<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut envelope = RequestEnvelope {
            token: self.session.bearer_token(),
            retried: false,
        };
        let mut rate_limit_retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(ref token) = envelope.token {
                request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(ApiError::from_transport)?;
            let status = response.status();

            if status.as_u16() == 401 && path != REFRESH_PATH {
                // Anonymous requests have nothing to refresh.
                if envelope.token.is_none() {
                    return Err(ApiError::Unauthorized);
                }
                if envelope.retried {
                    warn!(path, "replayed request rejected again, dropping session");
                    self.session.invalidate("Session expired");
                    return Err(ApiError::Unauthorized);
                }
                debug!(path, "401 received, refreshing session");
                // `retried` is set before the resend, so even a 401 on the
                // replay cannot loop back here.
                envelope.retried = true;
                envelope.token = Some(self.refresher.fresh_token().await?);
                continue;
            }

            if status.as_u16() == 429 {
                rate_limit_retries += 1;
                if rate_limit_retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(path, retry = rate_limit_retries, backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            if !status.is_success() {
                let body_text = response.text().await.unwrap_or_default();
                return Err(ApiError::from_status(status, &body_text));
            }

            return Ok(response);
        }
    }

    // ===== Typed convenience methods =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self
            .request::<serde_json::Value>(Method::GET, path, None)
            .await?;
        Self::decode(response).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.request(Method::POST, path, Some(body)).await?;
        Self::decode(response).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.request(Method::PUT, path, Some(body)).await?;
        Self::decode(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.request::<serde_json::Value>(Method::DELETE, path, None)
            .await?;
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        response.json().await.map_err(|e| ApiError::Unexpected {
            status: status.as_u16(),
            message: format!("malformed response body: {e}"),
        })
    }
}
