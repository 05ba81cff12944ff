//! HTTP client that keeps a session alive.
//!
//! The access token is held in memory and sent as a bearer header. Refresh and
//! activity cookies live only in the HTTP client's cookie store. A request that
//! fails with `TOKEN_EXPIRED` triggers one shared refresh and is retried once.
//! Any other 401, or a refresh that fails for any reason, ends the session and
//! broadcasts [`SessionEvent::LoggedOut`].

mod cache;
mod error;
mod refresh;
mod retry;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

pub use cache::FetchCache;
pub use error::{ClientError, LogoutReason};
pub use refresh::RefreshGate;
pub use retry::RetryPolicy;

use crate::api::{LoginRequest, SessionResponse, UserInfo};
use crate::auth::INACTIVITY_TIMEOUT;
use error::ErrorBody;

const ANONYMOUS: &str = "anon";

/// Default cap on cached responses per client.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { username: String },
    LoggedOut { reason: LogoutReason },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    /// Applied to cached reads only. Mutations and session calls are sent once.
    pub retry: RetryPolicy,
    /// Whole-request timeout for every call
    pub request_timeout: Duration,
    pub cache_capacity: usize,
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Default)]
struct SessionSlot {
    token: Option<String>,
    user: Option<UserInfo>,
    /// Bumped whenever the session starts or ends
    generation: u64,
}

struct Inner {
    http: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
    cache: FetchCache<Value>,
    session: Mutex<SessionSlot>,
    refresh: RefreshGate<String>,
    events: broadcast::Sender<SessionEvent>,
}

/// Cheap to clone; clones share the session, cache, and cookie store.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

impl SessionClient {
    /// Client over a fresh cookie-store-enabled `reqwest::Client`.
    pub fn new(config: ClientConfig, cache: FetchCache<Value>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()
            .map_err(ClientError::from_reqwest)?;
        Ok(Self::with_http(config, http, cache))
    }

    /// Client over a caller-built `reqwest::Client`. It must keep a cookie store
    /// for refresh to work.
    pub fn with_http(config: ClientConfig, http: reqwest::Client, cache: FetchCache<Value>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                http,
                base_url: config.base_url,
                retry: config.retry,
                cache,
                session: Mutex::new(SessionSlot::default()),
                refresh: RefreshGate::new(),
                events,
            }),
        }
    }

    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.inner.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn access_token(&self) -> Option<String> {
        self.slot().token.clone()
    }

    /// Replace the held access token, e.g. with one restored from storage.
    pub fn set_access_token(&self, token: impl Into<String>) {
        self.slot().token = Some(token.into());
    }

    pub fn current_user(&self) -> Option<UserInfo> {
        self.slot().user.clone()
    }

    pub fn cache(&self) -> &FetchCache<Value> {
        &self.inner.cache
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.inner
            .base_url
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", path, e)))
    }

    fn identity(&self) -> String {
        self.slot()
            .user
            .as_ref()
            .map(|user| user.username.clone())
            .unwrap_or_else(|| ANONYMOUS.to_string())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<UserInfo, ClientError> {
        let url = self.url("/auth/login")?;
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self
            .inner
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;
        let session: SessionResponse = decode(read_body(response).await?)?;

        {
            let mut slot = self.slot();
            slot.token = Some(session.token);
            slot.user = Some(session.user.clone());
            slot.generation += 1;
        }
        self.inner.cache.clear();
        info!(username = %session.user.username, "Logged in");
        let _ = self.inner.events.send(SessionEvent::LoggedIn {
            username: session.user.username.clone(),
        });
        Ok(session.user)
    }

    /// End the session locally, then ask the server to clear its cookies.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.end_session(LogoutReason::UserRequested);
        let url = self.url("/auth/logout")?;
        let response = self
            .inner
            .http
            .post(url)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;
        read_body(response).await.map(|_| ())
    }

    /// Cached, de-duplicated GET. Concurrent calls for the same path and identity
    /// share one request, including its retries and any refresh it triggers.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        ttl: Duration,
    ) -> Result<T, ClientError> {
        let url = self.url(path)?;
        let key = format!("GET {} {}", url, self.identity());

        let this = self.clone();
        let value = self
            .inner
            .cache
            .fetch(&key, ttl, move || async move {
                this.call(Method::GET, url, None, true).await
            })
            .await?;
        decode(value)
    }

    /// Uncached request with a JSON body. On success every cached entry under
    /// the path is dropped.
    pub async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let url = self.url(path)?;
        let body = serde_json::to_value(body).map_err(|e| ClientError::Decode(e.to_string()))?;
        let invalidate = url.path().to_string();

        let value = self.call(method, url, Some(body), false).await?;
        self.inner.cache.invalidate(&invalidate);
        decode(value)
    }

    /// Attach the credential, send, and on `TOKEN_EXPIRED` refresh once and retry once.
    async fn call(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
        retry: bool,
    ) -> Result<Value, ClientError> {
        let sent_with = self.access_token();
        let first = self
            .attempt(&method, &url, body.as_ref(), sent_with.as_deref(), retry)
            .await;

        let Some(stale) = sent_with else {
            return first;
        };
        let err = match first {
            Err(e) if e.is_unauthorized() => e,
            other => return other,
        };
        if !err.is_token_expired() {
            return Err(self.terminal(err.code()));
        }

        let token = self.refresh_after(&stale).await?;
        debug!(url = %url, "Retrying after refresh");
        match self
            .attempt(&method, &url, body.as_ref(), Some(&token), retry)
            .await
        {
            Err(e) if e.is_unauthorized() => Err(self.terminal(e.code())),
            other => other,
        }
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        token: Option<&str>,
        retry: bool,
    ) -> Result<Value, ClientError> {
        let send = || self.send(method.clone(), url.clone(), body, token);
        if retry {
            self.inner.retry.run(send).await
        } else {
            send().await
        }
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Value, ClientError> {
        let mut request = self.inner.http.request(method, url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(ClientError::from_reqwest)?;
        read_body(response).await
    }

    /// Fresh access token after `stale` was rejected as expired. If another caller
    /// already replaced it, that token is used without a second refresh.
    async fn refresh_after(&self, stale: &str) -> Result<String, ClientError> {
        if let Some(current) = self.access_token() {
            if current != stale {
                debug!("Access token already replaced");
                return Ok(current);
            }
        }

        let this = self.clone();
        let stale = stale.to_string();
        self.inner
            .refresh
            .run(move || async move { this.request_refresh(&stale).await })
            .await
    }

    /// The refresh request itself. Runs once per burst of expired-token failures.
    async fn request_refresh(&self, stale: &str) -> Result<String, ClientError> {
        let generation = {
            let slot = self.slot();
            match &slot.token {
                Some(current) if current != stale => return Ok(current.clone()),
                _ => slot.generation,
            }
        };
        let url = self.url("/auth/refresh")?;
        let outcome = match self.inner.http.post(url).send().await {
            Ok(response) => read_body(response).await.and_then(decode::<SessionResponse>),
            Err(e) => Err(ClientError::from_reqwest(e)),
        };

        match outcome {
            Ok(session) => {
                let mut slot = self.slot();
                if slot.generation != generation {
                    debug!("Session changed during refresh; discarding result");
                    return Err(ClientError::SessionEnded(LogoutReason::UserRequested));
                }
                slot.token = Some(session.token.clone());
                slot.user = Some(session.user);
                info!("Access token refreshed");
                Ok(session.token)
            }
            Err(e) => {
                let reason = if e.code() == Some(INACTIVITY_TIMEOUT) {
                    LogoutReason::InactivityTimeout
                } else {
                    LogoutReason::RefreshFailed
                };
                warn!(error = %e, reason = ?reason, "Refresh failed");
                self.end_session(reason);
                Err(ClientError::SessionEnded(reason))
            }
        }
    }

    fn terminal(&self, code: Option<&str>) -> ClientError {
        let reason = LogoutReason::from_code(code);
        self.end_session(reason);
        ClientError::SessionEnded(reason)
    }

    /// Discard the credential and cached data, then broadcast once.
    /// Does nothing if there is no session to end.
    fn end_session(&self, reason: LogoutReason) {
        let ended = {
            let mut slot = self.slot();
            let active = slot.token.is_some() || slot.user.is_some();
            slot.token = None;
            slot.user = None;
            if active {
                slot.generation += 1;
            }
            active
        };
        if !ended {
            return;
        }

        self.inner.cache.clear();
        info!(reason = ?reason, "Session ended");
        let _ = self.inner.events.send(SessionEvent::LoggedOut { reason });
    }
}

async fn read_body(response: reqwest::Response) -> Result<Value, ClientError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(ClientError::from_reqwest)?;
    if !status.is_success() {
        return Err(ErrorBody::into_error(&bytes, status));
    }
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
}
