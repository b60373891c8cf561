//! Session material and the single-flight refresh that keeps it current.
//!
//! A [`SessionStore`] is shared by every request issued through one
//! [`Client`](crate::Client). Reads are cheap; when the session is missing,
//! expired, or was rejected by the server, exactly one caller performs the
//! login while the others wait for its result.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use reqwest::{Client as HttpClient, StatusCode};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::util::urljoin;

const CSRF_HEADER: HeaderName = HeaderName::from_static("csrf-token");

/// Authentication material attached to every outgoing request.
#[derive(Clone)]
pub struct Session {
    headers: HeaderMap,
    expires_at: Option<Instant>,
}

impl Session {
    /// `ttl` of `None` means the session never expires on its own; it is
    /// still replaced when the server rejects it.
    pub fn new(headers: HeaderMap, ttl: Option<Duration>) -> Self {
        Self {
            headers,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    /// Shorten the lifetime so the session expires no later than `ttl` from now.
    pub(crate) fn capped(mut self, ttl: Duration) -> Self {
        let limit = Instant::now() + ttl;
        self.expires_at = Some(self.expires_at.map_or(limit, |at| at.min(limit)));
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    pub(crate) fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

// Header values are credentials; keep them out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Produces a fresh [`Session`].
///
/// Implement this to plug a different login scheme into the client.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, http: &HttpClient, base_url: &str) -> Result<Session>;
}

/// Username/password login against the web session endpoints.
///
/// `POST /auth/session` yields the session cookie, then `GET /state` yields
/// the CSRF token the server expects on cookie-authenticated calls.
pub struct PasswordLogin {
    username: String,
    password: String,
    ttl: Option<Duration>,
}

impl PasswordLogin {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

impl fmt::Debug for PasswordLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordLogin")
            .field("username", &self.username)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[derive(serde::Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Default, serde::Deserialize)]
struct StateReply {
    #[serde(default)]
    csrf_token: Option<String>,
}

#[async_trait]
impl Authenticator for PasswordLogin {
    async fn login(&self, http: &HttpClient, base_url: &str) -> Result<Session> {
        let resp = http
            .post(urljoin(base_url, "/auth/session"))
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "login rejected for user {} (HTTP {})",
                self.username,
                status.as_u16()
            )));
        }

        let cookie = session_cookie(resp.headers())
            .ok_or_else(|| Error::Auth("login response did not set a session cookie".into()))?;
        let cookie = HeaderValue::from_str(&cookie)
            .map_err(|e| Error::Auth(format!("invalid session cookie: {}", e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, cookie);

        let state = http
            .get(urljoin(base_url, "/state"))
            .headers(headers.clone())
            .send()
            .await?;
        if state.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::Auth("session cookie was not accepted".into()));
        }
        if state.status().is_success() {
            let text = state.text().await?;
            let reply: StateReply = serde_json::from_str(&text).unwrap_or_default();
            if let Some(token) = reply.csrf_token.filter(|t| !t.is_empty()) {
                let value = HeaderValue::from_str(&token)
                    .map_err(|e| Error::Auth(format!("invalid CSRF token: {}", e)))?;
                headers.insert(CSRF_HEADER, value);
            }
        }

        Ok(Session::new(headers, self.ttl))
    }
}

/// Collapse every `Set-Cookie` into one `Cookie` header value.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

/// Holds the current session and serializes refreshes.
pub(crate) struct SessionStore {
    authenticator: Arc<dyn Authenticator>,
    ttl: Option<Duration>,
    login_timeout: Duration,
    current: RwLock<Option<Arc<Session>>>,
    refresh: Mutex<()>,
}

impl SessionStore {
    /// `ttl` caps the lifetime of every session the authenticator issues.
    pub(crate) fn new(
        authenticator: Arc<dyn Authenticator>,
        ttl: Option<Duration>,
        login_timeout: Duration,
    ) -> Self {
        Self {
            authenticator,
            ttl,
            login_timeout,
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// A valid session, logging in first if there is none or it expired.
    pub(crate) async fn session(&self, http: &HttpClient, base_url: &str) -> Result<Arc<Session>> {
        if let Some(s) = self.current.read().await.as_ref() {
            if !s.is_expired() {
                return Ok(Arc::clone(s));
            }
        }
        self.refresh(http, base_url, None).await
    }

    /// Replace `stale`, which the server just rejected.
    pub(crate) async fn refresh_rejected(
        &self,
        http: &HttpClient,
        base_url: &str,
        stale: &Arc<Session>,
    ) -> Result<Arc<Session>> {
        self.refresh(http, base_url, Some(stale)).await
    }

    async fn refresh(
        &self,
        http: &HttpClient,
        base_url: &str,
        stale: Option<&Arc<Session>>,
    ) -> Result<Arc<Session>> {
        let _guard = self.refresh.lock().await;

        // Whoever held the lock before us may already have logged in.
        if let Some(s) = self.current.read().await.as_ref() {
            let replaced = stale.is_none_or(|stale| !Arc::ptr_eq(stale, s));
            if replaced && !s.is_expired() {
                debug!("reusing session refreshed by a concurrent request");
                return Ok(Arc::clone(s));
            }
        }

        info!("logging in to management API");
        let login = self.authenticator.login(http, base_url);
        let fresh = match tokio::time::timeout(self.login_timeout, login).await {
            Ok(Ok(s)) => match self.ttl {
                Some(ttl) => Arc::new(s.capped(ttl)),
                None => Arc::new(s),
            },
            Ok(Err(Error::Auth(msg))) => return Err(Error::Auth(msg)),
            Ok(Err(e)) => return Err(Error::Auth(format!("login failed: {}", e))),
            Err(_) => {
                return Err(Error::Auth(format!(
                    "login did not finish within {:?}",
                    self.login_timeout
                )));
            }
        };

        *self.current.write().await = Some(Arc::clone(&fresh));
        Ok(fresh)
    }
}
