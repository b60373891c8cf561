use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ClientConfig, DEFAULT_SESSION_TTL, DEFAULT_TIMEOUT, load_config};
use crate::download::{ByteStream, DownloadDescriptor, RawDownload, resolve_download};
use crate::error::{Error, Result, http_error};
use crate::keys::Keys;
use crate::organizations::Organizations;
use crate::request::{ApiResponse, RequestDescriptor, ResponseMode};
use crate::servers::Servers;
use crate::session::{Authenticator, PasswordLogin, Session, SessionStore};
use crate::users::Users;
use crate::util::urljoin;

/// Authenticated client for the management API.
///
/// Cloning is cheap; clones share the connection pool and the login session.
#[derive(Clone)]
pub struct Client {
    url: String,
    progress: bool,
    timeout: Duration,
    session_ttl: Option<Duration>,

    http: HttpClient,
    authenticator: Arc<dyn Authenticator>,
    sessions: Arc<SessionStore>,
}

impl Client {
    /// Creates a client using environment variables and/or `.pritunlrc`.
    ///
    /// This is equivalent to `Client::new(None, None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit arguments
    /// - environment variables `PRITUNL_URL` / `PRITUNL_USERNAME` /
    ///   `PRITUNL_PASSWORD` / `PRITUNL_VERIFY`
    /// - config file from `PRITUNL_RC` or `.pritunlrc`
    pub fn new(
        url: Option<String>,
        username: Option<String>,
        password: Option<String>,
        verify: Option<bool>,
    ) -> Result<Self> {
        let cfg = load_config(url, username, password, verify)?;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: ClientConfig) -> Result<Self> {
        let login = PasswordLogin::new(cfg.username.clone(), cfg.password.clone());
        Self::from_config_with_authenticator(&cfg, login)
    }

    /// Creates a client that obtains its sessions from `authenticator`, with
    /// default transport settings.
    pub fn with_authenticator(
        url: impl Into<String>,
        authenticator: impl Authenticator + 'static,
    ) -> Result<Self> {
        Self::build(
            &url.into(),
            true,
            DEFAULT_TIMEOUT,
            Some(DEFAULT_SESSION_TTL),
            Arc::new(authenticator),
        )
    }

    /// Like [`Client::with_authenticator`], taking url, TLS verification,
    /// timeout and session lifetime from `cfg`. Its credentials are unused.
    pub fn from_config_with_authenticator(
        cfg: &ClientConfig,
        authenticator: impl Authenticator + 'static,
    ) -> Result<Self> {
        Self::build(
            &cfg.url,
            cfg.verify,
            cfg.timeout,
            Some(cfg.session_ttl),
            Arc::new(authenticator),
        )
    }

    fn build(
        url: &str,
        verify: bool,
        timeout: Duration,
        session_ttl: Option<Duration>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self> {
        let url = url.trim().trim_end_matches('/').to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "url must start with http:// or https:// (got {:?})",
                url
            )));
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pritunl-api-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("pritunl-api-rs")),
        );
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = HttpClient::builder().default_headers(default_headers);
        if !verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&authenticator),
            session_ttl,
            timeout,
        ));
        Ok(Self {
            url,
            progress: false,
            timeout,
            session_ttl,
            http,
            authenticator,
            sessions,
        })
    }

    /// Per-request timeout, also applied to each login.
    ///
    /// Drops the cached session; call before sharing the client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.reset_sessions();
        self
    }

    /// Upper bound on how long a session is used before logging in again.
    ///
    /// Drops the cached session; call before sharing the client.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = Some(ttl);
        self.reset_sessions();
        self
    }

    /// Show a progress bar on stderr while saving downloads to disk.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn reset_sessions(&mut self) {
        self.sessions = Arc::new(SessionStore::new(
            Arc::clone(&self.authenticator),
            self.session_ttl,
            self.timeout,
        ));
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn session_ttl(&self) -> Option<Duration> {
        self.session_ttl
    }

    pub fn base_url(&self) -> &str {
        &self.url
    }

    pub(crate) fn progress(&self) -> bool {
        self.progress
    }

    pub fn users(&self) -> Users<'_> {
        Users::new(self)
    }

    pub fn keys(&self) -> Keys<'_> {
        Keys::new(self)
    }

    pub fn organizations(&self) -> Organizations<'_> {
        Organizations::new(self)
    }

    pub fn servers(&self) -> Servers<'_> {
        Servers::new(self)
    }

    /// Performs an authorized request, shaped by the descriptor's mode.
    pub async fn request(&self, req: &RequestDescriptor) -> Result<ApiResponse> {
        match req.mode() {
            ResponseMode::Json => self.fetch_json(req).await.map(ApiResponse::Json),
            ResponseMode::Stream => self.fetch_stream(req).await.map(ApiResponse::Stream),
        }
    }

    /// JSON-mode request decoded straight into `T`.
    pub async fn request_json<T: DeserializeOwned>(&self, req: &RequestDescriptor) -> Result<T> {
        let value = self.fetch_json(req).await?;
        serde_json::from_value(value).map_err(|e| {
            Error::UnexpectedResponse(format!(
                "{} {} returned an unexpected shape: {}",
                req.method(),
                req.path(),
                e
            ))
        })
    }

    /// Stream-mode request; headers are available, the body is not read.
    pub async fn request_stream(&self, req: &RequestDescriptor) -> Result<RawDownload> {
        self.fetch_stream(req).await
    }

    /// Stream-mode request validated as a file download.
    pub async fn download(&self, req: &RequestDescriptor) -> Result<DownloadDescriptor> {
        resolve_download(self.fetch_stream(req).await?)
    }

    async fn fetch_json(&self, req: &RequestDescriptor) -> Result<Value> {
        if req.mode() != ResponseMode::Json {
            return Err(Error::UnexpectedResponse(format!(
                "{} {} is a stream-mode request",
                req.method(),
                req.path()
            )));
        }

        let resp = self.send_authorized(req).await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(http_error(status, req.method(), req.path(), &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(Error::from)
    }

    async fn fetch_stream(&self, req: &RequestDescriptor) -> Result<RawDownload> {
        if req.mode() != ResponseMode::Stream {
            return Err(Error::UnexpectedResponse(format!(
                "{} {} is a JSON-mode request",
                req.method(),
                req.path()
            )));
        }

        let resp = self.send_authorized(req).await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(http_error(status, req.method(), req.path(), &text));
        }

        Ok(RawDownload {
            status,
            headers: resp.headers().clone(),
            stream: ByteStream::from_response(resp),
        })
    }

    /// Dispatch with a valid session; a 401 triggers one refresh and one replay.
    async fn send_authorized(&self, req: &RequestDescriptor) -> Result<Response> {
        let session = self.sessions.session(&self.http, &self.url).await?;
        let resp = self.dispatch(req, &session).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        debug!(method = %req.method(), path = %req.path(), "session rejected, refreshing");
        let session = self
            .sessions
            .refresh_rejected(&self.http, &self.url, &session)
            .await?;
        let resp = self.dispatch(req, &session).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            warn!(method = %req.method(), path = %req.path(), "fresh session rejected");
            return Err(Error::Auth(format!(
                "{} {} was rejected with a freshly issued session",
                req.method(),
                req.path()
            )));
        }
        Ok(resp)
    }

    async fn dispatch(&self, req: &RequestDescriptor, session: &Session) -> Result<Response> {
        debug!(method = %req.method(), path = %req.path(), "dispatching request");
        let mut builder = self
            .http
            .request(req.method().clone(), urljoin(&self.url, req.path()))
            .headers(session.headers().clone())
            .timeout(self.timeout);
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url)
            .field("progress", &self.progress)
            .field("timeout", &self.timeout)
            .field("session_ttl", &self.session_ttl)
            .finish_non_exhaustive()
    }
}
