use reqwest::{Method, StatusCode};

/// Everything that can go wrong while talking to the management API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Credential missing, rejected, or the login/refresh step failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status} for {method} {path}: {message}")]
    Http {
        status: u16,
        method: Method,
        path: String,
        message: String,
    },

    /// Transport-level failure (connect, reset, timeout, broken body stream).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A download response lacked the metadata that identifies a file payload.
    #[error("malformed download response: {0}")]
    MalformedDownload(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("failed to parse API JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status carried by the error, if it came from a server response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND.as_u16())
    }
}

// Pritunl error bodies look like {"error": "user_not_found", "error_msg": "..."}.
#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) error_msg: Option<String>,
    // Some proxies in front of the server answer with {"message": ...}
    #[serde(default)]
    pub(crate) message: Option<String>,
}

pub(crate) fn http_error(status: StatusCode, method: &Method, path: &str, body: &str) -> Error {
    let message = match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => describe_error_body(status, &parsed, body),
        Err(_) => fallback_message(status, body),
    };

    Error::Http {
        status: status.as_u16(),
        method: method.clone(),
        path: path.to_string(),
        message,
    }
}

fn describe_error_body(status: StatusCode, e: &ApiErrorBody, raw: &str) -> String {
    let msg = e.error_msg.as_deref().or(e.message.as_deref());
    match (e.error.as_deref(), msg) {
        (Some(code), Some(msg)) => format!("{} ({})", msg, code),
        (None, Some(msg)) => msg.to_string(),
        (Some(code), None) => code.to_string(),
        (None, None) => fallback_message(status, raw),
    }
}

fn fallback_message(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string()
    } else {
        body.to_string()
    }
}
