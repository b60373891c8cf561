use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the management API, e.g. `https://vpn.example.com`.
    pub url: String,
    pub username: String,
    pub password: String,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    /// Per-request transport timeout.
    pub timeout: Duration,
    /// How long a login session is trusted before it is refreshed.
    pub session_ttl: Duration,
}

impl ClientConfig {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            verify: true,
            timeout: DEFAULT_TIMEOUT,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("verify", &self.verify)
            .field("timeout", &self.timeout)
            .field("session_ttl", &self.session_ttl)
            .finish()
    }
}

const RC_KEYS: [&str; 4] = ["url", "username", "password", "verify"];

#[derive(Debug, Default)]
struct RcConfig {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    verify: Option<bool>,
}

pub(crate) fn load_config(
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    let mut url = url.or_else(|| env_var("PRITUNL_URL"));
    let mut username = username.or_else(|| env_var("PRITUNL_USERNAME"));
    let mut password = password.or_else(|| env_var("PRITUNL_PASSWORD"));
    let verify = verify.or_else(|| env_var("PRITUNL_VERIFY").map(|v| parse_bool(&v)));

    let rc_candidates = rc_candidates();
    let mut file_verify: Option<bool> = None;

    if url.is_none() || username.is_none() || password.is_none() || verify.is_none() {
        if let Some(rc_path) = rc_candidates.iter().find(|p| p.exists()) {
            let cfg = read_rc(rc_path).map_err(|e| {
                Error::Config(format!(
                    "failed to read configuration file {}: {}",
                    rc_path.display(),
                    e
                ))
            })?;

            url = url.or(cfg.url);
            username = username.or(cfg.username);
            password = password.or(cfg.password);
            file_verify = cfg.verify;
        }
    }

    let url = url.ok_or_else(|| missing("url", "PRITUNL_URL", &rc_candidates))?;
    let username = username.ok_or_else(|| missing("username", "PRITUNL_USERNAME", &rc_candidates))?;
    let password = password.ok_or_else(|| missing("password", "PRITUNL_PASSWORD", &rc_candidates))?;

    let mut cfg = ClientConfig::new(url, username, password);
    cfg.verify = verify.or(file_verify).unwrap_or(true);
    Ok(cfg)
}

fn missing(key: &str, env: &str, rc_candidates: &[PathBuf]) -> Error {
    if rc_candidates.is_empty() {
        return Error::Config(format!(
            "missing {} (set {} or create .pritunlrc)",
            key, env
        ));
    }
    Error::Config(format!(
        "missing {} (set {} or put `{}:` in one of: {})",
        key,
        env,
        key,
        rc_candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(v: &str) -> bool {
    !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
}

fn read_rc(path: &Path) -> std::io::Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    // A key may be written as `key:` with its value on the following line.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(key) = pending_key.take() {
            if !is_key_line(line) {
                set(&mut cfg, key, strip_quotes(line));
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            if RC_KEYS.contains(&k) {
                if v.is_empty() {
                    pending_key = Some(k);
                } else {
                    set(&mut cfg, k, v);
                }
            }
        }
    }

    cfg
}

fn is_key_line(line: &str) -> bool {
    line.split_once(':')
        .is_some_and(|(k, _)| RC_KEYS.contains(&k.trim()))
}

fn set(cfg: &mut RcConfig, key: &str, value: &str) {
    match key {
        "url" => cfg.url = Some(value.to_string()),
        "username" => cfg.username = Some(value.to_string()),
        "password" => cfg.password = Some(value.to_string()),
        "verify" => cfg.verify = Some(parse_bool(value)),
        _ => {}
    }
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) PRITUNL_RC (explicit)
    // 2) ./.pritunlrc
    // 3) ~/.pritunlrc
    if let Ok(p) = std::env::var("PRITUNL_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".pritunlrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".pritunlrc"));
    }
    v
}
