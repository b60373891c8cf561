//! Concurrent fan-out of one operation across many entities.
//!
//! Every item gets exactly one [`BulkItemResult`], in input order. A failing
//! item is recorded as [`Outcome::Failure`] and never cancels its siblings.

use std::fmt;
use std::future::Future;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::User;

/// Minimal identity of a user, organization, server or key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub organization_id: Option<String>,
}

impl EntityRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            organization_id: None,
        }
    }

    pub fn in_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }
}

impl From<&User> for EntityRef {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            organization_id: user.organization.clone(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}({})", self.name, self.id)
        }
    }
}

/// Why one item of a bulk call failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// HTTP status, when the failure came from the server.
    pub status: Option<u16>,
    pub message: String,
}

impl From<&Error> for ErrorInfo {
    fn from(e: &Error) -> Self {
        Self {
            status: e.status(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome<T> {
    Success(T),
    Failure(ErrorInfo),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Outcome::Success(v) => Some(v),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ErrorInfo> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(e) => Some(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResult<T> {
    pub item: EntityRef,
    pub outcome: Outcome<T>,
}

/// Run `op` for every item concurrently and wait for all of them to settle.
///
/// Fan-out is unbounded. Results come back in input order regardless of
/// completion order; an empty input returns immediately without calling
/// `op`. Each item is logged once. Wrap the call in a span
/// (`tracing::Instrument`) to label the log lines.
pub async fn run_all<T, F, Fut>(items: Vec<EntityRef>, op: F) -> Vec<BulkItemResult<T>>
where
    F: Fn(EntityRef) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run_all_indexed(items, |_, item| op(item)).await
}

/// [`run_all`], also handing `op` the item's position in `items`.
pub(crate) async fn run_all_indexed<T, F, Fut>(
    items: Vec<EntityRef>,
    op: F,
) -> Vec<BulkItemResult<T>>
where
    F: Fn(usize, EntityRef) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if items.is_empty() {
        debug!("bulk operation called with no items");
        return Vec::new();
    }

    let total = items.len();
    let pending = items.into_iter().enumerate().map(|(index, item)| {
        let fut = op(index, item.clone());
        async move {
            let outcome = match fut.await {
                Ok(v) => {
                    info!(id = %item.id, name = %item.name, "bulk item succeeded");
                    Outcome::Success(v)
                }
                Err(e) => {
                    warn!(id = %item.id, name = %item.name, error = %e, "bulk item failed");
                    Outcome::Failure(ErrorInfo::from(&e))
                }
            };
            BulkItemResult { item, outcome }
        }
    });

    let results = join_all(pending).await;

    let failed = results.iter().filter(|r| !r.outcome.is_success()).count();
    info!(total, succeeded = total - failed, failed, "bulk operation settled");
    results
}
