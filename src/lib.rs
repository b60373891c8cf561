//! An async Rust client for the Pritunl VPN management API.
//!
//! The client logs in on first use and keeps one shared session per
//! [`Client`]. Concurrent requests that find the session expired or rejected
//! wait on a single refresh. On top of that it offers:
//! - user, organization and server operations,
//! - bulk operations that fan out concurrently and report one
//!   [`BulkItemResult`] per input item instead of failing as a whole,
//! - streaming downloads of client profiles, validated and named from the
//!   response's `Content-Disposition` header before the stream is handed over.
//!
//! ## Quick start
//! - Configure access via environment variables (`PRITUNL_URL`,
//!   `PRITUNL_USERNAME`, `PRITUNL_PASSWORD`) or a `.pritunlrc` file (current
//!   directory or home directory).
//! - Resolve an organization, then work with its users.
//!
//! ```no_run
//! use pritunl_api::{Client, EntityRef};
//! use std::path::Path;
//!
//! # async fn run() -> pritunl_api::Result<()> {
//! let client = Client::from_env()?;
//! let org = client
//!     .organizations()
//!     .find_default()
//!     .await?
//!     .expect("no default organization");
//!
//! let users: Vec<EntityRef> = client
//!     .users()
//!     .list(&org.id)
//!     .await?
//!     .iter()
//!     .map(EntityRef::from)
//!     .collect();
//!
//! for r in client
//!     .keys()
//!     .download_users_client_configs(&org.id, users, Path::new("profiles"))
//!     .await
//! {
//!     if let Some(err) = r.outcome.failure() {
//!         eprintln!("{}: {}", r.item, err);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod bulk;
mod client;
mod config;
mod download;
mod error;
mod keys;
mod models;
mod organizations;
mod request;
mod servers;
mod session;
mod users;
mod util;

pub use bulk::{BulkItemResult, EntityRef, ErrorInfo, Outcome, run_all};
pub use client::Client;
pub use config::ClientConfig;
pub use download::{ByteStream, DownloadDescriptor, RawDownload, resolve_download, save_to_path};
pub use error::{Error, Result};
pub use keys::{ArchiveFormat, ConfigStreamOptions, Keys};
pub use models::{
    FindUsersResponse, KeyLinks, Organization, PortForward, Server, User, UserOverrides,
    UserParams, UserServer,
};
pub use organizations::{DEFAULT_ORGANIZATION, Organizations};
pub use request::{ApiResponse, RequestDescriptor, ResponseMode};
pub use servers::Servers;
pub use session::{Authenticator, PasswordLogin, Session};
pub use users::Users;

/// Re-exported so custom [`Authenticator`]s can be written without a direct
/// `reqwest` dependency.
pub use reqwest;
