use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{Instrument, info, info_span};

use crate::bulk::{BulkItemResult, EntityRef, run_all_indexed};
use crate::client::Client;
use crate::download::{DownloadDescriptor, save_to_path};
use crate::error::{Error, Result};
use crate::request::RequestDescriptor;
use crate::util::{extract_profile, profile_destination, safe_file_name, segment};

/// Archive format for a user's full set of client profiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveFormat {
    #[default]
    Zip,
    Tar,
    /// ChromeOS network configuration.
    Onc,
}

impl ArchiveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Onc => "onc",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Which client configuration to download.
#[derive(Debug, Clone, Default)]
pub struct ConfigStreamOptions {
    /// Fetch the single profile for this server. When unset, every profile of
    /// the user is packed into an archive of `format`.
    pub server: Option<String>,
    /// Ignored when `server` is set.
    pub format: ArchiveFormat,
}

impl ConfigStreamOptions {
    pub fn server(server_id: impl Into<String>) -> Self {
        Self {
            server: Some(server_id.into()),
            ..Default::default()
        }
    }

    pub fn archive(format: ArchiveFormat) -> Self {
        Self {
            server: None,
            format,
        }
    }

    pub(crate) fn path(&self, org_id: &str, user_id: &str) -> String {
        match &self.server {
            Some(server) => format!(
                "/key/{}/{}/{}.key",
                segment(org_id),
                segment(user_id),
                segment(server)
            ),
            None => format!(
                "/key/{}/{}.{}",
                segment(org_id),
                segment(user_id),
                self.format
            ),
        }
    }
}

/// Client configuration (key) downloads.
#[derive(Debug, Clone, Copy)]
pub struct Keys<'a> {
    client: &'a Client,
}

impl<'a> Keys<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// Open a user's client configuration as a live stream.
    ///
    /// Fails with [`Error::MalformedDownload`] when the response does not
    /// name a file.
    pub async fn client_config_stream(
        &self,
        org_id: &str,
        user_id: &str,
        options: &ConfigStreamOptions,
    ) -> Result<DownloadDescriptor> {
        let req = RequestDescriptor::get(options.path(org_id, user_id)).streaming();
        self.client.download(&req).await
    }

    /// Stream a user's client configuration into `dest_dir`, named after the
    /// file name the server announced.
    pub async fn save_client_config(
        &self,
        org_id: &str,
        user_id: &str,
        options: &ConfigStreamOptions,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let download = self.client_config_stream(org_id, user_id, options).await?;
        let Some(name) = safe_file_name(&download.file_name) else {
            download.stream.release();
            return Err(Error::MalformedDownload(
                "announced file name has no usable final component".into(),
            ));
        };

        let path = dest_dir.join(name);
        let written = save_to_path(download, &path, self.client.progress()).await?;
        info!(user_id, path = %path.display(), bytes = written, "client configuration saved");
        Ok(path)
    }

    /// Write the user's VPN profile to `dest_dir` as `{name}.ovpn` (or
    /// `file_name`), cut out of the user's key archive.
    pub async fn download_user_client_config(
        &self,
        org_id: &str,
        user: &EntityRef,
        dest_dir: &Path,
        file_name: Option<&str>,
    ) -> Result<PathBuf> {
        let name = match file_name {
            Some(f) => f.to_string(),
            None => format!("{}.ovpn", user.name),
        };
        let name = safe_file_name(&name).ok_or_else(|| {
            Error::Config(format!("cannot derive a profile file name for user {}", user))
        })?;
        let path = dest_dir.join(name);
        self.write_profile(org_id, user, &path).await?;
        Ok(path)
    }

    /// Profiles for many users at once.
    ///
    /// Destinations are chosen up front: `{name}.ovpn`, or `{name}-{id}.ovpn`
    /// when that file already exists or another user of the batch has it.
    pub async fn download_users_client_configs(
        &self,
        org_id: &str,
        users: Vec<EntityRef>,
        dest_dir: &Path,
    ) -> Vec<BulkItemResult<PathBuf>> {
        let mut claimed = HashSet::new();
        let mut paths = Vec::with_capacity(users.len());
        for user in &users {
            paths.push(profile_destination(dest_dir, &user.name, &user.id, &mut claimed).await);
        }

        run_all_indexed(users, |index, user| {
            let path = paths.get(index).cloned();
            async move {
                let path = path.ok_or_else(|| {
                    Error::UnexpectedResponse(format!("no destination planned for {}", user))
                })?;
                self.write_profile(org_id, &user, &path).await?;
                Ok::<_, Error>(path)
            }
        })
        .instrument(info_span!("download_client_configs", org_id))
        .await
    }

    async fn write_profile(&self, org_id: &str, user: &EntityRef, path: &Path) -> Result<()> {
        let options = ConfigStreamOptions::archive(ArchiveFormat::Tar);
        let download = self.client_config_stream(org_id, &user.id, &options).await?;
        let body = download.stream.collect_bytes().await?;
        let body = String::from_utf8_lossy(&body);

        let profile = extract_profile(&body).ok_or_else(|| {
            Error::MalformedDownload(format!("archive for {} contains no VPN profile", user))
        })?;
        tokio::fs::write(path, profile).await?;
        info!(name = %user.name, path = %path.display(), "client configuration written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_options() {
        assert_eq!(
            ConfigStreamOptions::default().path("o1", "u1"),
            "/key/o1/u1.zip"
        );
        assert_eq!(
            ConfigStreamOptions::archive(ArchiveFormat::Onc).path("o1", "u1"),
            "/key/o1/u1.onc"
        );
        let server = ConfigStreamOptions {
            server: Some("s1".into()),
            format: ArchiveFormat::Tar,
        };
        assert_eq!(server.path("o1", "u1"), "/key/o1/u1/s1.key");
    }
}
