use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{Instrument, info, info_span};

use crate::bulk::{BulkItemResult, EntityRef, run_all};
use crate::client::Client;
use crate::error::{Error, Result};
use crate::models::{FindUsersResponse, KeyLinks, SearchReply, User, UserOverrides, UserParams};
use crate::request::RequestDescriptor;
use crate::util::{safe_file_name, segment};

const DEFAULT_SEARCH_LIMIT: u64 = 25;

/// User operations, scoped to an organization id per call.
#[derive(Debug, Clone, Copy)]
pub struct Users<'a> {
    client: &'a Client,
}

impl<'a> Users<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    pub async fn list(&self, org_id: &str) -> Result<Vec<User>> {
        let req = RequestDescriptor::get(format!("/user/{}", segment(org_id)));
        self.client.request_json(&req).await
    }

    /// Search users by free text. `limit` defaults to 25.
    pub async fn find(
        &self,
        org_id: &str,
        query: &str,
        limit: Option<u64>,
    ) -> Result<FindUsersResponse> {
        let req = RequestDescriptor::get(format!("/user/{}", segment(org_id)))
            .query("search", query)
            .query("limit", limit.unwrap_or(DEFAULT_SEARCH_LIMIT));
        let reply: SearchReply = self.client.request_json(&req).await?;
        Ok(reply.into())
    }

    /// `None` when no such user exists in the organization.
    pub async fn get_by_id(&self, org_id: &str, user_id: &str) -> Result<Option<User>> {
        let req = RequestDescriptor::get(format!(
            "/user/{}/{}",
            segment(org_id),
            segment(user_id)
        ));
        match self.client.request_json(&req).await {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create one user from the default [`UserParams`] with `overrides` applied.
    pub async fn create(&self, org_id: &str, overrides: &UserOverrides) -> Result<User> {
        let params = UserParams::default().with_overrides(overrides);
        let req = RequestDescriptor::post(format!("/user/{}", segment(org_id))).json_body(&params)?;

        let mut created: Vec<User> = self.client.request_json(&req).await?;
        if created.len() != 1 {
            return Err(Error::UnexpectedResponse(format!(
                "expected a single created user, got {}",
                created.len()
            )));
        }
        let user = created.remove(0);
        info!(id = %user.id, name = %user.name, "user created");
        Ok(user)
    }

    pub async fn create_many(&self, org_id: &str, params: &[UserParams]) -> Result<Vec<User>> {
        let req = RequestDescriptor::post(format!("/user/{}/multi", segment(org_id)))
            .json_body(params)?;
        let created: Vec<User> = self.client.request_json(&req).await?;
        info!(count = created.len(), "users created");
        Ok(created)
    }

    /// Send `user` back with `changes` applied on top of it.
    pub async fn update(&self, org_id: &str, user: &User, changes: &UserOverrides) -> Result<User> {
        let body = changes.apply_to(user)?;
        let req = RequestDescriptor::put(format!(
            "/user/{}/{}",
            segment(org_id),
            segment(&user.id)
        ))
        .json_body(&body)?;
        self.client.request_json(&req).await
    }

    pub async fn delete(&self, org_id: &str, user: &EntityRef) -> Result<()> {
        let req = RequestDescriptor::delete(format!(
            "/user/{}/{}",
            segment(org_id),
            segment(&user.id)
        ));
        self.client.request(&req).await?;
        info!(id = %user.id, name = %user.name, org_id, "user deleted");
        Ok(())
    }

    pub async fn delete_many(
        &self,
        org_id: &str,
        users: Vec<EntityRef>,
    ) -> Vec<BulkItemResult<()>> {
        run_all(users, |user| async move { self.delete(org_id, &user).await })
            .instrument(info_span!("delete_users", org_id))
            .await
    }

    /// Fetch a user's audit log. When `dest_dir` exists the log is also
    /// written there as `{name}-log.json` (or `file_name`).
    pub async fn audit_log(
        &self,
        org_id: &str,
        user: &EntityRef,
        dest_dir: Option<&Path>,
        file_name: Option<&str>,
    ) -> Result<Value> {
        let req = RequestDescriptor::get(format!(
            "/user/{}/{}/audit",
            segment(org_id),
            segment(&user.id)
        ));
        let log: Value = self.client.request_json(&req).await?;

        if let Some(dir) = dest_dir {
            if is_dir(dir).await {
                let path = audit_log_path(dir, user, file_name)?;
                tokio::fs::write(&path, serde_json::to_vec(&log)?).await?;
                info!(name = %user.name, path = %path.display(), "user audit log written");
            }
        }
        Ok(log)
    }

    pub async fn audit_logs(
        &self,
        org_id: &str,
        users: Vec<EntityRef>,
        dest_dir: Option<&Path>,
    ) -> Vec<BulkItemResult<Value>> {
        run_all(users, |user| async move {
            self.audit_log(org_id, &user, dest_dir, None).await
        })
        .instrument(info_span!("user_audit_logs", org_id))
        .await
    }

    pub async fn key_links(&self, org_id: &str, user_id: &str) -> Result<KeyLinks> {
        let req = RequestDescriptor::get(format!(
            "/key/{}/{}",
            segment(org_id),
            segment(user_id)
        ));
        self.client.request_json(&req).await
    }

    /// Creation parameters for each name, sharing the same overrides.
    pub fn default_params(names: &[&str], overrides: &UserOverrides) -> Vec<UserParams> {
        let base = UserParams::default().with_overrides(overrides);
        names
            .iter()
            .map(|name| UserParams {
                name: name.to_string(),
                ..base.clone()
            })
            .collect()
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

fn audit_log_path(dir: &Path, user: &EntityRef, file_name: Option<&str>) -> Result<PathBuf> {
    let name = match file_name {
        Some(f) => f.to_string(),
        None => format!("{}-log.json", user.name),
    };
    let name = safe_file_name(&name).ok_or_else(|| {
        Error::Config(format!("cannot derive an audit log file name for user {}", user))
    })?;
    Ok(dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_share_overrides() {
        let params = Users::default_params(
            &["alice", "bob"],
            &UserOverrides {
                groups: Some(vec!["staff".into()]),
                name: Some("ignored".into()),
                ..Default::default()
            },
        );
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "alice");
        assert_eq!(params[1].name, "bob");
        assert!(params.iter().all(|p| p.groups == ["staff"]));
    }

    #[tokio::test]
    async fn only_existing_directories_count() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();

        assert!(is_dir(dir.path()).await);
        assert!(!is_dir(&file).await);
        assert!(!is_dir(&dir.path().join("missing")).await);
    }

    #[test]
    fn audit_log_path_uses_user_name_or_override() {
        let dir = Path::new("/tmp/logs");
        let user = EntityRef::new("1", "alice");
        assert_eq!(
            audit_log_path(dir, &user, None).unwrap(),
            dir.join("alice-log.json")
        );
        assert_eq!(
            audit_log_path(dir, &user, Some("../x.json")).unwrap(),
            dir.join("x.json")
        );
    }
}
