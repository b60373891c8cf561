use crate::client::Client;
use crate::error::Result;
use crate::models::Organization;
use crate::request::RequestDescriptor;
use crate::util::segment;

/// Name of the organization created by a fresh server install.
pub const DEFAULT_ORGANIZATION: &str = "DEFAULT ORG";

#[derive(Debug, Clone, Copy)]
pub struct Organizations<'a> {
    client: &'a Client,
}

impl<'a> Organizations<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Vec<Organization>> {
        self.client
            .request_json(&RequestDescriptor::get("/organization"))
            .await
    }

    /// Case-insensitive lookup by name.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Organization>> {
        let wanted = name.to_uppercase();
        let orgs = self.list().await?;
        Ok(orgs.into_iter().find(|o| o.name.to_uppercase() == wanted))
    }

    pub async fn find_default(&self) -> Result<Option<Organization>> {
        self.find_by_name(DEFAULT_ORGANIZATION).await
    }

    /// `None` when the organization does not exist.
    pub async fn get_by_id(&self, org_id: &str) -> Result<Option<Organization>> {
        let req = RequestDescriptor::get(format!("/organization/{}", segment(org_id)));
        match self.client.request_json(&req).await {
            Ok(org) => Ok(Some(org)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
