use crate::client::Client;
use crate::error::Result;
use crate::models::Server;
use crate::request::RequestDescriptor;

#[derive(Debug, Clone, Copy)]
pub struct Servers<'a> {
    client: &'a Client,
}

impl<'a> Servers<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Vec<Server>> {
        self.client
            .request_json(&RequestDescriptor::get("/server"))
            .await
    }
}
