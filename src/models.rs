use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user as returned by `/user/{org}` endpoints.
///
/// Fields the client does not model are kept in `extra` so an update sends
/// them back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub pin: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub yubico_id: Option<String>,
    #[serde(default)]
    pub otp_secret: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub audit: bool,
    #[serde(default)]
    pub status: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub servers: Vec<UserServer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One server a user is attached to, with its connection state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserServer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_count: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// `online` / `offline` as reported by the server.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of a user search.
#[derive(Debug, Clone, PartialEq)]
pub struct FindUsersResponse {
    pub limit: u64,
    pub total_user_count: u64,
    pub total_server_count: u64,
    pub users: Vec<User>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchReply {
    #[serde(default)]
    pub(crate) search_limit: u64,
    #[serde(default)]
    pub(crate) search_count: u64,
    #[serde(default)]
    pub(crate) server_count: u64,
    #[serde(default)]
    pub(crate) users: Vec<User>,
}

impl From<SearchReply> for FindUsersResponse {
    fn from(r: SearchReply) -> Self {
        Self {
            limit: r.search_limit,
            total_user_count: r.search_count,
            total_server_count: r.server_count,
            users: r.users,
        }
    }
}

/// Temporary profile links for a user (`/key/{org}/{user}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyLinks {
    #[serde(default)]
    pub key_url: Option<String>,
    #[serde(default)]
    pub key_zip_url: Option<String>,
    #[serde(default)]
    pub key_onc_url: Option<String>,
    #[serde(default)]
    pub view_url: Option<String>,
    #[serde(default)]
    pub uri_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForward {
    pub protocol: String,
    pub port: String,
    #[serde(default)]
    pub dport: String,
}

/// Body of a user creation request.
///
/// `Default` gives the documented creation defaults:
/// name `default-user`, everything else empty or `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserParams {
    pub name: String,
    pub email: String,
    pub disabled: bool,
    pub yubico_id: String,
    pub groups: Vec<String>,
    pub pin: String,
    pub network_links: Vec<String>,
    pub bypass_secondary: bool,
    pub client_to_client: bool,
    pub dns_servers: Vec<String>,
    pub dns_suffix: String,
    pub port_forwarding: Vec<PortForward>,
}

impl Default for UserParams {
    fn default() -> Self {
        Self {
            name: "default-user".to_string(),
            email: String::new(),
            disabled: false,
            yubico_id: String::new(),
            groups: Vec::new(),
            pin: String::new(),
            network_links: Vec::new(),
            bypass_secondary: false,
            client_to_client: false,
            dns_servers: Vec::new(),
            dns_suffix: String::new(),
            port_forwarding: Vec::new(),
        }
    }
}

/// Per-field overrides for [`UserParams`] and for user updates.
/// `None` keeps the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yubico_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_links: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bypass_secondary: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_to_client: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_servers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_forwarding: Option<Vec<PortForward>>,
}

impl UserParams {
    pub fn with_overrides(self, o: &UserOverrides) -> Self {
        Self {
            name: o.name.clone().unwrap_or(self.name),
            email: o.email.clone().unwrap_or(self.email),
            disabled: o.disabled.unwrap_or(self.disabled),
            yubico_id: o.yubico_id.clone().unwrap_or(self.yubico_id),
            groups: o.groups.clone().unwrap_or(self.groups),
            pin: o.pin.clone().unwrap_or(self.pin),
            network_links: o.network_links.clone().unwrap_or(self.network_links),
            bypass_secondary: o.bypass_secondary.unwrap_or(self.bypass_secondary),
            client_to_client: o.client_to_client.unwrap_or(self.client_to_client),
            dns_servers: o.dns_servers.clone().unwrap_or(self.dns_servers),
            dns_suffix: o.dns_suffix.clone().unwrap_or(self.dns_suffix),
            port_forwarding: o.port_forwarding.clone().unwrap_or(self.port_forwarding),
        }
    }
}

impl UserOverrides {
    /// The user as it should be sent back in an update request.
    pub(crate) fn apply_to(&self, user: &User) -> serde_json::Result<Value> {
        let mut body = serde_json::to_value(user)?;
        if let (Value::Object(base), Value::Object(patch)) = (&mut body, serde_json::to_value(self)?) {
            for (key, value) in patch {
                base.insert(key, value);
            }
        }
        Ok(body)
    }
}

fn null_as_empty<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(de)?.unwrap_or_default())
}
