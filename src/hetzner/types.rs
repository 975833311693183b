//! Wire schemas for the subset of the Hetzner Cloud API in use.
//!
//! Nested network and placement objects may be `null` or absent depending on
//! server state, so every one of them defaults to "absent".

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::backend::{
    ActionResponse, ActionStatus, CloudError, CreateRequest, CreatedServer, ServerDescriptor,
    ServerId, ServerStatus,
};

#[derive(Debug, Deserialize)]
pub(super) struct ServerList {
    #[serde(default)]
    pub(super) servers: Vec<Server>,
    #[serde(default)]
    pub(super) meta: Option<Meta>,
}

impl ServerList {
    pub(super) fn next_page(&self) -> Option<u32> {
        self.meta
            .as_ref()
            .and_then(|meta| meta.pagination.as_ref())
            .and_then(|pagination| pagination.next_page)
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct Meta {
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerEnvelope {
    pub(super) server: Server,
}

#[derive(Debug, Deserialize)]
pub(super) struct Server {
    pub(super) id: u64,
    pub(super) name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    public_net: Option<PublicNet>,
    #[serde(default)]
    datacenter: Option<Datacenter>,
    #[serde(default)]
    server_type: Option<Named>,
}

impl Server {
    /// An absent address is `Ok(None)`; one that fails to parse is a schema
    /// fault attributed to `endpoint`.
    pub(super) fn public_ipv4(&self, endpoint: &str) -> Result<Option<Ipv4Addr>, CloudError> {
        let Some(raw) = self
            .public_net
            .as_ref()
            .and_then(|net| net.ipv4.as_ref())
            .and_then(|ipv4| ipv4.ip.as_deref())
        else {
            return Ok(None);
        };
        raw.parse().map(Some).map_err(|err| CloudError::Decode {
            endpoint: endpoint.to_owned(),
            message: format!("server {} has invalid public ipv4 '{raw}': {err}", self.id),
        })
    }

    pub(super) fn into_descriptor(self, endpoint: &str) -> Result<ServerDescriptor, CloudError> {
        let public_ipv4 = self.public_ipv4(endpoint)?;
        Ok(ServerDescriptor {
            id: ServerId(self.id),
            status: ServerStatus::from(self.status.as_str()),
            public_ipv4,
            location: self
                .datacenter
                .and_then(|datacenter| datacenter.location)
                .and_then(|location| location.name),
            server_type: self.server_type.and_then(|server_type| server_type.name),
            name: self.name,
        })
    }
}

impl From<Server> for CreatedServer {
    fn from(server: Server) -> Self {
        Self {
            id: ServerId(server.id),
            status: ServerStatus::from(server.status.as_str()),
            name: server.name,
        }
    }
}

/// Body of `POST /servers`.
#[derive(Debug, Serialize)]
pub(super) struct CreateServerBody<'a> {
    name: &'a str,
    server_type: &'a str,
    image: &'a str,
    location: &'a str,
    user_data: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    ssh_keys: &'a [String],
    labels: &'a BTreeMap<String, String>,
    start_after_create: bool,
}

impl<'a> From<&'a CreateRequest> for CreateServerBody<'a> {
    fn from(request: &'a CreateRequest) -> Self {
        Self {
            name: &request.name,
            server_type: &request.server_type,
            image: &request.image,
            location: &request.location,
            user_data: &request.user_data,
            ssh_keys: &request.ssh_keys,
            labels: &request.labels,
            start_after_create: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PublicNet {
    #[serde(default)]
    ipv4: Option<Ipv4Block>,
}

#[derive(Debug, Deserialize)]
struct Ipv4Block {
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Datacenter {
    #[serde(default)]
    location: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ActionEnvelope {
    action: Action,
}

#[derive(Debug, Deserialize)]
struct Action {
    id: u64,
    #[serde(default)]
    command: String,
    #[serde(default)]
    status: String,
}

impl From<ActionEnvelope> for ActionResponse {
    fn from(envelope: ActionEnvelope) -> Self {
        let action = envelope.action;
        Self {
            id: action.id,
            status: ActionStatus::from(action.status.as_str()),
            command: action.command,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorEnvelope {
    pub(super) error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorBody {
    #[serde(default)]
    pub(super) message: String,
}
