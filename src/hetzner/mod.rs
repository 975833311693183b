//! Hetzner Cloud implementation of [`CloudControl`].

mod types;

use std::net::Ipv4Addr;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::{
    ActionResponse, CloudControl, CloudError, CloudFuture, CreateRequest, CreatedServer,
    ServerDescriptor, ServerId,
};
use types::{ActionEnvelope, CreateServerBody, ErrorEnvelope, ServerEnvelope, ServerList};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 50;

/// HTTP client for the Hetzner Cloud API.
///
/// Server ids are resolved afresh for every operation.
#[derive(Clone, Debug)]
pub struct HetznerClient {
    http: Client,
    token: String,
    base_url: String,
}

impl HetznerClient {
    /// Builds a client that authenticates with `token` against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::RequestFailed`] when the HTTP client cannot be
    /// constructed.
    pub fn new(token: impl Into<String>, base_url: &str) -> Result<Self, CloudError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            http,
            token: token.into(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T, CloudError> {
        debug!(%endpoint, "sending cloud api request");
        let response = request.send().await.map_err(transport_error)?;
        let body = read_success(response).await?;
        serde_json::from_str(&body).map_err(|err| CloudError::Decode {
            endpoint: endpoint.to_owned(),
            message: err.to_string(),
        })
    }

    async fn find_server(&self, name: &str) -> Result<ServerId, CloudError> {
        let request = self
            .request(Method::GET, "/servers")
            .query(&[("name", name)]);
        let list: ServerList = self.send("/servers", request).await?;
        list.servers
            .first()
            .map(|server| ServerId(server.id))
            .ok_or_else(|| CloudError::NotFound {
                name: name.to_owned(),
            })
    }

    async fn server_action(&self, name: &str, action: &str) -> Result<ActionResponse, CloudError> {
        let id = self.find_server(name).await?;
        let path = format!("/servers/{id}/actions/{action}");
        let envelope: ActionEnvelope = self.send(&path, self.request(Method::POST, &path)).await?;
        Ok(ActionResponse::from(envelope))
    }
}

impl CloudControl for HetznerClient {
    fn resolve_id<'a>(&'a self, name: &'a str) -> CloudFuture<'a, ServerId> {
        Box::pin(async move { self.find_server(name).await })
    }

    fn get_address<'a>(&'a self, name: &'a str) -> CloudFuture<'a, Option<Ipv4Addr>> {
        Box::pin(async move {
            let id = self.find_server(name).await?;
            let path = format!("/servers/{id}");
            let envelope: ServerEnvelope = self.send(&path, self.request(Method::GET, &path)).await?;
            envelope.server.public_ipv4(&path)
        })
    }

    fn power_on<'a>(&'a self, name: &'a str) -> CloudFuture<'a, ActionResponse> {
        Box::pin(async move { self.server_action(name, "poweron").await })
    }

    fn power_off<'a>(&'a self, name: &'a str) -> CloudFuture<'a, ActionResponse> {
        Box::pin(async move { self.server_action(name, "shutdown").await })
    }

    fn list_servers(&self) -> CloudFuture<'_, Vec<ServerDescriptor>> {
        Box::pin(async move {
            let mut servers = Vec::new();
            let mut page = 1;
            loop {
                let request = self
                    .request(Method::GET, "/servers")
                    .query(&[("page", page), ("per_page", PAGE_SIZE)]);
                let list: ServerList = self.send("/servers", request).await?;
                let next_page = list.next_page();
                for server in list.servers {
                    servers.push(server.into_descriptor("/servers")?);
                }
                match next_page {
                    Some(next) if next > page => page = next,
                    _ => break,
                }
            }
            Ok(servers)
        })
    }

    fn create_server<'a>(&'a self, request: &'a CreateRequest) -> CloudFuture<'a, CreatedServer> {
        Box::pin(async move {
            let body = CreateServerBody::from(request);
            let builder = self.request(Method::POST, "/servers").json(&body);
            let envelope: ServerEnvelope = self.send("/servers", builder).await?;
            Ok(CreatedServer::from(envelope.server))
        })
    }
}

async fn read_success(response: Response) -> Result<String, CloudError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    if status.is_success() {
        return Ok(body);
    }
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error.message)
        .ok()
        .filter(|message| !message.is_empty())
        .unwrap_or(body);
    debug!(status = status.as_u16(), %message, "cloud api request failed");
    Err(CloudError::RequestFailed {
        status: Some(status.as_u16()),
        body: message,
    })
}

fn transport_error(err: reqwest::Error) -> CloudError {
    CloudError::RequestFailed {
        status: err.status().map(|status| status.as_u16()),
        body: err.to_string(),
    }
}
