//! Cloud control abstraction for creating testers and powering pre-existing
//! servers on and off.
//!
//! The orchestrator only ever talks to the provider through [`CloudControl`],
//! so tests can substitute a scripted double for the Hetzner client. Every
//! call goes to the provider; nothing observed here is cached, because server
//! status changes out of band.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;

use thiserror::Error;

/// Provider identifier for a server.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ServerId(pub u64);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states reported by the provider.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ServerStatus {
    /// Powered on.
    Running,
    /// Powered off.
    Off,
    /// Being created.
    Initializing,
    /// Powering on.
    Starting,
    /// Powering off.
    Stopping,
    /// Being deleted.
    Deleting,
    /// Moving between hosts.
    Migrating,
    /// Being rebuilt from an image.
    Rebuilding,
    /// Any status this client does not recognise.
    Unknown,
}

impl ServerStatus {
    /// Returns the provider's spelling of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Off => "off",
            Self::Initializing => "initializing",
            Self::Starting => "starting",
            Self::Stopping => "stopping",
            Self::Deleting => "deleting",
            Self::Migrating => "migrating",
            Self::Rebuilding => "rebuilding",
            Self::Unknown => "unknown",
        }
    }
}

impl From<&str> for ServerStatus {
    fn from(value: &str) -> Self {
        match value {
            "running" => Self::Running,
            "off" => Self::Off,
            "initializing" => Self::Initializing,
            "starting" => Self::Starting,
            "stopping" => Self::Stopping,
            "deleting" => Self::Deleting,
            "migrating" => Self::Migrating,
            "rebuilding" => Self::Rebuilding,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a server as observed through the provider API.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerDescriptor {
    /// Provider identifier.
    pub id: ServerId,
    /// Unique server name within the project.
    pub name: String,
    /// Status at the time of the call.
    pub status: ServerStatus,
    /// Public IPv4 address; absent while a server is still booting.
    pub public_ipv4: Option<Ipv4Addr>,
    /// Location name (for example `fsn1`), when reported.
    pub location: Option<String>,
    /// Server type name (for example `cpx11`), when reported.
    pub server_type: Option<String>,
}

/// Progress of a provider action.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionStatus {
    /// Accepted and still in progress.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Error,
    /// Any status this client does not recognise.
    Unknown,
}

impl From<&str> for ActionStatus {
    fn from(value: &str) -> Self {
        match value {
            "running" => Self::Running,
            "success" => Self::Success,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// Acknowledgement returned when the provider accepts a power action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActionResponse {
    /// Provider identifier of the action.
    pub id: u64,
    /// Command name, for example `start_server` or `shutdown_server`.
    pub command: String,
    /// Progress reported at acceptance time.
    pub status: ActionStatus,
}

/// Parameters for provisioning a new server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateRequest {
    /// Unique server name.
    pub name: String,
    /// Server type name, for example `cpx11`.
    pub server_type: String,
    /// Image name, for example `ubuntu-22.04`.
    pub image: String,
    /// Location name the server is placed in.
    pub location: String,
    /// Cloud-init user-data consumed on first boot.
    pub user_data: String,
    /// Project SSH key ids or names to install for `root`.
    pub ssh_keys: Vec<String>,
    /// Labels attached to the server.
    pub labels: BTreeMap<String, String>,
}

/// Server accepted by the provider for creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedServer {
    /// Provider identifier.
    pub id: ServerId,
    /// Name the provider assigned.
    pub name: String,
    /// Status at acceptance time, normally `initializing`.
    pub status: ServerStatus,
}

/// Errors raised by cloud control calls.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// Raised when a name filter matches no server.
    #[error("server '{name}' not found")]
    NotFound {
        /// Name that was looked up.
        name: String,
    },
    /// Raised on a non-success response or a transport failure.
    #[error("request failed with status {}: {body}", status_text(*status))]
    RequestFailed {
        /// HTTP status, absent for transport failures.
        status: Option<u16>,
        /// Provider error message or transport error text.
        body: String,
    },
    /// Raised when a success response does not match the expected schema.
    #[error("unexpected response from {endpoint}: {message}")]
    Decode {
        /// Endpoint that produced the response.
        endpoint: String,
        /// Parser error.
        message: String,
    },
}

fn status_text(status: Option<u16>) -> String {
    status.map_or_else(|| String::from("none"), |code| code.to_string())
}

/// Future returned by cloud control operations.
pub type CloudFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CloudError>> + Send + 'a>>;

/// Operations the orchestrator and fleet commands need from a provider.
pub trait CloudControl {
    /// Resolves a server identifier by exact name.
    ///
    /// When several servers match, the first one returned by the provider is
    /// used; names are assumed unique within a project.
    fn resolve_id<'a>(&'a self, name: &'a str) -> CloudFuture<'a, ServerId>;

    /// Returns the public IPv4 address, or `None` while none is assigned.
    fn get_address<'a>(&'a self, name: &'a str) -> CloudFuture<'a, Option<Ipv4Addr>>;

    /// Requests power-on; success means the provider accepted the action.
    fn power_on<'a>(&'a self, name: &'a str) -> CloudFuture<'a, ActionResponse>;

    /// Requests a graceful shutdown; success means the provider accepted the
    /// action.
    fn power_off<'a>(&'a self, name: &'a str) -> CloudFuture<'a, ActionResponse>;

    /// Lists every server in the project.
    fn list_servers(&self) -> CloudFuture<'_, Vec<ServerDescriptor>>;

    /// Creates and boots a server; success means the provider accepted it.
    fn create_server<'a>(&'a self, request: &'a CreateRequest) -> CloudFuture<'a, CreatedServer>;
}
