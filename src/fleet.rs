//! Project-wide operations: status listing, manual power control, and
//! shutting down every running server.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::backend::{ActionResponse, CloudControl, CloudError, ServerDescriptor, ServerStatus};

/// Errors that abort a fleet operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FleetError {
    /// The server listing could not be fetched.
    #[error("failed to list servers: {0}")]
    List(#[source] CloudError),
    /// A manual power action was rejected.
    #[error("failed to {action} server '{name}': {source}")]
    Power {
        /// Requested action.
        action: PowerAction,
        /// Target server.
        name: String,
        /// Provider error.
        #[source]
        source: CloudError,
    },
}

/// Manual power action.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerAction {
    /// Power the server on.
    On,
    /// Shut the server down gracefully.
    Off,
}

impl std::fmt::Display for PowerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::On => "power on",
            Self::Off => "power off",
        })
    }
}

/// Snapshot of every server in the project.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FleetStatus {
    /// Servers in provider order.
    pub servers: Vec<ServerDescriptor>,
}

impl FleetStatus {
    /// Number of servers.
    #[must_use]
    pub fn total(&self) -> usize {
        self.servers.len()
    }

    /// Number of servers in `status`.
    #[must_use]
    pub fn count(&self, status: ServerStatus) -> usize {
        self.servers
            .iter()
            .filter(|server| server.status == status)
            .count()
    }
}

/// Lists the project's servers.
///
/// # Errors
///
/// Returns [`FleetError::List`] when the listing fails.
pub async fn fleet_status<C: CloudControl>(cloud: &C) -> Result<FleetStatus, FleetError> {
    let servers = cloud.list_servers().await.map_err(FleetError::List)?;
    Ok(FleetStatus { servers })
}

/// Sends a single power action to `name`.
///
/// # Errors
///
/// Returns [`FleetError::Power`] when the provider rejects the action or the
/// server cannot be found.
pub async fn set_power<C: CloudControl>(
    cloud: &C,
    name: &str,
    action: PowerAction,
) -> Result<ActionResponse, FleetError> {
    let result = match action {
        PowerAction::On => cloud.power_on(name).await,
        PowerAction::Off => cloud.power_off(name).await,
    };
    result.map_err(|source| FleetError::Power {
        action,
        name: name.to_owned(),
        source,
    })
}

/// Outcome of [`shutdown_running`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ShutdownReport {
    /// Servers a shutdown was sent to.
    pub requested: Vec<String>,
    /// Servers whose shutdown request was rejected.
    pub send_failures: Vec<(String, CloudError)>,
    /// Requested servers observed `off` after the settle delay.
    pub confirmed_off: Vec<String>,
    /// Requested servers in any other state after the settle delay. Servers
    /// missing from the second listing are reported as `unknown`.
    pub not_off: Vec<(String, ServerStatus)>,
}

impl ShutdownReport {
    /// Returns `true` when every running server was confirmed off.
    #[must_use]
    pub fn all_off(&self) -> bool {
        self.send_failures.is_empty() && self.not_off.is_empty()
    }
}

/// Shuts down every running server, waits `settle`, and re-checks status.
///
/// # Errors
///
/// Returns [`FleetError::List`] when either listing fails. Rejected
/// shutdowns are recorded in the report instead.
pub async fn shutdown_running<C: CloudControl>(
    cloud: &C,
    settle: Duration,
) -> Result<ShutdownReport, FleetError> {
    let running: Vec<String> = cloud
        .list_servers()
        .await
        .map_err(FleetError::List)?
        .into_iter()
        .filter(|server| server.status == ServerStatus::Running)
        .map(|server| server.name)
        .collect();

    let mut report = ShutdownReport::default();
    if running.is_empty() {
        info!("no running servers");
        return Ok(report);
    }

    for name in running {
        match cloud.power_off(&name).await {
            Ok(action) => {
                info!(server = %name, action = action.id, "shutdown sent");
                report.requested.push(name);
            }
            Err(err) => {
                warn!(server = %name, error = %err, "shutdown request failed");
                report.send_failures.push((name, err));
            }
        }
    }
    if report.requested.is_empty() {
        return Ok(report);
    }

    info!(seconds = settle.as_secs(), "waiting for servers to stop");
    sleep(settle).await;

    let after = cloud.list_servers().await.map_err(FleetError::List)?;
    for name in &report.requested {
        let status = after
            .iter()
            .find(|server| &server.name == name)
            .map_or(ServerStatus::Unknown, |server| server.status);
        if status == ServerStatus::Off {
            report.confirmed_off.push(name.clone());
        } else {
            report.not_off.push((name.clone(), status));
        }
    }
    Ok(report)
}
