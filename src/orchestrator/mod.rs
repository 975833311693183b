//! Sequential power-on, test, power-off lifecycle over a list of targets.
//!
//! Targets are processed strictly one at a time. Every per-target failure is
//! caught at the target boundary and recorded in its [`RunResult`]; the
//! power-off step runs exactly once for every target regardless of how far
//! the earlier stages got.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backend::{CloudControl, CloudError};
use crate::config::CredentialBundle;
use crate::probe::ReadinessProbe;
use crate::task::{RemoteTaskRunner, TaskError};

/// Servers and regions exercised when no targets are given.
pub const DEFAULT_TARGETS: [(&str, &str); 5] = [
    ("rocky-ash-1", "ash"),
    ("rocky-hil-1", "us-west"),
    ("rocky-nbg1-1", "nbg1"),
    ("rocky-hel1-3", "hel1"),
    ("rocky-sin-1", "sin1"),
];

/// A server to power-cycle and the region label its monitor reports under.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Target {
    /// Server name as known to the provider.
    pub server_name: String,
    /// Region label exported to the monitor as `REGION`.
    pub region: String,
}

impl Target {
    /// Creates a target.
    #[must_use]
    pub fn new(server_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.server_name, self.region)
    }
}

/// Raised when a `NAME=REGION` target argument is malformed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid target '{input}': expected NAME=REGION")]
pub struct TargetParseError {
    /// Rejected argument.
    pub input: String,
}

impl FromStr for Target {
    type Err = TargetParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.split_once('=') {
            Some((name, region)) if !name.trim().is_empty() && !region.trim().is_empty() => {
                Ok(Self::new(name.trim(), region.trim()))
            }
            _ => Err(TargetParseError {
                input: input.to_owned(),
            }),
        }
    }
}

/// Returns [`DEFAULT_TARGETS`] as owned targets, in order.
#[must_use]
pub fn default_targets() -> Vec<Target> {
    DEFAULT_TARGETS
        .iter()
        .map(|(name, region)| Target::new(*name, *region))
        .collect()
}

/// Lifecycle stage in which a failure occurred.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Requesting power-on.
    PoweringOn,
    /// Polling for an address and an SSH session.
    WaitingReady,
    /// Running the remote task.
    Running,
    /// Requesting shutdown.
    PoweringOff,
}

impl Stage {
    /// Returns a stable name for logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PoweringOn => "powering-on",
            Self::WaitingReady => "waiting-ready",
            Self::Running => "running",
            Self::PoweringOff => "powering-off",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a per-target failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// The provider rejected a request or could not be reached.
    RequestFailed,
    /// The server name matched nothing.
    NotFound,
    /// The server never became ready within the attempt bound.
    TimeoutError,
    /// The task runner could not open its SSH session.
    ConnectionError,
    /// Cloning or updating the remote checkout failed.
    SetupFailed,
    /// The monitor failed or could not be run.
    TaskFailed,
}

impl FailureKind {
    /// Returns the tag used in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestFailed => "RequestFailed",
            Self::NotFound => "NotFound",
            Self::TimeoutError => "TimeoutError",
            Self::ConnectionError => "ConnectionError",
            Self::SetupFailed => "SetupFailed",
            Self::TaskFailed => "TaskFailed",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure recorded against a target.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{kind}: {detail}")]
pub struct RunFailure {
    /// Tagged kind.
    pub kind: FailureKind,
    /// Stage that failed.
    pub stage: Stage,
    /// Human-readable detail.
    pub detail: String,
}

impl RunFailure {
    fn cloud(stage: Stage, err: &CloudError) -> Self {
        let kind = match err {
            CloudError::NotFound { .. } => FailureKind::NotFound,
            CloudError::RequestFailed { .. } | CloudError::Decode { .. } => {
                FailureKind::RequestFailed
            }
        };
        Self {
            kind,
            stage,
            detail: err.to_string(),
        }
    }

    fn task(err: &TaskError) -> Self {
        let kind = match err {
            TaskError::Connection(_) => FailureKind::ConnectionError,
            TaskError::SetupFailed { .. } => FailureKind::SetupFailed,
            TaskError::Execution { .. } | TaskError::MissingExitCode { .. } => {
                FailureKind::TaskFailed
            }
        };
        Self {
            kind,
            stage: Stage::Running,
            detail: err.to_string(),
        }
    }
}

/// Outcome of one target's lifecycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunResult {
    /// Target processed.
    pub target: Target,
    /// `true` only when every stage, power-off included, succeeded.
    pub succeeded: bool,
    /// Address the task ran against, once readiness was reached.
    pub address: Option<Ipv4Addr>,
    /// First failure before power-off.
    pub error: Option<RunFailure>,
    /// Power-off failure.
    pub cleanup_error: Option<RunFailure>,
}

/// Results of a whole run, in target order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// One result per target.
    pub results: Vec<RunResult>,
}

impl RunSummary {
    /// Number of targets that fully succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|result| result.succeeded).count()
    }

    /// Number of targets with any failure.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Failed results, in target order.
    #[must_use = "iterators are lazy"]
    pub fn failures(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(|result| !result.succeeded)
    }
}

/// Drives the lifecycle of each target through the injected collaborators.
#[derive(Debug)]
pub struct Orchestrator<C, P, R> {
    cloud: C,
    probe: P,
    runner: R,
}

impl<C, P, R> Orchestrator<C, P, R>
where
    C: CloudControl,
    P: ReadinessProbe,
    R: RemoteTaskRunner,
{
    /// Creates an orchestrator.
    #[must_use]
    pub const fn new(cloud: C, probe: P, runner: R) -> Self {
        Self {
            cloud,
            probe,
            runner,
        }
    }

    /// Processes every target in order and summarises the outcomes.
    pub async fn run(&self, targets: &[Target], bundle: &CredentialBundle) -> RunSummary {
        let mut summary = RunSummary::default();
        for target in targets {
            summary.results.push(self.process(target, bundle).await);
        }
        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "run finished"
        );
        summary
    }

    async fn process(&self, target: &Target, bundle: &CredentialBundle) -> RunResult {
        info!(server = %target.server_name, region = %target.region, "processing target");
        let outcome = self.bring_up_and_test(target, bundle).await;
        if let Err(failure) = &outcome {
            warn!(
                server = %target.server_name,
                stage = %failure.stage,
                error = %failure,
                "target failed"
            );
        }

        let cleanup_error = self.power_off(target).await.err();
        let (address, error) = match outcome {
            Ok(address) => (Some(address), None),
            Err(failure) => (None, Some(failure)),
        };
        RunResult {
            target: target.clone(),
            succeeded: error.is_none() && cleanup_error.is_none(),
            address,
            error,
            cleanup_error,
        }
    }

    async fn bring_up_and_test(
        &self,
        target: &Target,
        bundle: &CredentialBundle,
    ) -> Result<Ipv4Addr, RunFailure> {
        let action = self
            .cloud
            .power_on(&target.server_name)
            .await
            .map_err(|err| RunFailure::cloud(Stage::PoweringOn, &err))?;
        info!(server = %target.server_name, action = action.id, "power-on accepted");

        let address = self.wait_ready(target, bundle).await?;

        let outcome = self
            .runner
            .run_task(address, bundle, &target.region)
            .await
            .map_err(|err| RunFailure::task(&err))?;
        if !outcome.succeeded() {
            return Err(RunFailure {
                kind: FailureKind::TaskFailed,
                stage: Stage::Running,
                detail: format!(
                    "monitor exited with status {}: {}",
                    outcome.exit_code, outcome.stderr
                ),
            });
        }
        info!(server = %target.server_name, region = %target.region, "monitor completed");
        Ok(address)
    }

    async fn wait_ready(
        &self,
        target: &Target,
        bundle: &CredentialBundle,
    ) -> Result<Ipv4Addr, RunFailure> {
        let timing = &bundle.timing;
        let name = target.server_name.as_str();
        for attempt in 1..=timing.ready_attempts {
            let lookup = self
                .cloud
                .get_address(name)
                .await
                .map_err(|err| RunFailure::cloud(Stage::WaitingReady, &err))?;
            match lookup {
                Some(address) if self.probe.is_ready(address, &bundle.ssh).await => {
                    info!(server = name, %address, attempt, "server is ready");
                    return Ok(address);
                }
                Some(address) => debug!(server = name, %address, attempt, "ssh not ready yet"),
                None => debug!(server = name, attempt, "no public address yet"),
            }
            if attempt < timing.ready_attempts {
                sleep(timing.ready_interval).await;
            }
        }
        Err(RunFailure {
            kind: FailureKind::TimeoutError,
            stage: Stage::WaitingReady,
            detail: format!(
                "server {name} not ready after {} attempts",
                timing.ready_attempts
            ),
        })
    }

    async fn power_off(&self, target: &Target) -> Result<(), RunFailure> {
        match self.cloud.power_off(&target.server_name).await {
            Ok(action) => {
                info!(server = %target.server_name, action = action.id, "shutdown accepted");
                Ok(())
            }
            Err(err) => {
                let failure = RunFailure::cloud(Stage::PoweringOff, &err);
                warn!(server = %target.server_name, error = %failure, "power-off failed");
                Err(failure)
            }
        }
    }
}

#[cfg(test)]
mod tests;
