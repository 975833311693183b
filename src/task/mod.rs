//! Remote setup-then-monitor task executed on a ready server.
//!
//! The runner makes exactly one attempt per call: connect, clone or update
//! the monitor checkout, then run the monitor script with the backend and
//! region exported. Retry policy, if any, belongs to the caller.

mod command;

use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;

use thiserror::Error;
use tracing::info;

use crate::config::CredentialBundle;
use crate::ssh::{RemoteShell, ShellError, ShellSession};

/// Result of a monitor run that produced an exit status.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskOutcome {
    /// Exit status of the monitor script.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl TaskOutcome {
    /// Returns `true` when the monitor exited with status zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors that stop a task before the monitor reports an exit status.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TaskError {
    /// The SSH session could not be opened.
    #[error("ssh connection failed: {0}")]
    Connection(#[source] ShellError),
    /// The clone-or-pull command exited non-zero.
    #[error("failed to set up remote repository: {stderr}")]
    SetupFailed {
        /// Exit status, when the remote reported one.
        exit_code: Option<i32>,
        /// Trimmed standard error of the setup command.
        stderr: String,
    },
    /// A command could not be executed on the open session.
    #[error("could not run {stage} command: {source}")]
    Execution {
        /// Stage whose command failed.
        stage: &'static str,
        /// Underlying shell error.
        #[source]
        source: ShellError,
    },
    /// The monitor finished without reporting an exit status.
    #[error("monitor command terminated without an exit status: {stderr}")]
    MissingExitCode {
        /// Trimmed standard error of the monitor command.
        stderr: String,
    },
}

/// Future returned by [`RemoteTaskRunner::run_task`].
pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = Result<TaskOutcome, TaskError>> + Send + 'a>>;

/// Runs the remote task for one region on a server known to be reachable.
pub trait RemoteTaskRunner {
    /// Sets up the checkout and runs the monitor with `region` exported.
    fn run_task<'a>(
        &'a self,
        address: Ipv4Addr,
        bundle: &'a CredentialBundle,
        region: &'a str,
    ) -> TaskFuture<'a>;
}

/// [`RemoteTaskRunner`] that executes both stages over one SSH session.
#[derive(Clone, Debug)]
pub struct SshTaskRunner<S> {
    shell: S,
}

impl<S> SshTaskRunner<S> {
    /// Creates a runner that opens sessions through `shell`.
    #[must_use]
    pub const fn new(shell: S) -> Self {
        Self { shell }
    }
}

impl<S> RemoteTaskRunner for SshTaskRunner<S>
where
    S: RemoteShell + Sync,
{
    fn run_task<'a>(
        &'a self,
        address: Ipv4Addr,
        bundle: &'a CredentialBundle,
        region: &'a str,
    ) -> TaskFuture<'a> {
        Box::pin(async move {
            info!(%address, "connecting over ssh");
            let session = self
                .shell
                .connect(address, &bundle.ssh, bundle.timing.connect_timeout)
                .await
                .map_err(TaskError::Connection)?;
            info!(%address, "ssh connection established");

            let setup = session
                .execute(&command::setup_command(&bundle.remote))
                .await
                .map_err(|source| TaskError::Execution {
                    stage: "setup",
                    source,
                })?;
            if !setup.is_success() {
                return Err(TaskError::SetupFailed {
                    exit_code: setup.exit_code,
                    stderr: setup.stderr.trim().to_owned(),
                });
            }
            info!(path = %bundle.remote.project_path, "remote repository is ready");

            info!(%region, "executing monitor script");
            let monitor = session
                .execute(&command::monitor_command(&bundle.remote, region))
                .await
                .map_err(|source| TaskError::Execution {
                    stage: "monitor",
                    source,
                })?;
            let Some(exit_code) = monitor.exit_code else {
                return Err(TaskError::MissingExitCode {
                    stderr: monitor.stderr.trim().to_owned(),
                });
            };

            Ok(TaskOutcome {
                exit_code,
                stdout: monitor.stdout,
                stderr: monitor.stderr.trim().to_owned(),
            })
        })
    }
}
