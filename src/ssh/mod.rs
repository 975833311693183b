//! Key-authenticated SSH sessions for readiness checks and remote tasks.
//!
//! [`RemoteShell`] is the seam between the lifecycle code and the network:
//! the prober and the task runner are written against it, and
//! [`Ssh`] implements it with `async-ssh2-tokio`.

use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::time::Duration;

use async_ssh2_tokio::{AuthMethod, Client, ServerCheckMethod};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tokio::time::timeout;

/// Port the testers expose SSH on.
pub const SSH_PORT: u16 = 22;

/// Key material and user for SSH authentication.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshCredential {
    /// Remote user.
    pub user: String,
    /// Path to the private key file.
    pub key_path: Utf8PathBuf,
    /// Passphrase for an encrypted private key.
    pub passphrase: Option<String>,
}

/// Output captured from a remote command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit status reported by the remote shell, if any.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RemoteCommandOutput {
    /// Returns `true` when the exit status equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Errors raised while connecting or executing over SSH.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ShellError {
    /// The private key could not be read from disk.
    #[error("failed to read private key {path}: {message}")]
    Key {
        /// Key path from configuration.
        path: Utf8PathBuf,
        /// Operating system error.
        message: String,
    },
    /// The handshake did not finish within the allowed time.
    #[error("ssh connection to {address} timed out after {seconds}s")]
    Timeout {
        /// Address being dialled.
        address: Ipv4Addr,
        /// Limit that expired.
        seconds: u64,
    },
    /// The connection or authentication was rejected.
    #[error("ssh connection to {address} failed: {message}")]
    Connect {
        /// Address being dialled.
        address: Ipv4Addr,
        /// Library error.
        message: String,
    },
    /// A command could not be executed on an open session.
    #[error("remote execution failed: {message}")]
    Execute {
        /// Library error.
        message: String,
    },
}

/// Future returned by shell operations.
pub type ShellFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ShellError>> + Send + 'a>>;

/// An authenticated session able to run commands.
pub trait ShellSession: Send + Sync {
    /// Runs `command` through the remote login shell and waits for it to
    /// exit.
    fn execute<'a>(&'a self, command: &'a str) -> ShellFuture<'a, RemoteCommandOutput>;
}

/// Opens authenticated sessions.
pub trait RemoteShell {
    /// Session type produced by [`RemoteShell::connect`].
    type Session: ShellSession;

    /// Connects to `address` and authenticates with `credential`, giving up
    /// after `limit`.
    fn connect<'a>(
        &'a self,
        address: Ipv4Addr,
        credential: &'a SshCredential,
        limit: Duration,
    ) -> ShellFuture<'a, Self::Session>;
}

/// [`RemoteShell`] backed by `async-ssh2-tokio`.
///
/// Host keys are not checked: the testers are re-imaged machines whose keys
/// may change between boots.
#[derive(Clone, Debug, Default)]
pub struct Ssh;

/// Session opened by [`Ssh`].
pub struct SshSession {
    client: Client,
}

impl RemoteShell for Ssh {
    type Session = SshSession;

    fn connect<'a>(
        &'a self,
        address: Ipv4Addr,
        credential: &'a SshCredential,
        limit: Duration,
    ) -> ShellFuture<'a, Self::Session> {
        Box::pin(async move {
            let key = read_private_key(&credential.key_path)?;
            let auth = AuthMethod::with_key(&key, credential.passphrase.as_deref());
            let host = address.to_string();
            let client = timeout(
                limit,
                Client::connect(
                    (host.as_str(), SSH_PORT),
                    &credential.user,
                    auth,
                    ServerCheckMethod::NoCheck,
                ),
            )
            .await
            .map_err(|_| ShellError::Timeout {
                address,
                seconds: limit.as_secs(),
            })?
            .map_err(|err| ShellError::Connect {
                address,
                message: err.to_string(),
            })?;
            Ok(SshSession { client })
        })
    }
}

impl ShellSession for SshSession {
    fn execute<'a>(&'a self, command: &'a str) -> ShellFuture<'a, RemoteCommandOutput> {
        Box::pin(async move {
            let result = self
                .client
                .execute(command)
                .await
                .map_err(|err| ShellError::Execute {
                    message: err.to_string(),
                })?;
            Ok(RemoteCommandOutput {
                exit_code: i32::try_from(result.exit_status).ok(),
                stdout: result.stdout,
                stderr: result.stderr,
            })
        })
    }
}

fn read_private_key(path: &Utf8Path) -> Result<String, ShellError> {
    let key_error = |message: String| ShellError::Key {
        path: path.to_path_buf(),
        message,
    };
    let (dir_path, file_name) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, name),
        (_, Some(name)) => (Utf8Path::new("."), name),
        (_, None) => return Err(key_error(String::from("path has no file name"))),
    };
    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| key_error(err.to_string()))?;
    dir.read_to_string(file_name)
        .map_err(|err| key_error(err.to_string()))
}
