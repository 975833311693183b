//! Readiness checks for servers that are still booting.

use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::ssh::{RemoteShell, SshCredential};

/// Future returned by [`ReadinessProbe::is_ready`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Reports whether a server accepts authenticated SSH sessions yet.
pub trait ReadinessProbe {
    /// Returns `true` only once an authenticated session is established.
    /// Every failure reads as "not ready yet".
    fn is_ready<'a>(&'a self, address: Ipv4Addr, credential: &'a SshCredential) -> ProbeFuture<'a>;
}

/// Prober that opens and immediately drops an SSH session.
#[derive(Clone, Debug)]
pub struct SshProbe<S> {
    shell: S,
    limit: Duration,
}

impl<S> SshProbe<S> {
    /// Creates a prober that allows `limit` for each handshake.
    #[must_use]
    pub const fn new(shell: S, limit: Duration) -> Self {
        Self { shell, limit }
    }
}

impl<S> ReadinessProbe for SshProbe<S>
where
    S: RemoteShell + Sync,
{
    fn is_ready<'a>(&'a self, address: Ipv4Addr, credential: &'a SshCredential) -> ProbeFuture<'a> {
        Box::pin(async move {
            match self.shell.connect(address, credential, self.limit).await {
                Ok(_session) => true,
                Err(err) => {
                    debug!(%address, error = %err, "readiness probe failed");
                    false
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;
    use crate::ssh::ShellError;
    use crate::test_support::{ScriptedShell, sample_bundle};

    const ADDRESS: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 7);

    #[tokio::test]
    async fn ready_when_session_opens() {
        let shell = ScriptedShell::new();
        let probe = SshProbe::new(shell.clone(), Duration::from_secs(5));
        let bundle = sample_bundle();

        assert!(probe.is_ready(ADDRESS, &bundle.ssh).await);
        assert_eq!(shell.connect_limits(), vec![Duration::from_secs(5)]);
    }

    #[tokio::test]
    async fn any_connection_failure_reads_as_not_ready() {
        let shell = ScriptedShell::new();
        shell.push_connect_failure(ShellError::Timeout {
            address: ADDRESS,
            seconds: 5,
        });
        shell.push_connect_failure(ShellError::Key {
            path: "/missing".into(),
            message: String::from("No such file or directory"),
        });
        let probe = SshProbe::new(shell.clone(), Duration::from_secs(5));
        let bundle = sample_bundle();

        assert!(!probe.is_ready(ADDRESS, &bundle.ssh).await);
        assert!(!probe.is_ready(ADDRESS, &bundle.ssh).await);
        assert!(probe.is_ready(ADDRESS, &bundle.ssh).await);
        assert_eq!(shell.connect_count(), 3);
    }
}
