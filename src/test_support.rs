//! Test support utilities shared across unit and integration tests.
//!
//! The doubles record every call they receive and answer from scripted
//! queues, so lifecycle tests run without a provider or network.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::Ipv4Addr;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::sync::{Mutex, MutexGuard};

use crate::backend::{
    ActionResponse, ActionStatus, CloudControl, CloudError, CloudFuture, CreateRequest,
    CreatedServer, ServerDescriptor, ServerId, ServerStatus,
};
use crate::config::{CredentialBundle, RemoteSettings, Timing};
use crate::probe::{ProbeFuture, ReadinessProbe};
use crate::ssh::{
    RemoteCommandOutput, RemoteShell, ShellError, ShellFuture, ShellSession, SshCredential,
};
use crate::task::{RemoteTaskRunner, TaskError, TaskFuture, TaskOutcome};

type Shared<T> = Arc<std::sync::Mutex<T>>;

fn with<T, R>(state: &Shared<T>, f: impl FnOnce(&mut T) -> R) -> R {
    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// Pops the next scripted value, repeating the last one once the queue is
/// down to a single entry.
fn next_sticky<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Bundle with short, deterministic timings for lifecycle tests.
#[must_use]
pub fn sample_bundle() -> CredentialBundle {
    CredentialBundle {
        api_token: String::from("token"),
        api_url: String::from("http://127.0.0.1:9"),
        ssh: SshCredential {
            user: String::from("root"),
            key_path: Utf8PathBuf::from("/tmp/skylark-test-key"),
            passphrase: None,
        },
        remote: RemoteSettings {
            project_path: String::from("/root/monitor"),
            git_repo_url: String::from("https://example.com/monitor.git"),
            monitor_script: String::from("./monitor_endpoints.sh"),
            backend_url: String::from("https://backend.example.com"),
            backend_key: String::from("backend-key"),
        },
        timing: Timing {
            ready_attempts: 40,
            ready_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        },
    }
}

/// Cloud call recorded by [`ScriptedCloud`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CloudCall {
    /// `resolve_id(name)`.
    Resolve(String),
    /// `get_address(name)`.
    GetAddress(String),
    /// `power_on(name)`.
    PowerOn(String),
    /// `power_off(name)`.
    PowerOff(String),
    /// `list_servers()`.
    List,
    /// `create_server(request)`, by requested name.
    Create(String),
}

#[derive(Debug, Default)]
struct ScriptedServer {
    id: u64,
    addresses: VecDeque<Result<Option<Ipv4Addr>, CloudError>>,
    power_on_error: Option<CloudError>,
    power_off_error: Option<CloudError>,
}

#[derive(Debug, Default)]
struct CloudState {
    servers: BTreeMap<String, ScriptedServer>,
    listings: VecDeque<Result<Vec<ServerDescriptor>, CloudError>>,
    create_errors: BTreeMap<String, CloudError>,
    created: Vec<CreateRequest>,
    last_created_id: u64,
    calls: Vec<CloudCall>,
}

/// Scripted [`CloudControl`] keyed by server name.
///
/// Unknown names fail with [`CloudError::NotFound`]. Address answers are
/// consumed in order and the last one repeats.
#[derive(Clone, Debug, Default)]
pub struct ScriptedCloud {
    state: Shared<CloudState>,
}

impl ScriptedCloud {
    /// Creates a cloud with no servers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a server that resolves to `id` and has no address yet.
    #[must_use]
    pub fn with_server(self, name: &str, id: u64) -> Self {
        with(&self.state, |state| {
            state.servers.insert(
                name.to_owned(),
                ScriptedServer {
                    id,
                    ..ScriptedServer::default()
                },
            );
        });
        self
    }

    /// Queues an address answer for `name`.
    pub fn push_address(&self, name: &str, address: Option<Ipv4Addr>) {
        self.push_address_result(name, Ok(address));
    }

    /// Queues a failing address lookup for `name`.
    pub fn push_address_error(&self, name: &str, error: CloudError) {
        self.push_address_result(name, Err(error));
    }

    fn push_address_result(&self, name: &str, result: Result<Option<Ipv4Addr>, CloudError>) {
        with(&self.state, |state| {
            if let Some(server) = state.servers.get_mut(name) {
                server.addresses.push_back(result);
            }
        });
    }

    /// Makes every `power_on(name)` fail with `error`.
    pub fn fail_power_on(&self, name: &str, error: CloudError) {
        with(&self.state, |state| {
            if let Some(server) = state.servers.get_mut(name) {
                server.power_on_error = Some(error);
            }
        });
    }

    /// Makes every `power_off(name)` fail with `error`.
    pub fn fail_power_off(&self, name: &str, error: CloudError) {
        with(&self.state, |state| {
            if let Some(server) = state.servers.get_mut(name) {
                server.power_off_error = Some(error);
            }
        });
    }

    /// Queues a listing answer; the last queued listing repeats.
    pub fn push_listing(&self, servers: Vec<ServerDescriptor>) {
        with(&self.state, |state| state.listings.push_back(Ok(servers)));
    }

    /// Queues a failing listing.
    pub fn push_listing_error(&self, error: CloudError) {
        with(&self.state, |state| state.listings.push_back(Err(error)));
    }

    /// Makes `create_server` fail with `error` for the server called `name`.
    pub fn fail_create(&self, name: &str, error: CloudError) {
        with(&self.state, |state| {
            state.create_errors.insert(name.to_owned(), error);
        });
    }

    /// Returns every accepted creation request, in order.
    #[must_use]
    pub fn created(&self) -> Vec<CreateRequest> {
        with(&self.state, |state| state.created.clone())
    }

    /// Returns every call received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CloudCall> {
        with(&self.state, |state| state.calls.clone())
    }

    /// Counts calls equal to `call`.
    #[must_use]
    pub fn count(&self, call: &CloudCall) -> usize {
        with(&self.state, |state| {
            state.calls.iter().filter(|seen| *seen == call).count()
        })
    }

    fn record(&self, call: CloudCall) {
        with(&self.state, |state| state.calls.push(call));
    }

    fn id_of(state: &CloudState, name: &str) -> Result<u64, CloudError> {
        state
            .servers
            .get(name)
            .map(|server| server.id)
            .ok_or_else(|| CloudError::NotFound {
                name: name.to_owned(),
            })
    }

    fn action(
        &self,
        name: &str,
        command: &str,
        error: impl FnOnce(&ScriptedServer) -> Option<CloudError>,
    ) -> Result<ActionResponse, CloudError> {
        with(&self.state, |state| {
            let server = state.servers.get(name).ok_or_else(|| CloudError::NotFound {
                name: name.to_owned(),
            })?;
            if let Some(err) = error(server) {
                return Err(err);
            }
            Ok(ActionResponse {
                id: server.id * 100,
                command: command.to_owned(),
                status: ActionStatus::Running,
            })
        })
    }
}

impl CloudControl for ScriptedCloud {
    fn resolve_id<'a>(&'a self, name: &'a str) -> CloudFuture<'a, ServerId> {
        Box::pin(async move {
            self.record(CloudCall::Resolve(name.to_owned()));
            with(&self.state, |state| Self::id_of(state, name)).map(ServerId)
        })
    }

    fn get_address<'a>(&'a self, name: &'a str) -> CloudFuture<'a, Option<Ipv4Addr>> {
        Box::pin(async move {
            self.record(CloudCall::GetAddress(name.to_owned()));
            with(&self.state, |state| {
                let server = state.servers.get_mut(name).ok_or_else(|| CloudError::NotFound {
                    name: name.to_owned(),
                })?;
                next_sticky(&mut server.addresses).unwrap_or(Ok(None))
            })
        })
    }

    fn power_on<'a>(&'a self, name: &'a str) -> CloudFuture<'a, ActionResponse> {
        Box::pin(async move {
            self.record(CloudCall::PowerOn(name.to_owned()));
            self.action(name, "start_server", |server| server.power_on_error.clone())
        })
    }

    fn power_off<'a>(&'a self, name: &'a str) -> CloudFuture<'a, ActionResponse> {
        Box::pin(async move {
            self.record(CloudCall::PowerOff(name.to_owned()));
            self.action(name, "shutdown_server", |server| {
                server.power_off_error.clone()
            })
        })
    }

    fn list_servers(&self) -> CloudFuture<'_, Vec<ServerDescriptor>> {
        Box::pin(async move {
            self.record(CloudCall::List);
            with(&self.state, |state| {
                next_sticky(&mut state.listings).unwrap_or_else(|| Ok(Vec::new()))
            })
        })
    }

    fn create_server<'a>(&'a self, request: &'a CreateRequest) -> CloudFuture<'a, CreatedServer> {
        Box::pin(async move {
            self.record(CloudCall::Create(request.name.clone()));
            with(&self.state, |state| {
                if let Some(err) = state.create_errors.get(&request.name) {
                    return Err(err.clone());
                }
                state.created.push(request.clone());
                state.last_created_id += 1;
                Ok(CreatedServer {
                    id: ServerId(1000 + state.last_created_id),
                    name: request.name.clone(),
                    status: ServerStatus::Initializing,
                })
            })
        })
    }
}

/// Builds a descriptor for listing fixtures.
#[must_use]
pub fn descriptor(
    id: u64,
    name: &str,
    status: ServerStatus,
    address: Option<Ipv4Addr>,
) -> ServerDescriptor {
    ServerDescriptor {
        id: ServerId(id),
        name: name.to_owned(),
        status,
        public_ipv4: address,
        location: Some(String::from("fsn1")),
        server_type: Some(String::from("cx22")),
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    answers: VecDeque<bool>,
    fallback: bool,
    probed: Vec<Ipv4Addr>,
}

/// Scripted [`ReadinessProbe`] answering from a queue, then a fallback.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProbe {
    state: Shared<ProbeState>,
}

impl ScriptedProbe {
    /// Probe whose every answer is `ready`.
    #[must_use]
    pub fn always(ready: bool) -> Self {
        let probe = Self::default();
        with(&probe.state, |state| state.fallback = ready);
        probe
    }

    /// Probe that reports not ready `failures` times, then ready.
    #[must_use]
    pub fn ready_after(failures: usize) -> Self {
        let probe = Self::always(true);
        with(&probe.state, |state| {
            state.answers.extend(std::iter::repeat_n(false, failures));
        });
        probe
    }

    /// Addresses probed so far, in order.
    #[must_use]
    pub fn probed(&self) -> Vec<Ipv4Addr> {
        with(&self.state, |state| state.probed.clone())
    }
}

impl ReadinessProbe for ScriptedProbe {
    fn is_ready<'a>(&'a self, address: Ipv4Addr, _credential: &'a SshCredential) -> ProbeFuture<'a> {
        Box::pin(async move {
            with(&self.state, |state| {
                state.probed.push(address);
                state.answers.pop_front().unwrap_or(state.fallback)
            })
        })
    }
}

#[derive(Debug, Default)]
struct ShellState {
    connect_failures: VecDeque<ShellError>,
    connects: Vec<(Ipv4Addr, Duration)>,
    outputs: VecDeque<Result<RemoteCommandOutput, ShellError>>,
    commands: Vec<String>,
}

/// Scripted [`RemoteShell`].
///
/// Connections succeed unless a failure is queued. Commands answer from a
/// FIFO queue and default to a silent zero exit once it is empty.
#[derive(Clone, Debug, Default)]
pub struct ScriptedShell {
    state: Shared<ShellState>,
}

impl ScriptedShell {
    /// Creates a shell with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next connection attempt with `error`.
    pub fn push_connect_failure(&self, error: ShellError) {
        with(&self.state, |state| state.connect_failures.push_back(error));
    }

    /// Queues the output of the next executed command.
    pub fn push_output(&self, exit_code: Option<i32>, stdout: &str, stderr: &str) {
        with(&self.state, |state| {
            state.outputs.push_back(Ok(RemoteCommandOutput {
                exit_code,
                stdout: stdout.to_owned(),
                stderr: stderr.to_owned(),
            }));
        });
    }

    /// Makes the next executed command fail with `error`.
    pub fn push_execute_failure(&self, error: ShellError) {
        with(&self.state, |state| state.outputs.push_back(Err(error)));
    }

    /// Number of connection attempts, successful or not.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        with(&self.state, |state| state.connects.len())
    }

    /// Timeouts passed to each connection attempt.
    #[must_use]
    pub fn connect_limits(&self) -> Vec<Duration> {
        with(&self.state, |state| {
            state.connects.iter().map(|(_, limit)| *limit).collect()
        })
    }

    /// Commands executed so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        with(&self.state, |state| state.commands.clone())
    }
}

/// Session handed out by [`ScriptedShell`].
#[derive(Debug)]
pub struct ScriptedSession {
    state: Shared<ShellState>,
}

impl RemoteShell for ScriptedShell {
    type Session = ScriptedSession;

    fn connect<'a>(
        &'a self,
        address: Ipv4Addr,
        _credential: &'a SshCredential,
        limit: Duration,
    ) -> ShellFuture<'a, Self::Session> {
        Box::pin(async move {
            with(&self.state, |state| {
                state.connects.push((address, limit));
                state.connect_failures.pop_front().map_or(Ok(()), Err)
            })?;
            Ok(ScriptedSession {
                state: Arc::clone(&self.state),
            })
        })
    }
}

impl ShellSession for ScriptedSession {
    fn execute<'a>(&'a self, command: &'a str) -> ShellFuture<'a, RemoteCommandOutput> {
        Box::pin(async move {
            with(&self.state, |state| {
                state.commands.push(command.to_owned());
                state.outputs.pop_front().unwrap_or_else(|| {
                    Ok(RemoteCommandOutput {
                        exit_code: Some(0),
                        ..RemoteCommandOutput::default()
                    })
                })
            })
        })
    }
}

#[derive(Debug, Default)]
struct TaskState {
    results: VecDeque<Result<TaskOutcome, TaskError>>,
    invocations: Vec<(Ipv4Addr, String)>,
}

/// Scripted [`RemoteTaskRunner`]; unscripted calls succeed with exit zero.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTaskRunner {
    state: Shared<TaskState>,
}

impl ScriptedTaskRunner {
    /// Creates a runner with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of the next invocation.
    pub fn push_result(&self, result: Result<TaskOutcome, TaskError>) {
        with(&self.state, |state| state.results.push_back(result));
    }

    /// Queues a monitor exit with `exit_code` and `stderr`.
    pub fn push_exit(&self, exit_code: i32, stderr: &str) {
        self.push_result(Ok(TaskOutcome {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_owned(),
        }));
    }

    /// `(address, region)` of every invocation, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<(Ipv4Addr, String)> {
        with(&self.state, |state| state.invocations.clone())
    }
}

impl RemoteTaskRunner for ScriptedTaskRunner {
    fn run_task<'a>(
        &'a self,
        address: Ipv4Addr,
        _bundle: &'a CredentialBundle,
        region: &'a str,
    ) -> TaskFuture<'a> {
        Box::pin(async move {
            with(&self.state, |state| {
                state.invocations.push((address, region.to_owned()));
                state.results.pop_front().unwrap_or_else(|| {
                    Ok(TaskOutcome {
                        exit_code: 0,
                        stdout: String::new(),
                        stderr: String::new(),
                    })
                })
            })
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    ///
    /// A `None` value removes the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
