//! Core library for the skylark latency-tester orchestrator.
//!
//! The crate power-cycles a fixed fleet of pre-existing Hetzner Cloud
//! servers one at a time: power on, wait for SSH readiness, run the remote
//! monitor, and power off again. It can also create fresh testers from a
//! cloud-init template, one per region. Every collaborator sits behind a
//! trait so the lifecycle can be exercised with the scripted doubles in
//! [`test_support`].

pub mod backend;
pub mod cloud_init;
pub mod config;
pub mod fleet;
pub mod hetzner;
pub mod logging;
pub mod orchestrator;
pub mod probe;
pub mod provision;
pub mod report;
pub mod ssh;
pub mod task;
pub mod test_support;

pub use backend::{
    ActionResponse, ActionStatus, CloudControl, CloudError, CreateRequest, CreatedServer,
    ServerDescriptor, ServerId, ServerStatus,
};
pub use cloud_init::{CloudInitError, Template};
pub use config::{
    BackendConfig, ConfigError, CredentialBundle, HetznerConfig, MonitorConfig, ProvisionConfig,
    ProvisionSettings, RepositoryConfig,
};
pub use hetzner::HetznerClient;
pub use orchestrator::{Orchestrator, RunFailure, RunResult, RunSummary, Target};
pub use probe::{ReadinessProbe, SshProbe};
pub use provision::{ProvisionOutcome, ProvisionSummary};
pub use ssh::{RemoteShell, Ssh, SshCredential};
pub use task::{RemoteTaskRunner, SshTaskRunner, TaskError, TaskOutcome};
