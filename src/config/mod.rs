//! Configuration loading via `ortho-config`.
//!
//! Layered structures are read from defaults and the environment:
//! [`HetznerConfig`] (`HETZNER_*`), [`BackendConfig`] (`BACKEND_*`),
//! [`RepositoryConfig`] (unprefixed `REMOTE_PROJECT_PATH` and `GIT_REPO_URL`,
//! the names the fleet's shared `.env` already uses), [`MonitorConfig`]
//! (`SKYLARK_*`) and [`ProvisionConfig`] (`SKYLARK_CREATE_*`). Orchestration
//! validates them into an immutable [`CredentialBundle`] that every component
//! borrows for the length of a run; `create` validates them into
//! [`ProvisionSettings`].

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::cloud_init::DEFAULT_TEMPLATE_PATH;
use crate::ssh::SshCredential;

/// Hetzner Cloud REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.hetzner.cloud/v1";

/// Script executed inside the remote working directory.
pub const DEFAULT_MONITOR_SCRIPT: &str = "./monitor_endpoints.sh";

/// Server type for newly created testers.
pub const DEFAULT_SERVER_TYPE: &str = "cpx11";

/// Image for newly created testers.
pub const DEFAULT_IMAGE: &str = "ubuntu-22.04";

/// `project` label attached to newly created testers.
pub const DEFAULT_PROJECT_LABEL: &str = "celestia-latency-monitor";

/// Leading part of generated tester names.
pub const DEFAULT_NAME_PREFIX: &str = "latency-tester";

/// Hetzner API and SSH access settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "HETZNER")]
pub struct HetznerConfig {
    /// API token used as the bearer credential. Required.
    pub api_token: Option<String>,
    /// Base URL of the cloud API.
    #[ortho_config(default = DEFAULT_API_URL.to_owned())]
    pub api_url: String,
    /// Path to the private key used for SSH. Required for orchestration.
    pub ssh_private_key_path: Option<String>,
    /// Passphrase protecting the private key, when it is encrypted.
    pub ssh_passphrase: Option<String>,
    /// Remote user to authenticate as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Project SSH key installed on created testers.
    pub ssh_key_id: Option<String>,
}

/// Latency backend that the remote monitor reports to.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "BACKEND")]
pub struct BackendConfig {
    /// Base URL of the results backend. Required.
    pub api_url: Option<String>,
    /// API key presented by the monitor. Required.
    pub api_key: Option<String>,
}

/// Remote checkout location, read without a prefix.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(discovery(
    app_name = "skylark",
    env_var = "SKYLARK_CONFIG_PATH",
    dotfile_name = ".skylark.toml"
))]
pub struct RepositoryConfig {
    /// Directory on the server that holds the monitor checkout. Required.
    pub remote_project_path: Option<String>,
    /// Repository cloned into the remote project path. Required.
    pub git_repo_url: Option<String>,
}

/// Monitor script and timing settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SKYLARK")]
pub struct MonitorConfig {
    /// Command run inside the checkout.
    #[ortho_config(default = DEFAULT_MONITOR_SCRIPT.to_owned())]
    pub monitor_script: String,
    /// Readiness polls before a server is given up on.
    #[ortho_config(default = 40)]
    pub ready_attempts: u32,
    /// Seconds between readiness polls.
    #[ortho_config(default = 10)]
    pub ready_interval_secs: u64,
    /// Seconds allowed for a readiness handshake.
    #[ortho_config(default = 5)]
    pub probe_timeout_secs: u64,
    /// Seconds allowed for the task runner's SSH connection.
    #[ortho_config(default = 10)]
    pub connect_timeout_secs: u64,
    /// Seconds `shutdown-all` waits before re-checking server status.
    #[ortho_config(default = 10)]
    pub shutdown_settle_secs: u64,
}

/// Settings for `create`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SKYLARK_CREATE")]
pub struct ProvisionConfig {
    /// Server type of each tester.
    #[ortho_config(default = DEFAULT_SERVER_TYPE.to_owned())]
    pub server_type: String,
    /// Image each tester boots from.
    #[ortho_config(default = DEFAULT_IMAGE.to_owned())]
    pub image: String,
    /// Cloud-init template filled in for every tester.
    #[ortho_config(default = DEFAULT_TEMPLATE_PATH.to_owned())]
    pub cloud_init_path: String,
    /// Value of the `project` label.
    #[ortho_config(default = DEFAULT_PROJECT_LABEL.to_owned())]
    pub project_label: String,
    /// Names are `<prefix>-<region>-<unix seconds>`.
    #[ortho_config(default = DEFAULT_NAME_PREFIX.to_owned())]
    pub name_prefix: String,
}

/// Metadata for a required field, used to name it in error messages.
struct FieldMetadata {
    env_var: &'static str,
}

impl FieldMetadata {
    const fn new(env_var: &'static str) -> Self {
        Self { env_var }
    }
}

const API_TOKEN: FieldMetadata = FieldMetadata::new("HETZNER_API_TOKEN");
const SSH_PRIVATE_KEY_PATH: FieldMetadata = FieldMetadata::new("HETZNER_SSH_PRIVATE_KEY_PATH");
const BACKEND_API_URL: FieldMetadata = FieldMetadata::new("BACKEND_API_URL");
const BACKEND_API_KEY: FieldMetadata = FieldMetadata::new("BACKEND_API_KEY");
const REMOTE_PROJECT_PATH: FieldMetadata = FieldMetadata::new("REMOTE_PROJECT_PATH");
const GIT_REPO_URL: FieldMetadata = FieldMetadata::new("GIT_REPO_URL");

/// Accumulates missing required fields so they can be reported together.
#[derive(Default)]
struct MissingFields {
    names: Vec<String>,
}

impl MissingFields {
    fn require(&mut self, value: Option<&str>, metadata: &FieldMetadata) -> String {
        match value.map(str::trim) {
            Some(present) if !present.is_empty() => present.to_owned(),
            _ => {
                self.names.push(metadata.env_var.to_owned());
                String::new()
            }
        }
    }

    fn into_result(self) -> Result<(), ConfigError> {
        if self.names.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing { fields: self.names })
        }
    }
}

macro_rules! impl_load {
    ($config:ty) => {
        impl $config {
            /// Loads configuration without attempting to parse CLI arguments.
            /// Values merge defaults and environment variables.
            ///
            /// # Errors
            ///
            /// Returns [`ConfigError::Parse`] when the merge fails.
            pub fn load_without_cli_args() -> Result<Self, ConfigError> {
                Self::load_from_iter([std::ffi::OsString::from("skylark")])
                    .map_err(|err| ConfigError::Parse(err.to_string()))
            }
        }
    };
}

impl_load!(HetznerConfig);
impl_load!(BackendConfig);
impl_load!(RepositoryConfig);
impl_load!(MonitorConfig);
impl_load!(ProvisionConfig);

impl HetznerConfig {
    /// Returns the API token, for commands that only talk to the API.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] naming `HETZNER_API_TOKEN` when the
    /// token is absent or blank.
    pub fn require_api_token(&self) -> Result<String, ConfigError> {
        let mut missing = MissingFields::default();
        let token = missing.require(self.api_token.as_deref(), &API_TOKEN);
        missing.into_result()?;
        Ok(token)
    }
}

impl MonitorConfig {
    /// Delay `shutdown-all` waits before verifying server status.
    #[must_use]
    pub const fn shutdown_settle(&self) -> Duration {
        Duration::from_secs(self.shutdown_settle_secs)
    }
}

/// SSH and remote execution parameters for the monitor task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteSettings {
    /// Remote checkout directory.
    pub project_path: String,
    /// Repository cloned into the checkout.
    pub git_repo_url: String,
    /// Command executed inside the checkout.
    pub monitor_script: String,
    /// Results backend URL exported to the monitor.
    pub backend_url: String,
    /// Results backend key exported to the monitor.
    pub backend_key: String,
}

/// Polling and timeout settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timing {
    /// Upper bound on readiness polls per target.
    pub ready_attempts: u32,
    /// Delay between readiness polls.
    pub ready_interval: Duration,
    /// Handshake limit used by the readiness prober.
    pub probe_timeout: Duration,
    /// Handshake limit used by the task runner.
    pub connect_timeout: Duration,
}

/// Immutable configuration shared by every component for one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialBundle {
    /// Bearer token for the cloud API.
    pub api_token: String,
    /// Base URL of the cloud API.
    pub api_url: String,
    /// Key material used for every SSH connection.
    pub ssh: SshCredential,
    /// Remote checkout and monitor parameters.
    pub remote: RemoteSettings,
    /// Polling and timeout settings.
    pub timing: Timing,
}

impl CredentialBundle {
    /// Validates the configuration layers and assembles the bundle.
    ///
    /// Every missing required value is collected before failing, so a single
    /// error names all of them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] listing the environment variable of
    /// each absent or blank required field, or [`ConfigError::Invalid`] when a
    /// timing value cannot be used.
    pub fn from_sources(
        hetzner: &HetznerConfig,
        backend: &BackendConfig,
        repository: &RepositoryConfig,
        monitor: &MonitorConfig,
    ) -> Result<Self, ConfigError> {
        let mut missing = MissingFields::default();
        let api_token = missing.require(hetzner.api_token.as_deref(), &API_TOKEN);
        let key_path = missing.require(
            hetzner.ssh_private_key_path.as_deref(),
            &SSH_PRIVATE_KEY_PATH,
        );
        let backend_url = missing.require(backend.api_url.as_deref(), &BACKEND_API_URL);
        let backend_key = missing.require(backend.api_key.as_deref(), &BACKEND_API_KEY);
        let project_path = missing.require(
            repository.remote_project_path.as_deref(),
            &REMOTE_PROJECT_PATH,
        );
        let git_repo_url = missing.require(repository.git_repo_url.as_deref(), &GIT_REPO_URL);
        missing.into_result()?;

        let timing = Self::timing(monitor)?;
        require_value(&hetzner.api_url, "HETZNER_API_URL")?;
        require_value(&hetzner.ssh_user, "HETZNER_SSH_USER")?;
        require_value(&monitor.monitor_script, "SKYLARK_MONITOR_SCRIPT")?;

        let passphrase = hetzner
            .ssh_passphrase
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(str::to_owned);

        Ok(Self {
            api_token,
            api_url: hetzner.api_url.trim().trim_end_matches('/').to_owned(),
            ssh: SshCredential {
                user: hetzner.ssh_user.trim().to_owned(),
                key_path: Utf8PathBuf::from(expand_tilde(&key_path)),
                passphrase,
            },
            remote: RemoteSettings {
                project_path,
                git_repo_url,
                monitor_script: monitor.monitor_script.trim().to_owned(),
                backend_url,
                backend_key,
            },
            timing,
        })
    }

    fn timing(monitor: &MonitorConfig) -> Result<Timing, ConfigError> {
        if monitor.ready_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: String::from("SKYLARK_READY_ATTEMPTS"),
                message: String::from("at least one readiness attempt is required"),
            });
        }
        let probe_timeout = non_zero_secs(monitor.probe_timeout_secs, "SKYLARK_PROBE_TIMEOUT_SECS")?;
        let connect_timeout =
            non_zero_secs(monitor.connect_timeout_secs, "SKYLARK_CONNECT_TIMEOUT_SECS")?;
        Ok(Timing {
            ready_attempts: monitor.ready_attempts,
            ready_interval: Duration::from_secs(monitor.ready_interval_secs),
            probe_timeout,
            connect_timeout,
        })
    }
}

/// Validated settings for creating testers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionSettings {
    /// Bearer token for the cloud API, also handed to each tester.
    pub api_token: String,
    /// Base URL of the cloud API.
    pub api_url: String,
    /// Repository the tester installs.
    pub git_repo_url: String,
    /// Results backend URL.
    pub backend_url: String,
    /// Results backend key.
    pub backend_key: String,
    /// Server type of each tester.
    pub server_type: String,
    /// Image each tester boots from.
    pub image: String,
    /// Cloud-init template path.
    pub template_path: String,
    /// Value of the `project` label.
    pub project_label: String,
    /// Leading part of generated names.
    pub name_prefix: String,
    /// SSH keys installed on each tester; empty when none is configured.
    pub ssh_keys: Vec<String>,
}

impl ProvisionSettings {
    /// Validates the layers `create` reads.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] naming `HETZNER_API_TOKEN`,
    /// `BACKEND_API_URL`, `BACKEND_API_KEY` and `GIT_REPO_URL` when absent, or
    /// [`ConfigError::Invalid`] when a defaulted value was set blank.
    pub fn from_sources(
        hetzner: &HetznerConfig,
        backend: &BackendConfig,
        repository: &RepositoryConfig,
        provision: &ProvisionConfig,
    ) -> Result<Self, ConfigError> {
        let mut missing = MissingFields::default();
        let api_token = missing.require(hetzner.api_token.as_deref(), &API_TOKEN);
        let backend_url = missing.require(backend.api_url.as_deref(), &BACKEND_API_URL);
        let backend_key = missing.require(backend.api_key.as_deref(), &BACKEND_API_KEY);
        let git_repo_url = missing.require(repository.git_repo_url.as_deref(), &GIT_REPO_URL);
        missing.into_result()?;

        require_value(&hetzner.api_url, "HETZNER_API_URL")?;
        require_value(&provision.server_type, "SKYLARK_CREATE_SERVER_TYPE")?;
        require_value(&provision.image, "SKYLARK_CREATE_IMAGE")?;
        require_value(&provision.project_label, "SKYLARK_CREATE_PROJECT_LABEL")?;
        require_value(&provision.name_prefix, "SKYLARK_CREATE_NAME_PREFIX")?;

        let ssh_keys = hetzner
            .ssh_key_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .into_iter()
            .collect();

        Ok(Self {
            api_token,
            api_url: hetzner.api_url.trim().trim_end_matches('/').to_owned(),
            git_repo_url,
            backend_url,
            backend_key,
            server_type: provision.server_type.trim().to_owned(),
            image: provision.image.trim().to_owned(),
            template_path: provision.cloud_init_path.trim().to_owned(),
            project_label: provision.project_label.trim().to_owned(),
            name_prefix: provision.name_prefix.trim().to_owned(),
            ssh_keys,
        })
    }
}

fn require_value(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field: field.to_owned(),
            message: String::from("value must not be empty"),
        });
    }
    Ok(())
}

fn non_zero_secs(value: u64, field: &str) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field: field.to_owned(),
            message: String::from("timeout must be at least one second"),
        });
    }
    Ok(Duration::from_secs(value))
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// When `HOME` is unset the input is returned unchanged.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// One or more required values are absent; names are environment
    /// variables in declaration order.
    #[error("missing required configuration: {}", fields.join(", "))]
    Missing {
        /// Environment variable names of the missing fields.
        fields: Vec<String>,
    },
    /// A value is present but unusable.
    #[error("invalid configuration value for {field}: {message}")]
    Invalid {
        /// Environment variable name of the field.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests;
