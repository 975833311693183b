//! Unit tests for configuration validation and loading.

use rstest::{fixture, rstest};

use super::*;
use crate::test_support::EnvGuard;

#[fixture]
fn hetzner() -> HetznerConfig {
    HetznerConfig {
        api_token: Some(String::from("hcloud-token")),
        api_url: String::from("https://api.hetzner.cloud/v1/"),
        ssh_private_key_path: Some(String::from("/keys/id_ed25519")),
        ssh_passphrase: None,
        ssh_user: String::from("root"),
        ssh_key_id: None,
    }
}

#[fixture]
fn backend() -> BackendConfig {
    BackendConfig {
        api_url: Some(String::from("https://backend.example.com")),
        api_key: Some(String::from("backend-key")),
    }
}

#[fixture]
fn repository() -> RepositoryConfig {
    RepositoryConfig {
        remote_project_path: Some(String::from("/root/monitor")),
        git_repo_url: Some(String::from("https://example.com/monitor.git")),
    }
}

#[fixture]
fn monitor() -> MonitorConfig {
    MonitorConfig {
        monitor_script: String::from(DEFAULT_MONITOR_SCRIPT),
        ready_attempts: 40,
        ready_interval_secs: 10,
        probe_timeout_secs: 5,
        connect_timeout_secs: 10,
        shutdown_settle_secs: 10,
    }
}

#[rstest]
fn bundle_assembles_from_complete_sources(
    hetzner: HetznerConfig,
    backend: BackendConfig,
    repository: RepositoryConfig,
    monitor: MonitorConfig,
) {
    let bundle = CredentialBundle::from_sources(&hetzner, &backend, &repository, &monitor)
        .unwrap_or_else(|err| panic!("bundle should build: {err}"));

    assert_eq!(bundle.api_url, "https://api.hetzner.cloud/v1");
    assert_eq!(bundle.ssh.key_path.as_str(), "/keys/id_ed25519");
    assert_eq!(bundle.ssh.passphrase, None);
    assert_eq!(bundle.remote.backend_key, "backend-key");
    assert_eq!(bundle.remote.project_path, "/root/monitor");
    assert_eq!(bundle.timing.ready_attempts, 40);
    assert_eq!(bundle.timing.ready_interval, Duration::from_secs(10));
    assert_eq!(bundle.timing.probe_timeout, Duration::from_secs(5));
    assert_eq!(bundle.timing.connect_timeout, Duration::from_secs(10));
}

#[rstest]
fn missing_repository_url_is_named(
    hetzner: HetznerConfig,
    backend: BackendConfig,
    repository: RepositoryConfig,
    monitor: MonitorConfig,
) {
    let without_repo = RepositoryConfig {
        git_repo_url: None,
        ..repository
    };

    let err = CredentialBundle::from_sources(&hetzner, &backend, &without_repo, &monitor)
        .expect_err("repository url is required");

    assert_eq!(
        err,
        ConfigError::Missing {
            fields: vec![String::from("GIT_REPO_URL")],
        }
    );
    assert_eq!(
        err.to_string(),
        "missing required configuration: GIT_REPO_URL"
    );
}

#[rstest]
fn every_missing_field_is_listed_in_order(monitor: MonitorConfig) {
    let hetzner = HetznerConfig {
        api_token: None,
        api_url: String::from(DEFAULT_API_URL),
        ssh_private_key_path: Some(String::from("   ")),
        ssh_passphrase: None,
        ssh_user: String::from("root"),
        ssh_key_id: None,
    };
    let backend = BackendConfig {
        api_url: None,
        api_key: None,
    };
    let repository = RepositoryConfig {
        remote_project_path: None,
        git_repo_url: None,
    };

    let err = CredentialBundle::from_sources(&hetzner, &backend, &repository, &monitor)
        .expect_err("everything is missing");

    let ConfigError::Missing { fields } = err else {
        panic!("expected Missing, got {err}");
    };
    assert_eq!(
        fields,
        [
            "HETZNER_API_TOKEN",
            "HETZNER_SSH_PRIVATE_KEY_PATH",
            "BACKEND_API_URL",
            "BACKEND_API_KEY",
            "REMOTE_PROJECT_PATH",
            "GIT_REPO_URL",
        ]
    );
}

#[rstest]
#[case(Some(String::from("")), None)]
#[case(Some(String::from("hunter2")), Some("hunter2"))]
#[case(None, None)]
fn passphrase_is_optional(
    hetzner: HetznerConfig,
    backend: BackendConfig,
    repository: RepositoryConfig,
    monitor: MonitorConfig,
    #[case] configured: Option<String>,
    #[case] expected: Option<&str>,
) {
    let with_passphrase = HetznerConfig {
        ssh_passphrase: configured,
        ..hetzner
    };

    let bundle = CredentialBundle::from_sources(&with_passphrase, &backend, &repository, &monitor)
        .unwrap_or_else(|err| panic!("bundle should build: {err}"));

    assert_eq!(bundle.ssh.passphrase.as_deref(), expected);
}

#[rstest]
#[case::zero_attempts(MonitorSettings { ready_attempts: 0, probe_timeout_secs: 5 }, "SKYLARK_READY_ATTEMPTS")]
#[case::zero_probe_timeout(MonitorSettings { ready_attempts: 40, probe_timeout_secs: 0 }, "SKYLARK_PROBE_TIMEOUT_SECS")]
fn unusable_timing_is_rejected(
    hetzner: HetznerConfig,
    backend: BackendConfig,
    repository: RepositoryConfig,
    monitor: MonitorConfig,
    #[case] settings: MonitorSettings,
    #[case] expected_field: &str,
) {
    let tuned = MonitorConfig {
        ready_attempts: settings.ready_attempts,
        probe_timeout_secs: settings.probe_timeout_secs,
        ..monitor
    };

    let err = CredentialBundle::from_sources(&hetzner, &backend, &repository, &tuned)
        .expect_err("timing should be rejected");

    assert!(
        matches!(err, ConfigError::Invalid { ref field, .. } if field == expected_field),
        "unexpected error: {err}"
    );
}

struct MonitorSettings {
    ready_attempts: u32,
    probe_timeout_secs: u64,
}

#[rstest]
fn api_commands_only_need_the_token(hetzner: HetznerConfig) {
    let token_only = HetznerConfig {
        ssh_private_key_path: None,
        ..hetzner
    };
    assert_eq!(
        token_only
            .require_api_token()
            .unwrap_or_else(|err| panic!("token should be accepted: {err}")),
        "hcloud-token"
    );

    let no_token = HetznerConfig {
        api_token: None,
        ..token_only
    };
    let err = no_token.require_api_token().expect_err("token is required");
    assert_eq!(
        err.to_string(),
        "missing required configuration: HETZNER_API_TOKEN"
    );
}

#[fixture]
fn provision() -> ProvisionConfig {
    ProvisionConfig {
        server_type: String::from(DEFAULT_SERVER_TYPE),
        image: String::from(DEFAULT_IMAGE),
        cloud_init_path: String::from(DEFAULT_TEMPLATE_PATH),
        project_label: String::from(DEFAULT_PROJECT_LABEL),
        name_prefix: String::from(DEFAULT_NAME_PREFIX),
    }
}

#[rstest]
fn provision_settings_do_not_need_ssh_or_project_path(
    hetzner: HetznerConfig,
    backend: BackendConfig,
    provision: ProvisionConfig,
) {
    let keyless = HetznerConfig {
        ssh_private_key_path: None,
        ssh_key_id: Some(String::from(" 4711 ")),
        ..hetzner
    };
    let repository = RepositoryConfig {
        remote_project_path: None,
        git_repo_url: Some(String::from("https://example.com/monitor.git")),
    };

    let settings = ProvisionSettings::from_sources(&keyless, &backend, &repository, &provision)
        .unwrap_or_else(|err| panic!("settings should build: {err}"));

    assert_eq!(settings.api_url, "https://api.hetzner.cloud/v1");
    assert_eq!(settings.server_type, "cpx11");
    assert_eq!(settings.image, "ubuntu-22.04");
    assert_eq!(settings.template_path, "cloud-init.sh");
    assert_eq!(settings.ssh_keys, ["4711"]);
}

#[rstest]
fn provision_settings_list_missing_names(hetzner: HetznerConfig, provision: ProvisionConfig) {
    let no_token = HetznerConfig {
        api_token: None,
        ..hetzner
    };
    let backend = BackendConfig {
        api_url: None,
        api_key: Some(String::from("backend-key")),
    };
    let repository = RepositoryConfig {
        remote_project_path: None,
        git_repo_url: None,
    };

    let err = ProvisionSettings::from_sources(&no_token, &backend, &repository, &provision)
        .expect_err("required values are missing");

    assert_eq!(
        err.to_string(),
        "missing required configuration: HETZNER_API_TOKEN, BACKEND_API_URL, GIT_REPO_URL"
    );
}

#[rstest]
fn blank_server_type_is_rejected(
    hetzner: HetznerConfig,
    backend: BackendConfig,
    repository: RepositoryConfig,
    provision: ProvisionConfig,
) {
    let blank = ProvisionConfig {
        server_type: String::from("  "),
        ..provision
    };

    let err = ProvisionSettings::from_sources(&hetzner, &backend, &repository, &blank)
        .expect_err("blank server type");

    assert!(
        matches!(err, ConfigError::Invalid { ref field, .. } if field == "SKYLARK_CREATE_SERVER_TYPE"),
        "unexpected error: {err}"
    );
}

#[test]
fn expand_tilde_leaves_absolute_paths() {
    assert_eq!(expand_tilde("/etc/ssh/key"), "/etc/ssh/key");
}

#[tokio::test]
async fn expand_tilde_uses_home() {
    let _guard = EnvGuard::set_vars(&[("HOME", Some("/home/tester"))]).await;
    assert_eq!(expand_tilde("~/.ssh/id_ed25519"), "/home/tester/.ssh/id_ed25519");
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("SKYLARK_READY_ATTEMPTS", Some("3")),
        ("SKYLARK_SHUTDOWN_SETTLE_SECS", Some("2")),
        ("SKYLARK_MONITOR_SCRIPT", None),
    ])
    .await;

    let monitor = MonitorConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("monitor config should load: {err}"));

    assert_eq!(monitor.ready_attempts, 3);
    assert_eq!(monitor.ready_interval_secs, 10);
    assert_eq!(monitor.monitor_script, DEFAULT_MONITOR_SCRIPT);
    assert_eq!(monitor.shutdown_settle(), Duration::from_secs(2));
}

#[tokio::test]
async fn repository_reads_unprefixed_names_from_shared_env() {
    let _guard = EnvGuard::set_vars(&[
        ("REMOTE_PROJECT_PATH", Some("/srv/monitor")),
        ("GIT_REPO_URL", Some("https://example.com/m.git")),
        ("SKYLARK_REMOTE_PROJECT_PATH", Some("/ignored")),
    ])
    .await;

    let repository = RepositoryConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("repository config should load: {err}"));

    assert_eq!(repository.remote_project_path.as_deref(), Some("/srv/monitor"));
    assert_eq!(
        repository.git_repo_url.as_deref(),
        Some("https://example.com/m.git")
    );
}
