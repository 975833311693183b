//! Binary entry point for the skylark CLI.

mod cli;

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use chrono::Utc;
use clap::Parser;
use thiserror::Error;
use tracing::info;

use cli::{Cli, CreateCommand, OrchestrateCommand};
use skylark::fleet::{self, FleetError, PowerAction};
use skylark::logging::{self, LoggingError};
use skylark::orchestrator::{Target, TargetParseError, default_targets};
use skylark::provision::{self, default_regions};
use skylark::report;
use skylark::{
    BackendConfig, CloudError, CloudInitError, ConfigError, CredentialBundle, HetznerClient,
    HetznerConfig, MonitorConfig, Orchestrator, ProvisionConfig, ProvisionSettings,
    RepositoryConfig, Ssh, SshProbe, SshTaskRunner, Template,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Target(#[from] TargetParseError),
    #[error(transparent)]
    Template(#[from] CloudInitError),
    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),
    #[error("cloud client error: {0}")]
    Cloud(#[from] CloudError),
    #[error(transparent)]
    Fleet(#[from] FleetError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Orchestrate(args) => orchestrate(args).await,
        Cli::Create(args) => create(args).await,
        Cli::Status => {
            logging::init(None)?;
            let status = fleet::fleet_status(&api_client()?).await?;
            report::write_fleet_status(&mut io::stdout().lock(), &status)?;
            Ok(0)
        }
        Cli::PowerOn(server) => power(&server.name, PowerAction::On).await,
        Cli::PowerOff(server) => power(&server.name, PowerAction::Off).await,
        Cli::ShutdownAll => {
            logging::init(None)?;
            let settle = MonitorConfig::load_without_cli_args()?.shutdown_settle();
            let cloud = api_client()?;
            let shutdown = fleet::shutdown_running(&cloud, settle).await?;
            report::write_shutdown_report(&mut io::stdout().lock(), &shutdown)?;
            Ok(0)
        }
    }
}

async fn orchestrate(args: OrchestrateCommand) -> Result<i32, CliError> {
    if let Some(path) = logging::init(args.log_dir.as_deref().map(Utf8Path::new))? {
        info!(%path, "writing run log");
    }
    let targets = parse_targets(&args.targets)?;
    let bundle = CredentialBundle::from_sources(
        &HetznerConfig::load_without_cli_args()?,
        &BackendConfig::load_without_cli_args()?,
        &RepositoryConfig::load_without_cli_args()?,
        &MonitorConfig::load_without_cli_args()?,
    )?;
    info!("configuration loaded");

    let cloud = HetznerClient::new(bundle.api_token.clone(), &bundle.api_url)?;
    let probe = SshProbe::new(Ssh, bundle.timing.probe_timeout);
    let orchestrator = Orchestrator::new(cloud, probe, SshTaskRunner::new(Ssh));

    info!(targets = targets.len(), "starting sequential orchestration");
    let summary = orchestrator.run(&targets, &bundle).await;
    report::write_run_summary(&mut io::stdout().lock(), &summary)?;
    Ok(0)
}

async fn create(args: CreateCommand) -> Result<i32, CliError> {
    if let Some(path) = logging::init(args.log_dir.as_deref().map(Utf8Path::new))? {
        info!(%path, "writing run log");
    }
    let settings = ProvisionSettings::from_sources(
        &HetznerConfig::load_without_cli_args()?,
        &BackendConfig::load_without_cli_args()?,
        &RepositoryConfig::load_without_cli_args()?,
        &ProvisionConfig::load_without_cli_args()?,
    )?;
    let template = Template::load(args.cloud_init.as_deref().unwrap_or(&settings.template_path))?;
    let regions = if args.regions.is_empty() {
        default_regions()
    } else {
        args.regions
    };

    let cloud = HetznerClient::new(settings.api_token.clone(), &settings.api_url)?;
    info!(regions = regions.len(), "creating testers");
    let summary =
        provision::create_testers(&cloud, &settings, &template, &regions, Utc::now().timestamp())
            .await;
    report::write_provision_summary(&mut io::stdout().lock(), &summary)?;
    Ok(0)
}

async fn power(name: &str, action: PowerAction) -> Result<i32, CliError> {
    logging::init(None)?;
    let response = fleet::set_power(&api_client()?, name, action).await?;
    report::write_action(&mut io::stdout().lock(), name, &response)?;
    Ok(0)
}

fn api_client() -> Result<HetznerClient, CliError> {
    let config = HetznerConfig::load_without_cli_args()?;
    let token = config.require_api_token()?;
    Ok(HetznerClient::new(token, config.api_url.trim())?)
}

fn parse_targets(raw: &[String]) -> Result<Vec<Target>, CliError> {
    if raw.is_empty() {
        return Ok(default_targets());
    }
    raw.iter()
        .map(|value| value.parse().map_err(CliError::from))
        .collect()
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_default_to_builtin_fleet() {
        let targets = parse_targets(&[]).unwrap_or_else(|err| panic!("defaults: {err}"));
        assert_eq!(targets.len(), 5);
        assert_eq!(targets[0], Target::new("rocky-ash-1", "ash"));
    }

    #[test]
    fn explicit_targets_replace_defaults() {
        let targets = parse_targets(&[String::from("alpha=fsn1"), String::from("beta=ash")])
            .unwrap_or_else(|err| panic!("targets: {err}"));
        assert_eq!(
            targets,
            vec![Target::new("alpha", "fsn1"), Target::new("beta", "ash")]
        );
    }

    #[test]
    fn malformed_target_is_rejected() {
        let err = parse_targets(&[String::from("alpha")]).expect_err("missing region");
        assert_eq!(err.to_string(), "invalid target 'alpha': expected NAME=REGION");
    }

    #[test]
    fn cli_collects_repeated_targets() {
        let cli = Cli::try_parse_from([
            "skylark",
            "orchestrate",
            "--target",
            "alpha=fsn1",
            "--target",
            "beta=ash",
            "--log-dir",
            "logs",
        ])
        .unwrap_or_else(|err| panic!("parse: {err}"));
        let Cli::Orchestrate(args) = cli else {
            panic!("expected orchestrate");
        };
        assert_eq!(args.targets, ["alpha=fsn1", "beta=ash"]);
        assert_eq!(args.log_dir.as_deref(), Some("logs"));
    }

    #[test]
    fn cli_collects_create_regions() {
        let cli = Cli::try_parse_from([
            "skylark",
            "create",
            "--region",
            "hel1",
            "--region",
            "ash",
            "--cloud-init",
            "init.sh",
        ])
        .unwrap_or_else(|err| panic!("parse: {err}"));
        let Cli::Create(args) = cli else {
            panic!("expected create");
        };
        assert_eq!(args.regions, ["hel1", "ash"]);
        assert_eq!(args.cloud_init.as_deref(), Some("init.sh"));
        assert_eq!(args.log_dir, None);
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Config(ConfigError::Missing {
            fields: vec![String::from("GIT_REPO_URL")],
        });
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert_eq!(
            rendered,
            "configuration error: missing required configuration: GIT_REPO_URL\n"
        );
    }
}
