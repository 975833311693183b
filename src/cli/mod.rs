//! Command-line interface definitions for the `skylark` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `skylark` binary.
#[derive(Debug, Parser)]
#[command(
    name = "skylark",
    about = "Power-cycle Hetzner latency testers and run their monitor",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Power on each target, run the monitor, and power it off again.
    #[command(
        name = "orchestrate",
        about = "Power on each target, run the monitor, and power it off again"
    )]
    Orchestrate(OrchestrateCommand),
    /// Create one tester per region from a cloud-init template.
    #[command(
        name = "create",
        about = "Create one tester per region from a cloud-init template"
    )]
    Create(CreateCommand),
    /// Show every server in the project.
    #[command(name = "status", about = "Show every server in the project")]
    Status,
    /// Power on a single server.
    #[command(name = "power-on", about = "Power on a single server")]
    PowerOn(ServerArg),
    /// Gracefully shut down a single server.
    #[command(name = "power-off", about = "Gracefully shut down a single server")]
    PowerOff(ServerArg),
    /// Shut down every running server and verify they stopped.
    #[command(
        name = "shutdown-all",
        about = "Shut down every running server and verify they stopped"
    )]
    ShutdownAll,
}

/// Arguments for `skylark orchestrate`.
#[derive(Debug, Parser)]
pub(crate) struct OrchestrateCommand {
    /// Server and region to test, as NAME=REGION. Repeat to build the list;
    /// when omitted the built-in five testers are used.
    #[arg(long = "target", value_name = "NAME=REGION")]
    pub(crate) targets: Vec<String>,
    /// Also write the run log to a timestamped file in this directory.
    #[arg(long, value_name = "DIR")]
    pub(crate) log_dir: Option<String>,
}

/// Arguments for `skylark create`.
#[derive(Debug, Parser)]
pub(crate) struct CreateCommand {
    /// Location to create a tester in. Repeat for several; when omitted
    /// fsn1, nbg1, hel1 and ash are used.
    #[arg(long = "region", value_name = "REGION")]
    pub(crate) regions: Vec<String>,
    /// Cloud-init template to fill in, overriding SKYLARK_CREATE_CLOUD_INIT_PATH.
    #[arg(long, value_name = "PATH")]
    pub(crate) cloud_init: Option<String>,
    /// Also write the run log to a timestamped file in this directory.
    #[arg(long, value_name = "DIR")]
    pub(crate) log_dir: Option<String>,
}

/// A single server name.
#[derive(Debug, Parser)]
pub(crate) struct ServerArg {
    /// Server name as shown by `skylark status`.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
}
