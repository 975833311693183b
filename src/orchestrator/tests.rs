//! Lifecycle tests driven by scripted collaborators.

use std::net::Ipv4Addr;
use std::time::Duration;

use rstest::rstest;
use tokio::time::Instant;

use super::*;
use crate::backend::CloudError;
use crate::ssh::ShellError;
use crate::task::SshTaskRunner;
use crate::test_support::{
    CloudCall, ScriptedCloud, ScriptedProbe, ScriptedShell, ScriptedTaskRunner, sample_bundle,
};

const ADDRESS: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 50);

fn denied() -> CloudError {
    CloudError::RequestFailed {
        status: Some(403),
        body: String::from("forbidden"),
    }
}

fn power_offs(cloud: &ScriptedCloud, name: &str) -> usize {
    cloud.count(&CloudCall::PowerOff(name.to_owned()))
}

#[derive(Clone, Copy, Debug)]
enum Breakage {
    PowerOn,
    AddressLookup,
    NeverReady,
    Connection,
    Setup,
    Monitor,
}

#[rstest]
#[case::power_on(Breakage::PowerOn, FailureKind::RequestFailed, Stage::PoweringOn)]
#[case::address_lookup(Breakage::AddressLookup, FailureKind::RequestFailed, Stage::WaitingReady)]
#[case::never_ready(Breakage::NeverReady, FailureKind::TimeoutError, Stage::WaitingReady)]
#[case::connection(Breakage::Connection, FailureKind::ConnectionError, Stage::Running)]
#[case::setup(Breakage::Setup, FailureKind::SetupFailed, Stage::Running)]
#[case::monitor(Breakage::Monitor, FailureKind::TaskFailed, Stage::Running)]
#[tokio::test(start_paused = true)]
async fn powers_off_exactly_once_whichever_stage_fails(
    #[case] breakage: Breakage,
    #[case] kind: FailureKind,
    #[case] stage: Stage,
) {
    let cloud = ScriptedCloud::new().with_server("alpha", 1);
    let probe = ScriptedProbe::always(!matches!(breakage, Breakage::NeverReady));
    let runner = ScriptedTaskRunner::new();
    if matches!(breakage, Breakage::AddressLookup) {
        cloud.push_address_error("alpha", denied());
    } else {
        cloud.push_address("alpha", Some(ADDRESS));
    }
    match breakage {
        Breakage::PowerOn => cloud.fail_power_on("alpha", denied()),
        Breakage::AddressLookup | Breakage::NeverReady => {}
        Breakage::Connection => runner.push_result(Err(TaskError::Connection(
            ShellError::Connect {
                address: ADDRESS,
                message: String::from("connection refused"),
            },
        ))),
        Breakage::Setup => runner.push_result(Err(TaskError::SetupFailed {
            exit_code: Some(128),
            stderr: String::from("fatal: not a git repository"),
        })),
        Breakage::Monitor => runner.push_exit(3, "endpoint unreachable"),
    }

    assert_single_failure(cloud, probe, runner, kind, stage).await;
}

async fn assert_single_failure(
    cloud: ScriptedCloud,
    probe: ScriptedProbe,
    runner: ScriptedTaskRunner,
    kind: FailureKind,
    stage: Stage,
) {
    let orchestrator = Orchestrator::new(cloud.clone(), probe, runner);
    let bundle = sample_bundle();

    let summary = orchestrator
        .run(&[Target::new("alpha", "fsn1")], &bundle)
        .await;

    let result = &summary.results[0];
    assert!(!result.succeeded);
    let error = result
        .error
        .as_ref()
        .unwrap_or_else(|| panic!("failure should be recorded"));
    assert_eq!(error.kind, kind);
    assert_eq!(error.stage, stage);
    assert_eq!(result.cleanup_error, None);
    assert_eq!(power_offs(&cloud, "alpha"), 1);
    assert_eq!(cloud.calls().last(), Some(&CloudCall::PowerOff(String::from("alpha"))));
}

#[tokio::test(start_paused = true)]
async fn readiness_wait_stops_after_bound_without_trailing_sleep() {
    let cloud = ScriptedCloud::new().with_server("beta", 2);
    cloud.push_address("beta", Some(ADDRESS));
    let probe = ScriptedProbe::always(false);
    let orchestrator = Orchestrator::new(cloud.clone(), probe.clone(), ScriptedTaskRunner::new());
    let bundle = sample_bundle();
    let started = Instant::now();

    let summary = orchestrator.run(&[Target::new("beta", "ash")], &bundle).await;

    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_secs(390) && elapsed < Duration::from_secs(391),
        "unexpected wait: {elapsed:?}"
    );
    assert_eq!(probe.probed().len(), 40);
    assert_eq!(cloud.count(&CloudCall::GetAddress(String::from("beta"))), 40);
    assert_eq!(
        summary.results[0].error.as_ref().map(|failure| failure.kind),
        Some(FailureKind::TimeoutError)
    );
}

#[tokio::test(start_paused = true)]
async fn missing_address_is_not_probed() {
    let cloud = ScriptedCloud::new().with_server("beta", 2);
    cloud.push_address("beta", None);
    cloud.push_address("beta", None);
    cloud.push_address("beta", Some(ADDRESS));
    let probe = ScriptedProbe::always(true);
    let runner = ScriptedTaskRunner::new();
    let orchestrator = Orchestrator::new(cloud, probe.clone(), runner.clone());
    let bundle = sample_bundle();

    let summary = orchestrator.run(&[Target::new("beta", "ash")], &bundle).await;

    assert!(summary.results[0].succeeded);
    assert_eq!(summary.results[0].address, Some(ADDRESS));
    assert_eq!(probe.probed(), vec![ADDRESS]);
    assert_eq!(runner.invocations(), vec![(ADDRESS, String::from("ash"))]);
}

#[tokio::test(start_paused = true)]
async fn failing_middle_target_keeps_order() {
    let cloud = ScriptedCloud::new()
        .with_server("first", 1)
        .with_server("second", 2)
        .with_server("third", 3);
    cloud.push_address("first", Some(Ipv4Addr::new(192, 0, 2, 1)));
    cloud.push_address("third", Some(Ipv4Addr::new(192, 0, 2, 3)));
    cloud.fail_power_on("second", denied());
    cloud.push_address_error("second", denied());
    cloud.fail_power_off("second", denied());
    let runner = ScriptedTaskRunner::new();
    let orchestrator = Orchestrator::new(cloud.clone(), ScriptedProbe::always(true), runner.clone());
    let targets = [
        Target::new("first", "ash"),
        Target::new("second", "hel1"),
        Target::new("third", "sin1"),
    ];
    let bundle = sample_bundle();

    let summary = orchestrator.run(&targets, &bundle).await;

    let names: Vec<&str> = summary
        .results
        .iter()
        .map(|result| result.target.server_name.as_str())
        .collect();
    assert_eq!(names, ["first", "second", "third"]);
    assert!(summary.results[0].succeeded);
    assert!(!summary.results[1].succeeded);
    assert!(summary.results[1].cleanup_error.is_some());
    assert!(summary.results[2].succeeded);
    assert_eq!((summary.succeeded(), summary.failed()), (2, 1));
    for name in ["first", "second", "third"] {
        assert_eq!(power_offs(&cloud, name), 1, "power-off count for {name}");
    }
    assert_eq!(runner.invocations().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn power_off_failure_marks_target_failed() {
    let cloud = ScriptedCloud::new().with_server("alpha", 1);
    cloud.push_address("alpha", Some(ADDRESS));
    cloud.fail_power_off("alpha", denied());
    let orchestrator = Orchestrator::new(
        cloud,
        ScriptedProbe::always(true),
        ScriptedTaskRunner::new(),
    );
    let bundle = sample_bundle();

    let summary = orchestrator.run(&[Target::new("alpha", "fsn1")], &bundle).await;

    let result = &summary.results[0];
    assert!(!result.succeeded);
    assert_eq!(result.error, None);
    let cleanup = result
        .cleanup_error
        .as_ref()
        .unwrap_or_else(|| panic!("cleanup failure should be recorded"));
    assert_eq!(cleanup.stage, Stage::PoweringOff);
    assert_eq!(cleanup.kind, FailureKind::RequestFailed);
}

#[tokio::test(start_paused = true)]
async fn unknown_server_is_reported_as_not_found() {
    let cloud = ScriptedCloud::new();
    let orchestrator = Orchestrator::new(
        cloud.clone(),
        ScriptedProbe::always(true),
        ScriptedTaskRunner::new(),
    );
    let bundle = sample_bundle();

    let summary = orchestrator.run(&[Target::new("ghost", "ash")], &bundle).await;

    let result = &summary.results[0];
    assert_eq!(
        result.error.as_ref().map(|failure| failure.kind),
        Some(FailureKind::NotFound)
    );
    assert_eq!(
        result.cleanup_error.as_ref().map(|failure| failure.kind),
        Some(FailureKind::NotFound)
    );
    assert_eq!(power_offs(&cloud, "ghost"), 1);
}

#[tokio::test(start_paused = true)]
async fn alpha_ready_on_second_attempt_succeeds() {
    let cloud = ScriptedCloud::new().with_server("alpha", 11);
    cloud.push_address("alpha", Some(ADDRESS));
    let probe = ScriptedProbe::ready_after(1);
    let shell = ScriptedShell::new();
    shell.push_output(Some(0), "Cloning repository...\n", "");
    shell.push_output(Some(0), "done\n", "");
    let orchestrator = Orchestrator::new(cloud.clone(), probe.clone(), SshTaskRunner::new(shell.clone()));
    let bundle = sample_bundle();
    let started = Instant::now();

    let summary = orchestrator.run(&[Target::new("alpha", "fsn1")], &bundle).await;

    let result = &summary.results[0];
    assert!(result.succeeded);
    assert_eq!(result.error, None);
    assert_eq!(result.cleanup_error, None);
    assert_eq!(probe.probed().len(), 2);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(shell.commands().len(), 2);
    assert!(shell.commands()[1].contains("export REGION=fsn1; "));
    assert_eq!(power_offs(&cloud, "alpha"), 1);
}

#[tokio::test(start_paused = true)]
async fn beta_never_ready_skips_task() {
    let cloud = ScriptedCloud::new().with_server("beta", 12);
    cloud.push_address("beta", Some(ADDRESS));
    let shell = ScriptedShell::new();
    let orchestrator = Orchestrator::new(
        cloud.clone(),
        ScriptedProbe::always(false),
        SshTaskRunner::new(shell.clone()),
    );
    let bundle = sample_bundle();

    let summary = orchestrator.run(&[Target::new("beta", "ash")], &bundle).await;

    let result = &summary.results[0];
    assert!(!result.succeeded);
    assert_eq!(
        result.error.as_ref().map(|failure| failure.kind),
        Some(FailureKind::TimeoutError)
    );
    assert_eq!(power_offs(&cloud, "beta"), 1);
    assert_eq!(shell.connect_count(), 0);
}

#[rstest]
#[case("rocky-ash-1=ash", Target::new("rocky-ash-1", "ash"))]
#[case(" alpha = fsn1 ", Target::new("alpha", "fsn1"))]
fn target_parses_name_and_region(#[case] input: &str, #[case] expected: Target) {
    let target: Target = input
        .parse()
        .unwrap_or_else(|err| panic!("target should parse: {err}"));
    assert_eq!(target, expected);
}

#[rstest]
#[case("alpha")]
#[case("=fsn1")]
#[case("alpha=")]
fn target_rejects_missing_parts(#[case] input: &str) {
    let err = input.parse::<Target>().expect_err("target should be rejected");
    assert_eq!(err.input, input);
}

#[test]
fn default_targets_keep_declared_order() {
    let regions: Vec<String> = default_targets()
        .into_iter()
        .map(|target| target.region)
        .collect();
    assert_eq!(regions, ["ash", "us-west", "nbg1", "hel1", "sin1"]);
}

#[test]
fn failure_display_leads_with_kind() {
    let failure = RunFailure {
        kind: FailureKind::TimeoutError,
        stage: Stage::WaitingReady,
        detail: String::from("server beta not ready after 40 attempts"),
    };
    assert_eq!(
        failure.to_string(),
        "TimeoutError: server beta not ready after 40 attempts"
    );
}
