//! Plain-text rendering of run summaries and fleet reports.

use std::io::{self, Write};

use crate::backend::{ActionResponse, ServerDescriptor, ServerStatus};
use crate::fleet::{FleetStatus, ShutdownReport};
use crate::orchestrator::RunSummary;
use crate::provision::ProvisionSummary;

/// Writes the end-of-run summary.
///
/// # Errors
///
/// Propagates write failures from `out`.
pub fn write_run_summary(out: &mut impl Write, summary: &RunSummary) -> io::Result<()> {
    writeln!(
        out,
        "Run summary: {} succeeded, {} failed",
        summary.succeeded(),
        summary.failed()
    )?;
    for result in &summary.results {
        let verdict = if result.succeeded { "ok" } else { "FAILED" };
        writeln!(out, "  {verdict:<6} {}", result.target)?;
    }
    let mut failures = summary.failures().peekable();
    if failures.peek().is_some() {
        writeln!(out, "Failed targets:")?;
    }
    for result in failures {
        writeln!(out, "  {}", result.target)?;
        if let Some(error) = &result.error {
            writeln!(out, "    error: {error}")?;
        }
        if let Some(cleanup) = &result.cleanup_error {
            writeln!(out, "    power-off: {cleanup}")?;
        }
    }
    Ok(())
}

/// Writes the per-region tally of a `create` run.
///
/// # Errors
///
/// Propagates write failures from `out`.
pub fn write_provision_summary(out: &mut impl Write, summary: &ProvisionSummary) -> io::Result<()> {
    let total = summary.outcomes.len();
    writeln!(
        out,
        "Provision summary: {}/{total} created, {}/{total} failed",
        summary.created(),
        summary.failed()
    )?;
    for outcome in &summary.outcomes {
        match &outcome.result {
            Ok(server) => writeln!(
                out,
                "  created {:<6} {} (id {})",
                outcome.region, server.name, server.id
            )?,
            Err(err) => writeln!(
                out,
                "  FAILED  {:<6} {}: {err}",
                outcome.region, outcome.name
            )?,
        }
    }
    Ok(())
}

const HEADERS: [&str; 6] = ["ID", "Name", "Status", "IPv4", "Location", "Type"];

fn row(server: &ServerDescriptor) -> [String; 6] {
    [
        server.id.to_string(),
        server.name.clone(),
        server.status.to_string(),
        server
            .public_ipv4
            .map_or_else(|| String::from("-"), |ip| ip.to_string()),
        server.location.clone().unwrap_or_else(|| String::from("-")),
        server
            .server_type
            .clone()
            .unwrap_or_else(|| String::from("-")),
    ]
}

/// Writes fleet counts followed by a table of every server.
///
/// # Errors
///
/// Propagates write failures from `out`.
pub fn write_fleet_status(out: &mut impl Write, status: &FleetStatus) -> io::Result<()> {
    if status.servers.is_empty() {
        return writeln!(out, "No servers found in the project.");
    }
    writeln!(out, "Total servers: {}", status.total())?;
    writeln!(out, "  running: {}", status.count(ServerStatus::Running))?;
    writeln!(out, "  off:     {}", status.count(ServerStatus::Off))?;
    writeln!(out)?;

    let rows: Vec<[String; 6]> = status.servers.iter().map(row).collect();
    let mut widths = HEADERS.map(str::len);
    for cells in &rows {
        for (width, cell) in widths.iter_mut().zip(cells) {
            *width = (*width).max(cell.len());
        }
    }
    write_row(out, &HEADERS, &widths)?;
    for cells in &rows {
        write_row(out, cells, &widths)?;
    }
    Ok(())
}

fn write_row<S: AsRef<str>>(out: &mut impl Write, cells: &[S], widths: &[usize]) -> io::Result<()> {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell.as_ref()))
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(out, "{}", line.trim_end())
}

/// Writes the acknowledgement of a manual power action.
///
/// # Errors
///
/// Propagates write failures from `out`.
pub fn write_action(out: &mut impl Write, name: &str, action: &ActionResponse) -> io::Result<()> {
    writeln!(
        out,
        "{name}: {} accepted (action {}, {:?})",
        action.command, action.id, action.status
    )
}

/// Writes the result of `shutdown-all`.
///
/// # Errors
///
/// Propagates write failures from `out`.
pub fn write_shutdown_report(out: &mut impl Write, report: &ShutdownReport) -> io::Result<()> {
    if report.requested.is_empty() && report.send_failures.is_empty() {
        return writeln!(out, "No running servers detected.");
    }
    for (name, err) in &report.send_failures {
        writeln!(out, "  failed to send shutdown to '{name}': {err}")?;
    }
    for name in &report.confirmed_off {
        writeln!(out, "  '{name}' is off")?;
    }
    for (name, status) in &report.not_off {
        writeln!(out, "  '{name}' is still '{status}'")?;
    }
    if report.all_off() {
        writeln!(out, "All targeted servers are off.")
    } else {
        writeln!(out, "Some servers may not have shut down.")
    }
}
