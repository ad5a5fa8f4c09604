//! Workspace-local commands: init, status, log, validate, timeouts.
//!
//! These operate on the manifest sidecar and artifact files alone, so they
//! work even when the run store is unavailable.

use anyhow::Context;
use chrono::{Duration, Utc};
use qaflow_core::manifest::RunManifest;
use qaflow_core::run::Run;
use qaflow_core::types::{
    PipelineStep, RunState, APPROVAL_TIMEOUT_HOURS, CONFIRM_TIMEOUT_HOURS,
};
use qaflow_core::{paths, workspace};
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;

use crate::output::emit;

pub fn init(
    ws: &Path,
    run_id: Option<String>,
    project: &str,
    prd: &str,
    json: bool,
) -> anyhow::Result<()> {
    let run_id = run_id.unwrap_or_else(qaflow_core::run::generate_run_id);
    paths::validate_run_id(&run_id)?;
    workspace::init_workspace(ws)?;

    let run = Run::new(&run_id, project, prd, ws.display().to_string());
    let manifest = RunManifest::snapshot(&run, "unversioned", "unversioned")?;
    manifest.save(ws)?;

    emit(json, &manifest, || {
        println!("initialized run {run_id} in {}", ws.display());
    })
}

pub fn status(ws: &Path, json: bool) -> anyhow::Result<()> {
    let manifest = RunManifest::load(ws).context("no manifest in workspace")?;
    emit(json, &manifest, || {
        println!("run:      {}", manifest.run_id);
        println!("project:  {}", manifest.project_id);
        println!("status:   {}", manifest.status);
        println!("written:  {}", manifest.written_at.to_rfc3339());
        println!("artifacts checksummed: {}", manifest.artifact_checksums.len());
        if !manifest.quality_metrics.is_empty() {
            println!("gate:");
            for m in &manifest.quality_metrics {
                let mark = if m.passed { "pass" } else { "FAIL" };
                println!(
                    "  {:<24} {} (threshold {}) {}",
                    m.name,
                    crate::output::pct(m.value),
                    crate::output::pct(m.threshold),
                    mark
                );
            }
        }
    })
}

pub fn log(ws: &Path, limit: usize, json: bool) -> anyhow::Result<()> {
    let manifest = RunManifest::load(ws).context("no manifest in workspace")?;
    let start = manifest.decision_log.len().saturating_sub(limit);
    let tail = &manifest.decision_log[start..];
    emit(json, &tail, || {
        for entry in tail {
            let reason = entry.reason.as_deref().unwrap_or("-");
            println!(
                "{}  {} --{}--> {}  {}",
                entry.timestamp.to_rfc3339(),
                entry.from_state,
                entry.event,
                entry.to_state,
                reason
            );
        }
    })
}

#[derive(Serialize)]
struct ValidateReport {
    step: Option<String>,
    ok: bool,
    missing: Vec<String>,
    resumable: Vec<PipelineStep>,
}

pub fn validate(ws: &Path, from_step: Option<String>, json: bool) -> anyhow::Result<()> {
    match from_step {
        Some(step) => {
            let step = PipelineStep::from_str(&step)?;
            let (ok, missing) = match workspace::validate_prerequisites(ws, step) {
                Ok(()) => (true, Vec::new()),
                Err(qaflow_core::QaflowError::MissingPrerequisites { missing, .. }) => {
                    (false, missing)
                }
                Err(e) => return Err(e.into()),
            };
            let report = ValidateReport {
                step: Some(step.to_string()),
                ok,
                missing: missing.clone(),
                resumable: Vec::new(),
            };
            emit(json, &report, || {
                if ok {
                    println!("{step}: prerequisites satisfied");
                } else {
                    println!("{step}: missing {}", missing.join(", "));
                }
            })?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        None => {
            let resumable = workspace::resumable_steps(ws);
            let report = ValidateReport {
                step: None,
                ok: true,
                missing: Vec::new(),
                resumable: resumable.clone(),
            };
            emit(json, &report, || {
                println!("resumable steps:");
                for step in &resumable {
                    println!("  {step}");
                }
            })
        }
    }
}

#[derive(Serialize)]
struct TimeoutReport {
    run_id: String,
    status: String,
    waiting_hours: Option<i64>,
    budget_hours: Option<i64>,
    overdue: bool,
}

/// Report whether a run parked at a human checkpoint has exceeded its
/// waiting budget (24 h for approval, 48 h for confirmation). The external
/// scheduler fires the actual `TIMEOUT` via `qaflow run timeout`.
pub fn timeouts(ws: &Path, json: bool) -> anyhow::Result<()> {
    let manifest = RunManifest::load(ws).context("no manifest in workspace")?;
    let state = RunState::from_str(&manifest.status)?;

    let budget_hours = match state {
        RunState::AwaitingApproval => Some(APPROVAL_TIMEOUT_HOURS),
        RunState::ReportReady => Some(CONFIRM_TIMEOUT_HOURS),
        _ => None,
    };
    let waiting_hours = manifest
        .decision_log
        .last()
        .map(|entry| (Utc::now() - entry.timestamp).num_hours());
    let overdue = match (budget_hours, waiting_hours) {
        (Some(budget), Some(waiting)) => Duration::hours(waiting) > Duration::hours(budget),
        _ => false,
    };

    let report = TimeoutReport {
        run_id: manifest.run_id.clone(),
        status: manifest.status.clone(),
        waiting_hours,
        budget_hours,
        overdue,
    };
    emit(json, &report, || match budget_hours {
        Some(budget) => {
            let waiting = waiting_hours.unwrap_or(0);
            let verdict = if overdue { "OVERDUE" } else { "within budget" };
            println!(
                "{}: {} for {waiting}h of {budget}h — {verdict}",
                report.run_id, report.status
            );
        }
        None => println!("{}: {} — no checkpoint pending", report.run_id, report.status),
    })
}
