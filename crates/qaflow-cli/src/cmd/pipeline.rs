//! `qaflow run` — drive the pipeline against the embedded run store.
//!
//! Each invocation builds a runner over the redb store and the subprocess
//! agents, performs one lifecycle action, and (for actions that kick off
//! background work) follows the event stream until the pipeline suspends at
//! a checkpoint or fails.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Subcommand};
use qaflow_agent::InvokeOptions;
use qaflow_core::run::Run;
use qaflow_core::types::PipelineStep;
use qaflow_runner::{
    FeedbackCategory, PipelineConfig, PipelineEvent, PipelineRunner, RedbRunStore,
    RegenerationFeedback, RunStore, SubprocessAgents,
};
use std::str::FromStr;
use tokio_stream::StreamExt;

use crate::output::emit;

// ---------------------------------------------------------------------------
// Shared arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Embedded run store database
    #[arg(long, default_value = ".qaflow/runs.db", env = "QAFLOW_DB")]
    pub db: PathBuf,

    /// Project root used for PRD resolution
    #[arg(long, default_value = ".")]
    pub project_root: PathBuf,

    /// Agent executable (default: qa-agent on PATH)
    #[arg(long, env = "QAFLOW_AGENT")]
    pub agent: Option<String>,

    /// Model override forwarded to the agent
    #[arg(long)]
    pub model: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum RunSubcommand {
    /// Create a run record and its workspace
    Create {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long)]
        project: String,
        /// PRD location (absolute, or resolved against the project root)
        #[arg(long)]
        prd: String,
        /// Run workspace directory
        #[arg(long)]
        workspace: PathBuf,
    },

    /// Start the pipeline for a created run
    Start {
        #[command(flatten)]
        store: StoreArgs,
        run_id: String,
    },

    /// Approve generated test cases and continue into execution
    Approve {
        #[command(flatten)]
        store: StoreArgs,
        run_id: String,
    },

    /// Reject generated test cases with feedback, triggering regeneration
    Reject {
        #[command(flatten)]
        store: StoreArgs,
        run_id: String,
        /// missing_coverage | wrong_expectation | too_shallow | other
        #[arg(long)]
        category: String,
        #[arg(long)]
        detail: String,
    },

    /// Confirm the final report, completing the run
    Confirm {
        #[command(flatten)]
        store: StoreArgs,
        run_id: String,
    },

    /// Send a confirmed-report run back for another full pass
    Retest {
        #[command(flatten)]
        store: StoreArgs,
        run_id: String,
    },

    /// Resume a suspended or failed run from a specific step
    Resume {
        #[command(flatten)]
        store: StoreArgs,
        run_id: String,
        #[arg(long = "from-step")]
        from_step: String,
    },

    /// Drive a run to failed, discarding in-flight work
    Cancel {
        #[command(flatten)]
        store: StoreArgs,
        run_id: String,
        #[arg(long)]
        note: String,
    },

    /// Fire the watchdog timeout for a run parked at a checkpoint
    Timeout {
        #[command(flatten)]
        store: StoreArgs,
        run_id: String,
    },

    /// Show a run record
    Show {
        #[command(flatten)]
        store: StoreArgs,
        run_id: String,
    },

    /// List run records, newest first
    List {
        #[command(flatten)]
        store: StoreArgs,
    },
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn open_store(args: &StoreArgs) -> anyhow::Result<Arc<RedbRunStore>> {
    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Arc::new(RedbRunStore::open(&args.db)?))
}

fn build_runner(args: &StoreArgs) -> anyhow::Result<(PipelineRunner, Arc<RedbRunStore>)> {
    let store = open_store(args)?;
    let agents = Arc::new(SubprocessAgents::new(InvokeOptions {
        executable: args.agent.clone(),
        model: args.model.clone(),
        ..Default::default()
    }));
    let config = PipelineConfig::new(&args.project_root);
    Ok((PipelineRunner::new(store.clone(), agents, config), store))
}

fn parse_category(s: &str) -> anyhow::Result<FeedbackCategory> {
    match s {
        "missing_coverage" => Ok(FeedbackCategory::MissingCoverage),
        "wrong_expectation" => Ok(FeedbackCategory::WrongExpectation),
        "too_shallow" => Ok(FeedbackCategory::TooShallow),
        "other" => Ok(FeedbackCategory::Other),
        other => bail!("unknown feedback category: {other}"),
    }
}

/// Print lifecycle events for `run_id` until the pipeline suspends at a
/// checkpoint or fails. The subscription must be created before the
/// triggering call so no event is missed.
async fn follow(
    mut events: impl tokio_stream::Stream<
            Item = Result<PipelineEvent, tokio_stream::wrappers::errors::BroadcastStreamRecvError>,
        > + Unpin,
    run_id: &str,
) -> anyhow::Result<()> {
    while let Some(event) = events.next().await {
        let Ok(event) = event else { continue };
        match &event {
            PipelineEvent::StepStarted { run_id: id, step } if id == run_id => {
                println!("-> {step}");
            }
            PipelineEvent::StepCompleted { run_id: id, step } if id == run_id => {
                println!("ok {step}");
            }
            PipelineEvent::StepSkipped { run_id: id, step } if id == run_id => {
                println!("-- {step} (skipped)");
            }
            PipelineEvent::StepFailed {
                run_id: id,
                step,
                error,
            } if id == run_id => {
                println!("!! {step}: {error}");
                return Ok(());
            }
            PipelineEvent::ApprovalRequired { run_id: id } if id == run_id => {
                println!("awaiting approval — continue with `qaflow run approve {run_id}`");
                return Ok(());
            }
            PipelineEvent::ConfirmationRequired { run_id: id } if id == run_id => {
                println!("report ready — finish with `qaflow run confirm {run_id}`");
                return Ok(());
            }
            PipelineEvent::PipelineResumed { run_id: id, from_step } if id == run_id => {
                println!("resumed at {from_step}");
            }
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub async fn run(sub: RunSubcommand, json: bool) -> anyhow::Result<()> {
    match sub {
        RunSubcommand::Create {
            store,
            run_id,
            project,
            prd,
            workspace,
        } => {
            let run_id = run_id.unwrap_or_else(qaflow_core::run::generate_run_id);
            qaflow_core::paths::validate_run_id(&run_id)?;
            qaflow_core::workspace::init_workspace(&workspace)?;
            let run = Run::new(&run_id, &project, &prd, workspace.display().to_string());
            let store = open_store(&store)?;
            store.insert(&run).await?;
            emit(json, &run, || println!("created {run_id}"))
        }

        RunSubcommand::Start { store, run_id } => {
            let (runner, _) = build_runner(&store)?;
            let events = runner.events().subscribe();
            runner.start(&run_id).await?;
            follow(events, &run_id).await
        }

        RunSubcommand::Approve { store, run_id } => {
            let (runner, _) = build_runner(&store)?;
            let events = runner.events().subscribe();
            runner.approve(&run_id).await?;
            follow(events, &run_id).await
        }

        RunSubcommand::Reject {
            store,
            run_id,
            category,
            detail,
        } => {
            let (runner, _) = build_runner(&store)?;
            let events = runner.events().subscribe();
            runner
                .reject(
                    &run_id,
                    RegenerationFeedback {
                        category: parse_category(&category)?,
                        detail,
                    },
                )
                .await?;
            follow(events, &run_id).await
        }

        RunSubcommand::Confirm { store, run_id } => {
            let (runner, store) = build_runner(&store)?;
            runner.confirm(&run_id).await?;
            let run = store
                .find_by_id(&run_id)
                .await?
                .context("run vanished after confirm")?;
            emit(json, &run, || println!("{run_id} completed"))
        }

        RunSubcommand::Retest { store, run_id } => {
            let (runner, _) = build_runner(&store)?;
            runner.retest(&run_id).await?;
            println!("{run_id} reset for retest");
            Ok(())
        }

        RunSubcommand::Resume {
            store,
            run_id,
            from_step,
        } => {
            let step = PipelineStep::from_str(&from_step)?;
            let (runner, _) = build_runner(&store)?;
            let events = runner.events().subscribe();
            runner.resume(&run_id, step).await?;
            follow(events, &run_id).await
        }

        RunSubcommand::Cancel {
            store,
            run_id,
            note,
        } => {
            let (runner, _) = build_runner(&store)?;
            runner.cancel(&run_id, note).await?;
            println!("{run_id} cancelled");
            Ok(())
        }

        RunSubcommand::Timeout { store, run_id } => {
            let (runner, store) = build_runner(&store)?;
            runner.fire_timeout(&run_id).await?;
            let run = store
                .find_by_id(&run_id)
                .await?
                .context("run vanished after timeout")?;
            let reason = run
                .reason_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            emit(json, &run, || println!("{run_id} failed ({reason})"))
        }

        RunSubcommand::Show { store, run_id } => {
            let store = open_store(&store)?;
            let run = store
                .find_by_id(&run_id)
                .await?
                .with_context(|| format!("run not found: {run_id}"))?;
            emit(json, &run, || {
                println!("run:     {}", run.id);
                println!("project: {}", run.project_id);
                println!("state:   {}", run.state);
                if let Some(reason) = run.reason_code {
                    println!("reason:  {reason}");
                }
                for entry in run.recent_transitions(5) {
                    println!(
                        "  {} --{}--> {}",
                        entry.from_state, entry.event, entry.to_state
                    );
                }
            })
        }

        RunSubcommand::List { store } => {
            let store = open_store(&store)?;
            let runs = store.list_all()?;
            emit(json, &runs, || {
                for run in &runs {
                    println!("{}  {}  {}", run.id, run.state, run.project_id);
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parsing() {
        assert!(matches!(
            parse_category("missing_coverage").unwrap(),
            FeedbackCategory::MissingCoverage
        ));
        assert!(parse_category("bogus").is_err());
    }
}
