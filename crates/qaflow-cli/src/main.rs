mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::pipeline::RunSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "qaflow",
    about = "Run-lifecycle orchestration for PRD-driven test pipelines",
    version,
    propagate_version = true
)]
struct Cli {
    /// Run workspace directory (default: auto-detect from manifest.yaml)
    #[arg(long, global = true, env = "QAFLOW_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a run workspace (directories + manifest)
    Init {
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long)]
        project: String,
        #[arg(long)]
        prd: String,
    },

    /// Show the run manifest summary
    Status,

    /// Show the decision-log trail
    Log {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Compute quality-gate metrics from workspace artifacts
    Gate,

    /// Show the requirement → case → assertion → evidence chain report
    Trace,

    /// Check resume prerequisites (all steps, or one with --from-step)
    Validate {
        #[arg(long = "from-step")]
        from_step: Option<String>,
    },

    /// Report whether a checkpoint wait has exceeded its budget
    Timeouts,

    /// Drive the pipeline against the embedded run store
    Run {
        #[command(subcommand)]
        subcommand: RunSubcommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let ws = root::resolve_workspace(cli.workspace.clone());

    match cli.command {
        Commands::Init {
            run_id,
            project,
            prd,
        } => cmd::workspace::init(&ws, run_id, &project, &prd, cli.json),
        Commands::Status => cmd::workspace::status(&ws, cli.json),
        Commands::Log { limit } => cmd::workspace::log(&ws, limit, cli.json),
        Commands::Gate => cmd::gate::gate(&ws, cli.json),
        Commands::Trace => cmd::gate::trace_report(&ws, cli.json),
        Commands::Validate { from_step } => cmd::workspace::validate(&ws, from_step, cli.json),
        Commands::Timeouts => cmd::workspace::timeouts(&ws, cli.json),
        Commands::Run { subcommand } => cmd::pipeline::run(subcommand, cli.json).await,
    }
}
