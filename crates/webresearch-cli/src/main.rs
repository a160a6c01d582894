mod offline;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use webresearch_core::{
    init_telemetry, CheckpointStore, EngineConfig, ListDirTool, ReadFileTool, RunRegistry,
    StartedRun, TaskPool, ToolSet, ToolSetBuilder, WebSearchTool, WriteFileTool,
};

use offline::{OfflineModel, SimulatedSearchWorker};

#[derive(Parser, Debug)]
#[command(name = "webresearch", version, about = "Resumable deep-research workflow demo")]
struct Cli {
    /// Directory holding per-run checkpoint artifacts.
    #[arg(long, default_value = "data/research")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a research task from scratch.
    Run(RunArgs),
    /// Resume an interrupted task from its checkpoint.
    Resume(ResumeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Topic to research.
    #[arg(long, default_value = "Assess lithium battery recycling methods")]
    topic: String,

    /// Optional task ID; minted automatically when omitted.
    #[arg(long)]
    task: Option<String>,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Args, Debug)]
struct ResumeArgs {
    /// Task ID whose checkpoint directory should be continued.
    #[arg(long)]
    task: String,

    /// Topic of the original run (used if the plan must be regenerated).
    #[arg(long)]
    topic: String,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Args, Debug)]
struct TuningArgs {
    /// Maximum browser searches in flight at once.
    #[arg(long, default_value_t = 2)]
    max_parallel: usize,

    /// Maximum queries accepted per search call.
    #[arg(long, default_value_t = 3)]
    max_queries: usize,

    /// Abort after this many step failures in a row (0 disables).
    #[arg(long, default_value_t = 3)]
    max_failures: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry(None)?;

    let cli = Cli::parse();
    let store = CheckpointStore::new(&cli.output_dir);

    match cli.command {
        Command::Run(args) => {
            execute(store, &args.topic, args.task.as_deref(), &args.tuning).await
        }
        Command::Resume(args) => {
            execute(store, &args.topic, Some(&args.task), &args.tuning).await
        }
    }
}

async fn execute(
    store: CheckpointStore,
    topic: &str,
    task_id: Option<&str>,
    tuning: &TuningArgs,
) -> Result<()> {
    let registry = RunRegistry::new(
        store,
        Arc::new(OfflineModel::new()),
        tool_builder(tuning.max_parallel, tuning.max_queries),
        EngineConfig {
            max_consecutive_failures: tuning.max_failures,
            ..EngineConfig::default()
        },
    );

    let StartedRun {
        task_id,
        mut snapshots,
        outcome,
    } = registry.start(topic, task_id)?;
    info!(%task_id, topic, "research run started");

    let progress = tokio::spawn(async move {
        while let Some(snapshot) = snapshots.recv().await {
            info!(
                phase = ?snapshot.phase,
                step = snapshot.current_step_index,
                steps = snapshot.plan.len(),
                results = snapshot.results_len,
                "progress"
            );
        }
    });

    let outcome = outcome.await?;
    progress.await?;

    match outcome.report {
        Some(report) => {
            println!("{report}");
            Ok(())
        }
        None => {
            let reason = outcome
                .state
                .error_message
                .unwrap_or_else(|| "run stopped before producing a report".to_string());
            anyhow::bail!("research run failed: {reason}")
        }
    }
}

fn tool_builder(max_parallel: usize, max_queries: usize) -> Arc<ToolSetBuilder> {
    Arc::new(move |task_dir: &Path| {
        let mut tools = ToolSet::new();
        tools.register(Arc::new(WebSearchTool::new(
            TaskPool::new(max_parallel),
            Arc::new(SimulatedSearchWorker),
            max_queries,
        )));
        tools.register(Arc::new(ReadFileTool::new(task_dir)));
        tools.register(Arc::new(WriteFileTool::new(task_dir)));
        tools.register(Arc::new(ListDirTool::new(task_dir)));
        tools
    })
}
