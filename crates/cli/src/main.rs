//! `flowrun` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — validate a workflow JSON file and print the report.
//! - `run`      — validate and execute a workflow JSON file with the
//!                built-in executors (logging collaborators), printing the
//!                final execution record as JSON.

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use tracing::info;

use engine::{EngineConfig, Workflow, WorkflowEngine};
use steps::Context;

#[derive(Parser)]
#[command(
    name = "flowrun",
    about = "In-process workflow definition and execution engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: std::path::PathBuf,
    },
    /// Validate and execute a workflow definition JSON file.
    Run {
        /// Path to the workflow JSON file.
        path: std::path::PathBuf,
        /// Initial execution context as a JSON object.
        #[arg(long, default_value = "{}")]
        context: String,
        /// Recorded as the execution's `triggered_by`.
        #[arg(long, default_value = "cli")]
        triggered_by: String,
    },
}

fn load_workflow(path: &std::path::Path) -> anyhow::Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).context("invalid workflow JSON")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let workflow = load_workflow(&path)?;
            let report = workflow.validate();

            if report.is_valid {
                println!("workflow '{}' is valid ({} steps)", workflow.name, workflow.steps.len());
            } else {
                for error in &report.errors {
                    eprintln!("error: {error}");
                }
                std::process::exit(1);
            }
        }

        Command::Run {
            path,
            context,
            triggered_by,
        } => {
            let mut workflow = load_workflow(&path)?;

            let initial: serde_json::Value =
                serde_json::from_str(&context).context("invalid --context JSON")?;
            let Some(initial): Option<Context> = initial.as_object().cloned() else {
                bail!("--context must be a JSON object");
            };

            info!(workflow = %workflow.name, "executing workflow");
            let engine = WorkflowEngine::new(EngineConfig::default());
            let execution = engine
                .execute_workflow(&mut workflow, initial, &triggered_by)
                .await?;

            println!("{}", serde_json::to_string_pretty(&execution)?);
            if execution.status != engine::ExecutionStatus::Completed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
