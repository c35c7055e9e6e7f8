//! `workflow-graph` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — validate a workflow JSON file.
//! - `run`      — execute a workflow JSON file with the built-in handlers.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use engine::{
    validate_workflow, EngineConfig, ExecuteOptions, ExecutionEngine, ExecutionStatus,
    WorkflowDefinition,
};
use nodes::HandlerRegistry;

#[derive(Parser)]
#[command(
    name = "workflow-graph",
    about = "Build, validate and run workflow graphs",
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
        path: PathBuf,
    },
    /// Execute a workflow and print its final state.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Input data as a JSON document.
        #[arg(long, default_value = "{}")]
        input: String,
        /// Per-node time limit in milliseconds.
        #[arg(long, env = "WORKFLOW_NODE_TIMEOUT_MS")]
        node_timeout_ms: Option<u64>,
        /// Whole-run time limit in milliseconds.
        #[arg(long, env = "WORKFLOW_RUN_TIMEOUT_MS")]
        run_timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let workflow = load(&path)?;
            let report = validate_workflow(&workflow);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.is_valid {
                info!(workflow_id = %workflow.id, "workflow is valid");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("validation failed: {}", report.summary());
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Run {
            path,
            input,
            node_timeout_ms,
            run_timeout_ms,
        } => {
            let workflow = load(&path)?;
            let input: serde_json::Value =
                serde_json::from_str(&input).context("--input is not valid JSON")?;

            let engine = ExecutionEngine::new(HandlerRegistry::with_builtins(), EngineConfig::default());
            let options = ExecuteOptions {
                node_timeout: node_timeout_ms.map(Duration::from_millis),
                run_timeout: run_timeout_ms.map(Duration::from_millis),
                skip_validation: false,
            };

            let response = engine.execute_workflow(&workflow, input, options);
            if let Some(error) = &response.error {
                eprintln!("execution rejected: {error}");
            }
            let state = engine
                .wait_for_completion(response.execution_id)
                .await
                .context("execution disappeared before completing")?;

            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(if state.status == ExecutionStatus::Completed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn load(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}
