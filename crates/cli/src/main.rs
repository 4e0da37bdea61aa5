use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zkflow_engine::{EngineConfig, Orchestrator};
use zkflow_types::{PlanFormat, ProgressEvent};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => EngineConfig::load_from(Path::new(path)),
        None => EngineConfig::load(),
    };
    let orchestrator = Orchestrator::from_config(&config)?;

    match matches.subcommand() {
        Some(("submit", sub)) => submit(&orchestrator, sub).await,
        Some(("run", sub)) => {
            let id = required(sub, "id")?;
            run(&orchestrator, id).await
        }
        Some(("status", sub)) => {
            let report = orchestrator.status(required(sub, "id")?).await?;
            print_json(&report)
        }
        Some(("show", sub)) => {
            let workflow = orchestrator.get(required(sub, "id")?).await?;
            print_json(&workflow)
        }
        Some(("list", _)) => print_json(&orchestrator.list().await?),
        Some(("recover", _)) => {
            let recovered = orchestrator.recover_interrupted().await?;
            print_json(&serde_json::json!({ "recovered": recovered }))
        }
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .with_writer(std::io::stderr)
        .try_init();
}

/// `RUST_LOG` when set and parsable, `info` otherwise.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn build_cli() -> Command {
    let id_arg = || Arg::new("id").required(true).help("Workflow id");
    Command::new("zkflow")
        .about("Run zero-knowledge proof, payment and device workflows")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .action(ArgAction::Set)
                .help("Path to the engine configuration file"),
        )
        .subcommand(
            Command::new("submit")
                .about("Validate a plan file and create a workflow; runs it unless --no-run is given")
                .arg(Arg::new("plan").required(true).help("Path to a YAML or JSON plan"))
                .arg(
                    Arg::new("format")
                        .long("format")
                        .value_parser(["yaml", "json"])
                        .help("Plan format; detected from the file extension by default"),
                )
                .arg(
                    Arg::new("no-run")
                        .long("no-run")
                        .action(ArgAction::SetTrue)
                        .help("Only create the workflow"),
                ),
        )
        .subcommand(Command::new("run").about("Execute a created workflow").arg(id_arg()))
        .subcommand(Command::new("status").about("Show per-step progress of a workflow").arg(id_arg()))
        .subcommand(Command::new("show").about("Print the full workflow record").arg(id_arg()))
        .subcommand(Command::new("list").about("List stored workflows, oldest first"))
        .subcommand(Command::new("recover").about("Mark workflows left running by a stopped engine as failed"))
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing <{name}>"))
}

async fn submit(orchestrator: &Orchestrator, matches: &ArgMatches) -> Result<()> {
    let path = PathBuf::from(required(matches, "plan")?);
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("read plan {}", path.display()))?;
    let format = match matches.get_one::<String>("format").map(String::as_str) {
        Some("yaml") => Some(PlanFormat::Yaml),
        Some("json") => Some(PlanFormat::Json),
        _ => PlanFormat::from_path(&path),
    };

    let workflow = orchestrator.submit_text(&content, format).await?;
    if matches.get_flag("no-run") {
        return print_json(&workflow.summary());
    }
    run(orchestrator, &workflow.id).await
}

async fn run(orchestrator: &Orchestrator, workflow_id: &str) -> Result<()> {
    let mut events = orchestrator.subscribe();
    let watched = workflow_id.to_string();
    let progress = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.workflow_id() == watched => {
                    let done = matches!(event, ProgressEvent::WorkflowCompleted { .. });
                    log_progress(&event);
                    if done {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "progress output fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcome = orchestrator.execute(workflow_id).await;
    if outcome.is_err() {
        progress.abort();
    } else {
        let _ = progress.await;
    }
    print_json(&outcome?)
}

fn log_progress(event: &ProgressEvent) {
    match event {
        ProgressEvent::WorkflowStarted { workflow_id, steps, .. } => info!(%workflow_id, steps = steps.len(), "started"),
        ProgressEvent::StepStarted { index, kind, description, .. } => info!(step = index, %kind, %description, "running"),
        ProgressEvent::StepUpdated { index, state, result, .. } => match &result.error {
            Some(error) => warn!(step = index, ?state, %error, "step did not succeed"),
            None => info!(step = index, ?state, "step finished"),
        },
        ProgressEvent::WorkflowCompleted { status, error, .. } => match error {
            Some(error) => warn!(%status, %error, "workflow finished"),
            None => info!(%status, "workflow finished"),
        },
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
