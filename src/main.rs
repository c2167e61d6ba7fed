mod builtins;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_capability::{Capability, CapabilityRegistry, InMemoryRegistry};
use weft_config::WorkflowDef;
use weft_engine::{ChannelNotifier, Engine, EngineConfig, EngineEvent, EngineSettings};
use weft_store::{InMemoryStore, SqliteStore, Store};

use crate::builtins::StdinTrigger;

/// Weft - A DAG workflow engine driven by capabilities
#[derive(Parser)]
#[command(name = "weft")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.weft)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow until interrupted or stdin is exhausted
  Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
  /// Path to the workflow file (JSON)
  workflow_file: PathBuf,

  /// Path to an engine settings file (JSON)
  #[arg(long)]
  settings: Option<PathBuf>,

  /// Keep executions in memory instead of the data directory database
  #[arg(long)]
  in_memory: bool,

  /// Workflow id (default: the workflow file name)
  #[arg(long)]
  workflow_id: Option<String>,

  #[arg(long, default_value = "")]
  owner: String,

  /// Workflow name (default: the workflow id)
  #[arg(long)]
  name: Option<String>,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".weft"),
  };

  match cli.command {
    Some(Commands::Run(args)) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_workflow(args, data_dir))?;
    }
    None => {
      println!("weft - use --help to see available commands");
    }
  }

  Ok(())
}

async fn run_workflow(args: RunArgs, data_dir: PathBuf) -> Result<()> {
  let content = tokio::fs::read_to_string(&args.workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", args.workflow_file.display()))?;
  let definition = WorkflowDef::from_json(&content)
    .with_context(|| format!("failed to parse workflow file: {}", args.workflow_file.display()))?;

  let settings = match &args.settings {
    Some(path) => {
      let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read settings file: {}", path.display()))?;
      EngineSettings::from_json(&content)
        .with_context(|| format!("failed to parse settings file: {}", path.display()))?
    }
    None => EngineSettings::default(),
  };

  let workflow_id = args.workflow_id.unwrap_or_else(|| {
    args
      .workflow_file
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "workflow".to_string())
  });
  let name = args.name.unwrap_or_else(|| workflow_id.clone());

  let store = open_store(args.in_memory, &data_dir).await?;

  let trigger = Arc::new(StdinTrigger::new());
  let eof = trigger.eof();
  let registry = Arc::new(InMemoryRegistry::new());
  for capability in [
    Capability::Trigger(trigger.clone()),
    builtins::echo(),
    builtins::log(),
  ] {
    registry
      .add(capability)
      .await
      .context("failed to register built-in capability")?;
  }

  let (notifier, mut events) = ChannelNotifier::channel();
  let config = EngineConfig::new(&workflow_id, definition, registry, store.clone())
    .with_owner(args.owner)
    .with_name(name)
    .with_settings(settings)
    .with_notifier(Arc::new(notifier));
  let engine = Engine::new(config).context("invalid workflow")?;
  engine.start().context("failed to start engine")?;
  info!(workflow_id = %workflow_id, "workflow loaded, reading events from stdin");

  let mut outstanding = Outstanding::default();
  let outcome = loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        info!("interrupted");
        break Ok(());
      }
      _ = eof.cancelled(), if outstanding.is_idle(trigger.emitted()) => {
        info!("input exhausted");
        break Ok(());
      }
      event = events.recv() => {
        let Some(event) = event else { break Ok(()) };
        outstanding.observe(&event);
        match event {
          EngineEvent::Initialized { success: false, .. } => {
            break Err(anyhow::anyhow!("workflow initialization failed"));
          }
          EngineEvent::ExecutionFinished { execution_id, .. } => {
            print_execution(store.as_ref(), &execution_id).await?;
          }
          _ => {}
        }
      }
    }
  };

  engine.close().await.context("failed to close engine")?;
  outcome
}

/// Executions started by this run and not finished yet.
///
/// Executions resumed from a previous run finish without having started
/// here, so they are tracked by id rather than counted.
#[derive(Debug, Default)]
struct Outstanding {
  started: usize,
  running: HashSet<String>,
}

impl Outstanding {
  fn observe(&mut self, event: &EngineEvent) {
    match event {
      EngineEvent::ExecutionStarted { execution_id, .. } => {
        self.started += 1;
        self.running.insert(execution_id.clone());
      }
      EngineEvent::ExecutionFinished { execution_id, .. } => {
        self.running.remove(execution_id);
      }
      _ => {}
    }
  }

  /// Whether every event emitted so far started an execution that finished.
  fn is_idle(&self, emitted: usize) -> bool {
    self.running.is_empty() && self.started >= emitted
  }
}

async fn open_store(in_memory: bool, data_dir: &Path) -> Result<Arc<dyn Store>> {
  if in_memory {
    return Ok(Arc::new(InMemoryStore::new()));
  }

  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  let options = SqliteConnectOptions::new()
    .filename(data_dir.join("weft.db"))
    .create_if_missing(true)
    .journal_mode(SqliteJournalMode::Wal);
  let pool = SqlitePoolOptions::new()
    .connect_with(options)
    .await
    .context("failed to open execution database")?;

  let store = SqliteStore::new(pool);
  store.migrate().await.context("failed to migrate execution database")?;
  Ok(Arc::new(store))
}

async fn print_execution(store: &dyn Store, execution_id: &str) -> Result<()> {
  match store.get(execution_id).await {
    Ok(execution) => println!("{}", serde_json::to_string(&execution)?),
    Err(e) => warn!(execution_id = %execution_id, error = %e, "finished execution not found"),
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use weft_store::ExecutionStatus;

  fn started(id: &str) -> EngineEvent {
    EngineEvent::ExecutionStarted {
      workflow_id: "wf".to_string(),
      execution_id: id.to_string(),
    }
  }

  fn finished(id: &str) -> EngineEvent {
    EngineEvent::ExecutionFinished {
      workflow_id: "wf".to_string(),
      execution_id: id.to_string(),
      status: ExecutionStatus::Completed,
    }
  }

  #[test]
  fn test_resumed_execution_does_not_hide_running_one() {
    let mut outstanding = Outstanding::default();
    outstanding.observe(&started("new"));

    // finished without having started in this run
    outstanding.observe(&finished("resumed"));
    assert!(!outstanding.is_idle(1));

    outstanding.observe(&finished("new"));
    assert!(outstanding.is_idle(1));
  }

  #[test]
  fn test_waits_for_emitted_events_to_start() {
    let mut outstanding = Outstanding::default();
    assert!(outstanding.is_idle(0));
    assert!(!outstanding.is_idle(1));

    outstanding.observe(&started("a"));
    outstanding.observe(&finished("a"));
    assert!(outstanding.is_idle(1));
    assert!(!outstanding.is_idle(2));
  }
}
