use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use stepflow_rs::adk::agent::UnconfiguredAgentExecutor;
use stepflow_rs::stepflow::actions;
use stepflow_rs::stepflow::config::EngineConfig;
use stepflow_rs::stepflow::server;
use stepflow_rs::stepflow::workflow::builder::{Engine, RunControl};
use stepflow_rs::stepflow::workflow::loader::WorkflowLoader;
use stepflow_rs::stepflow::workflow::persistence::FilePersistence;
use stepflow_rs::stepflow::workflow::registry::ActionRegistry;
use stepflow_rs::stepflow::workflow::types::WorkflowDefinition;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a workflow file without running it
    Validate {
        /// Path to the workflow file (.json, .yaml)
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Run a workflow from a file
    Run {
        /// Path to the workflow file (.json, .yaml)
        #[arg(short, long)]
        file: PathBuf,

        /// Input to the workflow; parsed as JSON, otherwise passed as a string
        #[arg(short, long, default_value = "{}")]
        input: String,

        #[command(flatten)]
        overrides: Overrides,

        /// Print execution events to stderr as they happen
        #[arg(long)]
        events: bool,
    },
    /// Validate a workflow and write it back out in canonical form
    Export {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// Print the JSON schema of the workflow document format
    Schema,
    /// Serve the HTTP API
    Serve {
        #[arg(short, long, default_value_t = 3000)]
        port: u16,

        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

/// Command-line overrides for `STEPFLOW_*` settings
#[derive(clap::Args, Debug)]
struct Overrides {
    /// Default loop bound for loop nodes without `maxIterations`
    #[arg(long)]
    max_iterations: Option<u64>,

    /// Max nodes dispatched per round; 0 means unbounded
    #[arg(long)]
    max_parallelism: Option<usize>,

    /// Checkpoint run state under the data directory
    #[arg(long)]
    checkpoints: bool,

    /// Root for workflows/ and runs/
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, mut config: EngineConfig) -> anyhow::Result<EngineConfig> {
        if let Some(n) = self.max_iterations {
            if n == 0 {
                bail!("--max-iterations must be a positive integer");
            }
            config.max_iterations = n;
        }
        if let Some(n) = self.max_parallelism {
            config.max_parallelism = (n > 0).then_some(n);
        }
        if self.checkpoints {
            config.checkpoints = true;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        Ok(config)
    }
}

fn read_definition(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let definition = if path.extension().is_some_and(|ext| ext == "json") {
        WorkflowLoader::parse_json(&content)?
    } else {
        WorkflowLoader::parse_yaml(&content)?
    };
    Ok(definition)
}

async fn build_engine(config: EngineConfig) -> Engine {
    let registry = ActionRegistry::new();
    actions::register_builtin(&registry, &config).await;

    let persistence = Arc::new(FilePersistence::new(config.data_dir.clone()));
    log::info!("Using data directory {}", persistence.root().display());

    // Agents are supplied by embedders; the CLI runs action-only workflows
    Engine::new(config, Arc::new(UnconfiguredAgentExecutor), registry).with_persistence(persistence)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Validate { file } => {
            let definition = read_definition(&file)?;
            let engine = build_engine(EngineConfig::from_env()?).await;
            let report = engine.validate(&definition);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.valid {
                bail!("{} is not a valid workflow", file.display());
            }
        }
        Commands::Run {
            file,
            input,
            overrides,
            events,
        } => {
            let config = overrides.apply(EngineConfig::from_env()?)?;
            let engine = build_engine(config).await;
            let definition = read_definition(&file)?;
            let input: Value = serde_json::from_str(&input).unwrap_or(Value::String(input));

            let mut control = RunControl::default();
            let printer = if events {
                let (tx, mut rx) = mpsc::channel(100);
                control.events = Some(tx);
                Some(tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        match serde_json::to_string(&event) {
                            Ok(line) => eprintln!("{}", line),
                            Err(e) => log::warn!("Failed to encode event: {}", e),
                        }
                    }
                }))
            } else {
                None
            };

            let cancel = control.cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupted, cancelling run");
                    cancel.cancel();
                }
            });

            println!("Running workflow: {}", definition.name);
            let result = engine
                .execute_with_control(&definition, input, control)
                .await?;
            if let Some(printer) = printer {
                printer.await?;
            }

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                bail!(
                    "workflow failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Commands::Export { file, format } => {
            let loader = WorkflowLoader::new();
            let graph = loader.import(read_definition(&file)?)?;
            let out = match format {
                Format::Json => WorkflowLoader::export_json(&graph)?,
                Format::Yaml => WorkflowLoader::export_yaml(&graph)?,
            };
            println!("{}", out);
        }
        Commands::Schema => {
            let schema = schemars::schema_for!(WorkflowDefinition);
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Commands::Serve { port, overrides } => {
            let config = overrides.apply(EngineConfig::from_env()?)?;
            let engine = Arc::new(build_engine(config).await);
            server::serve(engine, port).await.map_err(|e| anyhow!(e))?;
        }
    }

    Ok(())
}
