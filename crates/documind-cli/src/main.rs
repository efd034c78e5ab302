mod display;

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use documind_agent::AgentPipeline;
use documind_ai::PredictionTool;
use documind_core::ConfigurationManager;
use documind_core::config::{CONFIG_FILE_PATH, PARAMS_FILE_PATH, SCHEMA_FILE_PATH};
use documind_pipeline::orchestrator::{build_stage, run_stage};
use documind_pipeline::{StageKind, TrainingPipeline};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "running_logs.log";

/// DocuMind: legal clause classification pipeline and audit agent.
#[derive(Parser, Debug)]
#[command(name = "documind", version, about)]
struct Cli {
    /// Pipeline configuration document
    #[arg(long, env = "DOCUMIND_CONFIG", default_value = CONFIG_FILE_PATH, global = true)]
    config: PathBuf,

    /// Training hyperparameters document
    #[arg(long, env = "DOCUMIND_PARAMS", default_value = PARAMS_FILE_PATH, global = true)]
    params: PathBuf,

    /// Column schema document
    #[arg(long, env = "DOCUMIND_SCHEMA", default_value = SCHEMA_FILE_PATH, global = true)]
    schema: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run ingestion, validation, transformation, training and evaluation
    Train,
    /// Run a single pipeline stage
    Stage {
        /// ingestion, validation, transformation, trainer or evaluation
        name: String,
    },
    /// Classify one clause with the trained model
    Predict {
        text: String,
    },
    /// Run the audit agent over one clause and print its answer
    Agent {
        text: String,
        /// Also print the classification and the tool calls made
        #[arg(long)]
        trail: bool,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let manager = ConfigurationManager::new(&cli.config, &cli.params, &cli.schema)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    match cli.command {
        Command::Train => {
            let mut pipeline = TrainingPipeline::from_manager(&manager)?;
            pipeline.run().await?;
            info!("training pipeline finished");
        }
        Command::Stage { name } => {
            let kind: StageKind = name.parse()?;
            let config = manager.resolve_all()?;
            let mut stage = build_stage(&config, kind);
            run_stage(stage.as_mut()).await?;
        }
        Command::Predict { text } => {
            let model_path = manager.prediction_config().model_path;
            let tool = PredictionTool::load(&model_path)?;
            let prediction = tool.predict(&text)?;
            display::print_prediction(&text, &prediction);
        }
        Command::Agent { text, trail } => {
            let agent = AgentPipeline::from_config(
                &manager.agent_config()?,
                &manager.prediction_config(),
            )?;
            if trail {
                let run = agent.run_detailed(&text).await?;
                display::print_agent_run(&run);
            } else {
                println!("{}", agent.run(&text).await);
            }
        }
        Command::Serve { host, port } => {
            let mut server = manager.server_config();
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = port {
                server.port = port;
            }
            let agent_config = manager.agent_config()?;
            let prediction_config = manager.prediction_config();
            documind_server::serve(&server, move || {
                Ok(AgentPipeline::from_config(&agent_config, &prediction_config)?)
            })
            .await?;
        }
    }
    Ok(())
}

/// Log to stderr and, without colour codes, to `logs/running_logs.log`.
fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());

    let log_path = Path::new(LOG_DIR).join(LOG_FILE);
    fs::create_dir_all(LOG_DIR).with_context(|| format!("creating {LOG_DIR}"))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .init();
    Ok(())
}
