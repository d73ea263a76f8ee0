//! Model Server - consumes model inputs from a stream broker and publishes predictions.

use std::path::PathBuf;

use clap::Parser;

use model_server::shutdown::shutdown_signal;
use model_server::{logging, Config, Orchestrator, PredictorRegistry};

#[derive(Debug, Parser)]
#[command(name = "model-server", version, about = "Run asynchronous model servers")]
struct Args {
    /// Path to the configuration file (default: ./config.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref()).map_err(|e| {
        format!(
            "Failed to load configuration: {}. \
             Make sure config.toml exists or set SERVE__OPTIONS__STREAM_BROKER.",
            e
        )
    })?;

    logging::init(&config.logging.level);
    tracing::info!("Using {} stream broker", config.options.stream_broker);

    let registry = PredictorRegistry::with_builtins();
    let mut orchestrator = Orchestrator::from_config(&config, &registry)?;
    if orchestrator.servers().is_empty() {
        tracing::warn!("No models configured, nothing to serve");
    }

    orchestrator.run(shutdown_signal()).await?;

    Ok(())
}
