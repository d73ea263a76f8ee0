//! Stream Tools - provision model topics, produce inputs and inspect outputs.

mod commands;

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};
use tokio::io::BufReader;
use uuid::Uuid;

use model_server::shutdown::shutdown_signal;
use model_server::{broker, logging, Config, PredictorRegistry};

const DEFAULT_INPUT_TOPIC: &str = "model_server.fashion-image-classifier.0.1.inputs";
const DEFAULT_OUTPUT_TOPIC: &str = "model_server.fashion-image-classifier.0.1.outputs";

#[derive(Debug, Parser)]
#[command(name = "stream-tools", version, about = "Maintenance tools for model-server topics")]
struct Args {
    /// Path to the configuration file (default: ./config.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or delete the topics of every configured model
    #[command(group(ArgGroup::new("action").required(true).args(["create", "delete"])))]
    Topics {
        #[arg(long)]
        create: bool,
        #[arg(long)]
        delete: bool,
    },
    /// Push JSON values read from stdin, one per line
    Push {
        #[arg(long, default_value = DEFAULT_INPUT_TOPIC)]
        topic: String,
    },
    /// Print every message on a topic until interrupted
    Pull {
        #[arg(long, default_value = DEFAULT_OUTPUT_TOPIC)]
        topic: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())
        .map_err(|e| format!("Failed to load configuration: {}", e))?;
    logging::init(&config.logging.level);

    match args.command {
        Command::Topics { create, delete } => {
            let topics = commands::model_topics(&config, &PredictorRegistry::with_builtins())?;
            let broker = broker::build(&config)?;
            if create {
                commands::print_report("created", &broker.create(&topics).await?);
            } else if delete {
                commands::print_report("deleted", &broker.delete(&topics).await?);
            }
        }
        Command::Push { topic } => {
            let mut broker = broker::build(&config)?;
            let stdin = BufReader::new(tokio::io::stdin());
            let pushed = commands::push_lines(broker.as_mut(), &topic, stdin).await?;
            tracing::info!(topic = %topic, "Pushed {} messages", pushed);
        }
        Command::Pull { topic } => {
            // A throwaway group keeps the serving group's offsets untouched.
            if let Some(kafka) = config.kafka.as_mut() {
                kafka.group_id = format!("stream-tools-{}", Uuid::new_v4());
            }
            let mut broker = broker::build(&config)?;
            let mut stdout = std::io::stdout();
            commands::pull_to(broker.as_mut(), &topic, &mut stdout, shutdown_signal()).await?;
        }
    }

    Ok(())
}
