//! voxclass - speaker classification server with online retraining.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use voxclass_classifier::ModelType;
use voxclass_server::{parse_addr, ClassifierService, ServerConfig};

/// Default base configuration directory name.
const DEFAULT_BASE_DIR: &str = ".voxclass";
/// Default configuration filename.
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Speaker classification server with online retraining.
///
/// Configuration is read from --config, or ~/.voxclass/config.yaml when it
/// exists. Flags override the file.
#[derive(Parser, Debug)]
#[command(name = "voxclass")]
#[command(about = "Speaker classification server with online retraining")]
#[command(version)]
struct Cli {
    /// Config file (default is ~/.voxclass/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Sample store directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Model checkpoint directory
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Listen address (e.g. :8000 or 127.0.0.1:8000)
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Retrain a model from stored samples and save it
    Retrain {
        /// Model type ("Logistic Regression" or "Spectrogram CNN")
        #[arg(short, long)]
        model: String,
    },
    /// Print the accuracy of every model on its stored samples
    Accuracies,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut cfg = load_config(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        cfg.data_dir = dir;
    }
    if let Some(dir) = cli.model_dir {
        cfg.model_dir = dir;
    }

    match cli.command {
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                cfg.listen = listen;
            }
            serve(cfg).await
        }
        Commands::Retrain { model } => retrain(cfg, &model).await,
        Commands::Accuracies => accuracies(cfg).await,
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "voxclass=debug,tower_http=debug" } else { "voxclass=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<ServerConfig> {
    if let Some(path) = path {
        return ServerConfig::from_file(path);
    }
    let default = dirs::home_dir().map(|home| home.join(DEFAULT_BASE_DIR).join(DEFAULT_CONFIG_FILE));
    match default {
        Some(path) if path.exists() => ServerConfig::from_file(&path),
        _ => Ok(ServerConfig::default()),
    }
}

async fn serve(cfg: ServerConfig) -> Result<()> {
    let addr = parse_addr(&cfg.listen)?;
    let service = Arc::new(ClassifierService::from_config(&cfg)?);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    voxclass_server::serve(listener, service, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
        }
    })
    .await
}

async fn retrain(cfg: ServerConfig, model: &str) -> Result<()> {
    let model_type: ModelType = model.parse()?;
    let service = ClassifierService::from_config(&cfg)?;
    let accuracy = service.update_model(model).await?;
    service.save_model(model_type).await?;
    println!("{model_type}: resubstitution accuracy {accuracy}");
    Ok(())
}

async fn accuracies(cfg: ServerConfig) -> Result<()> {
    let service = ClassifierService::from_config(&cfg)?;
    let accuracies = service.get_accuracies().await?;
    println!("Logistic Regression: {}", accuracies.logistic_regression);
    println!("Spectrogram CNN:     {}", accuracies.spectrogram_cnn);
    Ok(())
}
