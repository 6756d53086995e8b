use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use medcascade::config::Settings;
use medcascade::display;
use medcascade::gguf::{is_gguf_file, GGUFReader};
use medcascade::inference::{CascadeEngine, Catalog, ModelRegistry};
use medcascade::logging;
use medcascade::server::ApiServer;

/// Two-stage medical image classifier
#[derive(Parser, Debug)]
#[command(name = "medcascade")]
#[command(about = "Routes a medical image to its clinical domain, then classifies it within that domain")]
#[command(version)]
struct Cli {
    /// Directory holding default.toml and an optional local.toml [default: ./config]
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every model and serve the HTTP API (default)
    Serve,
    /// Classify a single image file
    Classify {
        /// Image to classify
        image: PathBuf,
    },
    /// Load every model and list it
    Models,
    /// Show the metadata and tensors of a model artifact without loading it
    Inspect {
        /// Artifact to read
        artifact: PathBuf,
    },
}

/// Main entry point for medcascade
///
/// Loads settings, installs logging, then runs the requested command.
/// Without a subcommand the HTTP server is started.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config_dir {
        Some(dir) => Settings::from_dir(dir),
        None => Settings::new(),
    }
    .context("failed to load configuration")?;

    // Held until exit so buffered log lines are flushed
    let _guard = logging::init(&settings.logging)?;

    info!("medcascade v{} starting up", env!("CARGO_PKG_VERSION"));
    info!("Settings loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&settings).await,
        Command::Classify { image } => classify(&settings, &image),
        Command::Models => {
            let engine = build_engine(&settings)?;
            display::print_models(engine.models());
            Ok(())
        }
        Command::Inspect { artifact } => {
            if !is_gguf_file(&artifact) {
                anyhow::bail!("{} is not a GGUF artifact", artifact.display());
            }
            let reader = GGUFReader::new(&artifact)
                .with_context(|| format!("failed to read {}", artifact.display()))?;
            display::print_artifact(&reader);
            Ok(())
        }
    }
}

/// Loads the registry from the configured directory and wraps it in an engine
fn build_engine(settings: &Settings) -> Result<CascadeEngine> {
    let models_dir = &settings.models.directory;
    info!("Models directory: {}", models_dir.display());

    let registry = ModelRegistry::load(models_dir, Catalog::standard(), &settings.models.naming())
        .context("failed to load models")?;
    Ok(CascadeEngine::new(registry, settings.preprocessing.preprocessor()))
}

async fn serve(settings: &Settings) -> Result<()> {
    let engine = Arc::new(build_engine(settings)?);

    let server = ApiServer::new(
        engine,
        settings.server.host.clone(),
        settings.server.port,
        settings.server.max_upload_bytes,
    );
    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("server error: {}", e))
}

fn classify(settings: &Settings, image: &Path) -> Result<()> {
    let bytes = std::fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;
    let engine = build_engine(settings)?;

    let result = engine
        .classify(&bytes)
        .with_context(|| format!("failed to classify {}", image.display()))?;
    display::print_classification(&image.display().to_string(), &result);
    Ok(())
}
