use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use nvr_rs::frontend::Reactor;
use nvr_rs::pipeline::FfmpegCapabilities;
use nvr_rs::{NvrConfig, Orchestrator};

/// Network video recorder
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "/config/config.json")]
    config: PathBuf,

    /// ffmpeg executable
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// ffprobe executable
    #[arg(long, default_value = "ffprobe")]
    ffprobe: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = NvrConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(config = %args.config.display(), "Configuration loaded");

    let capabilities = FfmpegCapabilities::new()
        .ffmpeg(args.ffmpeg)
        .ffprobe(args.ffprobe);

    let database = nvr_rs::db::open(&config.database).context("opening database")?;

    let orchestrator = Orchestrator::builder(config)
        .front_end(Arc::new(Reactor::new()))
        .database(database.recordings())
        .capabilities(Arc::new(capabilities))
        .build();

    let reason = orchestrator.run_until_signal()?;
    tracing::info!(%reason, "Exiting");

    Ok(())
}
