//! Command-line entry point for the ipasign HTTP server.

use clap::Parser;
use ipasign::engine::{EngineConfig, SigningEngine};
use ipasign::job::{JobRunner, JobStore, RunnerConfig};
use ipasign_server::{router, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// iOS IPA re-signing service
#[derive(Parser)]
#[command(name = "ipasign-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "IPASIGN_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Directory for uploads, scratch trees and signed output
    #[arg(long, env = "IPASIGN_DATA_DIR", default_value = "uploads")]
    data_dir: PathBuf,

    /// Public base URL used in install links and manifests
    #[arg(long, env = "BASE_URL")]
    base_url: Option<String>,

    /// Maximum request body size in MiB
    #[arg(long, default_value = "500")]
    max_upload_mb: usize,

    /// Default ZIP compression level for signed archives (0-9)
    #[arg(short = 'z', long, default_value = "6")]
    zip_level: u32,

    /// Fail jobs that run longer than this many seconds
    #[arg(long)]
    job_timeout_secs: Option<u64>,

    /// Remove extracted bundles after a successful job
    #[arg(long)]
    clean_scratch: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let base_url = cli
        .base_url
        .unwrap_or_else(|| format!("http://localhost:{}", cli.bind.port()));

    let engine_config = EngineConfig::new()
        .work_root(&cli.data_dir)
        .public_base_url(base_url.clone())
        .compression_level(cli.zip_level)
        .keep_scratch(!cli.clean_scratch);

    let mut runner_config = RunnerConfig::new();
    if let Some(secs) = cli.job_timeout_secs {
        runner_config = runner_config.job_timeout(Duration::from_secs(secs));
    }

    tokio::fs::create_dir_all(cli.data_dir.join("jobs")).await?;

    let runner = JobRunner::new(SigningEngine::new(engine_config), JobStore::new())
        .with_config(runner_config);
    let app = router(AppState::new(runner), upload_limit_bytes(cli.max_upload_mb));

    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    info!(
        bind = %cli.bind,
        %base_url,
        data_dir = %cli.data_dir.display(),
        "ipasign server listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

/// `--max-upload-mb` in bytes, saturating instead of overflowing.
fn upload_limit_bytes(megabytes: usize) -> usize {
    megabytes.saturating_mul(1024 * 1024)
}
