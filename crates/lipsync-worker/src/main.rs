//! Lip-sync worker binary.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use lipsync_media::ProgressReporter;
use lipsync_worker::{Cli, JobLogger, LipSyncProcessor, WorkerConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    let cli = Cli::parse();
    let config = cli
        .apply_overrides(WorkerConfig::from_env())
        .context("invalid worker configuration")?;
    info!("Worker config: {:?}", config);

    let job = cli.to_job(&config).context("invalid job options")?;

    let logger = JobLogger::new(&job.id, "lipsync");
    let progress = ProgressReporter::new(move |update| logger.log_progress(&update));

    let outcome = LipSyncProcessor::new(config).process(&job, progress).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`. Logs go to stderr.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("lipsync=info".parse()?)
        .add_directive("ort=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}
