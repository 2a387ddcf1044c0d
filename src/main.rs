//! Recurring MySQL backup daemon
//!
//! Dumps every user database, compresses each dump and uploads the archives
//! to S3-compatible storage, once at startup and then on a weekly day.

// dbbackupd/src/main.rs
mod utils;
mod backup;
mod config;
mod errors;
mod schedule;

use anyhow::{Context, Result};
use clap::Parser;
use config::AppConfig;
use schedule::{AttemptOutcome, IntervalTrigger, RunGate, Scheduler, SystemClock};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dbbackupd", version, about = "Scheduled MySQL backups to S3-compatible storage")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Run a single gated attempt and exit instead of staying resident
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run_app(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            error!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<ExitCode> {
    let app_config = AppConfig::load_from_json(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;
    info!(
        "Loaded configuration for {}:{} (working area {}, uploads to {})",
        app_config.database.host,
        app_config.database.port,
        app_config.working_dir.display(),
        app_config.spaces_config.bucket_name
    );

    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    let pipeline = backup::build_pipeline(&app_config, shutdown.clone())
        .await
        .context("Failed to set up the backup pipeline")?;
    let gate = RunGate::new(app_config.run_gate_file.clone());
    info!("Run gate marker: {}", gate.path().display());

    let mut scheduler = Scheduler::new(
        pipeline,
        gate,
        SystemClock,
        IntervalTrigger::new(app_config.schedule.interval),
        app_config.schedule.weekday,
        shutdown,
    );

    if cli.once {
        let outcome = scheduler.run_once().await;
        if let Some(AttemptOutcome::Aborted(e)) = &outcome {
            error!("❌ Single attempt aborted before any stage ran: {}", e);
        }
        let succeeded = outcome.as_ref().is_none_or(AttemptOutcome::is_success);
        return Ok(if succeeded {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    scheduler.run().await;
    Ok(ExitCode::SUCCESS)
}

fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("🛑 Shutdown requested; letting the current stage finish");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("⚠️ Cannot listen for SIGTERM ({}); only Ctrl-C stops the daemon", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
