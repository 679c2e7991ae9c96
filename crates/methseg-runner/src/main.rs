#![doc = include_str!("../README.md")]

mod coordinator;

use clap::Parser;
use coordinator::config::{CliArgs, RunnerConfig};
use coordinator::job::Job;
use coordinator::report::{Failure, JobReport};
use coordinator::telemetry::{LogOptions, init_telemetry, record_job_duration};
use std::{process::ExitCode, time::Instant};
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Exit status for a configuration rejected after argument parsing.
const CONFIG_EXIT_CODE: u8 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = match RunnerConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return Ok(ExitCode::from(CONFIG_EXIT_CODE));
        }
    };

    let providers = init_telemetry(LogOptions {
        verbose: config.verbose,
        json: config.log_json,
    })?;
    log_startup_info(&config);

    let shutdown = CancellationToken::new();
    install_shutdown_handler(shutdown.clone())?;

    let start = Instant::now();
    let summary_path = config.summary_path.clone();
    let mut report = JobReport::new(config.job.clone(), config.failure_policy, config.dry_run);
    let result = Job::new(config, shutdown).run(&mut report).await;

    report.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    record_job_duration(report.elapsed_ms as f64);

    let code = match &result {
        Ok(()) => {
            tracing::info!(elapsed_ms = report.elapsed_ms, "Job finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(stage = %e.stage(), "Job failed: {e}");
            report.failure = Some(Failure::from(e));
            ExitCode::from(e.exit_code())
        }
    };

    if let Some(path) = summary_path {
        match report.write(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Wrote job summary"),
            Err(e) => tracing::error!("{e:#}"),
        }
    }

    providers.shutdown();
    Ok(code)
}

fn log_startup_info(config: &RunnerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting segmentation job with full config: {:#?}", config);
    } else {
        tracing::info!(
            input = %config.job.input().display(),
            chromosome = config.job.chromosome(),
            workers = config.job.workers(),
            "Starting segmentation job"
        );
    }
}

/// Cancels `shutdown` on the first SIGINT or SIGTERM.
///
/// On unix both handlers are registered before this returns, so a signal
/// arriving right after startup is not lost.
fn install_shutdown_handler(shutdown: CancellationToken) -> std::io::Result<()> {
    #[cfg(unix)]
    let (mut sigint, mut sigterm) = {
        use signal::unix::{SignalKind, signal};
        (
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        )
    };

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = sigint.recv() => {
                    tracing::info!("Received Ctrl+C signal");
                },
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                },
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl+C: {e}");
                return;
            }
        }

        tracing::warn!("Shutdown signal received, terminating workers...");
        shutdown.cancel();
    });

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use core::time::Duration;

    async fn cancelled_by(signal: libc::c_int) -> bool {
        let shutdown = CancellationToken::new();
        install_shutdown_handler(shutdown.clone()).unwrap();

        // SAFETY: `raise` has no memory-safety preconditions, and a handler
        // for `signal` is registered above so the process is not terminated.
        assert_eq!(unsafe { libc::raise(signal) }, 0);

        tokio::time::timeout(Duration::from_secs(5), shutdown.cancelled())
            .await
            .is_ok()
    }

    #[tokio::test]
    async fn sigterm_cancels_the_job() {
        assert!(cancelled_by(libc::SIGTERM).await);
    }

    #[tokio::test]
    async fn sigint_cancels_the_job() {
        assert!(cancelled_by(libc::SIGINT).await);
    }
}
