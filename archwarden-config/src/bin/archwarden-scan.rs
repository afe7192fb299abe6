use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use archwarden_config::{ConfigLoader, ConfigSource, ScanArgs, load_env_file, validate};
use archwarden_core::model::ScanStatus;
use archwarden_core::{HashWorkerPool, HttpArchiveFetcher, RetryingFetcher, ScanOrchestrator};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load `.env` before clap reads its env fallbacks.
    let dotenv_loaded = load_env_file(None)?;
    let args = ScanArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,archwarden_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path.clone());
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path.clone());
    }
    let load = loader.load().context("failed to load configuration")?;
    if dotenv_loaded || load.env_file_loaded {
        info!("loaded .env file");
    }
    match &load.source {
        ConfigSource::Default => info!("scanner config: defaults"),
        ConfigSource::Explicit(path) | ConfigSource::EnvPath(path) | ConfigSource::File(path) => {
            info!(path = %path.display(), "scanner config loaded from file")
        }
        ConfigSource::EnvInline => info!("scanner config loaded from inline environment json"),
    }

    let mut config = load.config;
    args.apply(&mut config);
    // Flags can reintroduce values the loader would have rejected.
    let warnings = validate(&config).context("configuration rejected")?;
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => warn!(message = %warning.message, hint = %hint, "configuration warning"),
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }
    info!(
        scanner.concurrency = config.concurrency,
        scanner.checkpoint_frequency = config.checkpoint_frequency,
        scanner.hash_workers = config.hash_worker_count(),
        scanner.request_timeout_ms = config.request_timeout_ms,
        scanner.max_attempts = config.retry.max_attempts,
        scanner.verify_buckets = config.verify_buckets,
        "scanner configuration in effect"
    );

    let http = HttpArchiveFetcher::from_config(&config).context("failed to build http client")?;
    let fetcher = Arc::new(RetryingFetcher::new(http, config.retry));
    let pool = Arc::new(HashWorkerPool::new(&config).context("failed to start hash workers")?);
    let orchestrator = ScanOrchestrator::new(config, fetcher, Arc::clone(&pool));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling scan");
            on_signal.cancel();
        }
    });

    let report = orchestrator.run(args.request(), cancel).await;
    pool.terminate();

    let rendered = if args.compact {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    }
    .context("failed to serialize scan report")?;
    println!("{rendered}");

    Ok(match report.status {
        ScanStatus::Completed if report.has_mismatch => ExitCode::FAILURE,
        ScanStatus::Completed => ExitCode::SUCCESS,
        ScanStatus::Cancelled => ExitCode::from(130),
        ScanStatus::Gapped => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    })
}
