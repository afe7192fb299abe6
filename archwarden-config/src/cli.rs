//! Command line surface of `archwarden-scan`.

use std::path::PathBuf;

use archwarden_core::{ScanRequest, ScannerConfig};
use clap::Parser;
use url::Url;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "archwarden-scan",
    version,
    about = "Verify the hash chain and file contents of a history archive"
)]
pub struct ScanArgs {
    /// Base URL of the archive (the directory holding `.well-known/`).
    #[arg(long, env = "ARCHWARDEN_ARCHIVE_URL", value_parser = parse_archive_url)]
    pub url: Url,

    /// First ledger to verify.
    #[arg(long, env = "ARCHWARDEN_FROM_LEDGER", default_value_t = 1)]
    pub from_ledger: u32,

    /// Last ledger to verify. Defaults to the archive's current ledger.
    #[arg(long, env = "ARCHWARDEN_TO_LEDGER")]
    pub to_ledger: Option<u32>,

    /// Ranges scanned in parallel.
    #[arg(long, env = "ARCHWARDEN_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Hash worker threads.
    #[arg(long, env = "ARCHWARDEN_HASH_WORKERS")]
    pub hash_workers: Option<usize>,

    #[arg(long, env = "ARCHWARDEN_CHECKPOINT_FREQUENCY")]
    pub checkpoint_frequency: Option<u32>,

    #[arg(long, env = "ARCHWARDEN_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Skip downloading and hashing bucket files.
    #[arg(long, env = "ARCHWARDEN_SKIP_BUCKETS", default_value_t = false)]
    pub skip_buckets: bool,

    /// Scanner config file (TOML or JSON). Takes precedence over
    /// `ARCHWARDEN_CONFIG_PATH`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Env file to load before reading the environment.
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Print the report as a single JSON line instead of pretty JSON.
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

fn parse_archive_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|err| format!("invalid archive url: {err}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported archive url scheme {other}")),
    }
}

impl ScanArgs {
    /// Overlays the flags that were given onto a loaded config.
    pub fn apply(&self, config: &mut ScannerConfig) {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(workers) = self.hash_workers {
            config.hash_workers = Some(workers);
        }
        if let Some(frequency) = self.checkpoint_frequency {
            config.checkpoint_frequency = frequency;
        }
        if let Some(timeout) = self.request_timeout_ms {
            config.request_timeout_ms = timeout;
        }
        if self.skip_buckets {
            config.verify_buckets = false;
        }
    }

    pub fn request(&self) -> ScanRequest {
        let mut request = ScanRequest::new(self.url.as_str()).from_ledger(self.from_ledger);
        if let Some(to) = self.to_ledger {
            request = request.to_ledger(to);
        }
        if let Some(concurrency) = self.concurrency {
            request = request.concurrency(concurrency);
        }
        request
    }
}
