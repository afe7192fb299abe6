//! Transport seam for archive files.
//!
//! The engine only needs "GET this URL, give me the body". Anything that can
//! do that implements [`ArchiveFetcher`]; the HTTP implementation lives here
//! together with a decorator that retries transient failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{trace, warn};
use url::Url;

use crate::config::{RetryConfig, ScannerConfig};
use crate::error::{ScanError, ScanErrorKind};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not found")]
    NotFound,
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("HTTP transport error")]
    Transport(#[source] reqwest::Error),
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connection(_) => true,
            FetchError::Status(status) => *status == 429 || (500..600).contains(status),
            FetchError::NotFound | FetchError::Transport(_) => false,
        }
    }

    pub fn kind(&self) -> ScanErrorKind {
        match self {
            FetchError::NotFound => ScanErrorKind::NotFound,
            FetchError::Timeout => ScanErrorKind::Timeout,
            FetchError::Connection(_) | FetchError::Transport(_) => {
                ScanErrorKind::ConnectionError
            }
            FetchError::Status(_) if self.is_transient() => ScanErrorKind::ConnectionError,
            FetchError::Status(_) => ScanErrorKind::UnspecifiedError,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            from_status(status)
        } else {
            FetchError::Transport(err)
        }
    }
}

impl From<FetchError> for ScanError {
    fn from(err: FetchError) -> Self {
        ScanError::new(err.kind(), "archive fetch failed").with_cause(err)
    }
}

fn from_status(status: StatusCode) -> FetchError {
    if status == StatusCode::NOT_FOUND {
        FetchError::NotFound
    } else {
        FetchError::Status(status.as_u16())
    }
}

#[async_trait]
pub trait ArchiveFetcher: Send + Sync + 'static {
    /// Full body of `url`.
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

#[async_trait]
impl<T: ArchiveFetcher + ?Sized> ArchiveFetcher for Arc<T> {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(url).await
    }
}

/// Plain HTTP(S) GET via `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpArchiveFetcher {
    client: reqwest::Client,
}

impl HttpArchiveFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("archwarden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Transport)?;
        Ok(Self { client })
    }

    pub fn from_config(config: &ScannerConfig) -> Result<Self, FetchError> {
        Self::new(config.request_timeout())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArchiveFetcher for HttpArchiveFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(from_status(status));
        }
        let body = response.bytes().await?;
        trace!(%url, bytes = body.len(), "fetched archive file");
        Ok(body.to_vec())
    }
}

/// Retries transient failures of the wrapped fetcher with exponential
/// backoff and jitter. Permanent failures are returned immediately.
#[derive(Debug, Clone)]
pub struct RetryingFetcher<F> {
    inner: F,
    retry: RetryConfig,
}

impl<F: ArchiveFetcher> RetryingFetcher<F> {
    pub fn new(inner: F, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    fn jittered_delay(&self, attempt: u16) -> Duration {
        let capped = self.retry.backoff_for(attempt).as_millis() as f64;
        if capped == 0.0 {
            return Duration::ZERO;
        }
        let upper_cap = self.retry.backoff_max_ms.max(1) as f64;
        let spread = (capped * f64::from(self.retry.jitter_ratio.max(0.0))).max(1.0);
        let lower = (capped - spread).max(1.0);
        let upper = (capped + spread).min(upper_cap).max(lower);
        let millis = rand::rng().random_range(lower..=upper).round() as u64;
        Duration::from_millis(millis)
    }
}

#[async_trait]
impl<F: ArchiveFetcher> ArchiveFetcher for RetryingFetcher<F> {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1u16;
        loop {
            match self.inner.fetch(url).await {
                Ok(body) => return Ok(body),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.jittered_delay(attempt);
                    warn!(
                        %url,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient fetch failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
