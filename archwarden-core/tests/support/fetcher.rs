//! In-memory [`ArchiveFetcher`] serving a [`SyntheticArchive`].

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use archwarden_core::fetch::{ArchiveFetcher, FetchError};
use async_trait::async_trait;
use url::Url;

use super::SyntheticArchive;

#[derive(Debug, Default)]
pub struct MemoryFetcher {
    files: HashMap<String, Vec<u8>>,
    delay: Option<Duration>,
    timeouts: HashSet<String>,
    hits: Mutex<HashMap<String, usize>>,
}

impl MemoryFetcher {
    pub fn new(archive: &SyntheticArchive) -> Self {
        Self {
            files: archive.files.clone(),
            ..Self::default()
        }
    }

    /// Every request sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request for `url` times out.
    pub fn with_timeout(mut self, url: impl Into<String>) -> Self {
        self.timeouts.insert(url.into());
        self
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits
            .lock()
            .expect("hits lock")
            .get(url)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArchiveFetcher for MemoryFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        *self
            .hits
            .lock()
            .expect("hits lock")
            .entry(url.to_string())
            .or_default() += 1;
        if self.timeouts.contains(url.as_str()) {
            return Err(FetchError::Timeout);
        }
        self.files
            .get(url.as_str())
            .cloned()
            .ok_or(FetchError::NotFound)
    }
}
