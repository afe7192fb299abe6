//! Bounded pool of CPU workers for bulk SHA-256.
//!
//! The pool is built once per process by the caller, handed to the
//! orchestrator and torn down with [`HashWorkerPool::terminate`]. Each job
//! gets its own oneshot completion handle, so results cannot cross between
//! callers; the id only names the job in logs and in
//! [`PoolError::Abandoned`].

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::read::GzDecoder;
use rayon::prelude::*;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::config::ScannerConfig;
use crate::error::{ScanError, ScanErrorKind};
use crate::hashing::Hash32;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool terminated")]
    Terminated,
    #[error("failed to start hash workers")]
    Build(#[source] rayon::ThreadPoolBuildError),
    #[error("gzip payload could not be inflated")]
    Decode(#[source] std::io::Error),
    #[error("job {id} lost its worker before completing")]
    Abandoned { id: u64 },
}

impl From<PoolError> for ScanError {
    fn from(err: PoolError) -> Self {
        let kind = match err {
            PoolError::Decode(_) => ScanErrorKind::ParsingError,
            _ => ScanErrorKind::UnspecifiedError,
        };
        ScanError::new(kind, "hash worker pool").with_cause(err)
    }
}

/// Work accepted by the pool.
#[derive(Clone, Debug)]
pub enum HashJob {
    Sha256(Vec<u8>),
    /// Inflate a gzip stream, then hash the inflated bytes.
    Sha256Gzip(Vec<u8>),
    /// One digest per buffer, in input order.
    Sha256Batch(Vec<Vec<u8>>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HashOutput {
    Single(Hash32),
    Batch(Vec<Hash32>),
}

impl HashJob {
    fn run(self) -> Result<HashOutput, PoolError> {
        match self {
            HashJob::Sha256(bytes) => Ok(HashOutput::Single(Hash32::sha256(&bytes))),
            HashJob::Sha256Gzip(bytes) => {
                let inflated = gunzip(&bytes).map_err(PoolError::Decode)?;
                Ok(HashOutput::Single(Hash32::sha256(&inflated)))
            }
            HashJob::Sha256Batch(buffers) => Ok(HashOutput::Batch(
                buffers.par_iter().map(|b| Hash32::sha256(b)).collect(),
            )),
        }
    }
}

/// Inflates a complete gzip stream.
pub fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut inflated = Vec::with_capacity(bytes.len().saturating_mul(4));
    decoder.read_to_end(&mut inflated)?;
    Ok(inflated)
}

#[derive(Debug)]
pub struct HashWorkerPool {
    workers: Mutex<Option<Arc<rayon::ThreadPool>>>,
    next_id: AtomicU64,
    size: usize,
}

impl HashWorkerPool {
    /// Pool sized by [`ScannerConfig::hash_worker_count`].
    pub fn new(config: &ScannerConfig) -> Result<Self, PoolError> {
        Self::with_workers(config.hash_worker_count())
    }

    pub fn with_workers(size: usize) -> Result<Self, PoolError> {
        let size = size.max(1);
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("hash-worker-{i}"))
            .build()
            .map_err(PoolError::Build)?;
        debug!(workers = size, "hash worker pool started");
        Ok(Self {
            workers: Mutex::new(Some(Arc::new(workers))),
            next_id: AtomicU64::new(1),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_terminated(&self) -> bool {
        self.handle().is_none()
    }

    /// Stops accepting work. Jobs already queued still complete. Safe to
    /// call more than once.
    pub fn terminate(&self) {
        let taken = match self.workers.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if taken.is_some() {
            debug!(workers = self.size, "hash worker pool terminated");
        }
    }

    fn handle(&self) -> Option<Arc<rayon::ThreadPool>> {
        match self.workers.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn submit(&self, job: HashJob) -> Result<HashOutput, PoolError> {
        let workers = self.handle().ok_or(PoolError::Terminated)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        workers.spawn(move || {
            let result = job.run();
            // The caller may have gone away; nothing to do then.
            let _ = tx.send(result);
        });
        drop(workers);

        let result = rx.await.map_err(|_| PoolError::Abandoned { id })?;
        trace!(job = id, ok = result.is_ok(), "hash job completed");
        result
    }

    pub async fn digest(&self, bytes: Vec<u8>) -> Result<Hash32, PoolError> {
        single(self.submit(HashJob::Sha256(bytes)).await?)
    }

    pub async fn digest_gzip(&self, bytes: Vec<u8>) -> Result<Hash32, PoolError> {
        single(self.submit(HashJob::Sha256Gzip(bytes)).await?)
    }

    pub async fn digest_batch(&self, buffers: Vec<Vec<u8>>) -> Result<Vec<Hash32>, PoolError> {
        match self.submit(HashJob::Sha256Batch(buffers)).await? {
            HashOutput::Batch(digests) => Ok(digests),
            HashOutput::Single(digest) => Ok(vec![digest]),
        }
    }
}

impl Drop for HashWorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn single(output: HashOutput) -> Result<Hash32, PoolError> {
    match output {
        HashOutput::Single(digest) => Ok(digest),
        HashOutput::Batch(mut digests) => digests.pop().ok_or(PoolError::Abandoned { id: 0 }),
    }
}
