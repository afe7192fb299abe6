//! # Archwarden Core
//!
//! Scanning and hash verification for ledger history archives.
//!
//! A history archive is a static file tree: per checkpoint a JSON state
//! manifest plus gzip'd, record-marked XDR files of ledger headers,
//! transaction sets and results, and the bucket files the manifest names.
//! This crate walks such an archive and recomputes every hash the ledger
//! headers commit to, without trusting the archive operator.
//!
//! ## Architecture
//!
//! - [`framing`]: incremental splitting of record-marked streams
//! - [`xdr`]: the little XDR needed to read history entries
//! - [`hashing`]: digests, transaction set hash policies and the verifier
//! - [`pool`]: the bounded CPU pool bulk hashing runs on
//! - [`manifest`]: History Archive State parsing
//! - [`fetch`]: the transport seam plus an HTTP implementation
//! - [`scan`]: per-checkpoint verification and the range orchestrator
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use archwarden_core::{
//!     HashWorkerPool, HttpArchiveFetcher, RetryingFetcher, ScanOrchestrator, ScanRequest,
//!     ScannerConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn scan() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScannerConfig::default();
//!     let http = HttpArchiveFetcher::from_config(&config)?;
//!     let fetcher = Arc::new(RetryingFetcher::new(http, config.retry));
//!     let pool = Arc::new(HashWorkerPool::new(&config)?);
//!     let orchestrator = ScanOrchestrator::new(config, fetcher, Arc::clone(&pool));
//!
//!     let request = ScanRequest::new("https://history.stellar.org/prd/core-live/core_live_001/")
//!         .from_ledger(1)
//!         .to_ledger(10_000);
//!     let report = orchestrator.run(request, CancellationToken::new()).await;
//!     println!("{:?} up to {}", report.status, report.latest_scanned_ledger);
//!
//!     pool.terminate();
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod fetch;
pub mod framing;
pub mod hashing;
pub mod manifest;
pub mod pool;
pub mod scan;
pub mod xdr;

pub use archwarden_model as model;

pub use checkpoint::{ArchiveLayout, Category, CheckpointSchedule};
pub use config::{RetryConfig, ScannerConfig, SlowArchiveConfig};
pub use error::{Result, ScanError, ScanErrorDetail, ScanErrorKind};
pub use fetch::{ArchiveFetcher, FetchError, HttpArchiveFetcher, RetryingFetcher};
pub use framing::{Frame, FrameError, FrameReader};
pub use hashing::{Hash32, HashPolicy, HashVerificationResult, TransactionSetHashVerifier};
pub use manifest::{ArchiveManifest, ManifestReader};
pub use pool::{HashJob, HashWorkerPool, PoolError};
pub use scan::{ScanHandle, ScanOrchestrator, ScanProgress, ScanRequest};
