//! Scan orchestration.
//!
//! A scan covers a ledger range of one archive. The range is split into
//! contiguous sub-ranges that run as independent tasks; each walks its
//! checkpoints in order through a [`CheckpointVerifier`] and reports back over
//! a channel. The [`ScanOrchestrator`] folds those reports into a
//! [`ScanReport`](archwarden_model::ScanReport) whose progress only ever
//! reflects the fully verified prefix.

pub mod frontier;
pub mod orchestrator;
pub mod range;
pub mod verify;

pub use frontier::ScanFrontier;
pub use orchestrator::{ScanHandle, ScanOrchestrator, ScanProgress};
pub use range::{RangeEvent, RangeOutcome, ScanRange, partition};
pub use verify::{ChainState, CheckpointOutcome, CheckpointVerifier};

/// What to scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanRequest {
    /// Archive root, e.g. `https://history.stellar.org/prd/core-live/core_live_001/`.
    pub url: String,
    /// First ledger to verify; values below 1 are raised to 1.
    pub from_ledger: u32,
    /// Last ledger to verify. `None` scans up to the archive's current ledger.
    pub to_ledger: Option<u32>,
    /// Overrides [`ScannerConfig::concurrency`](crate::config::ScannerConfig::concurrency).
    pub concurrency: Option<usize>,
}

impl ScanRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            from_ledger: 1,
            to_ledger: None,
            concurrency: None,
        }
    }

    pub fn from_ledger(mut self, ledger: u32) -> Self {
        self.from_ledger = ledger;
        self
    }

    pub fn to_ledger(mut self, ledger: u32) -> Self {
        self.to_ledger = Some(ledger);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}
