use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ScanErrorDetail;

/// Lifecycle of a scan run (and of each of its ranges).
///
/// `Completed`, `Gapped`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanStatus {
    Initialized,
    Running,
    Completed,
    Gapped,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ScanStatus::Initialized | ScanStatus::Running)
    }
}

/// Where the archive stops having the data it should have.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct GapLocation {
    pub url: String,
    pub checkpoint: u32,
}

/// Which hash in the chain failed to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HashKind {
    LedgerHeader,
    PreviousLedgerHeader,
    TransactionSet,
    TransactionResultSet,
    BucketList,
    Bucket,
}

/// A recomputed hash that disagrees with the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct HashMismatch {
    pub ledger: u32,
    pub kind: HashKind,
    /// Hex encoded hash recorded by the archive.
    pub expected: String,
    /// Hex encoded hash recomputed from the published data.
    pub actual: String,
    pub url: String,
}

/// Outcome of one concurrently scanned sub-range.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct RangeReport {
    pub concurrency_range_index: usize,
    pub from_ledger: u32,
    pub to_ledger: u32,
    /// Highest ledger this range verified without a break in the chain.
    pub latest_verified_ledger: Option<u32>,
    pub status: ScanStatus,
    pub gap: Option<GapLocation>,
    pub error: Option<ScanErrorDetail>,
    pub mismatch_count: usize,
}

impl RangeReport {
    pub fn new(index: usize, from_ledger: u32, to_ledger: u32) -> Self {
        Self {
            concurrency_range_index: index,
            from_ledger,
            to_ledger,
            latest_verified_ledger: None,
            status: ScanStatus::Initialized,
            gap: None,
            error: None,
            mismatch_count: 0,
        }
    }
}

/// The externally visible result of one scan run.
///
/// Opened when the scan starts, mutated only by the orchestrator, and closed
/// (`end_date` set, terminal `status`) exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub url: String,
    pub from_ledger: u32,
    pub to_ledger: u32,
    pub latest_scanned_ledger: u32,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub concurrency: usize,
    pub status: ScanStatus,
    pub has_gap: bool,
    pub gap: Option<GapLocation>,
    pub has_error: bool,
    pub error: Option<ScanErrorDetail>,
    pub has_mismatch: bool,
    pub mismatches: Vec<HashMismatch>,
    pub is_slow_archive: bool,
    pub ranges: Vec<RangeReport>,
}

impl ScanReport {
    pub fn open(
        url: impl Into<String>,
        from_ledger: u32,
        to_ledger: u32,
        concurrency: usize,
    ) -> Self {
        Self {
            scan_id: Uuid::now_v7(),
            url: url.into(),
            from_ledger,
            to_ledger,
            latest_scanned_ledger: from_ledger.saturating_sub(1),
            start_date: Utc::now(),
            end_date: None,
            concurrency,
            status: ScanStatus::Initialized,
            has_gap: false,
            gap: None,
            has_error: false,
            error: None,
            has_mismatch: false,
            mismatches: Vec::new(),
            is_slow_archive: false,
            ranges: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_date.is_none()
    }

    /// True when the archive verified cleanly over the whole requested range.
    pub fn is_clean(&self) -> bool {
        self.status == ScanStatus::Completed
            && !self.has_gap
            && !self.has_error
            && !self.has_mismatch
    }

    /// Moves the verified frontier forward. Returns whether it moved.
    pub fn advance(&mut self, ledger: u32) -> bool {
        let ledger = ledger.min(self.to_ledger);
        if ledger > self.latest_scanned_ledger {
            self.latest_scanned_ledger = ledger;
            true
        } else {
            false
        }
    }

    /// Records a gap, keeping the lowest checkpoint if several ranges hit one.
    pub fn record_gap(&mut self, gap: GapLocation) {
        self.has_gap = true;
        match &self.gap {
            Some(existing) if existing.checkpoint <= gap.checkpoint => {}
            _ => self.gap = Some(gap),
        }
    }

    /// Records an error, keeping the one at the lowest ledger as the detail.
    pub fn record_error(&mut self, detail: ScanErrorDetail) {
        self.has_error = true;
        let replace = match &self.error {
            None => true,
            Some(existing) => match (existing.ledger, detail.ledger) {
                (Some(current), Some(candidate)) => candidate < current,
                (None, Some(_)) => true,
                _ => false,
            },
        };
        if replace {
            self.error = Some(detail);
        }
    }

    /// Records a hash mismatch. Mismatches leave `has_error` and the terminal
    /// status alone; a scan that only found mismatches still completes.
    pub fn record_mismatch(&mut self, mismatch: HashMismatch) {
        self.has_mismatch = true;
        self.mismatches.push(mismatch);
    }

    /// Terminal status implied by what has been recorded so far.
    ///
    /// Precedence is `Cancelled > Failed > Gapped > Completed`.
    pub fn terminal_status(&self, cancelled: bool) -> ScanStatus {
        if cancelled {
            ScanStatus::Cancelled
        } else if self.has_error {
            ScanStatus::Failed
        } else if self.has_gap {
            ScanStatus::Gapped
        } else {
            ScanStatus::Completed
        }
    }

    /// Closes the report. Closing twice keeps the first close.
    pub fn close(&mut self, cancelled: bool) {
        if !self.is_open() {
            return;
        }
        self.status = self.terminal_status(cancelled);
        self.end_date = Some(Utc::now());
        self.mismatches.sort_by_key(|m| m.ledger);
        self.ranges.sort_by_key(|r| r.concurrency_range_index);
    }
}
