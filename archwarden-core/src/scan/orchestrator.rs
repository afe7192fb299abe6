use std::sync::Arc;

use archwarden_model::{GapLocation, RangeReport, ScanReport, ScanStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint::{ArchiveLayout, CheckpointSchedule};
use crate::config::ScannerConfig;
use crate::error::{Result, ScanError};
use crate::fetch::ArchiveFetcher;
use crate::manifest::ManifestReader;
use crate::pool::HashWorkerPool;
use crate::scan::ScanRequest;
use crate::scan::frontier::ScanFrontier;
use crate::scan::range::{RangeEvent, RangeOutcome, RangeWorker, ScanRange, partition};
use crate::scan::verify::CheckpointVerifier;

/// Snapshot published while a scan runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanProgress {
    pub status: ScanStatus,
    pub latest_scanned_ledger: u32,
    pub ranges_total: usize,
    pub ranges_finished: usize,
}

impl ScanProgress {
    fn of(report: &ScanReport) -> Self {
        Self {
            status: report.status,
            latest_scanned_ledger: report.latest_scanned_ledger,
            ranges_total: report.ranges.len(),
            ranges_finished: report
                .ranges
                .iter()
                .filter(|r| r.status.is_terminal())
                .count(),
        }
    }
}

/// A scan running in the background.
#[derive(Debug)]
pub struct ScanHandle {
    cancel: CancellationToken,
    progress: watch::Receiver<ScanProgress>,
    task: JoinHandle<ScanReport>,
}

impl ScanHandle {
    /// Stops scheduling checkpoints and aborts in-flight fetches. The report
    /// is still closed and returned by [`ScanHandle::join`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> watch::Receiver<ScanProgress> {
        self.progress.clone()
    }

    pub async fn join(self) -> Result<ScanReport> {
        self.task
            .await
            .map_err(|err| ScanError::unspecified("scan task did not complete").with_cause(err))
    }
}

/// Drives a scan: splits it into ranges, runs them concurrently and folds
/// their events into a [`ScanReport`].
///
/// Cheap to clone. The hash pool is injected and shared by all ranges of all
/// scans run through this orchestrator; terminating it is up to the caller.
#[derive(Clone)]
pub struct ScanOrchestrator {
    config: Arc<ScannerConfig>,
    fetcher: Arc<dyn ArchiveFetcher>,
    pool: Arc<HashWorkerPool>,
}

impl std::fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl ScanOrchestrator {
    pub fn new(
        config: ScannerConfig,
        fetcher: Arc<dyn ArchiveFetcher>,
        pool: Arc<HashWorkerPool>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            fetcher,
            pool,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Spawns the scan and returns immediately.
    pub fn start(&self, request: ScanRequest) -> ScanHandle {
        let cancel = CancellationToken::new();
        let (progress_tx, progress) = watch::channel(ScanProgress {
            status: ScanStatus::Initialized,
            latest_scanned_ledger: request.from_ledger.saturating_sub(1),
            ranges_total: 0,
            ranges_finished: 0,
        });
        let this = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { this.execute(request, token, Some(progress_tx)).await });
        ScanHandle {
            cancel,
            progress,
            task,
        }
    }

    /// Runs the scan to completion. Always returns a closed report; setup
    /// failures are recorded in it like any other error.
    pub async fn run(&self, request: ScanRequest, cancel: CancellationToken) -> ScanReport {
        self.execute(request, cancel, None).await
    }

    async fn execute(
        &self,
        request: ScanRequest,
        cancel: CancellationToken,
        progress: Option<watch::Sender<ScanProgress>>,
    ) -> ScanReport {
        let concurrency = request.concurrency.unwrap_or(self.config.concurrency).max(1);
        let from_ledger = request.from_ledger.max(1);

        let (layout, to_ledger) = match self.resolve_target(&request, from_ledger).await {
            Ok(target) => target,
            Err(err) => {
                let to_ledger = request.to_ledger.unwrap_or(from_ledger);
                let mut report = ScanReport::open(&request.url, from_ledger, to_ledger, concurrency);
                record_setup_failure(&mut report, err);
                report.close(false);
                publish(&progress, &report);
                return report;
            }
        };

        let schedule = CheckpointSchedule::new(self.config.checkpoint_frequency);
        let ranges = partition(&schedule, from_ledger, to_ledger, concurrency);
        let mut report = ScanReport::open(&request.url, from_ledger, to_ledger, concurrency);
        report.status = ScanStatus::Running;
        report.ranges = ranges
            .iter()
            .map(|r| {
                let mut range = RangeReport::new(r.index, r.from_ledger, r.to_ledger);
                range.status = ScanStatus::Running;
                range
            })
            .collect();
        info!(
            scan_id = %report.scan_id,
            url = %report.url,
            from_ledger,
            to_ledger,
            concurrency,
            ranges = ranges.len(),
            "scan started"
        );
        publish(&progress, &report);

        let mut frontier = ScanFrontier::new(ranges.iter().map(|r| (r.from_ledger, r.to_ledger)));
        let (events_tx, mut events) = mpsc::channel(ranges.len() * 4 + 16);
        let handles = self.spawn_ranges(&layout, schedule, ranges, &events_tx, &cancel);
        drop(events_tx);

        while let Some(event) = events.recv().await {
            if apply_event(&mut report, &mut frontier, event) {
                publish(&progress, &report);
            }
        }

        for (index, handle) in handles {
            if let Err(err) = handle.await {
                warn!(range = index, error = %err, "range task ended abnormally");
                let detail = ScanError::unspecified("range task ended abnormally")
                    .with_cause(err)
                    .to_detail();
                if let Some(range) = report.ranges.get_mut(index) {
                    range.status = ScanStatus::Failed;
                    range.error = Some(detail.clone());
                }
                report.record_error(detail);
            }
        }

        let cancelled = report.ranges.iter().any(|r| r.status == ScanStatus::Cancelled);
        report.close(cancelled);
        info!(
            scan_id = %report.scan_id,
            status = ?report.status,
            latest_scanned_ledger = report.latest_scanned_ledger,
            has_gap = report.has_gap,
            has_error = report.has_error,
            has_mismatch = report.has_mismatch,
            mismatches = report.mismatches.len(),
            slow = report.is_slow_archive,
            "scan closed"
        );
        publish(&progress, &report);
        report
    }

    async fn resolve_target(&self, request: &ScanRequest, from_ledger: u32) -> Result<(ArchiveLayout, u32)> {
        let layout = ArchiveLayout::parse(&request.url)?;
        let to_ledger = match request.to_ledger {
            Some(to) => to,
            None => {
                let manifests = ManifestReader::new(Arc::clone(&self.fetcher));
                manifests.read_root(&layout).await?.current_ledger
            }
        };
        if to_ledger < from_ledger {
            return Err(ScanError::parsing(format!(
                "empty ledger range {from_ledger}..={to_ledger}"
            )));
        }
        Ok((layout, to_ledger))
    }

    fn spawn_ranges(
        &self,
        layout: &ArchiveLayout,
        schedule: CheckpointSchedule,
        ranges: Vec<ScanRange>,
        events: &mpsc::Sender<RangeEvent>,
        cancel: &CancellationToken,
    ) -> Vec<(usize, JoinHandle<()>)> {
        let verifier = CheckpointVerifier::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.pool),
            layout.clone(),
            self.config.verify_buckets,
        );
        ranges
            .into_iter()
            .map(|range| {
                let index = range.index;
                let worker = RangeWorker {
                    slow_archive: (index == 0).then_some(self.config.slow_archive),
                    range,
                    schedule,
                    verifier: verifier.clone(),
                };
                let handle = tokio::spawn(worker.run(events.clone(), cancel.clone()));
                (index, handle)
            })
            .collect()
    }
}

/// Folds one range event into the report. Returns whether progress moved.
fn apply_event(report: &mut ScanReport, frontier: &mut ScanFrontier, event: RangeEvent) -> bool {
    match event {
        RangeEvent::Progress { index, ledger } => {
            if let Some(range) = report.ranges.get_mut(index) {
                range.latest_verified_ledger = Some(ledger.max(range.latest_verified_ledger.unwrap_or(0)));
            }
            match frontier.record(index, ledger) {
                Some(position) => report.advance(position),
                None => false,
            }
        }
        RangeEvent::Mismatch { index, mismatch } => {
            if let Some(range) = report.ranges.get_mut(index) {
                range.mismatch_count += 1;
            }
            report.record_mismatch(mismatch);
            false
        }
        RangeEvent::SlowArchive { index, elapsed_ms } => {
            warn!(range = index, elapsed_ms, "archive is slow");
            report.is_slow_archive = true;
            false
        }
        RangeEvent::Finished { index, outcome } => {
            let (status, gap, error) = match outcome {
                RangeOutcome::Completed => (ScanStatus::Completed, None, None),
                RangeOutcome::Cancelled => (ScanStatus::Cancelled, None, None),
                RangeOutcome::Gap(gap) => (ScanStatus::Gapped, Some(gap), None),
                RangeOutcome::Failed(detail) => (ScanStatus::Failed, None, Some(detail)),
            };
            if let Some(gap) = &gap {
                report.record_gap(gap.clone());
            }
            if let Some(detail) = &error {
                report.record_error(detail.clone());
            }
            if let Some(range) = report.ranges.get_mut(index) {
                range.status = status;
                range.gap = gap;
                range.error = error;
            }
            true
        }
    }
}

fn record_setup_failure(report: &mut ScanReport, err: ScanError) {
    warn!(url = %report.url, kind = %err.kind(), error = %err.full_message(), "scan could not start");
    if err.is_gap() {
        let gap = GapLocation {
            url: err.url().unwrap_or(report.url.as_str()).to_string(),
            checkpoint: err.ledger().unwrap_or(report.to_ledger),
        };
        report.record_gap(gap);
    } else {
        report.record_error(err.to_detail());
    }
}

fn publish(progress: &Option<watch::Sender<ScanProgress>>, report: &ScanReport) {
    if let Some(tx) = progress {
        tx.send_replace(ScanProgress::of(report));
    }
}
