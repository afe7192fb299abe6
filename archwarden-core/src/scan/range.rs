//! Splitting a scan into ranges and walking one range.

use std::ops::RangeInclusive;
use std::time::Instant;

use archwarden_model::{GapLocation, HashMismatch, ScanErrorDetail};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::checkpoint::CheckpointSchedule;
use crate::config::SlowArchiveConfig;
use crate::scan::verify::{ChainState, CheckpointVerifier};

/// Contiguous slice of the requested ledgers, owned by one task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanRange {
    pub index: usize,
    pub from_ledger: u32,
    pub to_ledger: u32,
    /// Checkpoints whose files hold this range's ledgers, ascending.
    pub checkpoints: Vec<u32>,
}

impl ScanRange {
    /// The part of `checkpoint` this range is responsible for.
    pub fn ledgers_in(&self, schedule: &CheckpointSchedule, checkpoint: u32) -> RangeInclusive<u32> {
        schedule.first_ledger(checkpoint).max(self.from_ledger)..=checkpoint.min(self.to_ledger)
    }
}

/// Splits the checkpoints covering `from..=to` into at most `concurrency`
/// contiguous ranges of near-equal size. Earlier ranges take the remainder.
pub fn partition(
    schedule: &CheckpointSchedule,
    from: u32,
    to: u32,
    concurrency: usize,
) -> Vec<ScanRange> {
    let checkpoints = schedule.checkpoints_covering(from, to);
    if checkpoints.is_empty() {
        return Vec::new();
    }
    let count = concurrency.clamp(1, checkpoints.len());
    let base = checkpoints.len() / count;
    let extra = checkpoints.len() % count;

    let mut ranges = Vec::with_capacity(count);
    let mut rest = checkpoints.as_slice();
    for index in 0..count {
        let take = base + usize::from(index < extra);
        let (chunk, tail) = rest.split_at(take);
        rest = tail;
        let (Some(&first), Some(&last)) = (chunk.first(), chunk.last()) else {
            continue;
        };
        ranges.push(ScanRange {
            index,
            from_ledger: schedule.first_ledger(first).max(from),
            to_ledger: last.min(to),
            checkpoints: chunk.to_vec(),
        });
    }
    ranges
}

/// How a range ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RangeOutcome {
    Completed,
    Gap(GapLocation),
    Failed(ScanErrorDetail),
    Cancelled,
}

/// Messages from range tasks to the aggregator.
#[derive(Clone, Debug)]
pub enum RangeEvent {
    /// Every ledger of the range up to `ledger` verified clean.
    Progress { index: usize, ledger: u32 },
    Mismatch { index: usize, mismatch: HashMismatch },
    SlowArchive { index: usize, elapsed_ms: u64 },
    Finished { index: usize, outcome: RangeOutcome },
}

#[derive(Debug)]
pub struct RangeWorker {
    pub range: ScanRange,
    pub schedule: CheckpointSchedule,
    pub verifier: CheckpointVerifier,
    /// Set for the range that samples archive speed.
    pub slow_archive: Option<SlowArchiveConfig>,
}

impl RangeWorker {
    pub async fn run(self, events: mpsc::Sender<RangeEvent>, cancel: CancellationToken) {
        let index = self.range.index;
        let outcome = self.walk(&events, &cancel).await;
        // A closed channel means nobody is listening any more.
        let _ = events.send(RangeEvent::Finished { index, outcome }).await;
    }

    async fn walk(&self, events: &mpsc::Sender<RangeEvent>, cancel: &CancellationToken) -> RangeOutcome {
        let index = self.range.index;
        let started = Instant::now();
        let sample = self
            .slow_archive
            .map(|slow| (slow.sample_checkpoints.clamp(1, self.range.checkpoints.len().max(1)), slow));
        let mut chain = ChainState::new();
        let mut clean = true;

        if self.range.from_ledger > 1 {
            let ledger = self.range.from_ledger - 1;
            let checkpoint = self.schedule.checkpoint_containing(ledger);
            let seeded = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RangeOutcome::Cancelled,
                seeded = self.verifier.seed_chain(checkpoint, ledger, &mut chain) => seeded,
            };
            if let Err(err) = seeded {
                debug!(
                    range = index,
                    ledger,
                    kind = %err.kind(),
                    error = %err.full_message(),
                    "range starts without a chain seed"
                );
            }
        }

        for (done, &checkpoint) in self.range.checkpoints.iter().enumerate() {
            if cancel.is_cancelled() {
                return RangeOutcome::Cancelled;
            }
            let ledgers = self.range.ledgers_in(&self.schedule, checkpoint);
            let last = *ledgers.end();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RangeOutcome::Cancelled,
                result = self.verifier.verify(checkpoint, ledgers, &mut chain) => result,
            };

            match result {
                Ok(outcome) => {
                    for mismatch in outcome.mismatches {
                        warn!(
                            range = index,
                            ledger = mismatch.ledger,
                            kind = ?mismatch.kind,
                            expected = %mismatch.expected,
                            actual = %mismatch.actual,
                            "hash mismatch"
                        );
                        clean = false;
                        let _ = events.send(RangeEvent::Mismatch { index, mismatch }).await;
                    }
                    if clean {
                        let _ = events.send(RangeEvent::Progress { index, ledger: last }).await;
                    }
                }
                Err(err) if err.is_gap() => {
                    let url = err.url().unwrap_or_default().to_string();
                    warn!(range = index, checkpoint, %url, "gap in archive");
                    return RangeOutcome::Gap(GapLocation { url, checkpoint });
                }
                Err(err) => {
                    warn!(
                        range = index,
                        checkpoint,
                        kind = %err.kind(),
                        error = %err.full_message(),
                        "range failed"
                    );
                    return RangeOutcome::Failed(err.to_detail());
                }
            }

            if let Some((sample_size, slow)) = sample
                && done + 1 == sample_size
            {
                let elapsed = started.elapsed();
                debug!(range = index, checkpoints = sample_size, elapsed_ms = elapsed.as_millis() as u64, "speed sample taken");
                if elapsed > slow.threshold() {
                    let _ = events
                        .send(RangeEvent::SlowArchive {
                            index,
                            elapsed_ms: elapsed.as_millis() as u64,
                        })
                        .await;
                }
            }
        }
        RangeOutcome::Completed
    }
}
