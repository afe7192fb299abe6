//! Verification of a single checkpoint.
//!
//! For every checkpoint a range walks: read the HAS, then the ledger,
//! transactions and results files, recompute every hash the headers commit
//! to, check the bucket list and finally the bucket files themselves.
//! Mismatches are collected, not raised; anything that prevents the check
//! from running at all is returned as a [`ScanError`].

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;

use archwarden_model::{HashKind, HashMismatch};
use tracing::{debug, trace};
use url::Url;

use crate::checkpoint::{ArchiveLayout, Category};
use crate::error::{Result, ScanError};
use crate::fetch::ArchiveFetcher;
use crate::framing::{Frame, read_frames};
use crate::hashing::{Hash32, HashPolicy, TransactionSetHashVerifier};
use crate::manifest::{ArchiveManifest, ManifestReader, checkpoint_url};
use crate::pool::{HashWorkerPool, gunzip};
use crate::xdr::history::EMPTY_RESULT_SET_XDR;
use crate::xdr::{LedgerHeaderEntry, TransactionEntry, TransactionResultEntry, TxSetPayload};

/// Protocol from which headers commit to a bucket list hash that also covers
/// the hot archive.
pub const HOT_ARCHIVE_PROTOCOL: u32 = 23;

/// State a range carries from one checkpoint to the next.
#[derive(Debug, Default)]
pub struct ChainState {
    /// Sequence and hash of the last header verified.
    previous: Option<(u32, Hash32)>,
    seen_buckets: HashSet<Hash32>,
}

impl ChainState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> Option<(u32, Hash32)> {
        self.previous
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointOutcome {
    pub checkpoint: u32,
    pub ledgers: RangeInclusive<u32>,
    pub mismatches: Vec<HashMismatch>,
    /// Ledgers whose transaction set carries transactions in the legacy
    /// format; their hash depends on the envelopes and is not recomputed.
    pub unverifiable_tx_sets: usize,
    pub buckets_verified: usize,
}

impl CheckpointOutcome {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

#[derive(Clone)]
pub struct CheckpointVerifier {
    fetcher: Arc<dyn ArchiveFetcher>,
    manifests: ManifestReader,
    pool: Arc<HashWorkerPool>,
    layout: ArchiveLayout,
    tx_sets: TransactionSetHashVerifier,
    verify_buckets: bool,
}

impl std::fmt::Debug for CheckpointVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointVerifier")
            .field("layout", &self.layout)
            .field("pool", &self.pool)
            .field("verify_buckets", &self.verify_buckets)
            .finish_non_exhaustive()
    }
}

impl CheckpointVerifier {
    pub fn new(
        fetcher: Arc<dyn ArchiveFetcher>,
        pool: Arc<HashWorkerPool>,
        layout: ArchiveLayout,
        verify_buckets: bool,
    ) -> Self {
        Self {
            manifests: ManifestReader::new(Arc::clone(&fetcher)),
            fetcher,
            pool,
            layout,
            tx_sets: TransactionSetHashVerifier::new(),
            verify_buckets,
        }
    }

    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    /// Verifies `ledgers` (all inside `checkpoint`) and extends `chain`.
    pub async fn verify(
        &self,
        checkpoint: u32,
        ledgers: RangeInclusive<u32>,
        chain: &mut ChainState,
    ) -> Result<CheckpointOutcome> {
        let manifest = self.manifests.read_checkpoint(&self.layout, checkpoint).await?;
        let mut outcome = CheckpointOutcome {
            checkpoint,
            ledgers: ledgers.clone(),
            mismatches: Vec::new(),
            unverifiable_tx_sets: 0,
            buckets_verified: 0,
        };

        let (ledger_url, headers) = self.ledger_headers(checkpoint, &ledgers).await?;
        self.check_headers(&headers, &ledger_url, chain, &mut outcome).await?;
        self.check_transactions(checkpoint, &headers, &mut outcome).await?;
        self.check_results(checkpoint, &headers, &mut outcome).await?;
        self.check_bucket_list(checkpoint, &manifest, &headers, &mut outcome)?;
        if self.verify_buckets {
            self.check_buckets(checkpoint, &manifest, chain, &mut outcome).await?;
        }

        debug!(
            checkpoint,
            ledgers = headers.len(),
            mismatches = outcome.mismatches.len(),
            unverifiable_tx_sets = outcome.unverifiable_tx_sets,
            buckets = outcome.buckets_verified,
            "checkpoint verified"
        );
        Ok(outcome)
    }

    /// Seeds `chain` with the header of `ledger`, read from `checkpoint`, so
    /// the first ledger after it gets its previous-hash link checked.
    ///
    /// Returns whether the chain was seeded. A header that is absent or does
    /// not hash to its recorded value leaves the chain untouched; the range
    /// owning that ledger reports it.
    pub async fn seed_chain(&self, checkpoint: u32, ledger: u32, chain: &mut ChainState) -> Result<bool> {
        let (url, frames) = self.category_frames(Category::Ledger, checkpoint).await?;
        let mut seed = None;
        for frame in &frames {
            let entry = LedgerHeaderEntry::decode(frame.as_bytes())
                .map_err(|err| located(err.into(), &url, checkpoint))?;
            if entry.ledger_seq == ledger {
                seed = Some(entry);
                break;
            }
        }
        let Some(entry) = seed else {
            debug!(checkpoint, ledger, "seed header not found");
            return Ok(false);
        };

        let digests = self
            .pool
            .digest_batch(vec![entry.header_xdr.clone()])
            .await
            .map_err(|err| located(err.into(), &url, checkpoint))?;
        if digests.first() != Some(&entry.hash) {
            debug!(checkpoint, ledger, "seed header does not match its hash");
            return Ok(false);
        }
        chain.previous = Some((entry.ledger_seq, entry.hash));
        trace!(checkpoint, ledger, "chain seeded");
        Ok(true)
    }

    async fn ledger_headers(
        &self,
        checkpoint: u32,
        ledgers: &RangeInclusive<u32>,
    ) -> Result<(Url, Vec<LedgerHeaderEntry>)> {
        let (url, frames) = self.category_frames(Category::Ledger, checkpoint).await?;
        let mut headers = Vec::with_capacity(frames.len());
        for frame in &frames {
            let entry = LedgerHeaderEntry::decode(frame.as_bytes())
                .map_err(|err| located(err.into(), &url, checkpoint))?;
            if ledgers.contains(&entry.ledger_seq) {
                headers.push(entry);
            }
        }

        let covers_exactly = headers.len() as u64
            == u64::from(*ledgers.end()) - u64::from(*ledgers.start()) + 1
            && headers
                .iter()
                .zip(ledgers.clone())
                .all(|(entry, seq)| entry.ledger_seq == seq);
        if !covers_exactly {
            return Err(located(
                ScanError::parsing(format!(
                    "ledger file does not hold exactly ledgers {}..={}",
                    ledgers.start(),
                    ledgers.end()
                )),
                &url,
                checkpoint,
            ));
        }
        Ok((url, headers))
    }

    async fn check_headers(
        &self,
        headers: &[LedgerHeaderEntry],
        url: &Url,
        chain: &mut ChainState,
        outcome: &mut CheckpointOutcome,
    ) -> Result<()> {
        let digests = self
            .pool
            .digest_batch(headers.iter().map(|h| h.header_xdr.clone()).collect())
            .await
            .map_err(|err| located(err.into(), url, outcome.checkpoint))?;

        for (header, actual) in headers.iter().zip(&digests) {
            if *actual != header.hash {
                outcome.mismatches.push(mismatch(
                    header.ledger_seq,
                    HashKind::LedgerHeader,
                    &header.hash,
                    actual,
                    url,
                ));
            }
            if let Some((previous_seq, previous_hash)) = chain.previous
                && previous_seq + 1 == header.ledger_seq
                && previous_hash != header.previous_ledger_hash
            {
                outcome.mismatches.push(mismatch(
                    header.ledger_seq,
                    HashKind::PreviousLedgerHeader,
                    &header.previous_ledger_hash,
                    &previous_hash,
                    url,
                ));
            }
            chain.previous = Some((header.ledger_seq, header.hash));
        }
        Ok(())
    }

    async fn check_transactions(
        &self,
        checkpoint: u32,
        headers: &[LedgerHeaderEntry],
        outcome: &mut CheckpointOutcome,
    ) -> Result<()> {
        let (url, frames) = self.category_frames(Category::Transactions, checkpoint).await?;
        let mut entries = HashMap::with_capacity(frames.len());
        for frame in &frames {
            let entry = TransactionEntry::decode(frame.as_bytes())
                .map_err(|err| located(err.into(), &url, checkpoint))?;
            entries.insert(entry.ledger_seq, entry.tx_set);
        }

        let mut generalized: Vec<(&LedgerHeaderEntry, Vec<u8>)> = Vec::new();
        for header in headers {
            match entries.remove(&header.ledger_seq) {
                Some(TxSetPayload::Generalized { xdr }) => generalized.push((header, xdr)),
                Some(TxSetPayload::Legacy { tx_count, .. }) if tx_count > 0 => {
                    trace!(
                        ledger = header.ledger_seq,
                        tx_count, "legacy transaction set not recomputed"
                    );
                    outcome.unverifiable_tx_sets += 1;
                }
                Some(TxSetPayload::Legacy { .. }) | None => {
                    let matches = self
                        .tx_sets
                        .verify_digest(
                            header.ledger_seq,
                            header.ledger_version,
                            &header.previous_ledger_hash,
                            &header.tx_set_hash,
                        )
                        .map_err(|err| located(err, &url, header.ledger_seq))?;
                    if !matches {
                        let expected = self.empty_tx_set_hash(header);
                        outcome.mismatches.push(mismatch(
                            header.ledger_seq,
                            HashKind::TransactionSet,
                            &header.tx_set_hash,
                            &expected,
                            &url,
                        ));
                    }
                }
            }
        }

        if generalized.is_empty() {
            return Ok(());
        }
        let digests = self
            .pool
            .digest_batch(generalized.iter().map(|(_, xdr)| xdr.clone()).collect())
            .await
            .map_err(|err| located(err.into(), &url, checkpoint))?;
        for ((header, _), actual) in generalized.iter().zip(&digests) {
            if *actual != header.tx_set_hash {
                outcome.mismatches.push(mismatch(
                    header.ledger_seq,
                    HashKind::TransactionSet,
                    &header.tx_set_hash,
                    actual,
                    &url,
                ));
            }
        }
        Ok(())
    }

    /// The digest the primary policy produces, for the mismatch record.
    fn empty_tx_set_hash(&self, header: &LedgerHeaderEntry) -> Hash32 {
        HashPolicy::select(header.ledger_seq, header.ledger_version)
            .compute(header.previous_ledger_hash.as_bytes())
            .unwrap_or(Hash32::ZERO)
    }

    async fn check_results(
        &self,
        checkpoint: u32,
        headers: &[LedgerHeaderEntry],
        outcome: &mut CheckpointOutcome,
    ) -> Result<()> {
        let (url, frames) = self.category_frames(Category::Results, checkpoint).await?;
        let mut entries = HashMap::with_capacity(frames.len());
        for frame in &frames {
            let entry = TransactionResultEntry::decode(frame.as_bytes())
                .map_err(|err| located(err.into(), &url, checkpoint))?;
            entries.insert(entry.ledger_seq, entry.result_set_xdr);
        }

        let buffers: Vec<Vec<u8>> = headers
            .iter()
            .map(|h| {
                entries
                    .remove(&h.ledger_seq)
                    .unwrap_or_else(|| EMPTY_RESULT_SET_XDR.to_vec())
            })
            .collect();
        let digests = self
            .pool
            .digest_batch(buffers)
            .await
            .map_err(|err| located(err.into(), &url, checkpoint))?;
        for (header, actual) in headers.iter().zip(&digests) {
            if *actual != header.tx_set_result_hash {
                outcome.mismatches.push(mismatch(
                    header.ledger_seq,
                    HashKind::TransactionResultSet,
                    &header.tx_set_result_hash,
                    actual,
                    &url,
                ));
            }
        }
        Ok(())
    }

    fn check_bucket_list(
        &self,
        checkpoint: u32,
        manifest: &ArchiveManifest,
        headers: &[LedgerHeaderEntry],
        outcome: &mut CheckpointOutcome,
    ) -> Result<()> {
        let Some(header) = headers.iter().find(|h| h.ledger_seq == checkpoint) else {
            return Ok(());
        };
        if header.ledger_version >= HOT_ARCHIVE_PROTOCOL {
            return Ok(());
        }
        let actual = manifest.bucket_list_hash();
        if actual != header.bucket_list_hash {
            let url = checkpoint_url(&self.layout, checkpoint)?;
            outcome.mismatches.push(mismatch(
                checkpoint,
                HashKind::BucketList,
                &header.bucket_list_hash,
                &actual,
                &url,
            ));
        }
        Ok(())
    }

    async fn check_buckets(
        &self,
        checkpoint: u32,
        manifest: &ArchiveManifest,
        chain: &mut ChainState,
        outcome: &mut CheckpointOutcome,
    ) -> Result<()> {
        for hash in manifest.bucket_hashes() {
            if hash.is_zero() || !chain.seen_buckets.insert(hash) {
                continue;
            }
            let hex = hash.to_hex();
            let url = self.layout.bucket_file(&hex)?;
            let body = self.fetch(&url, checkpoint).await?;
            let actual = self
                .pool
                .digest_gzip(body)
                .await
                .map_err(|err| located(err.into(), &url, checkpoint))?;
            if actual != hash {
                outcome
                    .mismatches
                    .push(mismatch(checkpoint, HashKind::Bucket, &hash, &actual, &url));
            }
            outcome.buckets_verified += 1;
        }
        Ok(())
    }

    async fn fetch(&self, url: &Url, checkpoint: u32) -> Result<Vec<u8>> {
        self.fetcher
            .fetch(url)
            .await
            .map_err(|err| located(err.into(), url, checkpoint))
    }

    async fn category_frames(&self, category: Category, checkpoint: u32) -> Result<(Url, Vec<Frame>)> {
        let url = self.layout.category_file(category, checkpoint)?;
        let compressed = self.fetch(&url, checkpoint).await?;
        let inflated = tokio::task::spawn_blocking(move || gunzip(&compressed))
            .await
            .map_err(|err| {
                located(
                    ScanError::unspecified("gzip task did not complete").with_cause(err),
                    &url,
                    checkpoint,
                )
            })?
            .map_err(|err| {
                located(
                    ScanError::parsing(format!("{} file is not valid gzip", category.as_str()))
                        .with_cause(err),
                    &url,
                    checkpoint,
                )
            })?;
        let frames = read_frames(&inflated).map_err(|err| located(err.into(), &url, checkpoint))?;
        trace!(%url, frames = frames.len(), "framed category file");
        Ok((url, frames))
    }
}

fn located(err: ScanError, url: &Url, ledger: u32) -> ScanError {
    let err = if err.url().is_none() {
        err.with_url(url.as_str())
    } else {
        err
    };
    err.with_ledger(ledger)
}

fn mismatch(ledger: u32, kind: HashKind, expected: &Hash32, actual: &Hash32, url: &Url) -> HashMismatch {
    HashMismatch {
        ledger,
        kind,
        expected: expected.to_hex(),
        actual: actual.to_hex(),
        url: url.to_string(),
    }
}
