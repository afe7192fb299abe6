//! Checkpoint arithmetic and the archive's path layout.
//!
//! Archives publish one set of files per checkpoint. Checkpoints are the
//! ledgers `k * F - 1`; each file name embeds the checkpoint as eight hex
//! digits, with the first three bytes repeated as directory levels:
//! `ledger/00/00/3f/ledger-0000003f.xdr.gz`.

use url::Url;

use crate::error::{Result, ScanError};

/// Path of the archive-level manifest, relative to the archive root.
pub const ROOT_MANIFEST_PATH: &str = ".well-known/stellar-history.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointSchedule {
    frequency: u32,
}

impl CheckpointSchedule {
    pub fn new(frequency: u32) -> Self {
        Self {
            frequency: frequency.max(2),
        }
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn is_checkpoint(&self, ledger: u32) -> bool {
        (u64::from(ledger) + 1) % u64::from(self.frequency) == 0
    }

    /// The checkpoint whose files contain `ledger`.
    pub fn checkpoint_containing(&self, ledger: u32) -> u32 {
        let f = self.frequency;
        (ledger / f).saturating_add(1).saturating_mul(f) - 1
    }

    /// First ledger stored in the files of `checkpoint`. Ledger 0 does not
    /// exist, so the first checkpoint holds one ledger fewer.
    pub fn first_ledger(&self, checkpoint: u32) -> u32 {
        (checkpoint + 1).saturating_sub(self.frequency).max(1)
    }

    /// All checkpoints needed to cover `from..=to`, in increasing order.
    pub fn checkpoints_covering(&self, from: u32, to: u32) -> Vec<u32> {
        if to < from {
            return Vec::new();
        }
        let first = self.checkpoint_containing(from);
        let last = self.checkpoint_containing(to);
        (first..=last)
            .step_by(self.frequency as usize)
            .collect()
    }
}

impl Default for CheckpointSchedule {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Kinds of checkpoint-indexed files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    History,
    Ledger,
    Transactions,
    Results,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::History => "history",
            Category::Ledger => "ledger",
            Category::Transactions => "transactions",
            Category::Results => "results",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Category::History => "json",
            _ => "xdr.gz",
        }
    }
}

/// Resolves archive-relative paths against the archive root URL.
#[derive(Clone, Debug)]
pub struct ArchiveLayout {
    base: Url,
}

impl ArchiveLayout {
    pub fn new(mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base }
    }

    pub fn parse(base: &str) -> Result<Self> {
        let url = Url::parse(base).map_err(|err| {
            ScanError::parsing(format!("invalid archive url {base}")).with_cause(err)
        })?;
        Ok(Self::new(url))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn root_manifest(&self) -> Result<Url> {
        self.join(ROOT_MANIFEST_PATH)
    }

    pub fn category_file(&self, category: Category, checkpoint: u32) -> Result<Url> {
        self.join(&category_path(category, checkpoint))
    }

    pub fn bucket_file(&self, hash_hex: &str) -> Result<Url> {
        self.join(&bucket_path(hash_hex))
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(|err| {
            ScanError::parsing(format!("cannot resolve {path} against {}", self.base))
                .with_cause(err)
        })
    }
}

pub fn category_path(category: Category, checkpoint: u32) -> String {
    let hex = format!("{checkpoint:08x}");
    let name = category.as_str();
    format!(
        "{name}/{}/{}/{}/{name}-{hex}.{}",
        &hex[0..2],
        &hex[2..4],
        &hex[4..6],
        category.extension()
    )
}

pub fn bucket_path(hash_hex: &str) -> String {
    let prefix = |range: std::ops::Range<usize>| hash_hex.get(range).unwrap_or("00");
    format!(
        "bucket/{}/{}/{}/bucket-{hash_hex}.xdr.gz",
        prefix(0..2),
        prefix(2..4),
        prefix(4..6)
    )
}
