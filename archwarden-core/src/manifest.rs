//! History Archive State ("HAS") manifests.
//!
//! Every checkpoint publishes `history/ww/xx/yy/history-wwxxyyzz.json`, and
//! the archive root publishes the latest one under
//! `.well-known/stellar-history.json`. The manifest lists the bucket list
//! levels; each level names its `curr` and `snap` buckets and, while a merge
//! is pending, the `next` output.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::checkpoint::{ArchiveLayout, Category};
use crate::error::{Result, ScanError, ScanErrorKind};
use crate::fetch::ArchiveFetcher;
use crate::hashing::Hash32;

pub const SUPPORTED_VERSIONS: [u32; 2] = [1, 2];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("unsupported manifest version {0}")]
    UnsupportedVersion(u32),
    #[error("{field} is not a 64-digit hex hash: {value:?}")]
    InvalidHash { field: &'static str, value: String },
}

impl From<ManifestError> for ScanError {
    fn from(err: ManifestError) -> Self {
        let kind = match err {
            ManifestError::UnsupportedVersion(_) => ScanErrorKind::UnsupportedVersion,
            _ => ScanErrorKind::ParsingError,
        };
        ScanError::new(kind, "malformed history archive state").with_cause(err)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveManifest {
    pub version: u32,
    pub server: Option<String>,
    pub current_ledger: u32,
    pub network_passphrase: Option<String>,
    pub current_buckets: Vec<BucketLevel>,
    pub hot_archive_buckets: Vec<BucketLevel>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketLevel {
    pub curr: Hash32,
    pub next: PendingMerge,
    pub snap: Hash32,
}

/// State of the merge feeding the next `curr` of a level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingMerge {
    pub state: u32,
    pub output: Option<Hash32>,
}

impl ArchiveManifest {
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_slice(bytes)?;
        if !SUPPORTED_VERSIONS.contains(&raw.version) {
            return Err(ManifestError::UnsupportedVersion(raw.version));
        }
        let levels = |raw: Vec<RawLevel>| {
            raw.into_iter()
                .map(RawLevel::validate)
                .collect::<std::result::Result<Vec<_>, _>>()
        };
        Ok(Self {
            version: raw.version,
            server: raw.server,
            current_ledger: raw.current_ledger,
            network_passphrase: raw.network_passphrase,
            current_buckets: levels(raw.current_buckets)?,
            hot_archive_buckets: levels(raw.hot_archive_buckets.unwrap_or_default())?,
        })
    }

    /// Every bucket hash referenced, in discovery order: per level `curr`,
    /// `next.output` when present, then `snap`; live levels before hot
    /// archive levels. Duplicates and the zero hash are kept.
    pub fn bucket_hashes(&self) -> Vec<Hash32> {
        self.current_buckets
            .iter()
            .chain(&self.hot_archive_buckets)
            .flat_map(|level| {
                std::iter::once(level.curr)
                    .chain(level.next.output)
                    .chain(std::iter::once(level.snap))
            })
            .collect()
    }

    /// Hash of the live bucket list as recorded in ledger headers before
    /// protocol 23: SHA-256 over the per-level `SHA-256(curr || snap)`.
    pub fn bucket_list_hash(&self) -> Hash32 {
        let level_hashes: Vec<Hash32> = self
            .current_buckets
            .iter()
            .map(|level| {
                Hash32::sha256_concat([
                    level.curr.as_bytes().as_slice(),
                    level.snap.as_bytes().as_slice(),
                ])
            })
            .collect();
        Hash32::sha256_concat(level_hashes.iter().map(|h| h.as_bytes().as_slice()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    version: u32,
    #[serde(default)]
    server: Option<String>,
    current_ledger: u32,
    #[serde(default)]
    network_passphrase: Option<String>,
    current_buckets: Vec<RawLevel>,
    #[serde(default)]
    hot_archive_buckets: Option<Vec<RawLevel>>,
}

#[derive(Deserialize)]
struct RawLevel {
    curr: String,
    next: RawNext,
    snap: String,
}

#[derive(Deserialize)]
struct RawNext {
    state: u32,
    #[serde(default)]
    output: Option<String>,
}

impl RawLevel {
    fn validate(self) -> std::result::Result<BucketLevel, ManifestError> {
        Ok(BucketLevel {
            curr: parse_hash("curr", self.curr)?,
            next: PendingMerge {
                state: self.next.state,
                output: self
                    .next
                    .output
                    .map(|output| parse_hash("next.output", output))
                    .transpose()?,
            },
            snap: parse_hash("snap", self.snap)?,
        })
    }
}

fn parse_hash(field: &'static str, value: String) -> std::result::Result<Hash32, ManifestError> {
    if value.len() != 64 {
        return Err(ManifestError::InvalidHash { field, value });
    }
    Hash32::from_hex(&value).map_err(|_| ManifestError::InvalidHash { field, value })
}

/// Fetches and parses manifests through an [`ArchiveFetcher`].
#[derive(Clone)]
pub struct ManifestReader {
    fetcher: Arc<dyn ArchiveFetcher>,
}

impl std::fmt::Debug for ManifestReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestReader").finish_non_exhaustive()
    }
}

impl ManifestReader {
    pub fn new(fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn read(&self, manifest_url: &Url) -> Result<ArchiveManifest> {
        let body = self
            .fetcher
            .fetch(manifest_url)
            .await
            .map_err(|err| ScanError::from(err).with_url(manifest_url.as_str()))?;
        let manifest = ArchiveManifest::parse(&body)
            .map_err(|err| ScanError::from(err).with_url(manifest_url.as_str()))?;
        debug!(
            url = %manifest_url,
            current_ledger = manifest.current_ledger,
            levels = manifest.current_buckets.len(),
            "read history archive state"
        );
        Ok(manifest)
    }

    /// The archive's latest state, from `.well-known/stellar-history.json`.
    pub async fn read_root(&self, layout: &ArchiveLayout) -> Result<ArchiveManifest> {
        self.read(&layout.root_manifest()?).await
    }

    pub async fn read_checkpoint(
        &self,
        layout: &ArchiveLayout,
        checkpoint: u32,
    ) -> Result<ArchiveManifest> {
        let url = checkpoint_url(layout, checkpoint)?;
        self.read(&url).await.map_err(|err| err.with_ledger(checkpoint))
    }
}

pub fn checkpoint_url(layout: &ArchiveLayout, checkpoint: u32) -> Result<Url> {
    layout.category_file(Category::History, checkpoint)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::fetch::FetchError;

    fn repeated_hex(byte: u8) -> String {
        hex::encode([byte; 32])
    }

    fn manifest_json() -> String {
        format!(
            r#"{{
                "version": 1,
                "server": "stellar-core 21.0.0",
                "currentLedger": 127,
                "currentBuckets": [
                    {{"curr": "{a}", "next": {{"state": 1, "output": "{b}"}}, "snap": "{c}"}},
                    {{"curr": "{d}", "next": {{"state": 0}}, "snap": "{e}"}}
                ]
            }}"#,
            a = repeated_hex(0xA),
            b = repeated_hex(0xB),
            c = repeated_hex(0xC),
            d = repeated_hex(0xD),
            e = repeated_hex(0xE),
        )
    }

    #[test]
    fn bucket_hashes_follow_discovery_order() {
        let manifest = ArchiveManifest::parse(manifest_json().as_bytes()).expect("manifest");
        let expected: Vec<Hash32> = [0xA, 0xB, 0xC, 0xD, 0xE]
            .into_iter()
            .map(|b| Hash32::from_bytes([b; 32]))
            .collect();
        assert_eq!(manifest.bucket_hashes(), expected);
        assert_eq!(manifest.current_ledger, 127);
        assert_eq!(manifest.network_passphrase, None);
    }

    #[test]
    fn hot_archive_buckets_come_after_live_ones() {
        let json = format!(
            r#"{{
                "version": 2,
                "currentLedger": 63,
                "networkPassphrase": "Test SDF Network ; September 2015",
                "currentBuckets": [{{"curr": "{a}", "next": {{"state": 0}}, "snap": "{b}"}}],
                "hotArchiveBuckets": [{{"curr": "{c}", "next": {{"state": 0}}, "snap": "{d}"}}]
            }}"#,
            a = repeated_hex(1),
            b = repeated_hex(2),
            c = repeated_hex(3),
            d = repeated_hex(4),
        );
        let manifest = ArchiveManifest::parse(json.as_bytes()).expect("manifest");
        let order: Vec<u8> = manifest.bucket_hashes().iter().map(|h| h.as_bytes()[0]).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert!(manifest.network_passphrase.is_some());
    }

    #[test]
    fn bucket_list_hash_hashes_level_hashes() {
        let manifest = ArchiveManifest::parse(manifest_json().as_bytes()).expect("manifest");
        let level0 = Hash32::sha256(&[[0xA; 32], [0xC; 32]].concat());
        let level1 = Hash32::sha256(&[[0xD; 32], [0xE; 32]].concat());
        let expected = Hash32::sha256(&[*level0.as_bytes(), *level1.as_bytes()].concat());
        assert_eq!(manifest.bucket_list_hash(), expected);
    }

    #[test]
    fn malformed_manifests_are_parsing_errors() {
        let cases = [
            "not json".to_string(),
            r#"{"version": 1, "currentLedger": 63}"#.to_string(),
            manifest_json().replace(&repeated_hex(0xC), "abc"),
            manifest_json().replace(&repeated_hex(0xC), &"zz".repeat(32)),
        ];
        for case in cases {
            let err: ScanError = ArchiveManifest::parse(case.as_bytes())
                .expect_err("malformed")
                .into();
            assert_eq!(err.kind(), ScanErrorKind::ParsingError, "{case}");
        }
    }

    #[test]
    fn unknown_version_is_unsupported() {
        let json = manifest_json().replace("\"version\": 1", "\"version\": 9");
        let err: ScanError = ArchiveManifest::parse(json.as_bytes())
            .expect_err("version")
            .into();
        assert_eq!(err.kind(), ScanErrorKind::UnsupportedVersion);
    }

    #[derive(Debug, Default)]
    struct MapFetcher(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl ArchiveFetcher for MapFetcher {
        async fn fetch(&self, url: &Url) -> std::result::Result<Vec<u8>, FetchError> {
            self.0.get(url.as_str()).cloned().ok_or(FetchError::NotFound)
        }
    }

    #[tokio::test]
    async fn reader_resolves_checkpoint_and_root_urls() {
        let layout = ArchiveLayout::parse("https://archive.test/prd/core-live-001").expect("layout");
        let mut files = HashMap::new();
        files.insert(
            "https://archive.test/prd/core-live-001/history/00/00/00/history-0000007f.json"
                .to_string(),
            manifest_json().into_bytes(),
        );
        files.insert(
            "https://archive.test/prd/core-live-001/.well-known/stellar-history.json".to_string(),
            manifest_json().into_bytes(),
        );
        let reader = ManifestReader::new(Arc::new(MapFetcher(files)));

        let manifest = reader.read_checkpoint(&layout, 127).await.expect("checkpoint");
        assert_eq!(manifest.current_ledger, 127);
        let root = reader.read_root(&layout).await.expect("root");
        assert_eq!(root, manifest);

        let missing = reader.read_checkpoint(&layout, 191).await.expect_err("missing");
        assert!(missing.is_gap());
        assert_eq!(missing.ledger(), Some(191));
        assert!(missing.url().is_some_and(|u| u.ends_with("history-000000bf.json")));
    }
}
