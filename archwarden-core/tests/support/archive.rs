//! A small, internally consistent history archive built in memory.

use std::collections::HashMap;
use std::io::{Read, Write};

use archwarden_core::checkpoint::{
    Category, CheckpointSchedule, ROOT_MANIFEST_PATH, bucket_path, category_path,
};
use archwarden_core::framing::encode_frame;
use archwarden_core::hashing::Hash32;
use archwarden_core::hashing::policy::empty_generalized_tx_set_xdr;
use archwarden_core::xdr::XdrWriter;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::json;

pub const BASE_URL: &str = "https://archive.test/core/";
pub const EMPTY_RESULT_SET: [u8; 4] = [0, 0, 0, 0];

/// Knobs for [`SyntheticArchive::build`].
#[derive(Clone, Debug)]
pub struct ArchiveSpec {
    pub frequency: u32,
    /// Number of checkpoints; the archive holds ledgers `1..=checkpoints * frequency - 1`.
    pub checkpoints: u32,
    /// First ledger closed with generalized transaction sets. The ledger
    /// itself still uses the legacy hash and has no transactions entry.
    pub generalized_from: Option<u32>,
    /// Ledgers that carry one legacy transaction and a non-empty result set.
    pub busy_ledgers: Vec<u32>,
    /// Ledgers whose header records a wrong transaction set hash.
    pub tampered_tx_sets: Vec<u32>,
}

impl Default for ArchiveSpec {
    fn default() -> Self {
        Self {
            frequency: 8,
            checkpoints: 16,
            generalized_from: None,
            busy_ledgers: Vec::new(),
            tampered_tx_sets: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticArchive {
    pub spec: ArchiveSpec,
    pub files: HashMap<String, Vec<u8>>,
    /// Bucket shared by every checkpoint manifest.
    pub shared_bucket: Hash32,
}

struct Ledger {
    seq: u32,
    entry: Vec<u8>,
    tx_entry: Option<Vec<u8>>,
    result_entry: Option<Vec<u8>>,
}

impl SyntheticArchive {
    pub fn build(spec: ArchiveSpec) -> Self {
        let schedule = CheckpointSchedule::new(spec.frequency);
        let last_ledger = spec.checkpoints * spec.frequency - 1;
        let shared_content = b"bucket shared by every level 1".to_vec();
        let shared_bucket = Hash32::sha256(&shared_content);

        let mut files = HashMap::new();
        files.insert(bucket_url(&shared_bucket), gzip(&shared_content));

        let mut ledgers: Vec<Ledger> = Vec::new();
        let mut previous = Hash32::ZERO;
        for seq in 1..=last_ledger {
            let checkpoint = schedule.checkpoint_containing(seq);
            let version = match spec.generalized_from {
                Some(first) if seq >= first => 20,
                _ => 19,
            };

            let (tx_entry, mut tx_set_hash) = transactions_for(&spec, seq, version, &previous);
            if spec.tampered_tx_sets.contains(&seq) {
                tx_set_hash = Hash32::sha256(b"tampered");
            }
            let (result_entry, result_hash) = results_for(&spec, seq);

            let bucket_list_hash = if seq == checkpoint {
                let (levels, level_files) = checkpoint_buckets(checkpoint, shared_bucket);
                files.extend(level_files);
                files.insert(
                    format!("{BASE_URL}{}", category_path(Category::History, checkpoint)),
                    manifest_json(checkpoint, &levels),
                );
                bucket_list_hash(&levels)
            } else {
                Hash32::sha256(format!("not a checkpoint {seq}").as_bytes())
            };

            let header = header_xdr(seq, version, previous, tx_set_hash, result_hash, bucket_list_hash);
            let hash = Hash32::sha256(&header);
            let mut entry = XdrWriter::new();
            entry.put_hash(&hash);
            entry.put_raw(&header);
            entry.put_i32(0);

            ledgers.push(Ledger {
                seq,
                entry: entry.into_bytes(),
                tx_entry,
                result_entry,
            });
            previous = hash;
        }

        for checkpoint in schedule.checkpoints_covering(1, last_ledger) {
            let first = schedule.first_ledger(checkpoint);
            let slice: Vec<&Ledger> = ledgers
                .iter()
                .filter(|l| (first..=checkpoint).contains(&l.seq))
                .collect();
            let mut ledger_file = Vec::new();
            let mut tx_file = Vec::new();
            let mut result_file = Vec::new();
            for ledger in &slice {
                encode_frame(&ledger.entry, &mut ledger_file);
                if let Some(tx) = &ledger.tx_entry {
                    encode_frame(tx, &mut tx_file);
                }
                if let Some(result) = &ledger.result_entry {
                    encode_frame(result, &mut result_file);
                }
            }
            for (category, body) in [
                (Category::Ledger, ledger_file),
                (Category::Transactions, tx_file),
                (Category::Results, result_file),
            ] {
                files.insert(
                    format!("{BASE_URL}{}", category_path(category, checkpoint)),
                    gzip(&body),
                );
            }
        }

        let last_checkpoint = last_ledger;
        let root = files
            .get(&format!("{BASE_URL}{}", category_path(Category::History, last_checkpoint)))
            .cloned()
            .expect("root manifest source");
        files.insert(format!("{BASE_URL}{ROOT_MANIFEST_PATH}"), root);

        Self {
            spec,
            files,
            shared_bucket,
        }
    }

    pub fn last_ledger(&self) -> u32 {
        self.spec.checkpoints * self.spec.frequency - 1
    }

    pub fn category_url(&self, category: Category, checkpoint: u32) -> String {
        format!("{BASE_URL}{}", category_path(category, checkpoint))
    }

    pub fn bucket_url(&self, hash: &Hash32) -> String {
        bucket_url(hash)
    }

    pub fn remove(&mut self, url: &str) -> Vec<u8> {
        self.files.remove(url).expect("file present in archive")
    }

    /// Stores `body` at `url` as is.
    pub fn replace(&mut self, url: &str, body: Vec<u8>) {
        self.files.insert(url.to_string(), body);
    }

    /// Rewrites the uncompressed contents of a category file.
    pub fn rewrite_category(
        &mut self,
        category: Category,
        checkpoint: u32,
        edit: impl FnOnce(&mut Vec<u8>),
    ) {
        let url = self.category_url(category, checkpoint);
        let mut body = Vec::new();
        GzDecoder::new(self.files[&url].as_slice())
            .read_to_end(&mut body)
            .expect("gunzip category file");
        edit(&mut body);
        self.files.insert(url, gzip(&body));
    }

    /// Takes every category file of `other` from `first_checkpoint` on, so the
    /// two histories diverge there.
    pub fn splice_from(&mut self, other: &SyntheticArchive, first_checkpoint: u32) {
        let schedule = CheckpointSchedule::new(self.spec.frequency);
        for checkpoint in schedule.checkpoints_covering(first_checkpoint, self.last_ledger()) {
            for category in [
                Category::History,
                Category::Ledger,
                Category::Transactions,
                Category::Results,
            ] {
                let url = self.category_url(category, checkpoint);
                let body = other.files.get(&url).cloned().expect("file in other archive");
                self.files.insert(url, body);
            }
        }
    }

    /// The level 0 `curr` bucket named by the manifest of `checkpoint`.
    pub fn level_zero_curr(&self, checkpoint: u32) -> Hash32 {
        Hash32::sha256(format!("level 0 curr at {checkpoint}").as_bytes())
    }

    /// Replaces a bucket's contents without changing its name.
    pub fn corrupt_bucket(&mut self, hash: &Hash32) {
        self.files
            .insert(bucket_url(hash), gzip(b"these are not the bytes you hashed"));
    }
}

fn bucket_url(hash: &Hash32) -> String {
    format!("{BASE_URL}{}", bucket_path(&hash.to_hex()))
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(bytes).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

fn transactions_for(
    spec: &ArchiveSpec,
    seq: u32,
    version: u32,
    previous: &Hash32,
) -> (Option<Vec<u8>>, Hash32) {
    if seq == 1 {
        return (None, Hash32::ZERO);
    }
    if spec.busy_ledgers.contains(&seq) {
        let mut entry = XdrWriter::new();
        entry.put_u32(seq);
        entry.put_hash(previous);
        entry.put_u32(1);
        entry.put_raw(&[0x5A; 48]);
        return (Some(entry.into_bytes()), Hash32::sha256(format!("tx set {seq}").as_bytes()));
    }
    let upgrade_ledger = spec.generalized_from == Some(seq);
    if version >= 20 && !upgrade_ledger {
        let generalized = empty_generalized_tx_set_xdr(previous.as_bytes()).expect("generalized");
        let mut entry = XdrWriter::new();
        entry.put_u32(seq);
        entry.put_hash(&Hash32::ZERO);
        entry.put_u32(0);
        entry.put_i32(1);
        entry.put_raw(&generalized);
        return (Some(entry.into_bytes()), Hash32::sha256(&generalized));
    }
    // Alternate between an explicit empty legacy entry and no entry at all.
    let entry = (seq % 2 == 0).then(|| {
        let mut entry = XdrWriter::new();
        entry.put_u32(seq);
        entry.put_hash(previous);
        entry.put_u32(0);
        entry.put_i32(0);
        entry.into_bytes()
    });
    (entry, Hash32::sha256(previous.as_bytes()))
}

fn results_for(spec: &ArchiveSpec, seq: u32) -> (Option<Vec<u8>>, Hash32) {
    if !spec.busy_ledgers.contains(&seq) {
        return (None, Hash32::sha256(&EMPTY_RESULT_SET));
    }
    let mut result_set = XdrWriter::new();
    result_set.put_u32(1);
    result_set.put_raw(&[0xC3; 40]);
    let result_set = result_set.into_bytes();

    let mut entry = XdrWriter::new();
    entry.put_u32(seq);
    entry.put_raw(&result_set);
    entry.put_i32(0);
    (Some(entry.into_bytes()), Hash32::sha256(&result_set))
}

/// Two live levels: level 0 changes every checkpoint, level 1 is shared and
/// has an empty snap.
fn checkpoint_buckets(
    checkpoint: u32,
    shared: Hash32,
) -> (Vec<(Hash32, Hash32)>, Vec<(String, Vec<u8>)>) {
    let curr = format!("level 0 curr at {checkpoint}").into_bytes();
    let snap = format!("level 0 snap at {checkpoint}").into_bytes();
    let curr_hash = Hash32::sha256(&curr);
    let snap_hash = Hash32::sha256(&snap);
    let files = vec![
        (bucket_url(&curr_hash), gzip(&curr)),
        (bucket_url(&snap_hash), gzip(&snap)),
    ];
    (vec![(curr_hash, snap_hash), (shared, Hash32::ZERO)], files)
}

fn bucket_list_hash(levels: &[(Hash32, Hash32)]) -> Hash32 {
    let level_hashes: Vec<Hash32> = levels
        .iter()
        .map(|(curr, snap)| Hash32::sha256_concat([curr.as_bytes().as_slice(), snap.as_bytes().as_slice()]))
        .collect();
    Hash32::sha256_concat(level_hashes.iter().map(|h| h.as_bytes().as_slice()))
}

fn manifest_json(checkpoint: u32, levels: &[(Hash32, Hash32)]) -> Vec<u8> {
    let buckets: Vec<serde_json::Value> = levels
        .iter()
        .map(|(curr, snap)| {
            json!({
                "curr": curr.to_hex(),
                "next": { "state": 0 },
                "snap": snap.to_hex(),
            })
        })
        .collect();
    serde_json::to_vec(&json!({
        "version": 2,
        "server": "synthetic",
        "currentLedger": checkpoint,
        "networkPassphrase": "Synthetic Test Network",
        "currentBuckets": buckets,
    }))
    .expect("manifest json")
}

fn header_xdr(
    seq: u32,
    version: u32,
    previous: Hash32,
    tx_set_hash: Hash32,
    result_hash: Hash32,
    bucket_list_hash: Hash32,
) -> Vec<u8> {
    let mut w = XdrWriter::new();
    w.put_u32(version);
    w.put_hash(&previous);
    // StellarValue
    w.put_hash(&tx_set_hash);
    w.put_u64(1_600_000_000 + u64::from(seq) * 5);
    w.put_u32(0);
    w.put_i32(0);
    w.put_hash(&result_hash);
    w.put_hash(&bucket_list_hash);
    w.put_u32(seq);
    w.put_i64(1_000_000_000_000);
    w.put_i64(0);
    w.put_u32(0);
    w.put_u64(0);
    w.put_u32(100);
    w.put_u32(5_000_000);
    w.put_u32(1_000);
    for _ in 0..4 {
        w.put_hash(&Hash32::ZERO);
    }
    w.put_i32(0);
    w.into_bytes()
}
