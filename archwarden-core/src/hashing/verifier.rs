use tracing::trace;

use crate::error::{Result, ScanError};
use crate::hashing::policy::GENERALIZED_TX_SET_PROTOCOL;
use crate::hashing::{Hash32, HashPolicy, decode_base64_lenient};

/// Outcome of checking one transaction set hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashVerificationResult {
    Match,
    Mismatch,
    Error(String),
}

impl From<Result<bool>> for HashVerificationResult {
    fn from(result: Result<bool>) -> Self {
        match result {
            Ok(true) => HashVerificationResult::Match,
            Ok(false) => HashVerificationResult::Mismatch,
            Err(err) => HashVerificationResult::Error(err.full_message()),
        }
    }
}

/// Recomputes the hash of an empty transaction set and compares it with the
/// one a ledger header recorded.
///
/// Stateless; one instance can be shared by every scan task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionSetHashVerifier;

impl TransactionSetHashVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Base64 entry point. `previous_ledger_hash` is decoded leniently and
    /// `expected_hash` is compared against the base64 of the computed digest.
    pub fn verify(
        &self,
        ledger_seq: u32,
        protocol_version: u32,
        previous_ledger_hash: &str,
        expected_hash: &str,
    ) -> Result<bool> {
        let previous = decode_base64_lenient(previous_ledger_hash);
        self.verify_with(ledger_seq, protocol_version, &previous, |digest| {
            digest.to_base64() == expected_hash
        })
    }

    /// Same as [`verify`](Self::verify) but returns the tagged result.
    pub fn verify_result(
        &self,
        ledger_seq: u32,
        protocol_version: u32,
        previous_ledger_hash: &str,
        expected_hash: &str,
    ) -> HashVerificationResult {
        self.verify(ledger_seq, protocol_version, previous_ledger_hash, expected_hash)
            .into()
    }

    /// Byte-level entry point used by the scan pipeline.
    pub fn verify_digest(
        &self,
        ledger_seq: u32,
        protocol_version: u32,
        previous_ledger_hash: &Hash32,
        expected_hash: &Hash32,
    ) -> Result<bool> {
        self.verify_with(
            ledger_seq,
            protocol_version,
            previous_ledger_hash.as_bytes(),
            |digest| digest == expected_hash,
        )
    }

    fn verify_with(
        &self,
        ledger_seq: u32,
        protocol_version: u32,
        previous_ledger_hash: &[u8],
        matches: impl Fn(&Hash32) -> bool,
    ) -> Result<bool> {
        let policy = HashPolicy::select(ledger_seq, protocol_version);
        let computed = compute(policy, ledger_seq, previous_ledger_hash)?;
        if matches(&computed) {
            return Ok(true);
        }

        // The first ledger after an upgrade to generalized sets still closes
        // with the old rule. The gate is every non-genesis ledger >= 20, not
        // just the upgrade ledger.
        if protocol_version >= GENERALIZED_TX_SET_PROTOCOL && ledger_seq != 1 {
            trace!(
                ledger = ledger_seq,
                protocol = protocol_version,
                "generalized transaction set hash did not match, retrying with regular policy"
            );
            let fallback = compute(HashPolicy::Regular, ledger_seq, previous_ledger_hash)?;
            return Ok(matches(&fallback));
        }

        Ok(false)
    }
}

fn compute(policy: HashPolicy, ledger_seq: u32, previous_ledger_hash: &[u8]) -> Result<Hash32> {
    policy.compute(previous_ledger_hash).map_err(|err| {
        ScanError::new(
            err.kind(),
            format!("{policy:?} transaction set hash failed for ledger {ledger_seq}"),
        )
        .with_ledger(ledger_seq)
        .with_cause(err)
    })
}
