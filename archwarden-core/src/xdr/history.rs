//! Decoders for the three history entries stored in checkpoint category
//! files.
//!
//! Only the fields the verifier needs are decoded. Anything after them is
//! kept as raw bytes so hashes are taken over exactly what the archive
//! published.

use crate::hashing::Hash32;
use crate::xdr::{XdrCursor, XdrError};

/// XDR of a `TransactionResultSet` with no results.
pub const EMPTY_RESULT_SET_XDR: [u8; 4] = [0, 0, 0, 0];

const UPGRADES_MAX: u32 = 6;
const UPGRADE_MAX_BYTES: u32 = 128;
const SIGNATURE_MAX_BYTES: u32 = 64;
const EXT_BYTES: usize = 4;

/// One `LedgerHeaderHistoryEntry`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerHeaderEntry {
    /// Hash the archive claims for this header.
    pub hash: Hash32,
    pub ledger_version: u32,
    pub previous_ledger_hash: Hash32,
    pub tx_set_hash: Hash32,
    pub close_time: u64,
    pub tx_set_result_hash: Hash32,
    pub bucket_list_hash: Hash32,
    pub ledger_seq: u32,
    /// The `LedgerHeader` exactly as stored; its SHA-256 must equal `hash`.
    pub header_xdr: Vec<u8>,
}

impl LedgerHeaderEntry {
    pub fn decode(frame: &[u8]) -> Result<Self, XdrError> {
        let mut cursor = XdrCursor::new(frame);
        let hash = cursor.read_hash()?;
        let header_len = trailing_ext(frame, cursor.position(), "ledger header entry ext")?;
        let header_xdr = cursor.take(header_len)?;

        let mut header = XdrCursor::new(header_xdr);
        let ledger_version = header.read_u32()?;
        let previous_ledger_hash = header.read_hash()?;

        // StellarValue
        let tx_set_hash = header.read_hash()?;
        let close_time = header.read_u64()?;
        let upgrades = header.read_u32()?;
        if upgrades > UPGRADES_MAX {
            return Err(XdrError::LengthLimit {
                what: "upgrades",
                length: upgrades,
                limit: UPGRADES_MAX,
            });
        }
        for _ in 0..upgrades {
            header.read_var_opaque("upgrade", UPGRADE_MAX_BYTES)?;
        }
        match header.read_i32()? {
            0 => {}
            1 => {
                match header.read_i32()? {
                    0 => {
                        header.take(32)?;
                    }
                    value => {
                        return Err(XdrError::UnknownDiscriminant {
                            what: "public key type",
                            value,
                        });
                    }
                }
                header.read_var_opaque("signature", SIGNATURE_MAX_BYTES)?;
            }
            value => {
                return Err(XdrError::UnknownDiscriminant {
                    what: "stellar value ext",
                    value,
                });
            }
        }

        let tx_set_result_hash = header.read_hash()?;
        let bucket_list_hash = header.read_hash()?;
        let ledger_seq = header.read_u32()?;

        Ok(Self {
            hash,
            ledger_version,
            previous_ledger_hash,
            tx_set_hash,
            close_time,
            tx_set_result_hash,
            bucket_list_hash,
            ledger_seq,
            header_xdr: header_xdr.to_vec(),
        })
    }
}

/// Transaction set carried by a `TransactionHistoryEntry`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxSetPayload {
    /// Pre-generalized `TransactionSet`. When it holds transactions the
    /// envelopes are not decoded, so the entry extension cannot be located.
    Legacy {
        previous_ledger_hash: Hash32,
        tx_count: u32,
    },
    /// `GeneralizedTransactionSet` from the entry extension, as stored.
    Generalized { xdr: Vec<u8> },
}

/// One `TransactionHistoryEntry`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionEntry {
    pub ledger_seq: u32,
    pub tx_set: TxSetPayload,
}

impl TransactionEntry {
    pub fn decode(frame: &[u8]) -> Result<Self, XdrError> {
        let mut cursor = XdrCursor::new(frame);
        let ledger_seq = cursor.read_u32()?;
        let previous_ledger_hash = cursor.read_hash()?;
        let tx_count = cursor.read_u32()?;
        let legacy = TxSetPayload::Legacy {
            previous_ledger_hash,
            tx_count,
        };
        if tx_count > 0 {
            return Ok(Self {
                ledger_seq,
                tx_set: legacy,
            });
        }

        let tx_set = match cursor.read_i32()? {
            0 => {
                cursor.expect_end("transaction history entry")?;
                legacy
            }
            1 => {
                let xdr = cursor.rest();
                match XdrCursor::new(xdr).read_i32()? {
                    1 => TxSetPayload::Generalized { xdr: xdr.to_vec() },
                    value => {
                        return Err(XdrError::UnknownDiscriminant {
                            what: "generalized transaction set",
                            value,
                        });
                    }
                }
            }
            value => {
                return Err(XdrError::UnknownDiscriminant {
                    what: "transaction history entry ext",
                    value,
                });
            }
        };
        Ok(Self { ledger_seq, tx_set })
    }
}

/// One `TransactionHistoryResultEntry`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionResultEntry {
    pub ledger_seq: u32,
    /// The `TransactionResultSet` as stored; hashed against the header's
    /// `txSetResultHash`.
    pub result_set_xdr: Vec<u8>,
}

impl TransactionResultEntry {
    pub fn decode(frame: &[u8]) -> Result<Self, XdrError> {
        let mut cursor = XdrCursor::new(frame);
        let ledger_seq = cursor.read_u32()?;
        let body_len = trailing_ext(frame, cursor.position(), "result history entry ext")?;
        let result_set_xdr = cursor.take(body_len)?.to_vec();
        Ok(Self {
            ledger_seq,
            result_set_xdr,
        })
    }
}

/// Length of the body between `start` and a trailing void extension.
fn trailing_ext(frame: &[u8], start: usize, what: &'static str) -> Result<usize, XdrError> {
    let body_end = frame
        .len()
        .checked_sub(EXT_BYTES)
        .filter(|end| *end >= start)
        .ok_or(XdrError::UnexpectedEnd {
            offset: frame.len(),
            needed: (start + EXT_BYTES).saturating_sub(frame.len()),
        })?;
    let mut ext = XdrCursor::new(&frame[body_end..]);
    match ext.read_i32()? {
        0 => Ok(body_end - start),
        value => Err(XdrError::UnknownDiscriminant { what, value }),
    }
}
