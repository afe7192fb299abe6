//! The historical rules for hashing an empty transaction set.
//!
//! Which rule applies is fixed by protocol history, so this is a closed enum
//! rather than a trait.

use crate::error::{Result, ScanError};
use crate::hashing::Hash32;
use crate::xdr::XdrWriter;

/// First protocol version whose transaction sets are generalized.
pub const GENERALIZED_TX_SET_PROTOCOL: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashPolicy {
    /// Ledger 1 has no predecessor; its transaction set hash is all zeroes.
    Genesis,
    /// `SHA-256(previous ledger header hash)`.
    Regular,
    /// `SHA-256` of the XDR of an empty v1 generalized transaction set.
    Generalized,
}

impl HashPolicy {
    pub fn select(ledger_seq: u32, protocol_version: u32) -> Self {
        if ledger_seq == 1 {
            HashPolicy::Genesis
        } else if protocol_version < GENERALIZED_TX_SET_PROTOCOL {
            HashPolicy::Regular
        } else {
            HashPolicy::Generalized
        }
    }

    pub fn compute(self, previous_ledger_hash: &[u8]) -> Result<Hash32> {
        match self {
            HashPolicy::Genesis => Ok(Hash32::ZERO),
            HashPolicy::Regular => Ok(Hash32::sha256(previous_ledger_hash)),
            HashPolicy::Generalized => {
                let xdr = empty_generalized_tx_set_xdr(previous_ledger_hash)?;
                Ok(Hash32::sha256(&xdr))
            }
        }
    }
}

/// `GeneralizedTransactionSet::v1(TransactionSetV1 { previousLedgerHash,
/// phases: [TransactionPhase::v0([]), TransactionPhase::v0([])] })`.
pub fn empty_generalized_tx_set_xdr(previous_ledger_hash: &[u8]) -> Result<Vec<u8>> {
    let previous = Hash32::from_slice(previous_ledger_hash).map_err(|err| {
        ScanError::parsing("cannot build generalized transaction set").with_cause(err)
    })?;

    let mut writer = XdrWriter::with_capacity(56);
    writer.put_i32(1);
    writer.put_hash(&previous);
    writer.put_u32(2);
    for _phase in 0..2 {
        writer.put_i32(0);
        writer.put_u32(0);
    }
    Ok(writer.into_bytes())
}
