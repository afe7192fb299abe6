//! Just enough XDR to build and take apart the archive's history records.
//!
//! XDR is big-endian, 4-byte aligned; variable-length opaques carry a `u32`
//! length and are zero-padded to a multiple of four.

use thiserror::Error;

use crate::error::{ScanError, ScanErrorKind};
use crate::hashing::Hash32;

pub mod history;

pub use history::{LedgerHeaderEntry, TransactionEntry, TransactionResultEntry, TxSetPayload};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum XdrError {
    #[error("unexpected end of data at offset {offset}, {needed} more bytes needed")]
    UnexpectedEnd { offset: usize, needed: usize },
    #[error("{what} length {length} exceeds limit {limit}")]
    LengthLimit {
        what: &'static str,
        length: u32,
        limit: u32,
    },
    #[error("unknown {what} discriminant {value}")]
    UnknownDiscriminant { what: &'static str, value: i32 },
    #[error("non-zero padding at offset {offset}")]
    Padding { offset: usize },
    #[error("{remaining} trailing bytes after {what}")]
    TrailingBytes { what: &'static str, remaining: usize },
}

impl From<XdrError> for ScanError {
    fn from(err: XdrError) -> Self {
        let kind = match err {
            XdrError::UnknownDiscriminant { .. } => ScanErrorKind::UnsupportedVersion,
            _ => ScanErrorKind::ParsingError,
        };
        ScanError::new(kind, "malformed XDR record").with_cause(err)
    }
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

#[derive(Debug, Default)]
pub struct XdrWriter {
    buf: Vec<u8>,
}

impl XdrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_hash(&mut self, hash: &Hash32) {
        self.buf.extend_from_slice(hash.as_bytes());
    }

    /// Appends bytes verbatim, e.g. an already encoded nested value.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_var_opaque(&mut self, bytes: &[u8]) {
        self.put_u32(u32::try_from(bytes.len()).unwrap_or(u32::MAX));
        self.buf.extend_from_slice(bytes);
        self.buf.extend(std::iter::repeat_n(0u8, padding(bytes.len())));
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Forward-only reader over one XDR value.
#[derive(Debug)]
pub struct XdrCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> XdrCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], XdrError> {
        if self.remaining() < n {
            return Err(XdrError::UnexpectedEnd {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], XdrError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u32(&mut self) -> Result<u32, XdrError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, XdrError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, XdrError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn read_hash(&mut self) -> Result<Hash32, XdrError> {
        Ok(Hash32::from_bytes(self.take_array()?))
    }

    pub fn read_var_opaque(&mut self, what: &'static str, limit: u32) -> Result<&'a [u8], XdrError> {
        let length = self.read_u32()?;
        if length > limit {
            return Err(XdrError::LengthLimit {
                what,
                length,
                limit,
            });
        }
        let body = self.take(length as usize)?;
        let pad_offset = self.pos;
        if self.take(padding(length as usize))?.iter().any(|b| *b != 0) {
            return Err(XdrError::Padding { offset: pad_offset });
        }
        Ok(body)
    }

    pub fn expect_end(&self, what: &'static str) -> Result<(), XdrError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(XdrError::TrailingBytes { what, remaining }),
        }
    }
}
