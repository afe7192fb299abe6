//! Incremental reader for record-marked streams.
//!
//! Category files are a concatenation of records, each preceded by a 4-byte
//! big-endian length whose top bit is the "last fragment" marker of XDR
//! record marking. The reader is fed chunks as they arrive and hands out
//! complete records; it knows nothing about the transport or the contents.

use thiserror::Error;

use crate::error::ScanError;

const LENGTH_PREFIX: usize = 4;
const CONTINUATION_BIT: u32 = 0x8000_0000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("stream ended inside a length prefix ({buffered} of 4 bytes)")]
    TruncatedPrefix { buffered: usize },
    #[error("stream ended inside a record ({available} of {expected} bytes)")]
    TruncatedRecord { expected: usize, available: usize },
}

impl From<FrameError> for ScanError {
    fn from(err: FrameError) -> Self {
        ScanError::parsing("framing error").with_cause(err)
    }
}

/// One record, without its length prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Carry-over state for one stream. Build a new reader per stream.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
    /// Bytes at the front of `buffer` already handed out.
    consumed: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next chunk of the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.consumed > 0 && self.consumed >= self.buffer.len() / 2 {
            self.buffer.drain(..self.consumed);
            self.consumed = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete record, or `None` until more input arrives.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let pending = &self.buffer[self.consumed..];
        let length = declared_length(pending)?;
        let end = LENGTH_PREFIX + length;
        if pending.len() < end {
            return None;
        }
        let frame = Frame(pending[LENGTH_PREFIX..end].to_vec());
        self.consumed += end;
        Some(frame)
    }

    /// Iterator over the records completed so far.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { reader: self }
    }

    /// Bytes held back waiting for the rest of a record.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    /// Signals end of stream. Leftover bytes mean the last record was cut.
    pub fn finish(self) -> Result<(), FrameError> {
        let pending = &self.buffer[self.consumed..];
        match pending.len() {
            0 => Ok(()),
            n if n < LENGTH_PREFIX => Err(FrameError::TruncatedPrefix { buffered: n }),
            n => Err(FrameError::TruncatedRecord {
                expected: declared_length(pending).unwrap_or_default(),
                available: n - LENGTH_PREFIX,
            }),
        }
    }
}

#[derive(Debug)]
pub struct Frames<'a> {
    reader: &'a mut FrameReader,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.reader.next_frame()
    }
}

fn declared_length(pending: &[u8]) -> Option<usize> {
    let prefix: [u8; LENGTH_PREFIX] = pending.get(..LENGTH_PREFIX)?.try_into().ok()?;
    Some((u32::from_be_bytes(prefix) & !CONTINUATION_BIT) as usize)
}

/// Splits a fully buffered stream.
pub fn read_frames(bytes: &[u8]) -> Result<Vec<Frame>, FrameError> {
    let mut reader = FrameReader::new();
    reader.push(bytes);
    let frames: Vec<Frame> = reader.frames().collect();
    reader.finish()?;
    Ok(frames)
}

/// Record-marks `payload` as a single, final fragment.
pub fn encode_frame(payload: &[u8], out: &mut Vec<u8>) {
    let length = u32::try_from(payload.len()).unwrap_or(u32::MAX) & !CONTINUATION_BIT;
    out.extend_from_slice(&(length | CONTINUATION_BIT).to_be_bytes());
    out.extend_from_slice(payload);
}
