//! Digests, hash policies and transaction set verification.

use std::fmt;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use sha2::{Digest, Sha256};

use crate::error::{Result, ScanError};

pub mod policy;
pub mod verifier;

pub use policy::HashPolicy;
pub use verifier::{HashVerificationResult, TransactionSetHashVerifier};

/// A 32-byte SHA-256 digest, as used for every hash in the archive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash32([u8; 32]);

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            ScanError::parsing(format!("expected a 32-byte hash, got {} bytes", bytes.len()))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn sha256(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// SHA-256 over several buffers, as if concatenated.
    pub fn sha256_concat<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|err| ScanError::parsing(format!("invalid hex hash {s:?}: {err}")))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; 32]> for Hash32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decodes base64 the forgiving way archive tooling does: URL-safe symbols
/// are accepted, padding is optional, anything outside the alphabet is
/// skipped and a dangling sextet at the end is dropped.
pub fn decode_base64_lenient(input: &str) -> Vec<u8> {
    let mut symbols: String = input
        .chars()
        .take_while(|c| *c != '=')
        .filter_map(|c| match c {
            '-' => Some('+'),
            '_' => Some('/'),
            c if c.is_ascii_alphanumeric() || c == '+' || c == '/' => Some(c),
            _ => None,
        })
        .collect();
    if symbols.len() % 4 == 1 {
        symbols.pop();
    }
    LENIENT.decode(symbols).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip_and_errors() {
        let hash = Hash32::sha256(b"bucket");
        assert_eq!(Hash32::from_hex(&hash.to_hex()).expect("hex"), hash);
        assert!(Hash32::from_hex("abcd").is_err());
        let err = Hash32::from_hex(&"zz".repeat(32)).expect_err("not hex");
        assert_eq!(err.kind(), crate::error::ScanErrorKind::ParsingError);
        assert!(err.to_string().contains("invalid hex hash"), "{err}");
    }

    #[test]
    fn concat_matches_single_buffer() {
        let joined = Hash32::sha256(b"currsnap");
        let parts = Hash32::sha256_concat([b"curr".as_slice(), b"snap".as_slice()]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn lenient_base64_accepts_url_safe_and_partial_input() {
        assert_eq!(decode_base64_lenient("test-hash"), vec![0xb5, 0xeb, 0x2d, 0xfa, 0x16, 0xac]);
        assert_eq!(decode_base64_lenient("AAAA"), vec![0, 0, 0]);
        assert_eq!(decode_base64_lenient("AAA"), vec![0, 0]);
        assert_eq!(decode_base64_lenient("AAAAAA=="), vec![0, 0, 0, 0]);
        assert_eq!(
            decode_base64_lenient(&Hash32::ZERO.to_base64()),
            vec![0u8; 32]
        );
    }
}
