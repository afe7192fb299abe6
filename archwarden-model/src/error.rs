use std::fmt::{self, Display};

/// Stable classification of everything a scan can fail on.
///
/// Callers map these onto their own status codes, so variants are only ever
/// added at the end and never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanErrorKind {
    ConnectionError,
    Timeout,
    /// Expected data is absent from the archive. This is the gap signal.
    NotFound,
    ParsingError,
    HashMismatch,
    UnsupportedVersion,
    UnspecifiedError,
}

impl ScanErrorKind {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, ScanErrorKind::ConnectionError | ScanErrorKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanErrorKind::ConnectionError => "connection_error",
            ScanErrorKind::Timeout => "timeout",
            ScanErrorKind::NotFound => "not_found",
            ScanErrorKind::ParsingError => "parsing_error",
            ScanErrorKind::HashMismatch => "hash_mismatch",
            ScanErrorKind::UnsupportedVersion => "unsupported_version",
            ScanErrorKind::UnspecifiedError => "unspecified_error",
        }
    }
}

impl Display for ScanErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable error detail attached to a report.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ScanErrorDetail {
    pub kind: ScanErrorKind,
    pub message: String,
    pub url: Option<String>,
    /// Checkpoint or ledger the error was raised for, when known.
    pub ledger: Option<u32>,
}

impl Display for ScanErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(url) = &self.url {
            write!(f, " ({url})")?;
        }
        Ok(())
    }
}
