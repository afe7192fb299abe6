use std::error::Error as StdError;
use std::fmt;

pub use archwarden_model::{ScanErrorDetail, ScanErrorKind};

type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

/// Error raised anywhere inside the scan engine.
///
/// Carries a stable [`ScanErrorKind`] plus an optional owned cause. The
/// `Display` impl prints only this level; [`ScanError::full_message`] walks
/// the chain.
#[derive(Debug)]
pub struct ScanError {
    kind: ScanErrorKind,
    message: String,
    url: Option<String>,
    ledger: Option<u32>,
    cause: Option<BoxedCause>,
}

impl ScanError {
    pub fn new(kind: ScanErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            url: None,
            ledger: None,
            cause: None,
        }
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::ParsingError, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::UnsupportedVersion, message)
    }

    pub fn unspecified(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::UnspecifiedError, message)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Attaches a ledger unless one was already set closer to the failure.
    pub fn with_ledger(mut self, ledger: u32) -> Self {
        self.ledger.get_or_insert(ledger);
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> ScanErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn ledger(&self) -> Option<u32> {
        self.ledger
    }

    pub fn is_gap(&self) -> bool {
        self.kind == ScanErrorKind::NotFound
    }

    /// This message followed by every cause, joined with `": "`.
    pub fn full_message(&self) -> String {
        let mut out = self.message.clone();
        let mut next: Option<&(dyn StdError + 'static)> = self.source();
        while let Some(cause) = next {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            next = cause.source();
        }
        out
    }

    pub fn to_detail(&self) -> ScanErrorDetail {
        ScanErrorDetail {
            kind: self.kind,
            message: self.full_message(),
            url: self.url.clone(),
            ledger: self.ledger,
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for ScanError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::parsing("invalid JSON document").with_cause(err)
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("socket closed")]
    struct Leaf;

    #[derive(Debug, thiserror::Error)]
    #[error("read failed")]
    struct Middle(#[source] Leaf);

    #[test]
    fn full_message_walks_every_cause() {
        let err = ScanError::new(ScanErrorKind::ConnectionError, "fetch ledger file")
            .with_url("https://archive.test/ledger")
            .with_cause(Middle(Leaf));

        assert_eq!(err.to_string(), "connection_error: fetch ledger file");
        assert_eq!(
            err.full_message(),
            "fetch ledger file: read failed: socket closed"
        );

        let detail = err.to_detail();
        assert_eq!(detail.kind, ScanErrorKind::ConnectionError);
        assert_eq!(detail.url.as_deref(), Some("https://archive.test/ledger"));
    }

    #[test]
    fn first_ledger_sticks() {
        let err = ScanError::parsing("bad frame").with_ledger(70).with_ledger(127);
        assert_eq!(err.ledger(), Some(70));
    }
}
