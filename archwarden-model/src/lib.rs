//! Data model for history archive scan results.
//!
//! These are the shapes handed to storage, API and CLI layers. The engine in
//! `archwarden-core` produces them; nothing in here performs I/O.
#![allow(missing_docs)]

pub mod error;
pub mod scan;

pub use error::{ScanErrorDetail, ScanErrorKind};
pub use scan::{
    GapLocation, HashKind, HashMismatch, RangeReport, ScanReport, ScanStatus,
};
