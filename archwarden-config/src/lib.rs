//! Configuration for archwarden.
//!
//! Loads [`ScannerConfig`] from the environment or a TOML/JSON file, checks
//! it against guard rails, and maps the `archwarden-scan` command line onto a
//! config and a [`ScanRequest`](archwarden_core::ScanRequest).

#![allow(missing_docs)]

pub mod cli;
pub mod loader;
pub mod validation;

pub use archwarden_core::ScannerConfig;
pub use cli::ScanArgs;
pub use loader::{ConfigLoad, ConfigLoader, ConfigSource, load_env_file};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings, validate};
