#![allow(dead_code)]

pub mod archive;
pub mod fetcher;

pub use archive::{ArchiveSpec, SyntheticArchive};
pub use fetcher::MemoryFetcher;
