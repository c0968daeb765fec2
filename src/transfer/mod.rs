//! Binary transfer: streaming downloads, checksums, progress reporting
//!
//! Downloads land in a staging directory and are checksum-verified before
//! the cache ever sees them, so a torn or tampered transfer can never become
//! a cached entry.

pub mod downloader;
pub mod progress;

pub use downloader::{
    BinaryDownloader, BinaryFetcher, DownloadError, HttpFetcher, InMemoryFetcher, StagedDownload,
};
pub use progress::{CollectingProgress, NoOpProgress, ProgressHandler, TransferEvent};
