//! Downloader framework
//!
//! One downloader per archive origin behind a uniform contract: parse
//! identity from metadata, authenticate once, download, verify liveness.
//! The registry dispatches by source variant and guards preparation.

pub mod api;
pub mod error;
pub mod meta;
pub mod registry;
pub mod sources;

// Re-export main types for convenience
pub use error::{DownloadError, Result};
pub use registry::{AlwaysApprove, Consent, Downloader, DownloaderRegistry, Prompt};
pub use sources::{
    DownloadSource, ForumDownloader, ForumSource, HttpDownloader, HttpSource, ManualDownloader,
    ManualSource, NexusDownloader, NexusSource,
};
