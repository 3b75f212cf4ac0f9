//! Warden Library
//!
//! This library keeps a catalog of externally-hosted mod archives installable
//! over time. For every tracked modlist it concurrently checks whether each
//! referenced archive is still retrievable from its origin host, and when it
//! is not, drives a "find a replacement" workflow against an external updater.
//!
//! # Features
//!
//! - **Multiple archive origins**: Nexus-style API hosts, forum-thread
//!   attachments, generic HTTP, and manual/browser-only downloads behind one
//!   `Downloader` contract
//! - **Bounded fan-out**: ordered `parallel_map` over a fixed-size worker
//!   budget with a live status broadcast for UIs and telemetry
//! - **Self-healing**: failed archives enter a serialized repair workflow
//!   that adopts replacements found by content hash
//! - **Per-pass snapshots**: classification runs against one immutable
//!   `ValidationData` snapshot, so results are consistent within a pass
//! - **Async/await**: full async support on the Tokio runtime

pub mod config;
pub mod downloader;
pub mod model;
pub mod queue;
pub mod validation;

// Re-export commonly used types for convenience
pub use config::{RepairSerialization, ServerWhitelist, ValidationConfig};
pub use downloader::{
    DownloadError, Downloader, DownloaderRegistry, Result,
    sources::DownloadSource,
};
pub use model::{Archive, Hash, ModList};
pub use queue::{QueueError, QueueStatus, WorkQueue};
pub use validation::{
    ArchiveStatus, ArchiveUpdater, DetailedStatus, ModListSummary, Replacement,
    ValidationData, ValidationDataProvider, ValidationService,
};
