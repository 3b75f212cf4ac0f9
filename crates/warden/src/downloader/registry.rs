//! Downloader registry and dispatch
//!
//! The registry owns one downloader per origin, resolves an archive's source
//! to the implementation that services it, and sequences the once-per-process
//! `prepare` call before an origin is first used. Inference walks the
//! downloaders in registration order; the first one whose keys appear in the
//! metadata record claims it.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ini::Ini;
use once_cell::sync::OnceCell;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ServerWhitelist;
use crate::downloader::error::{DownloadError, Result};
use crate::downloader::sources::DownloadSource;
use crate::model::Archive;

/// Outcome of an optional-tier consent prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consent {
    Yes,
    No,
    Abort,
}

/// Human-in-the-loop collaborator for authentication consent decisions
#[async_trait]
pub trait Prompt: Send + Sync {
    async fn ask_yes_no_abort(&self, message: &str) -> Consent;
}

/// Consent source that approves every prompt; for headless deployments
#[derive(Debug, Default)]
pub struct AlwaysApprove;

#[async_trait]
impl Prompt for AlwaysApprove {
    async fn ask_yes_no_abort(&self, _message: &str) -> Consent {
        Consent::Yes
    }
}

/// Uniform lifecycle over heterogeneous archive origins.
///
/// Implementations return failures, never panic, for network and auth
/// problems; the caller decides whether an operation is retried (in this
/// engine: by being re-classified on the next validation pass).
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Origin tag; matches [`DownloadSource::origin`] of owned sources
    fn name(&self) -> &'static str;

    /// Whether this downloader services the given source variant
    fn owns(&self, source: &DownloadSource) -> bool;

    /// Parse a metadata record into this origin's source type.
    ///
    /// Returns `Ok(None)` when the record does not carry this origin's keys
    /// so dispatch can try the next downloader. With `quick` set, only
    /// locally-derivable fields are filled and no network round-trip is
    /// made; otherwise the authoritative remote lookup runs and its failure
    /// is a descriptive error.
    async fn infer(&self, meta: &Ini, quick: bool) -> Result<Option<DownloadSource>>;

    /// Authenticate or set up a session for this origin.
    ///
    /// Called at most once per process through the registry's single-flight
    /// guard. Origins without credentials keep the default no-op.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Fetch the archive payload to `dest`
    async fn download(&self, archive: &Archive, dest: &Path) -> Result<()>;

    /// Check the resource is still retrievable without downloading payload
    async fn verify(&self, archive: &Archive) -> Result<bool>;

    /// Origin-specific acceptance policy. First-party-authoritative origins
    /// accept unconditionally; URL-based origins consult the whitelist.
    fn is_whitelisted(&self, _source: &DownloadSource, _whitelist: &ServerWhitelist) -> bool {
        true
    }
}

struct RegisteredDownloader {
    downloader: Arc<dyn Downloader>,
    /// Recorded prepare outcome; write-once, then read-many without locking
    outcome: OnceCell<std::result::Result<(), String>>,
    /// Serializes concurrent first callers of `prepare`
    preparing: Mutex<()>,
}

impl RegisteredDownloader {
    fn recorded_outcome(&self) -> Option<Result<()>> {
        self.outcome.get().map(|outcome| match outcome {
            Ok(()) => Ok(()),
            Err(message) => Err(DownloadError::PrepareFailed {
                origin: self.downloader.name(),
                message: message.clone(),
            }),
        })
    }
}

/// Registry of downloaders; the single dispatch point for all origins
pub struct DownloaderRegistry {
    entries: Vec<RegisteredDownloader>,
}

impl DownloaderRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a downloader. Registration order is inference order.
    pub fn register<D: Downloader + 'static>(mut self, downloader: D) -> Self {
        self.entries.push(RegisteredDownloader {
            downloader: Arc::new(downloader),
            outcome: OnceCell::new(),
            preparing: Mutex::new(()),
        });
        self
    }

    fn entry_for(&self, source: &DownloadSource) -> Result<&RegisteredDownloader> {
        self.entries
            .iter()
            .find(|entry| entry.downloader.owns(source))
            .ok_or_else(|| DownloadError::UnsupportedSource {
                description: source.describe(),
            })
    }

    /// Parse a metadata record by trying every origin in registration order
    pub async fn infer(&self, meta: &Ini, quick: bool) -> Result<Option<DownloadSource>> {
        for entry in &self.entries {
            if let Some(source) = entry.downloader.infer(meta, quick).await? {
                return Ok(Some(source));
            }
        }
        Ok(None)
    }

    /// Run the origin's `prepare` exactly once per process.
    ///
    /// Fast path reads the recorded outcome without locking; first callers
    /// race for the guard, and the winner's result is recorded for everyone.
    /// A failed mandatory authentication stays failed for the process
    /// lifetime and is never retried.
    pub async fn ensure_prepared_for(&self, source: &DownloadSource) -> Result<()> {
        let entry = self.entry_for(source)?;
        if let Some(outcome) = entry.recorded_outcome() {
            return outcome;
        }

        let _guard = entry.preparing.lock().await;
        // Re-check under the lock: another caller may have finished meanwhile
        if let Some(outcome) = entry.recorded_outcome() {
            return outcome;
        }

        let name = entry.downloader.name();
        debug!(origin = name, "preparing origin");
        let result = entry.downloader.prepare().await;
        match &result {
            Ok(()) => debug!(origin = name, "origin prepared"),
            Err(err) => warn!(origin = name, error = %err, "origin preparation failed"),
        }
        let recorded = result.as_ref().map(|_| ()).map_err(|err| err.to_string());
        let _ = entry.outcome.set(recorded);
        result
    }

    /// Whether the origin's mandatory preparation has fatally failed
    pub fn origin_failed(&self, source: &DownloadSource) -> bool {
        self.entry_for(source)
            .ok()
            .and_then(|entry| entry.outcome.get())
            .map(|outcome| outcome.is_err())
            .unwrap_or(false)
    }

    /// Fetch an archive's payload, preparing its origin first if needed
    pub async fn download(&self, archive: &Archive, dest: &Path) -> Result<()> {
        let entry = self.entry_for(&archive.source)?;
        self.ensure_prepared_for(&archive.source).await?;
        entry.downloader.download(archive, dest).await
    }

    /// Check an archive is still retrievable, preparing its origin first
    pub async fn verify(&self, archive: &Archive) -> Result<bool> {
        let entry = self.entry_for(&archive.source)?;
        self.ensure_prepared_for(&archive.source).await?;
        entry.downloader.verify(archive).await
    }

    /// Apply the owning origin's acceptance policy
    pub fn is_whitelisted(&self, source: &DownloadSource, whitelist: &ServerWhitelist) -> bool {
        match self.entry_for(source) {
            Ok(entry) => entry.downloader.is_whitelisted(source, whitelist),
            Err(_) => false,
        }
    }
}

impl Default for DownloaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
