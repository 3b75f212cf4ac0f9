//! Validation and self-healing passes
//!
//! A pass fans out across modlists, then across each list's archives, over
//! the shared work queue. Every archive gets classified against the pass
//! snapshot; repair candidates go through the serialized replacement lookup.
//! Per-archive failures become status values, never errors, so one bad
//! archive cannot abort a pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ValidationConfig;
use crate::downloader::registry::DownloaderRegistry;
use crate::downloader::sources::DownloadSource;
use crate::model::{Archive, ModList};
use crate::queue::{QueueError, WorkQueue};
use crate::validation::data::{ValidationData, ValidationDataProvider};
use crate::validation::repair::{ArchiveUpdater, RepairLock, Replacement};
use crate::validation::status::{
    ArchiveStatus, DetailedStatus, DetailedStatusItem, ModListSummary,
};

/// Errors that abort a whole pass
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("validation pass cancelled")]
    Cancelled,

    #[error("validation snapshot provider failed")]
    Provider(#[source] anyhow::Error),
}

/// Process-lifetime counters for checks and repairs
#[derive(Debug, Default)]
pub struct PassMetrics {
    archives_checked: AtomicU64,
    repair_attempts: AtomicU64,
    repairs_adopted: AtomicU64,
    repairs_pending: AtomicU64,
}

impl PassMetrics {
    fn record_checked(&self) {
        self.archives_checked.fetch_add(1, Ordering::Relaxed);
    }

    fn record_repair_attempt(&self) {
        self.repair_attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_repair_adopted(&self) {
        self.repairs_adopted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_repair_pending(&self) {
        self.repairs_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PassMetricsSnapshot {
        PassMetricsSnapshot {
            archives_checked: self.archives_checked.load(Ordering::Relaxed),
            repair_attempts: self.repair_attempts.load(Ordering::Relaxed),
            repairs_adopted: self.repairs_adopted.load(Ordering::Relaxed),
            repairs_pending: self.repairs_pending.load(Ordering::Relaxed),
        }
    }
}

/// Immutable metrics reading
#[derive(Debug, Clone, Copy)]
pub struct PassMetricsSnapshot {
    pub archives_checked: u64,
    pub repair_attempts: u64,
    pub repairs_adopted: u64,
    pub repairs_pending: u64,
}

struct PassResults {
    summaries: Vec<ModListSummary>,
    detailed: Vec<DetailedStatus>,
}

/// Keeps every tracked modlist's archives classified and repaired
pub struct ValidationService {
    config: ValidationConfig,
    queue: WorkQueue,
    registry: Arc<DownloaderRegistry>,
    provider: Arc<dyn ValidationDataProvider>,
    updater: Arc<dyn ArchiveUpdater>,
    repair_lock: RepairLock,
    cancel: CancellationToken,
    metrics: PassMetrics,
    results: RwLock<Option<PassResults>>,
    /// Serializes whole passes so lazy triggering cannot stack them
    pass_guard: Mutex<()>,
}

impl ValidationService {
    pub fn new(
        config: ValidationConfig,
        registry: Arc<DownloaderRegistry>,
        provider: Arc<dyn ValidationDataProvider>,
        updater: Arc<dyn ArchiveUpdater>,
    ) -> Self {
        let queue = WorkQueue::new(config.max_workers);
        let repair_lock = RepairLock::new(config.repair_serialization);
        Self {
            config,
            queue,
            registry,
            provider,
            updater,
            repair_lock,
            cancel: CancellationToken::new(),
            metrics: PassMetrics::default(),
            results: RwLock::new(None),
            pass_guard: Mutex::new(()),
        }
    }

    /// The queue driving fan-out; subscribe here for live progress
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Token collaborators trigger to wind the service down cooperatively
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn metrics(&self) -> PassMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Cancel outstanding work and drain the queue
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.queue.shutdown().await;
    }

    /// Run one full validation pass and cache its results
    pub async fn run_pass(&self) -> Result<(), ValidationError> {
        let _pass = self.pass_guard.lock().await;
        self.run_pass_locked().await
    }

    async fn run_pass_locked(&self) -> Result<(), ValidationError> {
        let lists = self
            .provider
            .mod_lists()
            .await
            .map_err(ValidationError::Provider)?;
        let data = Arc::new(
            self.provider
                .validation_data()
                .await
                .map_err(ValidationError::Provider)?,
        );
        info!(lists = lists.len(), "validation pass starting");

        let outcomes = self
            .queue
            .parallel_map("validate modlists", lists, |list| {
                let data = Arc::clone(&data);
                async move {
                    if self.cancel.is_cancelled() {
                        return Err(ValidationError::Cancelled);
                    }
                    self.validate_list(data, list).await
                }
            })
            .await?;

        let mut summaries = Vec::with_capacity(outcomes.len());
        let mut detailed = Vec::with_capacity(outcomes.len());
        for (summary, status) in outcomes {
            summaries.push(summary);
            detailed.push(status);
        }
        let failing = summaries.iter().filter(|s| s.has_failures()).count();
        info!(lists = summaries.len(), failing, "validation pass complete");

        *self.results.write().await = Some(PassResults { summaries, detailed });
        Ok(())
    }

    async fn validate_list(
        &self,
        data: Arc<ValidationData>,
        list: ModList,
    ) -> Result<(ModListSummary, DetailedStatus), ValidationError> {
        let ModList {
            machine_url,
            title,
            archives,
        } = list;
        let label = format!("check {machine_url}");

        // Inner fan-out; result indices line up with the list's archive order
        let outcomes: Vec<(Archive, ArchiveStatus)> = self
            .queue
            .parallel_map(&label, archives, |archive| {
                let data = Arc::clone(&data);
                async move {
                    if self.cancel.is_cancelled() {
                        return Err(ValidationError::Cancelled);
                    }
                    let status = self.check_archive(&data, &archive).await;
                    Ok((archive, status))
                }
            })
            .await?;

        let checked = Utc::now();
        let mut passed = 0;
        let mut failed = 0;
        let mut updating = 0;
        let mut items = Vec::with_capacity(outcomes.len());
        for (archive, status) in outcomes {
            if status.counts_as_passed() {
                passed += 1;
            } else if status == ArchiveStatus::Updating {
                updating += 1;
            } else {
                failed += 1;
            }
            items.push(DetailedStatusItem {
                is_failing: status.is_failing(),
                status,
                archive,
            });
        }

        debug!(
            list = %machine_url,
            passed, failed, updating,
            "modlist classified"
        );
        let summary = ModListSummary {
            machine_url: machine_url.clone(),
            title: title.clone(),
            checked,
            passed,
            failed,
            updating,
        };
        let status = DetailedStatus {
            machine_url,
            title,
            checked,
            archives: items,
        };
        Ok((summary, status))
    }

    /// Classify one archive against the pass snapshot
    async fn check_archive(&self, data: &ValidationData, archive: &Archive) -> ArchiveStatus {
        self.metrics.record_checked();

        // Trust boundary: a browser-only host cannot be polled, so its
        // archives are assumed live
        if archive.source.requires_operator() {
            return ArchiveStatus::Valid;
        }

        // An origin whose mandatory auth failed cannot vouch for anything;
        // its archives go straight to the repair path
        if self
            .registry
            .ensure_prepared_for(&archive.source)
            .await
            .is_err()
        {
            return self.try_to_fix(archive).await;
        }

        let healthy = match &archive.source {
            // The authoritative feed wins over any cached verdict
            DownloadSource::Nexus(nexus) => data.is_known_good(nexus),
            // Everything else: cached verdict, where unknown is not good
            source => data
                .verdict(&source.primary_key(), archive.hash)
                .unwrap_or(false),
        };
        if healthy {
            ArchiveStatus::Valid
        } else {
            self.try_to_fix(archive).await
        }
    }

    /// Ask the external updater for a replacement, under the repair lock
    async fn try_to_fix(&self, archive: &Archive) -> ArchiveStatus {
        if self.cancel.is_cancelled() {
            return ArchiveStatus::Invalid;
        }

        let _guard = self.repair_lock.acquire(archive.hash).await;
        self.metrics.record_repair_attempt();
        debug!(archive = %archive.name, hash = %archive.hash, "searching for replacement");

        // The deadline and the cancellation token both bound the time the
        // shared lock can be held by one lookup
        let lookup = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = timeout(
                self.config.updater_timeout,
                self.updater.find_replacement(archive.hash),
            ) => Some(result),
        };

        match lookup {
            Some(Ok(Ok(Replacement::Found(replacement)))) => {
                info!(
                    archive = %archive.name,
                    replacement = %replacement.name,
                    "replacement adopted"
                );
                self.metrics.record_repair_adopted();
                ArchiveStatus::Updated
            }
            Some(Ok(Ok(Replacement::Accepted))) => {
                debug!(archive = %archive.name, "replacement request accepted, pending");
                self.metrics.record_repair_pending();
                ArchiveStatus::Updating
            }
            Some(Ok(Ok(Replacement::NotFound))) => ArchiveStatus::Invalid,
            Some(Ok(Err(err))) => {
                warn!(archive = %archive.name, error = %err, "replacement lookup failed");
                ArchiveStatus::Invalid
            }
            Some(Err(_)) => {
                warn!(archive = %archive.name, "replacement lookup timed out");
                ArchiveStatus::Invalid
            }
            None => ArchiveStatus::Invalid,
        }
    }

    async fn ensure_results(&self) -> Result<(), ValidationError> {
        if self.results.read().await.is_some() {
            return Ok(());
        }
        let _pass = self.pass_guard.lock().await;
        // Re-check under the guard: a racing caller may have finished a pass
        if self.results.read().await.is_some() {
            return Ok(());
        }
        self.run_pass_locked().await
    }

    /// Aggregate counts for every tracked modlist, from the latest pass.
    /// Runs a pass first when none has completed yet.
    pub async fn summaries(&self) -> Result<Vec<ModListSummary>, ValidationError> {
        self.ensure_results().await?;
        let guard = self.results.read().await;
        Ok(guard
            .as_ref()
            .map(|results| results.summaries.clone())
            .unwrap_or_default())
    }

    /// Per-archive reports for every tracked modlist, from the latest pass
    pub async fn detailed_statuses(&self) -> Result<Vec<DetailedStatus>, ValidationError> {
        self.ensure_results().await?;
        let guard = self.results.read().await;
        Ok(guard
            .as_ref()
            .map(|results| results.detailed.clone())
            .unwrap_or_default())
    }

    /// Report for one modlist by machine name; unknown names are `None`
    pub async fn detailed_status(
        &self,
        machine_url: &str,
    ) -> Result<Option<DetailedStatus>, ValidationError> {
        self.ensure_results().await?;
        let guard = self.results.read().await;
        Ok(guard.as_ref().and_then(|results| {
            results
                .detailed
                .iter()
                .find(|status| status.machine_url == machine_url)
                .cloned()
        }))
    }
}
