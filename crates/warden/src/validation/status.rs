//! Per-pass health reports
//!
//! Everything here is derived: recomputed on every pass, never persisted by
//! this crate. History and rendering belong to external collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Archive;

/// Health of one archive, re-evaluated every pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveStatus {
    /// Origin check passed
    Valid,
    /// Origin check failed and no repair was found this pass
    Invalid,
    /// A replacement request was accepted but has not materialized yet
    Updating,
    /// A replacement was found and adopted this pass
    Updated,
}

impl ArchiveStatus {
    /// Whether the archive blocks installation right now
    pub fn is_failing(&self) -> bool {
        matches!(self, ArchiveStatus::Invalid)
    }

    /// An adopted replacement counts as installable
    pub fn counts_as_passed(&self) -> bool {
        matches!(self, ArchiveStatus::Valid | ArchiveStatus::Updated)
    }
}

/// Aggregate counts for one modlist in one pass.
///
/// `passed + failed + updating` always equals the list's archive count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModListSummary {
    pub machine_url: String,
    pub title: String,
    pub checked: DateTime<Utc>,
    pub passed: usize,
    pub failed: usize,
    pub updating: usize,
}

impl ModListSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.updating
    }
}

/// Per-archive breakdown for one modlist in one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedStatusItem {
    pub archive: Archive,
    pub status: ArchiveStatus,
    pub is_failing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedStatus {
    pub machine_url: String,
    pub title: String,
    pub checked: DateTime<Utc>,
    pub archives: Vec<DetailedStatusItem>,
}
