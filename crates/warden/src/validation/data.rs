//! Per-pass validation snapshot
//!
//! One snapshot is taken per pass and shared read-only across every
//! classification task: a set of identities the API-backed host currently
//! vouches for, and cached verdicts for origins without an authoritative
//! feed. Rebuilt fresh each pass by the snapshot provider.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::downloader::sources::NexusSource;
use crate::model::{Hash, ModList};

/// Identity triple the API-backed host publishes availability for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NexusKey {
    pub game: String,
    pub mod_id: u64,
    pub file_id: u64,
}

impl NexusKey {
    pub fn new<S: Into<String>>(game: S, mod_id: u64, file_id: u64) -> Self {
        Self {
            // Normalized so feed entries and archive identities compare equal
            game: game.into().to_lowercase(),
            mod_id,
            file_id,
        }
    }

    pub fn of(source: &NexusSource) -> Self {
        Self::new(source.game.as_str(), source.mod_id, source.file_id)
    }
}

/// Snapshot consumed by one validation pass
#[derive(Debug, Clone, Default)]
pub struct ValidationData {
    /// Identities the authoritative feed currently lists as available
    pub known_good: HashSet<NexusKey>,
    /// Cached per-archive verdicts for feed-less origins,
    /// keyed by `(primary_key, hash)`
    pub verdicts: HashMap<(String, Hash), bool>,
}

impl ValidationData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_known_good(&self, source: &NexusSource) -> bool {
        self.known_good.contains(&NexusKey::of(source))
    }

    /// Cached verdict for a feed-less origin; absence means unknown
    pub fn verdict(&self, primary_key: &str, hash: Hash) -> Option<bool> {
        self.verdicts
            .get(&(primary_key.to_string(), hash))
            .copied()
    }
}

/// External collaborator that owns modlists and builds the per-pass snapshot
#[async_trait]
pub trait ValidationDataProvider: Send + Sync {
    async fn mod_lists(&self) -> anyhow::Result<Vec<ModList>>;

    async fn validation_data(&self) -> anyhow::Result<ValidationData>;
}
