//! Configuration types for the validation engine

use std::time::Duration;

/// Configuration for validation passes
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Worker budget for fan-out; 0 means host-derived
    pub max_workers: usize,
    /// Deadline for a single external "find replacement" call
    pub updater_timeout: Duration,
    /// How repair attempts are serialized across the process
    pub repair_serialization: RepairSerialization,
    /// Acceptance policy for generic HTTP origins
    pub whitelist: ServerWhitelist,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            updater_timeout: Duration::from_secs(60),
            repair_serialization: RepairSerialization::Global,
            whitelist: ServerWhitelist::default(),
        }
    }
}

/// Granularity of the repair lock.
///
/// `Global` serializes every repair attempt in the process, which keeps the
/// upstream replacement-finding service to one request at a time. `PerHash`
/// only deduplicates concurrent attempts for the same content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairSerialization {
    Global,
    PerHash,
}

/// Acceptance policy for origins that point at arbitrary servers.
///
/// First-party-authoritative origins are always acceptable; a generic HTTP
/// URL is acceptable only when it starts with one of the allowed prefixes.
#[derive(Debug, Clone, Default)]
pub struct ServerWhitelist {
    pub allowed_prefixes: Vec<String>,
}

impl ServerWhitelist {
    pub fn new(allowed_prefixes: Vec<String>) -> Self {
        Self { allowed_prefixes }
    }

    /// Check whether the given URL falls under an allowed prefix
    pub fn allows_url(&self, url: &str) -> bool {
        self.allowed_prefixes
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()))
    }
}
