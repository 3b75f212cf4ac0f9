//! Archive origin types
//!
//! Each origin an archive can come from is defined in its own file along
//! with the downloader that services it. The closed enum below is the single
//! source of truth for origin identity: adding a host means adding a variant
//! here and registering its downloader, nothing else.

use ini::Ini;
use serde::{Deserialize, Serialize};

pub mod forum;
pub mod http;
pub mod manual;
pub mod nexus;

pub use forum::{ForumDownloader, ForumSource};
pub use http::{HttpDownloader, HttpSource};
pub use manual::{ManualDownloader, ManualSource};
pub use nexus::{NexusDownloader, NexusSource};

use crate::downloader::meta;

/// Origin-specific identity needed to re-locate an archive at its host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DownloadSource {
    /// API-backed mod host addressed by a game+mod+file triple
    Nexus(NexusSource),
    /// Forum-thread attachment behind a session login
    Forum(ForumSource),
    /// Plain HTTP(S) URL, subject to the server whitelist
    Http(HttpSource),
    /// Browser-only download the operator fetches by hand
    Manual(ManualSource),
}

impl DownloadSource {
    /// Short origin tag used in logs, errors, and primary keys
    pub fn origin(&self) -> &'static str {
        match self {
            DownloadSource::Nexus(_) => "nexus",
            DownloadSource::Forum(_) => "forum",
            DownloadSource::Http(_) => "http",
            DownloadSource::Manual(_) => "manual",
        }
    }

    /// Stable identity of the remote resource within its origin.
    ///
    /// An ordered tuple of the variant's identity fields. Used as the cache
    /// key for validation verdicts and for deduplication; never changes for
    /// a given archive, and survives the metadata round trip.
    pub fn primary_key(&self) -> String {
        match self {
            DownloadSource::Nexus(nexus) => format!(
                "nexus|{}|{}|{}",
                nexus.game.to_lowercase(),
                nexus.mod_id,
                nexus.file_id
            ),
            DownloadSource::Forum(forum) => format!(
                "forum|{}|{}|{}",
                forum.site,
                forum.thread_id,
                forum
                    .attachment_id
                    .map(|id| id.to_string())
                    .unwrap_or_default()
            ),
            DownloadSource::Http(http) => format!("http|{}", http.url),
            DownloadSource::Manual(manual) => format!("manual|{}", manual.url),
        }
    }

    /// Human-readable description for logs and UI
    pub fn describe(&self) -> String {
        match self {
            DownloadSource::Nexus(nexus) => format!(
                "Nexus mod {} file {} for {}",
                nexus.mod_id, nexus.file_id, nexus.game
            ),
            DownloadSource::Forum(forum) => {
                format!("forum thread {} on {}", forum.thread_id, forum.site)
            }
            DownloadSource::Http(http) => format!("HTTP download from {}", http.url),
            DownloadSource::Manual(manual) => format!("manual download from {}", manual.url),
        }
    }

    /// Emit the metadata record this source round-trips through
    pub fn to_meta(&self) -> Ini {
        let mut record = Ini::new();
        let mut general = record.with_section(Some(meta::GENERAL_SECTION));
        match self {
            DownloadSource::Nexus(nexus) => {
                general
                    .set("gameName", nexus.game.clone())
                    .set("modID", nexus.mod_id.to_string())
                    .set("fileID", nexus.file_id.to_string());
            }
            DownloadSource::Forum(forum) => {
                let setter = general
                    .set("forumSite", forum.site.clone())
                    .set("threadID", forum.thread_id.to_string());
                if let Some(attachment_id) = forum.attachment_id {
                    setter.set("attachmentID", attachment_id.to_string());
                }
            }
            DownloadSource::Http(http) => {
                let setter = general.set("directURL", http.url.clone());
                if !http.headers.is_empty() {
                    let joined = http
                        .headers
                        .iter()
                        .map(|(name, value)| format!("{name}: {value}"))
                        .collect::<Vec<_>>()
                        .join("|");
                    setter.set("headers", joined);
                }
            }
            DownloadSource::Manual(manual) => {
                let setter = general.set("manualURL", manual.url.clone());
                if let Some(ref prompt) = manual.prompt {
                    setter.set("prompt", prompt.clone());
                }
            }
        }
        record
    }

    /// Textual form of [`to_meta`](Self::to_meta)
    pub fn to_meta_string(&self) -> String {
        meta::meta_to_string(&self.to_meta())
    }

    /// Whether the origin requires an operator instead of a network fetch
    pub fn requires_operator(&self) -> bool {
        matches!(self, DownloadSource::Manual(_))
    }
}
