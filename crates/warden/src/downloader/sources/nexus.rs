//! API-backed mod host origin
//!
//! Archives on this host are addressed by a game+mod+file triple. The host
//! publishes an authoritative availability feed, so validation never needs a
//! live call per archive; the API is used for session setup, full inference,
//! and on-demand liveness/download.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use ini::Ini;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::downloader::api::NexusApi;
use crate::downloader::error::{DownloadError, Result};
use crate::downloader::meta::{general_section, parse_id_field};
use crate::downloader::registry::{Consent, Downloader, Prompt};
use crate::downloader::sources::DownloadSource;
use crate::model::Archive;

/// Identity and display metadata for a mod-host archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NexusSource {
    /// Game domain (e.g. "SkyrimSpecialEdition")
    pub game: String,
    pub mod_id: u64,
    pub file_id: u64,
    /// Display fields; empty after a quick inference
    #[serde(default)]
    pub mod_name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub is_nsfw: bool,
}

impl NexusSource {
    pub fn new<S: Into<String>>(game: S, mod_id: u64, file_id: u64) -> Self {
        Self {
            game: game.into(),
            mod_id,
            file_id,
            mod_name: String::new(),
            author: String::new(),
            version: String::new(),
            is_nsfw: false,
        }
    }

    pub fn with_metadata<S: Into<String>>(
        mut self,
        mod_name: S,
        author: S,
        version: S,
        is_nsfw: bool,
    ) -> Self {
        self.mod_name = mod_name.into();
        self.author = author.into();
        self.version = version.into();
        self.is_nsfw = is_nsfw;
        self
    }
}

/// Downloader for the API-backed mod host
pub struct NexusDownloader {
    api: NexusApi,
    prompt: Arc<dyn Prompt>,
}

impl NexusDownloader {
    pub fn new(api: NexusApi, prompt: Arc<dyn Prompt>) -> Self {
        Self { api, prompt }
    }

    pub fn api(&self) -> &NexusApi {
        &self.api
    }

    fn source_of<'a>(&self, archive: &'a Archive) -> Result<&'a NexusSource> {
        match &archive.source {
            DownloadSource::Nexus(nexus) => Ok(nexus),
            other => Err(DownloadError::UnsupportedSource {
                description: other.describe(),
            }),
        }
    }
}

#[async_trait]
impl Downloader for NexusDownloader {
    fn name(&self) -> &'static str {
        "nexus"
    }

    fn owns(&self, source: &DownloadSource) -> bool {
        matches!(source, DownloadSource::Nexus(_))
    }

    async fn infer(&self, meta: &Ini, quick: bool) -> Result<Option<DownloadSource>> {
        let Some(props) = general_section(meta) else {
            return Ok(None);
        };
        let (Some(game), Some(mod_id), Some(file_id)) = (
            props.get("gameName"),
            parse_id_field(props, "modID")?,
            parse_id_field(props, "fileID")?,
        ) else {
            return Ok(None);
        };

        let source = NexusSource::new(game, mod_id, file_id);
        if quick {
            return Ok(Some(DownloadSource::Nexus(source)));
        }

        // Authoritative lookup: enrich with title/author/version or fail loudly
        let info = self
            .api
            .mod_info(game, mod_id)
            .await
            .map_err(|err| DownloadError::RemoteLookup {
                origin: "nexus",
                key: format!("{game}/{mod_id}"),
                message: err.to_string(),
            })?;
        Ok(Some(DownloadSource::Nexus(source.with_metadata(
            info.name,
            info.author,
            info.version,
            info.contains_adult_content,
        ))))
    }

    async fn prepare(&self) -> Result<()> {
        let user = self
            .api
            .validate_user()
            .await
            .map_err(|err| DownloadError::AuthFailed {
                origin: "nexus",
                message: err.to_string(),
            })?;
        info!(user = %user.name, premium = user.is_premium, "mod-host session validated");

        if !user.is_premium {
            let consent = self
                .prompt
                .ask_yes_no_abort(
                    "This account has no premium tier; downloads will be slower. Continue?",
                )
                .await;
            // Yes and No both proceed; only an explicit abort stops the origin
            if consent == Consent::Abort {
                return Err(DownloadError::Aborted { origin: "nexus" });
            }
        }
        Ok(())
    }

    async fn download(&self, archive: &Archive, dest: &Path) -> Result<()> {
        let source = self.source_of(archive)?;
        debug!(
            game = %source.game,
            mod_id = source.mod_id,
            file_id = source.file_id,
            "resolving download link"
        );

        // The files endpoint is also where download links hang off; a missing
        // file means the host dropped it since the last pass
        let info = self
            .api
            .file_info(&source.game, source.mod_id, source.file_id)
            .await?;
        let Some(info) = info else {
            warn!(key = %archive.source.primary_key(), "file vanished from host");
            return Err(DownloadError::HttpStatus {
                url: archive.source.describe(),
                status: 404,
            });
        };

        let link = self
            .api
            .download_link(&source.game, source.mod_id, source.file_id)
            .await?;
        debug!(file = %info.name, url = %link, "mod-host download starting");

        let response =
            reqwest::get(&link)
                .await
                .map_err(|err| DownloadError::HttpRequest {
                    url: link.clone(),
                    source: err,
                })?;
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url: link.clone(),
                status: response.status().as_u16(),
            });
        }

        let part_path = dest.with_extension("part");
        let mut file =
            fs::File::create(&part_path)
                .await
                .map_err(|err| DownloadError::FileSystem {
                    path: part_path.clone(),
                    source: err,
                })?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| DownloadError::HttpRequest {
                url: link.clone(),
                source: err,
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|err| DownloadError::FileSystem {
                    path: part_path.clone(),
                    source: err,
                })?;
        }
        file.flush()
            .await
            .map_err(|err| DownloadError::FileSystem {
                path: part_path.clone(),
                source: err,
            })?;
        fs::rename(&part_path, dest)
            .await
            .map_err(|err| DownloadError::FileSystem {
                path: dest.to_path_buf(),
                source: err,
            })
    }

    async fn verify(&self, archive: &Archive) -> Result<bool> {
        let source = self.source_of(archive)?;
        let info = self
            .api
            .file_info(&source.game, source.mod_id, source.file_id)
            .await?;
        Ok(info.is_some())
    }
}
