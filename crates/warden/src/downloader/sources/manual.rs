//! Manual download origin
//!
//! Some hosts can only be fetched interactively in a browser. The engine
//! cannot poll them, so their archives sit on the trust side of the boundary:
//! liveness is assumed and verification always passes.

use std::path::Path;

use async_trait::async_trait;
use ini::Ini;
use serde::{Deserialize, Serialize};

use crate::downloader::error::{DownloadError, Result};
use crate::downloader::meta::general_section;
use crate::downloader::registry::Downloader;
use crate::downloader::sources::DownloadSource;
use crate::model::Archive;

/// Browser-only download source (the operator must provide the file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualSource {
    /// Page the operator fetches the file from
    pub url: String,
    /// Optional instructions shown alongside the URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl ManualSource {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            prompt: None,
        }
    }

    pub fn with_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct ManualDownloader;

#[async_trait]
impl Downloader for ManualDownloader {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn owns(&self, source: &DownloadSource) -> bool {
        matches!(source, DownloadSource::Manual(_))
    }

    async fn infer(&self, meta: &Ini, _quick: bool) -> Result<Option<DownloadSource>> {
        let Some(props) = general_section(meta) else {
            return Ok(None);
        };
        let Some(url) = props.get("manualURL") else {
            return Ok(None);
        };
        let mut source = ManualSource::new(url);
        if let Some(prompt) = props.get("prompt") {
            source = source.with_prompt(prompt);
        }
        Ok(Some(DownloadSource::Manual(source)))
    }

    async fn download(&self, archive: &Archive, _dest: &Path) -> Result<()> {
        match &archive.source {
            DownloadSource::Manual(manual) => Err(DownloadError::ManualIntervention {
                url: manual.url.clone(),
            }),
            other => Err(DownloadError::UnsupportedSource {
                description: other.describe(),
            }),
        }
    }

    async fn verify(&self, _archive: &Archive) -> Result<bool> {
        Ok(true)
    }
}
