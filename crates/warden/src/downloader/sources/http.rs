//! Generic HTTP download origin

use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use ini::Ini;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::ServerWhitelist;
use crate::downloader::error::{DownloadError, Result};
use crate::downloader::meta::general_section;
use crate::downloader::registry::Downloader;
use crate::downloader::sources::DownloadSource;
use crate::model::Archive;

/// Plain HTTP(S) download source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSource {
    /// Download URL
    pub url: String,
    /// Extra request headers, in send order
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl HttpSource {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Downloader for arbitrary HTTP servers.
///
/// The only origin with no authoritative availability feed: liveness comes
/// from per-archive verdicts cached by the snapshot provider, and acceptance
/// is gated on the server whitelist.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| DownloadError::ClientBuild { source })?;
        Ok(Self { client })
    }

    fn request(&self, method: reqwest::Method, source: &HttpSource) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, &source.url);
        for (name, value) in &source.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }

    fn source_of<'a>(&self, archive: &'a Archive) -> Result<&'a HttpSource> {
        match &archive.source {
            DownloadSource::Http(http) => Ok(http),
            other => Err(DownloadError::UnsupportedSource {
                description: other.describe(),
            }),
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn name(&self) -> &'static str {
        "http"
    }

    fn owns(&self, source: &DownloadSource) -> bool {
        matches!(source, DownloadSource::Http(_))
    }

    async fn infer(&self, meta: &Ini, _quick: bool) -> Result<Option<DownloadSource>> {
        let Some(props) = general_section(meta) else {
            return Ok(None);
        };
        let Some(url) = props.get("directURL") else {
            return Ok(None);
        };
        url::Url::parse(url).map_err(|source| DownloadError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let mut source = HttpSource::new(url);
        if let Some(headers) = props.get("headers") {
            // Header entries are stored as "Name: value" joined with '|'
            for entry in headers.split('|') {
                if let Some((name, value)) = entry.split_once(':') {
                    source = source.with_header(name.trim(), value.trim());
                }
            }
        }
        Ok(Some(DownloadSource::Http(source)))
    }

    async fn download(&self, archive: &Archive, dest: &Path) -> Result<()> {
        let source = self.source_of(archive)?;
        debug!(url = %source.url, dest = %dest.display(), "http download starting");

        let response = self
            .request(reqwest::Method::GET, source)
            .send()
            .await
            .map_err(|err| DownloadError::HttpRequest {
                url: source.url.clone(),
                source: err,
            })?;
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url: source.url.clone(),
                status: response.status().as_u16(),
            });
        }

        // Stream into a .part file, then rename, so readers never see a
        // half-written archive
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
                url: source.url.clone(),
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
            })?;

        debug!(url = %source.url, "http download complete");
        Ok(())
    }

    async fn verify(&self, archive: &Archive) -> Result<bool> {
        let source = self.source_of(archive)?;
        let response = self
            .request(reqwest::Method::HEAD, source)
            .send()
            .await
            .map_err(|err| DownloadError::HttpRequest {
                url: source.url.clone(),
                source: err,
            })?;
        Ok(response.status().is_success())
    }

    fn is_whitelisted(&self, source: &DownloadSource, whitelist: &ServerWhitelist) -> bool {
        match source {
            DownloadSource::Http(http) => whitelist.allows_url(&http.url),
            _ => false,
        }
    }
}
