//! Forum-thread attachment origin
//!
//! Forum hosts hang files off discussion threads behind a session login.
//! There is no availability feed; liveness comes from cached verdicts, with
//! `verify` doing a live status check when a collaborator asks for one.

use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use ini::Ini;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::downloader::error::{DownloadError, Result};
use crate::downloader::meta::{general_section, parse_id_field};
use crate::downloader::registry::Downloader;
use crate::downloader::sources::DownloadSource;
use crate::model::Archive;

const SESSION_VAR: &str = "FORUM_SESSION";

/// Attachment on a forum thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumSource {
    /// Forum host, e.g. "forums.example.net"
    pub site: String,
    pub thread_id: u64,
    /// Specific attachment; `None` means the thread's primary file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<u64>,
}

impl ForumSource {
    pub fn new<S: Into<String>>(site: S, thread_id: u64) -> Self {
        Self {
            site: site.into(),
            thread_id,
            attachment_id: None,
        }
    }

    pub fn with_attachment(mut self, attachment_id: u64) -> Self {
        self.attachment_id = Some(attachment_id);
        self
    }

    /// URL of the attachment (or the thread's primary file)
    pub fn file_url(&self) -> String {
        match self.attachment_id {
            Some(attachment_id) => format!(
                "https://{}/files/download/{}/?attachment={}",
                self.site, self.thread_id, attachment_id
            ),
            None => format!("https://{}/files/download/{}/", self.site, self.thread_id),
        }
    }
}

/// Downloader for forum-thread attachments
pub struct ForumDownloader {
    client: reqwest::Client,
    session: std::sync::Mutex<Option<String>>,
}

impl ForumDownloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .build()
            .map_err(|source| DownloadError::ClientBuild { source })?;
        Ok(Self {
            client,
            session: std::sync::Mutex::new(None),
        })
    }

    fn source_of<'a>(&self, archive: &'a Archive) -> Result<&'a ForumSource> {
        match &archive.source {
            DownloadSource::Forum(forum) => Ok(forum),
            other => Err(DownloadError::UnsupportedSource {
                description: other.describe(),
            }),
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, url);
        if let Some(session) = self.session.lock().unwrap().as_deref() {
            request = request.header(reqwest::header::COOKIE, session.to_string());
        }
        request
    }
}

#[async_trait]
impl Downloader for ForumDownloader {
    fn name(&self) -> &'static str {
        "forum"
    }

    fn owns(&self, source: &DownloadSource) -> bool {
        matches!(source, DownloadSource::Forum(_))
    }

    async fn infer(&self, meta: &Ini, quick: bool) -> Result<Option<DownloadSource>> {
        let Some(props) = general_section(meta) else {
            return Ok(None);
        };
        let (Some(site), Some(thread_id)) =
            (props.get("forumSite"), parse_id_field(props, "threadID")?)
        else {
            return Ok(None);
        };

        let mut source = ForumSource::new(site, thread_id);
        if let Some(attachment_id) = parse_id_field(props, "attachmentID")? {
            source = source.with_attachment(attachment_id);
        }
        if quick {
            return Ok(Some(DownloadSource::Forum(source)));
        }

        // Authoritative check: the thread page must answer before we claim it
        let url = source.file_url();
        let response = self
            .request(reqwest::Method::HEAD, &url)
            .send()
            .await
            .map_err(|err| DownloadError::RemoteLookup {
                origin: "forum",
                key: url.clone(),
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(DownloadError::RemoteLookup {
                origin: "forum",
                key: url,
                message: format!("thread answered with status {}", response.status()),
            });
        }
        Ok(Some(DownloadSource::Forum(source)))
    }

    async fn prepare(&self) -> Result<()> {
        // Session cookie auth is mandatory: threads hide attachments from
        // anonymous visitors
        let session =
            std::env::var(SESSION_VAR).map_err(|_| DownloadError::MissingCredentials {
                origin: "forum",
                variable: SESSION_VAR,
            })?;
        if session.trim().is_empty() {
            return Err(DownloadError::AuthFailed {
                origin: "forum",
                message: format!("{SESSION_VAR} is set but empty"),
            });
        }
        *self.session.lock().unwrap() = Some(session);
        info!("forum session configured");
        Ok(())
    }

    async fn download(&self, archive: &Archive, dest: &Path) -> Result<()> {
        let source = self.source_of(archive)?;
        let url = source.file_url();
        debug!(url = %url, "forum download starting");

        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|err| DownloadError::HttpRequest {
                url: url.clone(),
                source: err,
            })?;
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.clone(),
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
                url: url.clone(),
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
        let url = source.file_url();
        let response = self
            .request(reqwest::Method::HEAD, &url)
            .send()
            .await
            .map_err(|err| DownloadError::HttpRequest {
                url,
                source: err,
            })?;
        Ok(response.status().is_success())
    }
}
