//! Error types for the downloader framework

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while locating, preparing, or fetching archives
#[derive(Error, Debug)]
pub enum DownloadError {
    /// HTTP-level failures with the target URL for context
    #[error("HTTP request to '{url}' failed")]
    HttpRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("'{url}' answered with unexpected status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("failed to build HTTP client")]
    ClientBuild {
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL '{url}'")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// A metadata record that matched an origin but carries unusable fields
    #[error("invalid archive metadata: {message}")]
    InvalidMeta { message: String },

    #[error("{origin}: credentials missing, set {variable}")]
    MissingCredentials {
        origin: &'static str,
        variable: &'static str,
    },

    /// Mandatory authentication failed; the origin is unusable this process
    #[error("{origin}: authentication failed: {message}")]
    AuthFailed {
        origin: &'static str,
        message: String,
    },

    /// The operator aborted an optional-tier consent prompt
    #[error("{origin}: aborted by operator")]
    Aborted { origin: &'static str },

    /// Recorded outcome of an earlier failed `prepare` for this origin
    #[error("{origin}: origin unavailable: {message}")]
    PrepareFailed {
        origin: &'static str,
        message: String,
    },

    /// An authoritative remote lookup during full inference failed
    #[error("{origin}: remote lookup for '{key}' failed: {message}")]
    RemoteLookup {
        origin: &'static str,
        key: String,
        message: String,
    },

    /// No registered downloader owns the given source
    #[error("no downloader registered for {description}")]
    UnsupportedSource { description: String },

    #[error("'{url}' is not covered by the server whitelist")]
    NotWhitelisted { url: String },

    /// The archive can only be fetched interactively in a browser
    #[error("manual download required from '{url}'")]
    ManualIntervention { url: String },

    #[error("file operation failed on '{path}'")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DownloadError>;

impl DownloadError {
    /// Whether a later pass could plausibly succeed without intervention
    pub fn is_recoverable(&self) -> bool {
        match self {
            DownloadError::HttpRequest { source, .. } => source
                .status()
                .map_or(true, |status| status.is_server_error() || status.as_u16() == 429),
            DownloadError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            DownloadError::RemoteLookup { .. } => true,
            DownloadError::FileSystem { .. } => true,
            DownloadError::ClientBuild { .. }
            | DownloadError::InvalidUrl { .. }
            | DownloadError::InvalidMeta { .. }
            | DownloadError::MissingCredentials { .. }
            | DownloadError::AuthFailed { .. }
            | DownloadError::Aborted { .. }
            | DownloadError::PrepareFailed { .. }
            | DownloadError::UnsupportedSource { .. }
            | DownloadError::NotWhitelisted { .. }
            | DownloadError::ManualIntervention { .. } => false,
        }
    }

    /// Stable category label for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            DownloadError::HttpRequest { .. } => "http_request",
            DownloadError::HttpStatus { .. } => "http_status",
            DownloadError::ClientBuild { .. } => "client_build",
            DownloadError::InvalidUrl { .. } => "invalid_url",
            DownloadError::InvalidMeta { .. } => "invalid_meta",
            DownloadError::MissingCredentials { .. } => "missing_credentials",
            DownloadError::AuthFailed { .. } => "auth_failed",
            DownloadError::Aborted { .. } => "aborted",
            DownloadError::PrepareFailed { .. } => "prepare_failed",
            DownloadError::RemoteLookup { .. } => "remote_lookup",
            DownloadError::UnsupportedSource { .. } => "unsupported_source",
            DownloadError::NotWhitelisted { .. } => "not_whitelisted",
            DownloadError::ManualIntervention { .. } => "manual_intervention",
            DownloadError::FileSystem { .. } => "file_system",
        }
    }
}
