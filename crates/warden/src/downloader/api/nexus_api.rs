//! Nexus-style REST API client
//!
//! Handles API-key authentication, rate-limit bookkeeping from response
//! headers, user validation (premium status drives the consent prompt), and
//! the mod/file lookups used for inference and liveness checks.

use std::sync::Mutex;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use crate::downloader::error::{DownloadError, Result};

/// Production API endpoint; tests point `base_url` at a local stub
pub const DEFAULT_API_BASE: &str = "https://api.nexusmods.com";

const API_KEY_VAR: &str = "NEXUS_API_KEY";

/// Remaining request allowance as reported by response headers
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub daily_remaining: u32,
    pub hourly_remaining: u32,
}

impl RateLimit {
    /// Whether the next request would be refused
    pub fn is_blocked(&self) -> bool {
        self.daily_remaining == 0 || self.hourly_remaining == 0
    }
}

/// Account info returned by the validate endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct UserValidation {
    pub user_id: u64,
    pub name: String,
    pub is_premium: bool,
    #[serde(default)]
    pub is_supporter: bool,
}

/// Mod metadata used to enrich inferred sources
#[derive(Debug, Clone, Deserialize)]
pub struct ModInfo {
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub contains_adult_content: bool,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

/// Per-file metadata from the files endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    pub file_id: u64,
    pub name: String,
    #[serde(default)]
    pub size_in_bytes: Option<u64>,
}

/// One CDN entry from the download-link endpoint
#[derive(Debug, Clone, Deserialize)]
struct DownloadLink {
    #[serde(rename = "URI")]
    uri: String,
}

/// Authenticated client for one API-backed mod host
pub struct NexusApi {
    client: reqwest::Client,
    base_url: String,
    rate_limit: Mutex<Option<RateLimit>>,
}

impl NexusApi {
    /// Build a client from the `NEXUS_API_KEY` environment variable
    pub fn from_env() -> Result<Self> {
        // A .env file is optional; real environments set the variable directly
        let _ = dotenv::dotenv();
        let api_key =
            std::env::var(API_KEY_VAR).map_err(|_| DownloadError::MissingCredentials {
                origin: "nexus",
                variable: API_KEY_VAR,
            })?;
        Self::new(&api_key, DEFAULT_API_BASE)
    }

    pub fn new(api_key: &str, base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut key_value =
            HeaderValue::from_str(api_key).map_err(|_| DownloadError::AuthFailed {
                origin: "nexus",
                message: "API key contains invalid header characters".to_string(),
            })?;
        key_value.set_sensitive(true);
        headers.insert("apikey", key_value);

        let client = reqwest::Client::builder()
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| DownloadError::ClientBuild { source })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limit: Mutex::new(None),
        })
    }

    /// Most recent rate-limit reading, if any request has completed
    pub fn rate_limit(&self) -> Option<RateLimit> {
        *self.rate_limit.lock().unwrap()
    }

    fn record_rate_limit(&self, headers: &HeaderMap) {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u32>().ok())
        };
        if let (Some(daily), Some(hourly)) =
            (read("x-rl-daily-remaining"), read("x-rl-hourly-remaining"))
        {
            let limit = RateLimit {
                daily_remaining: daily,
                hourly_remaining: hourly,
            };
            debug!(daily, hourly, "rate limit updated");
            *self.rate_limit.lock().unwrap() = Some(limit);
        }
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let response =
            self.client
                .get(&url)
                .send()
                .await
                .map_err(|err| DownloadError::HttpRequest {
                    url: url.clone(),
                    source: err,
                })?;
        self.record_rate_limit(response.headers());
        Ok(response)
    }

    /// Validate the API key and fetch account standing
    pub async fn validate_user(&self) -> Result<UserValidation> {
        let response = self.get("/v1/users/validate.json").await?;
        let url = response.url().to_string();
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(DownloadError::AuthFailed {
                origin: "nexus",
                message: "API key rejected".to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|err| DownloadError::HttpRequest { url, source: err })
    }

    /// Fetch mod-level metadata
    pub async fn mod_info(&self, game: &str, mod_id: u64) -> Result<ModInfo> {
        let response = self
            .get(&format!("/v1/games/{game}/mods/{mod_id}.json"))
            .await?;
        let url = response.url().to_string();
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|err| DownloadError::HttpRequest { url, source: err })
    }

    /// Fetch file-level metadata; `None` when the host no longer has it
    pub async fn file_info(
        &self,
        game: &str,
        mod_id: u64,
        file_id: u64,
    ) -> Result<Option<FileInfo>> {
        let response = self
            .get(&format!("/v1/games/{game}/mods/{mod_id}/files/{file_id}.json"))
            .await?;
        let url = response.url().to_string();
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|err| DownloadError::HttpRequest { url, source: err })
    }

    /// Resolve a CDN download URL for the given file
    pub async fn download_link(&self, game: &str, mod_id: u64, file_id: u64) -> Result<String> {
        let response = self
            .get(&format!(
                "/v1/games/{game}/mods/{mod_id}/files/{file_id}/download_link.json"
            ))
            .await?;
        let url = response.url().to_string();
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        let links: Vec<DownloadLink> = response
            .json()
            .await
            .map_err(|err| DownloadError::HttpRequest {
                url: url.clone(),
                source: err,
            })?;
        links
            .into_iter()
            .next()
            .map(|link| link.uri)
            .ok_or(DownloadError::HttpStatus { url, status: 404 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn validate_user_parses_account_and_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/users/validate.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-rl-daily-remaining", "2400")
                    .insert_header("x-rl-hourly-remaining", "99")
                    .set_body_json(serde_json::json!({
                        "user_id": 42,
                        "name": "tester",
                        "is_premium": true,
                        "is_supporter": false,
                    })),
            )
            .mount(&server)
            .await;

        let api = NexusApi::new("key", &server.uri()).unwrap();
        let user = api.validate_user().await.unwrap();
        assert_eq!(user.name, "tester");
        assert!(user.is_premium);

        let limit = api.rate_limit().unwrap();
        assert_eq!(limit.daily_remaining, 2400);
        assert_eq!(limit.hourly_remaining, 99);
        assert!(!limit.is_blocked());
    }

    #[tokio::test]
    async fn rejected_key_is_an_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/users/validate.json"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let api = NexusApi::new("bad-key", &server.uri()).unwrap();
        let err = api.validate_user().await.unwrap_err();
        assert_eq!(err.category(), "auth_failed");
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/games/somegame/mods/7/files/9.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let api = NexusApi::new("key", &server.uri()).unwrap();
        let info = api.file_info("somegame", 7, 9).await.unwrap();
        assert!(info.is_none());
    }
}
