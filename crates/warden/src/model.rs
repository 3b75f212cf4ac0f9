//! Archive and modlist data model
//!
//! These are the read-only inputs to a validation pass: content-addressed
//! archives and the modlists that reference them. Both are supplied by the
//! snapshot provider and never mutated by this crate.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::downloader::sources::DownloadSource;

/// Content identity of an archive: an xxHash64 digest.
///
/// The canonical textual form is the base64 encoding of the little-endian
/// digest bytes (the form mod tooling records in modlist files). A
/// `0x`-prefixed hex form is accepted on input for convenience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(u64);

/// Errors produced when parsing a textual hash
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HashParseError {
    #[error("invalid base64 hash '{0}'")]
    InvalidBase64(String),
    #[error("invalid hex hash '{0}'")]
    InvalidHex(String),
    #[error("hash '{0}' does not decode to 8 bytes")]
    WrongLength(String),
}

impl Hash {
    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Hash the given bytes with xxHash64 (seed 0, the modlist convention).
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(xxhash_rust::xxh64::xxh64(data, 0))
    }

    /// Canonical base64 form of the little-endian digest bytes.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0.to_le_bytes())
    }

    pub fn from_base64(text: &str) -> Result<Self, HashParseError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(|_| HashParseError::InvalidBase64(text.to_string()))?;
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| HashParseError::WrongLength(text.to_string()))?;
        Ok(Self(u64::from_le_bytes(bytes)))
    }

    fn from_hex(text: &str) -> Result<Self, HashParseError> {
        let digits = text.trim_start_matches("0x");
        let bytes =
            hex::decode(digits).map_err(|_| HashParseError::InvalidHex(text.to_string()))?;
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| HashParseError::WrongLength(text.to_string()))?;
        Ok(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl FromStr for Hash {
    type Err = HashParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.starts_with("0x") {
            Self::from_hex(text)
        } else {
            Self::from_base64(text)
        }
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// A content-addressed reference to a downloadable mod package.
///
/// Immutable once recorded in a modlist: the hash is the identity, the
/// source describes how to re-locate the payload at its origin host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    /// Content hash of the archive payload
    pub hash: Hash,
    /// Display name (usually the original filename)
    pub name: String,
    /// Payload size in bytes
    pub size: u64,
    /// Origin-specific identity and behavior needed to fetch the payload
    pub source: DownloadSource,
}

impl Archive {
    pub fn new<S: Into<String>>(hash: Hash, name: S, size: u64, source: DownloadSource) -> Self {
        Self {
            hash,
            name: name.into(),
            size,
            source,
        }
    }
}

/// A named, ordered collection of archives plus descriptive metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModList {
    /// Stable machine-readable slug identifying this list
    pub machine_url: String,
    /// Human-readable title
    pub title: String,
    /// Archives in list order; summary indices correspond to this order
    pub archives: Vec<Archive>,
}

impl ModList {
    pub fn new<S1: Into<String>, S2: Into<String>>(
        machine_url: S1,
        title: S2,
        archives: Vec<Archive>,
    ) -> Self {
        Self {
            machine_url: machine_url.into(),
            title: title.into(),
            archives,
        }
    }
}
