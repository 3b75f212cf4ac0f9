//! Origin API clients

pub mod nexus_api;

pub use nexus_api::{FileInfo, ModInfo, NexusApi, RateLimit, UserValidation};
