use std::io;

use fieldsync_core::sync::TransportError;
use fieldsync_core::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid JSON for {field}: {message}")]
    InvalidJson { field: &'static str, message: String },
    #[error("Operation not found: {0}")]
    OperationNotFound(String),
    #[error("No cached entity for {0}")]
    EntityNotFound(String),
    #[error("Could not resolve a default {0} directory; pass the path explicitly")]
    NoDefaultDirectory(&'static str),
    #[error("Config file already exists at {0} (use --force to overwrite)")]
    ConfigExists(String),
    #[error(
        "API base URL is not configured. Run `fieldsync config init --api-base-url <URL>` or set FIELDSYNC_API_BASE_URL."
    )]
    ApiNotConfigured,
}
