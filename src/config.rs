//! Configuration management for Sagasu

use std::env;
use std::path::PathBuf;

use crate::upload::{UploadConfig, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadSettings,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory served and written by uploads
    pub root: PathBuf,
    /// Maximum simultaneous uploads (0 = unlimited)
    pub max_concurrent_uploads: usize,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Base WebSocket URL the client uploads to
    pub endpoint: String,
    pub chunk_size: usize,
    pub max_resends: Option<u32>,
}

impl UploadSettings {
    pub fn to_upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size,
            max_resends: self.max_resends,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                root: PathBuf::from("."),
                max_concurrent_uploads: 5,
            },
            upload: UploadSettings {
                endpoint: "ws://localhost:8080".to_string(),
                chunk_size: DEFAULT_CHUNK_SIZE,
                max_resends: None,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT")?.unwrap_or(defaults.server.port),
            },
            storage: StorageConfig {
                root: env::var("SAGASU_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.root),
                max_concurrent_uploads: parse_var("UPLOAD_MAX_CONCURRENT")?
                    .unwrap_or(defaults.storage.max_concurrent_uploads),
            },
            upload: UploadSettings {
                endpoint: env::var("UPLOAD_ENDPOINT").unwrap_or(defaults.upload.endpoint),
                chunk_size: match parse_var("UPLOAD_CHUNK_SIZE")? {
                    Some(size) => check_chunk_size("UPLOAD_CHUNK_SIZE", size)?,
                    None => defaults.upload.chunk_size,
                },
                max_resends: parse_var("UPLOAD_MAX_RESENDS")?,
            },
        })
    }
}

/// Chunk sizes must be between one byte and `MAX_CHUNK_SIZE`
pub fn check_chunk_size(name: &'static str, size: usize) -> Result<usize, ConfigError> {
    if size == 0 || size > MAX_CHUNK_SIZE {
        return Err(ConfigError::InvalidValue { name, value: size.to_string() });
    }
    Ok(size)
}

/// Parse an optional environment variable. Unset or empty is `None`.
fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}
