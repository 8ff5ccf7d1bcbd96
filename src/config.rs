//! Configuration management for VidVault Server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::upload::DEFAULT_CHUNK_SIZE;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory served for paths no route matches
    pub public_dir: PathBuf,
    /// Request body cap; `None` leaves uploads unbounded
    pub max_upload_bytes: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkBackend {
    Sqlite,
    Local,
    S3,
}

impl FromStr for ChunkBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "local" | "fs" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            _ => Err(ConfigError::Invalid {
                var: "CHUNK_BACKEND",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: ChunkBackend,
    pub local_dir: PathBuf,
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Chunk size for new uploads
    pub chunk_size: usize,
    /// Max wait for the next piece of an incoming upload
    pub read_timeout: Option<Duration>,
    /// Max duration of a single chunk read or write
    pub io_timeout: Option<Duration>,
    /// Pending uploads older than this are reaped
    pub pending_ttl: Duration,
    pub reaper_interval: Duration,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 4000,
                public_dir: PathBuf::from("public"),
                max_upload_bytes: None,
            },
            database: DatabaseConfig {
                url: "sqlite:./videos.db".to_string(),
            },
            storage: StorageConfig {
                backend: ChunkBackend::Sqlite,
                local_dir: PathBuf::from("./data"),
                s3: None,
            },
            upload: UploadConfig {
                chunk_size: DEFAULT_CHUNK_SIZE,
                read_timeout: Some(Duration::from_secs(60)),
                io_timeout: Some(Duration::from_secs(30)),
                pending_ttl: Duration::from_secs(24 * 60 * 60),
                reaper_interval: Duration::from_secs(300),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let backend = match var("CHUNK_BACKEND") {
            Some(value) => value.parse()?,
            None => defaults.storage.backend,
        };

        let s3 = if backend == ChunkBackend::S3 {
            Some(S3Config {
                endpoint: var("S3_ENDPOINT").ok_or(ConfigError::Missing("S3_ENDPOINT"))?,
                bucket: var("S3_BUCKET").ok_or(ConfigError::Missing("S3_BUCKET"))?,
                access_key: var("S3_ACCESS_KEY").ok_or(ConfigError::Missing("S3_ACCESS_KEY"))?,
                secret_key: var("S3_SECRET_KEY").ok_or(ConfigError::Missing("S3_SECRET_KEY"))?,
                region: var("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                prefix: var("S3_PREFIX").unwrap_or_else(|| "videos".to_string()),
            })
        } else {
            None
        };

        let chunk_size: usize = parse_or(&var, "CHUNK_SIZE_BYTES", defaults.upload.chunk_size)?;
        if chunk_size == 0 {
            return Err(ConfigError::Invalid {
                var: "CHUNK_SIZE_BYTES",
                value: "0".to_string(),
            });
        }

        Ok(Config {
            server: ServerConfig {
                host: var("HOST").unwrap_or(defaults.server.host),
                port: parse_or(&var, "PORT", defaults.server.port)?,
                public_dir: var("PUBLIC_DIR").map(PathBuf::from).unwrap_or(defaults.server.public_dir),
                max_upload_bytes: match var("MAX_UPLOAD_BYTES") {
                    Some(value) => Some(parse_value("MAX_UPLOAD_BYTES", &value)?),
                    None => None,
                },
            },
            database: DatabaseConfig {
                url: var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            storage: StorageConfig {
                backend,
                local_dir: var("CHUNK_DIR").map(PathBuf::from).unwrap_or(defaults.storage.local_dir),
                s3,
            },
            upload: UploadConfig {
                chunk_size,
                read_timeout: timeout_or(&var, "UPLOAD_READ_TIMEOUT_SECS", defaults.upload.read_timeout)?,
                io_timeout: timeout_or(&var, "STORE_IO_TIMEOUT_SECS", defaults.upload.io_timeout)?,
                pending_ttl: Duration::from_secs(parse_or(
                    &var,
                    "PENDING_UPLOAD_TTL_SECS",
                    defaults.upload.pending_ttl.as_secs(),
                )?),
                reaper_interval: Duration::from_secs(
                    parse_or(&var, "REAPER_INTERVAL_SECS", defaults.upload.reaper_interval.as_secs())?
                        .max(1),
                ),
            },
        })
    }
}

fn parse_value<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var: name,
        value: value.to_string(),
    })
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => parse_value(name, &value),
        None => Ok(default),
    }
}

/// Seconds, with 0 meaning "no timeout"
fn timeout_or<F>(
    var: &F,
    name: &'static str,
    default: Option<Duration>,
) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => {
            let secs: u64 = parse_value(name, &value)?;
            Ok((secs > 0).then(|| Duration::from_secs(secs)))
        }
        None => Ok(default),
    }
}
