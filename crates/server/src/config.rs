use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use medialift_protocol::DEFAULT_MAX_CHUNK_BYTES;

/// Server configuration, read from `MEDIALIFT_*` environment variables with
/// defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (`MEDIALIFT_BIND_ADDR`).
    pub bind_addr: SocketAddr,
    /// Root directory for chunk records and finalized media
    /// (`MEDIALIFT_DATA_DIR`).
    pub data_dir: PathBuf,
    /// Per-chunk size cap in bytes (`MEDIALIFT_MAX_CHUNK_BYTES`).
    pub max_chunk_bytes: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {name}={value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

fn env_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            bind_addr: env_or("MEDIALIFT_BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 8080)))?,
            data_dir: env_or("MEDIALIFT_DATA_DIR", PathBuf::from("./data"))?,
            max_chunk_bytes: env_or("MEDIALIFT_MAX_CHUNK_BYTES", DEFAULT_MAX_CHUNK_BYTES)?,
        };
        if config.max_chunk_bytes == 0 {
            return Err(ConfigError::Invalid {
                name: "MEDIALIFT_MAX_CHUNK_BYTES",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(config)
    }
}
