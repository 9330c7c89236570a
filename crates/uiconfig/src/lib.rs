//! uiconfig: server configuration, merged flag > env > TOML > default.
//!
//! Mirrors the forwarder's raw-then-default TOML loading shape: a
//! `RawConfig` with every field `Option`, defaults applied while folding
//! it into the effective `Config`. Unlike the forwarder, this crate also
//! overlays environment variables and explicit CLI flags ahead of the
//! TOML layer, since spec precedence is flag > env > TOML > default.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub socket_path: PathBuf,
    /// `None` means disabled (the `0` duration string).
    pub session_timeout: Option<Duration>,
    pub connection_grace_period: Option<Duration>,
    pub batch_debounce: Duration,
    pub storage_backend: StorageBackend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite(PathBuf),
    Postgres(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            socket_path: default_socket_path(),
            session_timeout: Some(Duration::from_secs(30 * 60)),
            connection_grace_period: Some(Duration::from_secs(30)),
            batch_debounce: Duration::from_millis(10),
            storage_backend: StorageBackend::Memory,
        }
    }
}

#[cfg(unix)]
fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/ui.sock")
}

#[cfg(not(unix))]
fn default_socket_path() -> PathBuf {
    PathBuf::from(r"\\.\pipe\ui")
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    host: Option<String>,
    port: Option<u16>,
    socket_path: Option<String>,
    session_timeout: Option<String>,
    connection_grace_period: Option<String>,
    batch_debounce_ms: Option<u64>,
    storage: Option<RawStorage>,
}

#[derive(Debug, Deserialize, Default)]
struct RawStorage {
    backend: Option<String>,
    sqlite_path: Option<String>,
    postgres_url: Option<String>,
}

/// Explicit overrides supplied by CLI flags or environment variables —
/// the two highest-precedence layers, folded in before TOML.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub socket_path: Option<PathBuf>,
    pub session_timeout: Option<String>,
    pub connection_grace_period: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid duration string {0:?}")]
    InvalidDuration(String),
    #[error("unknown storage backend {0:?}")]
    UnknownBackend(String),
    #[error("storage backend {0:?} requires {1}")]
    MissingBackendField(String, &'static str),
}

/// Loads config from an optional TOML file path, environment variables,
/// and explicit flag overrides, in flag > env > TOML > default order.
pub fn load(toml_path: Option<&std::path::Path>, flags: Overrides) -> Result<Config, ConfigError> {
    let raw = match toml_path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?;
            toml::from_str(&text)?
        }
        None => RawConfig::default(),
    };

    let env = Overrides {
        host: std::env::var("UI_HOST").ok(),
        port: std::env::var("UI_PORT").ok().and_then(|v| v.parse().ok()),
        socket_path: std::env::var("UI_SOCKET").ok().map(PathBuf::from),
        session_timeout: std::env::var("UI_SESSION_TIMEOUT").ok(),
        connection_grace_period: std::env::var("UI_CONNECTION_GRACE_PERIOD").ok(),
    };

    let mut config = Config::default();

    if let Some(host) = raw.host {
        config.host = host;
    }
    if let Some(port) = raw.port {
        config.port = port;
    }
    if let Some(socket) = raw.socket_path {
        config.socket_path = PathBuf::from(socket);
    }
    if let Some(s) = raw.session_timeout {
        config.session_timeout = parse_duration(&s)?;
    }
    if let Some(s) = raw.connection_grace_period {
        config.connection_grace_period = parse_duration(&s)?;
    }
    if let Some(ms) = raw.batch_debounce_ms {
        config.batch_debounce = Duration::from_millis(ms);
    }
    if let Some(storage) = raw.storage {
        config.storage_backend = parse_storage(storage)?;
    }

    apply_overrides(&mut config, env)?;
    apply_overrides(&mut config, flags)?;

    Ok(config)
}

fn apply_overrides(config: &mut Config, overrides: Overrides) -> Result<(), ConfigError> {
    if let Some(host) = overrides.host {
        config.host = host;
    }
    if let Some(port) = overrides.port {
        config.port = port;
    }
    if let Some(socket) = overrides.socket_path {
        config.socket_path = socket;
    }
    if let Some(s) = overrides.session_timeout {
        config.session_timeout = parse_duration(&s)?;
    }
    if let Some(s) = overrides.connection_grace_period {
        config.connection_grace_period = parse_duration(&s)?;
    }
    Ok(())
}

fn parse_storage(raw: RawStorage) -> Result<StorageBackend, ConfigError> {
    match raw.backend.as_deref() {
        None | Some("memory") => Ok(StorageBackend::Memory),
        Some("sqlite") => {
            let path = raw
                .sqlite_path
                .ok_or(ConfigError::MissingBackendField("sqlite".to_owned(), "sqlite_path"))?;
            Ok(StorageBackend::Sqlite(PathBuf::from(path)))
        }
        Some("postgres") => {
            let url = raw.postgres_url.ok_or(ConfigError::MissingBackendField(
                "postgres".to_owned(),
                "postgres_url",
            ))?;
            Ok(StorageBackend::Postgres(url))
        }
        Some(other) => Err(ConfigError::UnknownBackend(other.to_owned())),
    }
}

/// Parses a duration string (`"30s"`, `"5m"`, `"2h"`, bare seconds as
/// `"30"`). `"0"` (with or without a unit) disables the timeout.
fn parse_duration(s: &str) -> Result<Option<Duration>, ConfigError> {
    let s = s.trim();
    if s == "0" {
        return Ok(None);
    }
    let (digits, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()));
    let n: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(s.to_owned()))?;
    let secs = match unit {
        "" | "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        _ => return Err(ConfigError::InvalidDuration(s.to_owned())),
    };
    if secs == 0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_secs(secs)))
}
