//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    fmt,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::validator::EtagStrategy;
use crate::cache::{CacheBackendKind, ValidatorCacheConfig};

mod cli;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "etagger";
const ENV_PREFIX: &str = "ETAGGER";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
/// Characters `SCAN MATCH` interprets as patterns; never allowed in a key prefix.
const GLOB_METACHARACTERS: [char; 5] = ['*', '?', '[', ']', '\\'];

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub etag: EtagSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// `None` selects the in-memory repository.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub redis_url: Option<String>,
    pub ttl: Duration,
    pub max_ttl: Duration,
    pub op_timeout: Duration,
    pub memory_capacity: NonZeroUsize,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Copy)]
pub struct EtagSettings {
    pub strategy: EtagStrategy,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    if let Some(command) = cli.command.as_ref() {
        raw.apply_serve_overrides(command.overrides());
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    etag: RawEtagSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(timeout) = overrides.cache_op_timeout_ms {
            self.cache.op_timeout_ms = Some(timeout);
        }
        if let Some(strategy) = overrides.etag_strategy.as_ref() {
            self.etag.strategy = Some(strategy.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            etag,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            etag: build_etag_settings(etag)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(value) => CacheBackendKind::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => CacheBackendKind::default(),
    };

    let redis_url = non_blank(cache.redis_url);
    if backend == CacheBackendKind::Redis && redis_url.is_none() {
        return Err(LoadError::invalid(
            "cache.redis_url",
            "required when cache.backend is `redis`",
        ));
    }

    let defaults = ValidatorCacheConfig::default();

    let max_ttl_secs = cache
        .max_ttl_seconds
        .unwrap_or_else(|| defaults.max_ttl.as_secs());
    if max_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.max_ttl_seconds",
            "must be greater than zero",
        ));
    }

    let ttl_secs = cache
        .ttl_seconds
        .unwrap_or_else(|| defaults.default_ttl.as_secs());
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }
    if ttl_secs > max_ttl_secs {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            format!("must not exceed cache.max_ttl_seconds ({max_ttl_secs})"),
        ));
    }

    let op_timeout_ms = cache.op_timeout_ms.unwrap_or_else(|| {
        u64::try_from(defaults.op_timeout.as_millis()).unwrap_or(u64::MAX)
    });
    if op_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.op_timeout_ms",
            "must be greater than zero",
        ));
    }

    let memory_capacity =
        NonZeroUsize::new(cache.memory_capacity.unwrap_or(defaults.memory_capacity))
            .ok_or_else(|| {
                LoadError::invalid("cache.memory_capacity", "must be greater than zero")
            })?;

    let key_prefix = cache
        .key_prefix
        .map(|prefix| prefix.trim().trim_end_matches(':').to_string())
        .unwrap_or(defaults.key_prefix);
    if key_prefix.is_empty() || key_prefix.contains(char::is_whitespace) {
        return Err(LoadError::invalid(
            "cache.key_prefix",
            "must be non-empty and contain no whitespace",
        ));
    }
    if key_prefix.contains(GLOB_METACHARACTERS) {
        return Err(LoadError::invalid(
            "cache.key_prefix",
            "must not contain glob characters (`*`, `?`, `[`, `]`, `\\`)",
        ));
    }

    Ok(CacheSettings {
        backend,
        redis_url,
        ttl: Duration::from_secs(ttl_secs),
        max_ttl: Duration::from_secs(max_ttl_secs),
        op_timeout: Duration::from_millis(op_timeout_ms),
        memory_capacity,
        key_prefix,
    })
}

fn build_etag_settings(etag: RawEtagSettings) -> Result<EtagSettings, LoadError> {
    let strategy = match etag.strategy {
        Some(value) => EtagStrategy::from_str(&value)
            .map_err(|reason| LoadError::invalid("etag.strategy", reason))?,
        None => EtagStrategy::default(),
    };
    Ok(EtagSettings { strategy })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    ttl_seconds: Option<u64>,
    max_ttl_seconds: Option<u64>,
    op_timeout_ms: Option<u64>,
    memory_capacity: Option<usize>,
    key_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEtagSettings {
    strategy: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

/// Human-readable summary printed by `check-config`. Credentials in URLs are masked.
impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "server.addr = {}", self.server.addr)?;
        writeln!(
            f,
            "server.graceful_shutdown_seconds = {}",
            self.server.graceful_shutdown.as_secs()
        )?;
        writeln!(f, "logging.level = {}", self.logging.level)?;
        writeln!(f, "logging.format = {:?}", self.logging.format)?;
        match self.database.url.as_deref() {
            Some(url) => writeln!(f, "database.url = {}", mask_credentials(url))?,
            None => writeln!(f, "database.url = <unset: in-memory repository>")?,
        }
        writeln!(
            f,
            "database.max_connections = {}",
            self.database.max_connections
        )?;
        writeln!(f, "cache.backend = {}", self.cache.backend.as_str())?;
        if let Some(url) = self.cache.redis_url.as_deref() {
            writeln!(f, "cache.redis_url = {}", mask_credentials(url))?;
        }
        writeln!(f, "cache.ttl_seconds = {}", self.cache.ttl.as_secs())?;
        writeln!(f, "cache.max_ttl_seconds = {}", self.cache.max_ttl.as_secs())?;
        writeln!(
            f,
            "cache.op_timeout_ms = {}",
            self.cache.op_timeout.as_millis()
        )?;
        writeln!(f, "cache.memory_capacity = {}", self.cache.memory_capacity)?;
        writeln!(f, "cache.key_prefix = {}", self.cache.key_prefix)?;
        write!(f, "etag.strategy = {}", self.etag.strategy.as_str())
    }
}

/// Replace the userinfo part of a URL with `***`.
pub(crate) fn mask_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
