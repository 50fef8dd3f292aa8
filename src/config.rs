use std::env;
use std::fmt;
use std::str::FromStr;

use crate::constants::{
    DEFAULT_CLICKHOUSE_PORT, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_EMBEDDING_TIMEOUT_SECS, DEFAULT_INTERVAL_SECS, DEFAULT_MUTATIONS_SYNC,
    DEFAULT_OPENAI_API_URL, DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_TABLE, DEFAULT_WINDOW_DAYS,
};
use crate::store::codec::EmbeddingColumnType;
use crate::store::IdColumnType;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
    pub store: StoreConfig,
    pub provider: ProviderConfig,
    pub backfill: BackfillConfig,
}

#[derive(Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub secure: bool,
    pub table: String,
    pub id_type: IdColumnType,
    pub embedding_type: EmbeddingColumnType,
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub mutations_sync: u8,
}

#[derive(Clone)]
pub struct ProviderConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: Option<u32>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub interval_secs: u64,
    /// Recency window: only records created within this many days are selected.
    pub window_days: u32,
    /// Upper bound on records fetched per cycle; `None` means unbounded.
    pub max_candidates: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("secure", &self.secure)
            .field("table", &self.table)
            .field("id_type", &self.id_type)
            .field("embedding_type", &self.embedding_type)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("mutations_sync", &self.mutations_sync)
            .finish()
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"***REDACTED***")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Store and provider credentials are required; the process must not start without them.
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = StoreConfig {
            host: env_required("CLICKHOUSE_HOST")?,
            port: env_strict_parse("CLICKHOUSE_PORT", DEFAULT_CLICKHOUSE_PORT)?,
            database: env_required("CLICKHOUSE_DATABASE")?,
            username: env_or("CLICKHOUSE_USER", "default"),
            password: env_or("CLICKHOUSE_PASSWORD", ""),
            secure: env_or_bool("CLICKHOUSE_SECURE", false),
            table: validate_identifier("CLICKHOUSE_TABLE", env_or("CLICKHOUSE_TABLE", DEFAULT_TABLE))?,
            id_type: env_strict_parse("CLICKHOUSE_ID_TYPE", IdColumnType::default())?,
            embedding_type: env_strict_parse(
                "CLICKHOUSE_EMBEDDING_TYPE",
                EmbeddingColumnType::default(),
            )?,
            connect_timeout_secs: env_or_parse(
                "CLICKHOUSE_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            ),
            query_timeout_secs: env_or_parse(
                "CLICKHOUSE_QUERY_TIMEOUT_SECS",
                DEFAULT_QUERY_TIMEOUT_SECS,
            ),
            mutations_sync: env_strict_parse("CLICKHOUSE_MUTATIONS_SYNC", DEFAULT_MUTATIONS_SYNC)?,
        };
        if store.mutations_sync > 2 {
            return Err(ConfigError::Invalid {
                key: "CLICKHOUSE_MUTATIONS_SYNC",
                value: store.mutations_sync.to_string(),
                reason: "must be 0, 1 or 2".to_string(),
            });
        }

        let provider = ProviderConfig {
            api_url: env_or("OPENAI_API_URL", DEFAULT_OPENAI_API_URL),
            api_key: env_required("OPENAI_API_KEY")?,
            model: env_or("EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            dimensions: env_opt_parse("EMBEDDING_DIMENSIONS"),
            timeout_secs: env_or_parse("EMBEDDING_TIMEOUT_SECS", DEFAULT_EMBEDDING_TIMEOUT_SECS),
        };

        let backfill = BackfillConfig {
            interval_secs: non_zero(
                "BACKFILL_INTERVAL_SECS",
                env_strict_parse("BACKFILL_INTERVAL_SECS", DEFAULT_INTERVAL_SECS)?,
            )?,
            window_days: non_zero(
                "BACKFILL_WINDOW_DAYS",
                env_strict_parse("BACKFILL_WINDOW_DAYS", DEFAULT_WINDOW_DAYS)?,
            )?,
            max_candidates: match env_strict_parse("BACKFILL_MAX_CANDIDATES", 0_u64)? {
                0 => None,
                n => Some(n),
            },
        };

        Ok(Self {
            log_level: env_or("RUST_LOG", "info"),
            enable_file_logs: env_or_bool("ENABLE_FILE_LOGS", false),
            log_dir: env_or("LOG_DIR", "./logs"),
            store,
            provider,
            backfill,
        })
    }
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    key,
                    value = %raw,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Present and non-blank, or a startup error.
pub fn env_required(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => Ok(raw),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn env_opt_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Failed to parse env var, ignoring");
            None
        }
    }
}

/// Like [`env_or_parse`] but an unparsable value is an error rather than a fallback.
fn env_strict_parse<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn non_zero<T>(key: &'static str, value: T) -> Result<T, ConfigError>
where
    T: Default + PartialEq + fmt::Display,
{
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

/// Table names are interpolated into SQL, so only `[A-Za-z0-9_]` segments joined by `.` pass.
fn validate_identifier(key: &'static str, value: String) -> Result<String, ConfigError> {
    let valid = !value.is_empty()
        && value.split('.').all(|segment| {
            !segment.is_empty()
                && !segment.starts_with(|c: char| c.is_ascii_digit())
                && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value,
            reason: "expected a plain or database-qualified identifier".to_string(),
        })
    }
}
