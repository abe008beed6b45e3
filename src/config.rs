use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::crawl::planner::DEFAULT_SCHEMA_CUTOFF;
use crate::source::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Source API
    pub source_base_url: String,
    pub source_api_version: String,
    pub source_access_token: String,
    pub source_collection_id: String,

    // Sync store
    pub database_path: PathBuf,
    pub media_dir: PathBuf,

    // Request policy
    pub request_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,

    // Schema history
    pub schema_cutoff: DateTime<Utc>,

    // Destination
    pub dest_base_url: Option<String>,
    pub dest_access_token: Option<String>,
    pub upload_media: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Source API
            source_base_url: required_env("SOURCE_BASE_URL")?,
            source_api_version: env_or_default("SOURCE_API_VERSION", "v2.6"),
            source_access_token: required_env("SOURCE_ACCESS_TOKEN")?,
            source_collection_id: required_env("SOURCE_COLLECTION_ID")?,

            // Sync store
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/corpus.sqlite")),
            media_dir: PathBuf::from(env_or_default("MEDIA_DIR", "./data/media")),

            // Request policy
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 30)?),
            retry_max_attempts: parse_env_u32("RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay: Duration::from_millis(parse_env_u64("RETRY_BASE_DELAY_MS", 500)?),

            // Schema history
            schema_cutoff: parse_env_timestamp("SCHEMA_CUTOFF", DEFAULT_SCHEMA_CUTOFF)?,

            // Destination
            dest_base_url: optional_env("DEST_BASE_URL"),
            dest_access_token: optional_env("DEST_ACCESS_TOKEN"),
            upload_media: parse_env_bool("UPLOAD_MEDIA", true)?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "SOURCE_BASE_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.source_collection_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "SOURCE_COLLECTION_ID".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RETRY_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.dest_base_url.is_some() && self.dest_access_token.is_none() {
            return Err(ConfigError::InvalidValue {
                name: "DEST_ACCESS_TOKEN".to_string(),
                message: "required when DEST_BASE_URL is set".to_string(),
            });
        }
        Ok(())
    }

    /// Retry policy for the source client.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: self.retry_base_delay,
        }
    }

    /// A minimal, valid configuration for tests, no environment needed.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            source_base_url: "https://source.example.com".to_string(),
            source_api_version: "v2.6".to_string(),
            source_access_token: "test-token".to_string(),
            source_collection_id: "collection-1".to_string(),
            database_path: PathBuf::from("./data/corpus.sqlite"),
            media_dir: PathBuf::from("./data/media"),
            request_timeout: Duration::from_secs(10),
            retry_max_attempts: 1,
            retry_base_delay: Duration::from_millis(1),
            schema_cutoff: parse_cutoff(DEFAULT_SCHEMA_CUTOFF).expect("default cutoff is valid"),
            dest_base_url: None,
            dest_access_token: None,
            upload_media: true,
        }
    }
}

fn parse_cutoff(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|at| at.with_timezone(&Utc))
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

fn parse_env_timestamp(name: &str, default: &str) -> Result<DateTime<Utc>, ConfigError> {
    let value = env_or_default(name, default);
    parse_cutoff(&value).map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!("expected an RFC 3339 timestamp, got {value:?}: {e}"),
    })
}
