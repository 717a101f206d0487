//! Environment-driven settings for the session store and its viewer surface.
//!
//! Every tunable a host process needs (pool sizing, pre-seeded metadata
//! keys, enum discovery ceilings, pagination bounds, the global viewer
//! password) is collected here so it can load one `Settings` value at
//! start-up and hand slices of it to [`crate::pool`], [`crate::factory`],
//! and [`crate::viewer`].

use std::env;
use std::num::ParseIntError;

use thiserror::Error;

/// Default target database name when `DATABASE_NAME` is unset.
const DEFAULT_DATABASE_NAME: &str = "examples";
/// Default target collection/table name when `COLLECTION_NAME` is unset.
const DEFAULT_COLLECTION_NAME: &str = "sessions";
/// Default global viewer password. Not safe for production; a warning is
/// logged whenever this default is in effect.
const DEFAULT_BACKEND_PASSWORD: &str = "123456";

/// Errors raised while loading [`Settings`] from the process environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric environment variable held a value that could not be parsed.
    #[error("environment variable {name} could not be parsed as an integer: {source}")]
    InvalidInteger {
        /// Name of the offending environment variable.
        name: &'static str,
        /// Underlying parse failure.
        #[source]
        source: ParseIntError,
    },

    /// Neither a connection string nor the discrete host/port fields needed
    /// to build one were present.
    #[error(
        "no database connection configured: set SESSION_STORE_CONNECTION_STRING or \
         SESSION_STORE_DB_HOST/SESSION_STORE_DB_PORT/SESSION_STORE_DB_USER/SESSION_STORE_DB_PASSWORD"
    )]
    MissingConnectionInfo,
}

/// Discrete connection fields used to synthesize a DSN when no full
/// connection string is supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscreteConnectionInfo {
    /// Database host name.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database user name.
    pub user: String,
    /// Database password.
    pub password: String,
}

/// Process-wide settings, loaded once from the environment.
///
/// Field names mirror the environment/configuration table: a
/// `connection_string` if present is used verbatim; otherwise
/// `discrete_connection` must be populated and the pool adapter is
/// responsible for assembling a DSN from it.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Full database connection string, when supplied directly.
    pub connection_string: Option<String>,
    /// Discrete connection fields, used when `connection_string` is absent.
    pub discrete_connection: Option<DiscreteConnectionInfo>,
    /// Target database name.
    pub database_name: String,
    /// Target collection (table) name.
    pub collection_name: String,
    /// Maximum pool size.
    pub max_pool_size: u32,
    /// Minimum pool size.
    pub min_pool_size: u32,
    /// Maximum idle time for a pooled connection, in milliseconds.
    pub max_idle_time_ms: u64,
    /// Global viewer password (compared as a SHA-256 digest; see
    /// [`crate::viewer::auth`]).
    pub backend_password: String,
    /// Dotted metadata paths treated as enum-eligible by the query engine.
    pub enum_fields: Vec<String>,
    /// Distinct-value ceiling above which an enum field degrades to its
    /// base type.
    pub enum_max_values: usize,
    /// Pre-seeded, indexed metadata keys.
    pub metadata_fields: Vec<String>,
    /// Default page size for viewer search.
    pub default_page_size: u32,
    /// Maximum page size the viewer will honor.
    pub max_page_size: u32,
    /// Logging verbosity, passed to the `tracing` env-filter.
    pub log_level: String,
}

impl Settings {
    /// Loads settings from the process environment, applying the documented
    /// defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidInteger`] if a numeric variable is
    /// present but not parseable, or [`ConfigError::MissingConnectionInfo`]
    /// if neither a connection string nor the discrete host fields are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let connection_string = env_opt("SESSION_STORE_CONNECTION_STRING");
        let discrete_connection = discrete_connection_from_env()?;
        if connection_string.is_none() && discrete_connection.is_none() {
            return Err(ConfigError::MissingConnectionInfo);
        }

        Ok(Self {
            connection_string,
            discrete_connection,
            database_name: env_or("SESSION_STORE_DATABASE_NAME", DEFAULT_DATABASE_NAME),
            collection_name: env_or("SESSION_STORE_COLLECTION_NAME", DEFAULT_COLLECTION_NAME),
            max_pool_size: env_parsed_or("SESSION_STORE_MAX_POOL_SIZE", 100)?,
            min_pool_size: env_parsed_or("SESSION_STORE_MIN_POOL_SIZE", 10)?,
            max_idle_time_ms: env_parsed_or("SESSION_STORE_MAX_IDLE_TIME_MS", 30_000)?,
            backend_password: env_or("SESSION_STORE_BACKEND_PASSWORD", DEFAULT_BACKEND_PASSWORD),
            enum_fields: env_list("SESSION_STORE_ENUM_FIELDS"),
            enum_max_values: env_parsed_or("SESSION_STORE_ENUM_MAX_VALUES", 50)?,
            metadata_fields: env_list("SESSION_STORE_METADATA_FIELDS"),
            default_page_size: env_parsed_or("SESSION_STORE_DEFAULT_PAGE_SIZE", 20)?,
            max_page_size: env_parsed_or("SESSION_STORE_MAX_PAGE_SIZE", 100)?,
            log_level: env_or("SESSION_STORE_LOG_LEVEL", "info"),
        })
    }

    /// Reports whether the configured backend password is the insecure
    /// built-in default; callers should log a warning when this is `true`.
    #[must_use]
    pub fn uses_default_backend_password(&self) -> bool {
        self.backend_password == DEFAULT_BACKEND_PASSWORD
    }
}

fn discrete_connection_from_env() -> Result<Option<DiscreteConnectionInfo>, ConfigError> {
    let host = env_opt("SESSION_STORE_DB_HOST");
    let user = env_opt("SESSION_STORE_DB_USER");
    let password = env_opt("SESSION_STORE_DB_PASSWORD");
    let (Some(host), Some(user), Some(password)) = (host, user, password) else {
        return Ok(None);
    };
    let port = env_parsed_or("SESSION_STORE_DB_PORT", 5432)?;
    Ok(Some(DiscreteConnectionInfo {
        host,
        port,
        user,
        password,
    }))
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_owned())
}

fn env_list(name: &str) -> Vec<String> {
    match env_opt(name) {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(ToOwned::to_owned)
            .collect(),
        None => Vec::new(),
    }
}

fn env_parsed_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = ParseIntError>,
{
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|source| ConfigError::InvalidInteger { name, source }),
        None => Ok(default),
    }
}
