//! Store configuration module.
//!
//! This module loads the store configuration from environment variables.
//!
//! # Environment Variables
//!
//! - `TRACEDB_DATABASE_DIRECTORY`: Directory where database files are stored (default: `./data`)
//! - `TRACEDB_MAX_DEGREE`: Cap on the B-tree degree (optional, at least 2)
//!
//! # Invariants
//!
//! - `database_directory` is always a valid path (may not exist yet)
//! - `max_degree`, when set, is at least `MIN_DEGREE`

use std::path::PathBuf;

use crate::storage::btree::MIN_DEGREE;

/// Environment variable naming the data directory.
pub const DATABASE_DIRECTORY_VAR: &str = "TRACEDB_DATABASE_DIRECTORY";
/// Environment variable capping the B-tree degree.
pub const MAX_DEGREE_VAR: &str = "TRACEDB_MAX_DEGREE";

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory where database files are stored.
    /// The trace database lives at `{database_directory}/traces.db`.
    pub database_directory: PathBuf,
    /// Upper bound on the degree of every tree. `None` uses the largest
    /// degree a page allows.
    pub max_degree: Option<usize>,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_directory: PathBuf::from(Self::DEFAULT_DATABASE_DIRECTORY),
            max_degree: None,
        }
    }
}

impl StoreConfig {
    /// Default database directory.
    pub const DEFAULT_DATABASE_DIRECTORY: &'static str = "./data";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `TRACEDB_MAX_DEGREE` is set but is not an integer
    /// of at least 2.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_directory = lookup(DATABASE_DIRECTORY_VAR)
            .filter(|dir| !dir.is_empty())
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATABASE_DIRECTORY), PathBuf::from);

        let max_degree = lookup(MAX_DEGREE_VAR)
            .map(|value| Self::parse_max_degree(&value))
            .transpose()?;

        Ok(Self {
            database_directory,
            max_degree,
        })
    }

    fn parse_max_degree(value: &str) -> Result<usize, ConfigError> {
        match value.trim().parse::<usize>() {
            Ok(degree) if degree >= MIN_DEGREE => Ok(degree),
            _ => Err(ConfigError::InvalidValue {
                name: MAX_DEGREE_VAR.to_string(),
                message: format!("'{value}' is not an integer of at least {MIN_DEGREE}"),
            }),
        }
    }
}
