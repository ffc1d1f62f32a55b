//! Core configuration.
//!
//! # Responsibility
//! - Describe database, logging and account-repository settings.
//! - Load them from JSON with defaults for every field.
//!
//! # Invariants
//! - Unknown keys are rejected so typos surface at startup.
//! - `validate()` runs on every load path.

use crate::code::{CodeError, CodeGenerator, CodeRequest};
use crate::logging::default_log_level;
use crate::model::relation::{default_eager_relations, dedup_relations, Relation};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Top-level configuration for processes embedding the core.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// `None` opens an in-memory database.
    pub database_path: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub accounts: AccountRepoConfig,
}

impl CoreConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.accounts.validate()
    }
}

/// Logging backend settings consumed by `init_logging`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory; `None` leaves logging uninitialized.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

/// What destroying an account does to its soft-deletable pivot rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotCascade {
    /// Pivot rows are left untouched.
    Retain,
    /// Active pivot rows get the account's `deleted_at`, and restore revives
    /// exactly those rows.
    SoftDelete,
}

/// Business-code layout for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodeScheme {
    pub prefix: String,
    pub collection: String,
    pub total_length: usize,
    pub max_attempts: u32,
}

impl Default for CodeScheme {
    fn default() -> Self {
        Self {
            prefix: "TCU".to_string(),
            collection: "accounts".to_string(),
            total_length: 12,
            max_attempts: 16,
        }
    }
}

impl CodeScheme {
    pub fn request<'a>(&'a self, region_code: Option<&'a str>) -> CodeRequest<'a> {
        CodeRequest {
            prefix: &self.prefix,
            collection: &self.collection,
            region_code,
            total_length: self.total_length,
        }
    }
}

/// Per-repository account settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccountRepoConfig {
    pub code: CodeScheme,
    /// Relations loaded with every read unless the caller overrides them.
    pub eager_relations: Vec<Relation>,
    pub pivot_cascade: PivotCascade,
    /// Status assigned when creation input has no `status_id`.
    pub default_status_id: Option<i64>,
}

impl Default for AccountRepoConfig {
    fn default() -> Self {
        Self {
            code: CodeScheme::default(),
            eager_relations: default_eager_relations(),
            pivot_cascade: PivotCascade::SoftDelete,
            default_status_id: Some(1),
        }
    }
}

impl AccountRepoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.code.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "accounts.code.max_attempts must be at least 1".to_string(),
            ));
        }
        // Region segment is optional, so the bare prefix must leave room.
        CodeGenerator::default()
            .compose(&self.code.request(None), 0)
            .map_err(|err: CodeError| ConfigError::Invalid(format!("accounts.code: {err}")))?;
        if dedup_relations(&self.eager_relations).len() != self.eager_relations.len() {
            return Err(ConfigError::Invalid(
                "accounts.eager_relations contains duplicates".to_string(),
            ));
        }
        Ok(())
    }
}
