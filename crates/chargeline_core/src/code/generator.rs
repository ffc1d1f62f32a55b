//! Candidate composition and collision-checked generation.

use super::suffix::{RandomSuffix, SuffixSource};
use crate::db::DbError;
use log::{debug, error, warn};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Largest suffix width that fits a `u64` range.
const MAX_SUFFIX_DIGITS: usize = 18;

pub type CodeResult<T> = Result<T, CodeError>;

#[derive(Debug)]
pub enum CodeError {
    /// Prefix is empty or not ASCII-alphabetic.
    InvalidPrefix(String),
    /// Collection is not a plain SQL identifier.
    InvalidCollection(String),
    /// Prefix and region leave no room for a numeric suffix.
    LengthTooShort {
        total_length: usize,
        fixed_length: usize,
    },
    /// Suffix would need more digits than supported.
    LengthTooLong { total_length: usize },
    /// Every attempt collided; the code space is exhausted or misconfigured.
    Exhausted { collection: String, attempts: u32 },
    /// Collision lookup failed.
    Db(DbError),
}

impl Display for CodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPrefix(prefix) => {
                write!(f, "code prefix `{prefix}` must be non-empty ASCII letters")
            }
            Self::InvalidCollection(collection) => {
                write!(f, "code collection `{collection}` is not a valid identifier")
            }
            Self::LengthTooShort {
                total_length,
                fixed_length,
            } => write!(
                f,
                "code length {total_length} leaves no suffix after {fixed_length} fixed characters"
            ),
            Self::LengthTooLong { total_length } => write!(
                f,
                "code length {total_length} needs more than {MAX_SUFFIX_DIGITS} suffix digits"
            ),
            Self::Exhausted {
                collection,
                attempts,
            } => write!(
                f,
                "no free code in `{collection}` after {attempts} attempts"
            ),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for CodeError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for CodeError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Parameters of one `generate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRequest<'a> {
    /// Short alphabetic tag of the entity class, e.g. `TCU`.
    pub prefix: &'a str,
    /// Collection the uniqueness is scoped to.
    pub collection: &'a str,
    /// Region/city segment; non-alphanumerics are dropped.
    pub region_code: Option<&'a str>,
    /// Full code length including prefix and region.
    pub total_length: usize,
}

/// Lookup used to reject candidates already taken.
pub trait CodeRegistry {
    fn code_in_use(&self, collection: &str, code: &str) -> CodeResult<bool>;
}

impl CodeRegistry for Connection {
    /// Checks every row, trashed included, since the UNIQUE index covers them.
    fn code_in_use(&self, collection: &str, code: &str) -> CodeResult<bool> {
        ensure_identifier(collection)?;
        let exists: i64 = self.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {collection} WHERE code = ?1);"),
            [code],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }
}

/// Generates business codes from a pluggable suffix source.
#[derive(Debug)]
pub struct CodeGenerator {
    source: Box<dyn SuffixSource>,
    max_attempts: u32,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(Box::new(RandomSuffix), 16)
    }
}

impl CodeGenerator {
    /// `max_attempts` is clamped to at least one.
    pub fn new(source: Box<dyn SuffixSource>, max_attempts: u32) -> Self {
        Self {
            source,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Builds one candidate from a suffix without touching storage.
    pub fn compose(&self, request: &CodeRequest<'_>, suffix: u64) -> CodeResult<String> {
        let layout = CodeLayout::try_from_request(request)?;
        Ok(layout.render(suffix))
    }

    /// Returns a code not present in `request.collection` at call time.
    ///
    /// # Errors
    /// - Configuration errors for bad prefix, collection or length.
    /// - `CodeError::Exhausted` when every attempt collides.
    pub fn generate(
        &self,
        registry: &dyn CodeRegistry,
        request: &CodeRequest<'_>,
    ) -> CodeResult<String> {
        let layout = CodeLayout::try_from_request(request)?;
        ensure_identifier(request.collection)?;

        for attempt in 1..=self.max_attempts {
            let candidate = layout.render(self.source.next_suffix(layout.suffix_digits));
            if !registry.code_in_use(request.collection, &candidate)? {
                debug!(
                    "event=code_generate module=code status=ok collection={} attempt={attempt}",
                    request.collection
                );
                return Ok(candidate);
            }
            debug!(
                "event=code_generate module=code status=collision collection={} attempt={attempt}",
                request.collection
            );
        }

        error!(
            "event=code_generate module=code status=error collection={} attempts={} error_code=code_exhausted",
            request.collection, self.max_attempts
        );
        Err(CodeError::Exhausted {
            collection: request.collection.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Generates a code and hands it to `insert`, regenerating when the insert
    /// reports a code conflict.
    ///
    /// Covers the window between the collision check and the insert, where a
    /// concurrent writer may take the same code.
    pub fn insert_with_unique_code<T, E>(
        &self,
        registry: &dyn CodeRegistry,
        request: &CodeRequest<'_>,
        mut insert: impl FnMut(&str) -> Result<T, E>,
        is_code_conflict: impl Fn(&E) -> bool,
    ) -> Result<(String, T), E>
    where
        E: From<CodeError>,
    {
        for attempt in 1..=self.max_attempts {
            let code = self.generate(registry, request)?;
            match insert(&code) {
                Ok(value) => return Ok((code, value)),
                Err(err) if is_code_conflict(&err) => {
                    warn!(
                        "event=code_insert module=code status=conflict collection={} attempt={attempt}",
                        request.collection
                    );
                }
                Err(err) => return Err(err),
            }
        }

        error!(
            "event=code_insert module=code status=error collection={} attempts={} error_code=code_exhausted",
            request.collection, self.max_attempts
        );
        Err(CodeError::Exhausted {
            collection: request.collection.to_string(),
            attempts: self.max_attempts,
        }
        .into())
    }
}

#[derive(Debug)]
struct CodeLayout {
    head: String,
    suffix_digits: u32,
}

impl CodeLayout {
    fn try_from_request(request: &CodeRequest<'_>) -> CodeResult<Self> {
        let prefix = request.prefix.trim();
        if prefix.is_empty() || !prefix.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(CodeError::InvalidPrefix(request.prefix.to_string()));
        }

        let region: String = request
            .region_code
            .unwrap_or_default()
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        let head = format!("{prefix}{region}").to_ascii_uppercase();

        if request.total_length <= head.len() {
            return Err(CodeError::LengthTooShort {
                total_length: request.total_length,
                fixed_length: head.len(),
            });
        }
        let digits = request.total_length - head.len();
        if digits > MAX_SUFFIX_DIGITS {
            return Err(CodeError::LengthTooLong {
                total_length: request.total_length,
            });
        }

        Ok(Self {
            head,
            suffix_digits: digits as u32,
        })
    }

    fn render(&self, suffix: u64) -> String {
        let width = self.suffix_digits as usize;
        let bounded = suffix % super::suffix::upper_bound(self.suffix_digits);
        format!("{}{bounded:0width$}", self.head)
    }
}

fn ensure_identifier(collection: &str) -> CodeResult<()> {
    let mut chars = collection.chars();
    let valid = matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(CodeError::InvalidCollection(collection.to_string()))
    }
}
