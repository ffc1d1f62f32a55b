//! Generic repository contract and shared repository errors.

use crate::code::CodeError;
use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::attributes::AccountValidationError;
use crate::search::scope::Trashed;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for entity persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(AccountValidationError),
    Db(DbError),
    /// No row with this id in the requested state.
    NotFound(i64),
    /// A unique attribute is already taken by another active row.
    Conflict { field: &'static str },
    Code(CodeError),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::Conflict { field } => write!(f, "`{field}` is already taken"),
            Self::Code(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "missing required column `{table}.{column}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Code(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AccountValidationError> for RepoError {
    fn from(value: AccountValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<CodeError> for RepoError {
    fn from(value: CodeError) -> Self {
        match value {
            CodeError::Db(err) => Self::Db(err),
            other => Self::Code(other),
        }
    }
}

/// CRUD contract shared by entity repositories.
pub trait Repository {
    type Entity;
    type Id: Copy;
    /// Unique lookup key, e.g. an email or business code.
    type Key;
    /// Loosely typed attribute input for create and update.
    type Input;
    type Criteria;

    fn create(&self, input: &Self::Input) -> RepoResult<Self::Entity>;
    /// Active rows only; absence is `Ok(None)`.
    fn find_by_unique_key(&self, key: &Self::Key) -> RepoResult<Option<Self::Entity>>;
    fn find(&self, id: Self::Id, trashed: Trashed) -> RepoResult<Option<Self::Entity>>;
    /// Partial update of an active row.
    fn update(&self, input: &Self::Input, id: Self::Id) -> RepoResult<Self::Entity>;
    /// Returns the number of rows affected, 0 or 1.
    fn destroy(&self, id: Self::Id) -> RepoResult<usize>;
    fn search(&self, criteria: &Self::Criteria) -> RepoResult<Vec<Self::Entity>>;
    fn count(&self, criteria: &Self::Criteria) -> RepoResult<u64>;
}

/// Capability of repositories whose `destroy` leaves a tombstone.
pub trait SoftDeletes: Repository {
    /// Returns the number of rows revived, 0 or 1.
    fn restore(&self, id: Self::Id) -> RepoResult<usize>;
    /// Purges a soft-deleted row; active rows are never purged.
    fn force_delete(&self, id: Self::Id) -> RepoResult<usize>;
}

pub(crate) fn ensure_connection_ready(
    conn: &Connection,
    tables: &[(&'static str, &[&'static str])],
) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for &(table, columns) in tables {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(RepoError::MissingRequiredColumn { table, column });
            }
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM pragma_table_info(?1)
            WHERE name = ?2
        );",
        [table, column],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}
