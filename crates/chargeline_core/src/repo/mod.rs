//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the generic CRUD contract shared by entity repositories.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Writes validate input before any SQL mutation.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`) in
//!   addition to DB transport errors.

pub mod account_repo;
pub mod base;
pub mod relation_repo;

pub use crate::search::scope::Trashed;
pub use account_repo::{SqliteAccountRepository, UniqueKey};
pub use base::{RepoError, RepoResult, Repository, SoftDeletes};
pub use relation_repo::RelationLoader;
