//! Account domain model.
//!
//! # Responsibility
//! - Define the `Account` record, its related records and the declarative
//!   relationship graph between them.
//! - Own the writable-attribute allow-list and input coercion rules.
//!
//! # Invariants
//! - `Account::code` is assigned once at creation and never rewritten.
//! - Deletion is a `deleted_at` tombstone until an explicit purge.

pub mod account;
pub mod attributes;
pub mod credential;
pub mod related;
pub mod relation;
