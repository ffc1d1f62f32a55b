//! Typed search scopes for repository queries.
//!
//! # Responsibility
//! - Let callers compose filters without writing SQL.
//! - Keep column names and bound values under core control.

pub mod scope;
