//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into account use-cases.
//! - Keep callers decoupled from storage details.

pub mod account_service;
