//! Business-code generation.
//!
//! # Responsibility
//! - Compose prefixed, region-embedding, fixed-length codes.
//! - Check candidates against the owning collection and retry on collision.
//!
//! # Invariants
//! - Generated codes are exactly `total_length` characters.
//! - Retries are bounded; exhaustion is reported, never swallowed.
//! - Storage must carry a UNIQUE constraint on `code`; the check here is not
//!   atomic with the insert.

mod generator;
mod suffix;

pub use generator::{CodeError, CodeGenerator, CodeRegistry, CodeRequest, CodeResult};
pub use suffix::{RandomSuffix, SequentialSuffix, SuffixSource};
