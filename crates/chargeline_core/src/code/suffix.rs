//! Numeric suffix sources for business codes.

use rand::Rng;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// Supplies the numeric tail of a candidate code.
pub trait SuffixSource: Debug + Send + Sync {
    /// Returns a value in `0..10^digits`.
    fn next_suffix(&self, digits: u32) -> u64;
}

/// Uniformly random suffixes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSuffix;

impl SuffixSource for RandomSuffix {
    fn next_suffix(&self, digits: u32) -> u64 {
        rand::thread_rng().gen_range(0..upper_bound(digits))
    }
}

/// Monotonic suffixes starting at `start`, wrapping at `10^digits`.
#[derive(Debug, Default)]
pub struct SequentialSuffix {
    next: AtomicU64,
}

impl SequentialSuffix {
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl SuffixSource for SequentialSuffix {
    fn next_suffix(&self, digits: u32) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) % upper_bound(digits)
    }
}

pub(crate) fn upper_bound(digits: u32) -> u64 {
    10u64.saturating_pow(digits).max(1)
}
