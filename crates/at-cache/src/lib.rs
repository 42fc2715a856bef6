//! # at-cache
//!
//! Content-addressed result cache shared by tuning sessions. Entries are
//! keyed by a SHA-256 of the target identity and the canonical parameter
//! JSON, stored one file per entry, and expire after a configurable TTL.

mod key;
mod store;

pub use key::{cache_key, canonical_params, within_tolerance};
pub use store::{CacheRecord, CacheStats, DiskStats, ResultCache, TargetUsage};
