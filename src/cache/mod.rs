//! # Interface Cache
//!
//! TTL store keyed by `(sampler, ifIndex)`. Flow decoders read it on every
//! record; dispatcher workers and the refresher are the only writers.

pub mod store;
pub mod types;

pub use store::CacheStore;
pub use types::{CacheEntry, CacheKey, Interface};
