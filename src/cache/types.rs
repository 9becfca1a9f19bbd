//! Cache value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Identity of a cached fact: one interface on one sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub sampler: IpAddr,
    pub if_index: u32,
}

impl CacheKey {
    pub fn new(sampler: IpAddr, if_index: u32) -> Self {
        Self { sampler, if_index }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.sampler, self.if_index)
    }
}

/// Resolved interface metadata, replaced wholesale on refresh
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub description: String,
    /// Speed in Mbps
    pub speed: u64,
}

/// Stored value for a [`CacheKey`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub sampler_name: String,
    pub interface: Interface,
    pub last_updated: DateTime<Utc>,
    /// Set while a background refresh for this key is outstanding
    #[serde(skip)]
    pub poll_in_flight: bool,
}
