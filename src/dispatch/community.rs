//! Community lookup for polls.

use crate::config::ResolverConfig;
use std::collections::HashMap;
use std::net::IpAddr;

/// Static sampler → community map with a fallback
#[derive(Debug, Clone)]
pub struct Communities {
    default: String,
    overrides: HashMap<IpAddr, String>,
}

impl Communities {
    pub fn new(default: impl Into<String>, overrides: HashMap<IpAddr, String>) -> Self {
        Self {
            default: default.into(),
            overrides,
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new(config.default_community.clone(), config.communities.clone())
    }

    /// Community to poll `sampler` with
    pub fn resolve(&self, sampler: &IpAddr) -> &str {
        self.overrides
            .get(sampler)
            .map(String::as_str)
            .unwrap_or(&self.default)
    }
}
