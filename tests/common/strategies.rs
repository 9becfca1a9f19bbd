use ifmeta_core::cache::CacheKey;
use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Strategy for generating sampler addresses from a small pool, so keys collide
pub fn sampler_strategy() -> impl Strategy<Value = IpAddr> {
    prop_oneof![
        (1u8..5).prop_map(|last| IpAddr::V4(Ipv4Addr::new(192, 0, 2, last))),
        (1u16..3).prop_map(|last| IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, last))),
    ]
}

/// Strategy for generating cache keys
pub fn cache_key_strategy() -> impl Strategy<Value = CacheKey> {
    (sampler_strategy(), 0u32..16).prop_map(|(sampler, if_index)| CacheKey::new(sampler, if_index))
}

/// Strategy for generating durations in whole minutes, zero included
pub fn minutes_strategy() -> impl Strategy<Value = u64> {
    0u64..120
}
