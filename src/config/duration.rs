//! Serde adapter for durations written as (fractional) seconds.
//!
//! Accepts integers, floats and numeric strings so values coming from
//! environment overrides parse the same way as file values.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if duration.subsec_nanos() == 0 {
        serializer.serialize_u64(duration.as_secs())
    } else {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(SecondsVisitor)
}

struct SecondsVisitor;

impl<'de> Visitor<'de> for SecondsVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a non-negative number of seconds")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
        Ok(Duration::from_secs(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
        u64::try_from(value)
            .map(Duration::from_secs)
            .map_err(|_| E::custom(format!("duration must not be negative, got {value}")))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Duration, E> {
        Duration::try_from_secs_f64(value)
            .map_err(|_| E::custom(format!("invalid duration in seconds: {value}")))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
        let seconds: f64 = value
            .trim()
            .parse()
            .map_err(|_| E::custom(format!("invalid duration in seconds: '{value}'")))?;
        self.visit_f64(seconds)
    }
}
