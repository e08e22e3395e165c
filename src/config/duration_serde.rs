//! Common serde utilities for human-readable durations across configuration.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::{fmt, time::Duration};

/// Custom serde functions for Duration that support human-readable strings
pub mod duration {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration_str = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&duration_str)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str(
                    "a duration as seconds (number) or human-readable string (e.g., '250ms', '5s', '1m')",
                )
            }

            fn visit_u64<E>(self, seconds: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Duration::from_secs(seconds))
            }

            fn visit_i64<E>(self, seconds: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(seconds)
                    .map(Duration::from_secs)
                    .map_err(|_| de::Error::custom(format!("Negative duration: {seconds}")))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                humantime::parse_duration(value)
                    .map_err(|e| de::Error::custom(format!("Invalid duration '{value}': {e}")))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Probe {
        #[serde(with = "super::duration")]
        wait: Duration,
    }

    #[test]
    fn test_parse_human_readable() {
        let parsed: Probe = toml::from_str(r#"wait = "250ms""#).unwrap();
        assert_eq!(parsed.wait, Duration::from_millis(250));

        let parsed: Probe = toml::from_str(r#"wait = "1m 30s""#).unwrap();
        assert_eq!(parsed.wait, Duration::from_secs(90));
    }

    #[test]
    fn test_parse_plain_seconds() {
        let parsed: Probe = toml::from_str("wait = 5").unwrap();
        assert_eq!(parsed.wait, Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_garbage() {
        let parsed: Result<Probe, _> = toml::from_str(r#"wait = "soon""#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let rendered = toml::to_string(&Probe {
            wait: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(rendered.trim(), r#"wait = "5s""#);
    }
}
