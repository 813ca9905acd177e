//! Tolerant timestamp handling for admin-authored schedule fields.
//!
//! Scheduled times come from the CRUD layer and from historical documents,
//! so a malformed value must decode as "not scheduled" rather than poison
//! the whole instance. Marker fields written by this subsystem use chrono's
//! strict RFC 3339 serde instead.

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 timestamp, returning `None` on any malformation.
pub fn parse_lenient(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Serde adapter for `Option<DateTime<Utc>>` schedule fields: serializes as
/// an RFC 3339 string or null, deserializes anything unparseable to `None`.
pub mod lenient_timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(match raw {
            Some(serde_json::Value::String(s)) => {
                let parsed = super::parse_lenient(&s);
                if parsed.is_none() {
                    tracing::debug!(raw = %s, "unparseable scheduled timestamp, treating as unscheduled");
                }
                parsed
            }
            Some(serde_json::Value::Null) | None => None,
            Some(other) => {
                tracing::debug!(raw = %other, "non-string scheduled timestamp, treating as unscheduled");
                None
            }
        })
    }
}
