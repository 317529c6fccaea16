//! `YYYY-MM-DD HH:MM:SS` wire format shared by the JSON bodies and the
//! stream watermark.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serializer};

pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn parse(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), FORMAT).ok()
}

pub fn format(value: &NaiveDateTime) -> String {
    value.format(FORMAT).to_string()
}

pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(value))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("expected {FORMAT}, got {raw:?}")))
}

pub mod option {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => super::serialize(v, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => super::parse(&raw).map(Some).ok_or_else(|| {
                serde::de::Error::custom(format!("expected {}, got {raw:?}", super::FORMAT))
            }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_watermark_format() {
        let ts = parse("2024-01-02 10:00:00").unwrap();
        assert_eq!(format(&ts), "2024-01-02 10:00:00");
        assert!(parse("2024-01-02T10:00:00").is_none());
        assert!(parse("yesterday").is_none());
    }
}
