use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;
use time::{
    Date, OffsetDateTime, PrimitiveDateTime,
    format_description::{BorrowedFormatItem, well_known::Rfc3339},
    macros::format_description,
};

/// Serde helpers for `OffsetDateTime`.
///
/// Output format: RFC 3339 (e.g. `2025-01-02T03:04:05Z`).
/// Input: RFC 3339 or `YYYY-mm-dd HH:MM:SS` (assumed UTC).
pub mod offset_datetime {
    use super::*;

    pub fn serialize<S>(dt: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format(&Rfc3339).map_err(serde::ser::Error::custom)?)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_datetime_str(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp '{raw}'")))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::OffsetDateTime;

        use crate::serde_helpers::parse_datetime_str;

        pub fn serialize<S>(dt: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match dt {
                Some(dt) => super::serialize(dt, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| {
                    parse_datetime_str(&raw).ok_or_else(|| {
                        serde::de::Error::custom(format!("unrecognized timestamp '{raw}'"))
                    })
                })
                .transpose()
        }
    }
}

/// Serde helpers for `std::time::Duration` as humantime strings (`30m`, `1h 5s`).
pub mod duration {
    use std::time::Duration;

    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

const SPACE_SEPARATED: &[BorrowedFormatItem] = format_description!(
    "[year]-[month padding:zero]-[day padding:zero] [hour padding:zero]:[minute padding:zero]:[second padding:zero]"
);
const DATE_ONLY: &[BorrowedFormatItem] =
    format_description!("[year]-[month padding:zero]-[day padding:zero]");

/// Epoch values above this are read as milliseconds rather than seconds.
const MILLIS_CUTOFF: i64 = 100_000_000_000;

pub fn parse_datetime_str(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    OffsetDateTime::parse(raw, &Rfc3339)
        .ok()
        .or_else(|| {
            PrimitiveDateTime::parse(raw, SPACE_SEPARATED)
                .ok()
                .map(|pdt| pdt.assume_utc())
        })
        .or_else(|| {
            Date::parse(raw, DATE_ONLY)
                .ok()
                .map(|d| d.midnight().assume_utc())
        })
}

/// Best-effort timestamp from arbitrary file metadata (string or epoch number).
pub fn timestamp_from_value(value: &Value) -> Option<OffsetDateTime> {
    match value {
        Value::String(s) => parse_datetime_str(s),
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            if raw.abs() >= MILLIS_CUTOFF {
                OffsetDateTime::from_unix_timestamp_nanos(raw as i128 * 1_000_000).ok()
            } else {
                OffsetDateTime::from_unix_timestamp(raw).ok()
            }
        }
        _ => None,
    }
}
