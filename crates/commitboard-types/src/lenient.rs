//! Lenient field decoding for documents written by many different clients
//!
//! Amounts show up as numbers or numeric strings. Timestamps show up as rich
//! `{seconds, nanoseconds}` objects, RFC 3339 strings, bare `YYYY-MM-DD` dates
//! or epoch milliseconds. Every helper here maps garbage to a neutral value
//! instead of failing the whole document.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Coerce a JSON value into a finite amount. Anything unparseable is 0.
pub fn amount_from_value(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Coerce a JSON value into a count. Negative and fractional inputs are clamped/rounded.
pub fn count_from_value(value: &Value) -> u64 {
    let amount = amount_from_value(value);
    if amount <= 0.0 {
        0
    } else {
        amount.round() as u64
    }
}

/// Normalize any supported timestamp representation to a UTC instant
pub fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0)
                .min(999_999_999) as u32;
            Utc.timestamp_opt(seconds, nanos).single()
        }
        Value::String(s) => timestamp_from_str(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

/// Parse RFC 3339, naive `YYYY-MM-DDTHH:MM:SS` (read as UTC) or a bare date (UTC midnight)
pub fn timestamp_from_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Non-empty text. Numbers are stringified, everything else is absent.
pub fn text_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ===================
// serde adapters
// ===================

pub fn amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(amount_from_value(&value))
}

pub fn non_negative_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    amount(deserializer).map(|v| v.max(0.0))
}

pub fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(count_from_value(&value))
}

pub fn timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(timestamp_from_value(&value))
}

pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(text_from_value(&value))
}

/// Strict boolean: only a literal `true` counts
pub fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(matches!(value, Value::Bool(true)))
}
