// Attribute transforms - server timestamps in, DateTime out

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

/// Placeholder the backend replaces with its own clock at write time.
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}

pub fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|m| m.get(".sv"))
        .and_then(Value::as_str)
        == Some("timestamp")
}

/// Serialize a timestamp attribute for writing: unset becomes the server
/// timestamp placeholder, a date becomes epoch milliseconds.
pub fn serialize_timestamp(value: Option<&DateTime<Utc>>) -> Value {
    match value {
        Some(date) => json!(date.timestamp_millis()),
        None => server_timestamp(),
    }
}

/// Read a stored timestamp (epoch milliseconds) back into a date.
/// Anything else deserializes to None.
pub fn deserialize_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let millis = value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Replace every server timestamp placeholder inside `value` with `now`.
pub fn resolve_server_values(value: Value, now: i64) -> Value {
    if is_server_timestamp(&value) {
        return json!(now);
    }
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, resolve_server_values(v, now)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_serializes_to_placeholder() {
        assert_eq!(serialize_timestamp(None), json!({ ".sv": "timestamp" }));
        assert!(is_server_timestamp(&serialize_timestamp(None)));
    }

    #[test]
    fn test_timestamp_round_trip() {
        let date = Utc.timestamp_millis_opt(1_500_000_000_123).single().unwrap();
        let stored = serialize_timestamp(Some(&date));
        assert_eq!(stored, json!(1_500_000_000_123i64));
        assert_eq!(deserialize_timestamp(&stored), Some(date));
    }

    #[test]
    fn test_non_numeric_is_none() {
        assert_eq!(deserialize_timestamp(&json!("yesterday")), None);
        assert_eq!(deserialize_timestamp(&Value::Null), None);
    }

    #[test]
    fn test_resolve_nested_placeholders() {
        let value = json!({ "message": "hi", "meta": { "at": { ".sv": "timestamp" } } });
        assert_eq!(
            resolve_server_values(value, 42),
            json!({ "message": "hi", "meta": { "at": 42 } })
        );
    }
}
