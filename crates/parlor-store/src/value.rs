//! Tree values and the server-clock placeholder.
//!
//! Node values are JSON trees ([`serde_json::Value`]).  A write may
//! embed [`server_timestamp`] placeholders anywhere in the value; the
//! backend substitutes its own clock before applying the write, so all
//! writers share one authoritative ordering.

use parlor_shared::constants::SERVER_TIMESTAMP_KEY;
use serde_json::{json, Value};

/// The placeholder object the store replaces with its clock at write
/// time.
pub fn server_timestamp() -> Value {
    json!({ SERVER_TIMESTAMP_KEY: "timestamp" })
}

/// Whether a value is the server-clock placeholder.
pub fn is_server_timestamp(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.contains_key(SERVER_TIMESTAMP_KEY))
}

/// Replace every embedded placeholder with `now_ms`, recursively.
pub fn resolve_server_timestamps(value: &mut Value, now_ms: i64) {
    if is_server_timestamp(value) {
        *value = json!(now_ms);
        return;
    }
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                resolve_server_timestamps(child, now_ms);
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                resolve_server_timestamps(child, now_ms);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_detected() {
        assert!(is_server_timestamp(&server_timestamp()));
        assert!(!is_server_timestamp(&json!({"state": "online"})));
        assert!(!is_server_timestamp(&json!(42)));
    }

    #[test]
    fn resolves_nested_placeholders() {
        let mut value = json!({
            "state": "online",
            "last_changed": server_timestamp(),
            "nested": [ { "t": server_timestamp() }, 7 ],
        });

        resolve_server_timestamps(&mut value, 1234);

        assert_eq!(
            value,
            json!({
                "state": "online",
                "last_changed": 1234,
                "nested": [ { "t": 1234 }, 7 ],
            })
        );
    }
}
