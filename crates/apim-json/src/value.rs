use serde_json::Value;

/// Drop every object member whose value is `null`, at any depth.
///
/// Arrays are walked so that objects nested in them are cleaned too, but
/// `null` array elements are kept: removing them would shift indices.
pub fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}
