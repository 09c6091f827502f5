//! Ordered path-based patches over JSON documents.
//!
//! Operations apply one after another to a copy of the input, so each one
//! observes the result of those before it. The whole batch is screened for
//! script-capable markup before anything is applied.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::html;
use crate::path::{self, JsonPath, Location, PathError, Segment, Step, parse_index};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchOperation {
    Replace,
    Add,
    Remove,
    Test,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonPatch {
    pub operation: PatchOperation,
    pub json_path: String,
    /// Absent and `null` are the same thing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl JsonPatch {
    pub fn new(
        operation: PatchOperation,
        json_path: impl Into<String>,
        value: Option<Value>,
    ) -> Self {
        Self {
            operation,
            json_path: json_path.into(),
            value: value.filter(|v| !v.is_null()),
        }
    }

    pub fn add(json_path: impl Into<String>, value: Value) -> Self {
        Self::new(PatchOperation::Add, json_path, Some(value))
    }

    pub fn replace(json_path: impl Into<String>, value: Value) -> Self {
        Self::new(PatchOperation::Replace, json_path, Some(value))
    }

    pub fn remove(json_path: impl Into<String>) -> Self {
        Self::new(PatchOperation::Remove, json_path, None)
    }

    pub fn test(json_path: impl Into<String>, value: Value) -> Self {
        Self::new(PatchOperation::Test, json_path, Some(value))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("patch #{index} carries unsafe content at '{path}'")]
    Unsafe { index: usize, path: String },
    #[error(transparent)]
    InvalidPath(#[from] PathError),
    #[error("patch #{index}: nothing to insert into at '{path}'")]
    PathNotFound { index: usize, path: String },
    #[error("patch #{index}: invalid target '{path}': {reason}")]
    InvalidTarget {
        index: usize,
        path: String,
        reason: String,
    },
    #[error("patch #{index}: test failed at '{path}'")]
    TestFailed { index: usize, path: String },
    #[error("document is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Apply `patches` to a serialized document and serialize the result.
pub fn execute(json: &str, patches: &[JsonPatch]) -> Result<String, PatchError> {
    let document: Value = serde_json::from_str(json)?;
    Ok(apply(&document, patches)?.to_string())
}

/// Apply `patches` in order to a copy of `document`.
///
/// On any error the input is left as it was and nothing is returned.
pub fn apply(document: &Value, patches: &[JsonPatch]) -> Result<Value, PatchError> {
    screen(patches)?;
    let paths = patches
        .iter()
        .map(|p| JsonPath::parse(&p.json_path))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(operations = patches.len(), "applying json patch");
    let mut patched = document.clone();
    for (index, (patch, path)) in patches.iter().zip(&paths).enumerate() {
        let value = patch.value.as_ref().filter(|v| !v.is_null());
        let owned = || value.cloned().unwrap_or(Value::Null);
        match patch.operation {
            PatchOperation::Replace => replace(&mut patched, path, owned()),
            PatchOperation::Add => add(&mut patched, path, owned(), index)?,
            PatchOperation::Remove => remove(&mut patched, path, index)?,
            PatchOperation::Test => test(&patched, path, value, index)?,
        }
    }
    Ok(patched)
}

fn screen(patches: &[JsonPatch]) -> Result<(), PatchError> {
    for (index, patch) in patches.iter().enumerate() {
        let value_safe = patch.value.as_ref().is_none_or(|v| html::check_value(v).is_ok());
        if !html::is_safe(&patch.json_path) || !value_safe {
            tracing::warn!(index, path = %patch.json_path, "rejecting unsafe patch");
            return Err(PatchError::Unsafe {
                index,
                path: patch.json_path.clone(),
            });
        }
    }
    Ok(())
}

/// Overwrite every matched value. No match leaves the document as is.
fn replace(document: &mut Value, path: &JsonPath, value: Value) {
    for location in path.select(document) {
        if let Some(slot) = path::get_mut(document, &location) {
            *slot = value.clone();
        }
    }
}

fn add(
    document: &mut Value,
    path: &JsonPath,
    value: Value,
    index: usize,
) -> Result<(), PatchError> {
    let invalid = |reason: &str| PatchError::InvalidTarget {
        index,
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let Some((parent, last)) = path.split_last() else {
        return Err(invalid("cannot add at the document root"));
    };

    // An existing array at the path receives the value as a new element.
    let targets = path.select(document);
    if !targets.is_empty()
        && targets
            .iter()
            .all(|loc| matches!(path::get(document, loc), Some(Value::Array(_))))
    {
        for location in targets {
            if let Some(Value::Array(items)) = path::get_mut(document, &location) {
                items.push(value.clone());
            }
        }
        return Ok(());
    }

    let containers = parent.select(document);
    if containers.is_empty() {
        return Err(PatchError::PathNotFound {
            index,
            path: path.to_string(),
        });
    }
    for location in containers {
        let container =
            path::get_mut(document, &location).ok_or_else(|| invalid("container vanished"))?;
        match (last, container) {
            (Segment::Key(key), Value::Object(map)) => {
                map.insert(key.clone(), value.clone());
            }
            (Segment::Append, Value::Object(map)) => {
                map.insert("-".to_string(), value.clone());
            }
            (Segment::Append, Value::Array(items)) => items.push(value.clone()),
            (Segment::Index(idx), Value::Array(items)) => {
                if !insert_at(items, *idx, value.clone()) {
                    return Err(invalid("array index out of bounds"));
                }
            }
            (Segment::Key(key), Value::Array(items)) => {
                let idx = parse_index(key).ok_or_else(|| invalid("array index expected"))?;
                if !insert_at(items, idx, value.clone()) {
                    return Err(invalid("array index out of bounds"));
                }
            }
            (Segment::Wildcard, _) => return Err(invalid("a wildcard cannot name a new member")),
            _ => return Err(invalid("parent is neither an object nor an array")),
        }
    }
    Ok(())
}

fn insert_at(items: &mut Vec<Value>, idx: usize, value: Value) -> bool {
    if idx > items.len() {
        return false;
    }
    items.insert(idx, value);
    true
}

fn remove(document: &mut Value, path: &JsonPath, index: usize) -> Result<(), PatchError> {
    if path.is_root() {
        return Err(PatchError::InvalidTarget {
            index,
            path: path.to_string(),
            reason: "cannot remove the document root".into(),
        });
    }
    let mut locations: Vec<Location> = path.select(document);
    // Highest indices first so earlier removals don't shift later ones.
    locations.sort_unstable_by(|a, b| b.cmp(a));
    for location in locations {
        let Some((step, parent)) = location.split_last() else {
            continue;
        };
        match (step, path::get_mut(document, parent)) {
            (Step::Key(key), Some(Value::Object(map))) => {
                map.remove(key);
            }
            (Step::Index(idx), Some(Value::Array(items))) if *idx < items.len() => {
                items.remove(*idx);
            }
            _ => {}
        }
    }
    Ok(())
}

fn test(
    document: &Value,
    path: &JsonPath,
    expected: Option<&Value>,
    index: usize,
) -> Result<(), PatchError> {
    let locations = path.select(document);
    let actual = if path.is_definite() {
        locations
            .first()
            .and_then(|loc| path::get(document, loc))
            .filter(|v| !v.is_null())
            .cloned()
    } else {
        Some(Value::Array(
            locations
                .iter()
                .filter_map(|loc| path::get(document, loc).cloned())
                .collect(),
        ))
    };

    let passed = match (actual.as_ref(), expected) {
        (None, None) => true,
        (Some(actual), Some(expected)) => actual == expected,
        _ => false,
    };
    if passed {
        Ok(())
    } else {
        Err(PatchError::TestFailed {
            index,
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operations_compose_in_order() {
        let patches = [
            JsonPatch::add("/x", json!("1")),
            JsonPatch::replace("/x", json!("2")),
            JsonPatch::test("/x", json!("2")),
        ];
        assert_eq!(apply(&json!({}), &patches).unwrap(), json!({"x": "2"}));
    }

    #[test]
    fn failed_test_stops_the_batch() {
        let err = apply(&json!({"x": "2"}), &[JsonPatch::test("/x", json!("9"))]).unwrap_err();
        assert!(matches!(err, PatchError::TestFailed { index: 0, .. }));
    }

    #[test]
    fn unsafe_value_is_rejected_before_mutation() {
        let document = json!({"name": "api"});
        let patches = [
            JsonPatch::replace("$.name", json!("renamed")),
            JsonPatch::add("$.description", json!({"html": "<script>alert(1)</script>"})),
        ];
        let err = apply(&document, &patches).unwrap_err();
        assert!(matches!(err, PatchError::Unsafe { index: 1, .. }));
        assert_eq!(document, json!({"name": "api"}));
    }

    #[test]
    fn unsafe_path_is_rejected() {
        let err = apply(&json!({}), &[JsonPatch::add("/<script>", json!(1))]).unwrap_err();
        assert!(matches!(err, PatchError::Unsafe { index: 0, .. }));
    }

    #[test]
    fn replace_without_match_is_a_no_op() {
        let document = json!({"a": 1});
        let patched = apply(&document, &[JsonPatch::replace("$.missing", json!(2))]).unwrap();
        assert_eq!(patched, document);
    }

    #[test]
    fn replace_with_wildcard_updates_every_match() {
        let document = json!({"plans": [{"status": "STAGING"}, {"status": "CLOSED"}]});
        let patches = [JsonPatch::replace("$.plans[*].status", json!("PUBLISHED"))];
        let patched = apply(&document, &patches).unwrap();
        assert_eq!(
            patched,
            json!({"plans": [{"status": "PUBLISHED"}, {"status": "PUBLISHED"}]})
        );
    }

    #[test]
    fn add_appends_to_existing_array() {
        let patched =
            apply(&json!({"tags": ["a"]}), &[JsonPatch::add("$.tags", json!("b"))]).unwrap();
        assert_eq!(patched, json!({"tags": ["a", "b"]}));
    }

    #[test]
    fn add_inserts_at_array_position() {
        let document = json!({"tags": ["a", "c"]});
        let patched = apply(&document, &[JsonPatch::add("/tags/1", json!("b"))]).unwrap();
        assert_eq!(patched, json!({"tags": ["a", "b", "c"]}));
        let patched = apply(&document, &[JsonPatch::add("/tags/-", json!("d"))]).unwrap();
        assert_eq!(patched, json!({"tags": ["a", "c", "d"]}));
        assert!(matches!(
            apply(&document, &[JsonPatch::add("/tags/5", json!("z"))]),
            Err(PatchError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn add_without_parent_fails() {
        let err = apply(&json!({}), &[JsonPatch::add("/a/b", json!(1))]).unwrap_err();
        assert!(matches!(err, PatchError::PathNotFound { .. }));
    }

    #[test]
    fn remove_deletes_matches_and_ignores_missing() {
        let document = json!({"a": 1, "list": [0, 1, 2, 3]});
        let patched = apply(
            &document,
            &[
                JsonPatch::remove("/a"),
                JsonPatch::remove("/missing"),
                JsonPatch::remove("$.list[*]"),
            ],
        )
        .unwrap();
        assert_eq!(patched, json!({"list": []}));
    }

    #[test]
    fn test_treats_null_and_absent_alike() {
        let document = json!({"a": null});
        assert!(apply(&document, &[JsonPatch::new(PatchOperation::Test, "/a", None)]).is_ok());
        let explicit_null = JsonPatch::new(PatchOperation::Test, "/b", Some(Value::Null));
        assert!(apply(&document, &[explicit_null]).is_ok());
        assert!(apply(&document, &[JsonPatch::test("/b", json!(0))]).is_err());
    }

    #[test]
    fn test_on_wildcard_compares_all_matches() {
        let document = json!({"items": [{"id": 1}, {"id": 2}]});
        assert!(apply(&document, &[JsonPatch::test("$.items[*].id", json!([1, 2]))]).is_ok());
        assert!(apply(&document, &[JsonPatch::test("$.items[*].id", json!([1]))]).is_err());
    }

    #[test]
    fn execute_round_trips_text() {
        let out = execute(r#"{"a":1}"#, &[JsonPatch::add("/b", json!(true))]).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&out).unwrap(), json!({"a": 1, "b": true}));
        assert!(matches!(execute("{", &[]), Err(PatchError::InvalidJson(_))));
    }

    #[test]
    fn wire_format_uses_upper_case_operations() {
        let patch: JsonPatch =
            serde_json::from_value(json!({"operation": "REMOVE", "jsonPath": "$.a"})).unwrap();
        assert_eq!(patch, JsonPatch::remove("$.a"));
        assert_eq!(
            serde_json::to_value(JsonPatch::add("/a", json!(1))).unwrap(),
            json!({"operation": "ADD", "jsonPath": "/a", "value": 1})
        );
    }
}
