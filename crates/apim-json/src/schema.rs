//! Schema-driven sanitization of configuration documents.
//!
//! A document is validated against a draft-07 schema; violations that can be
//! repaired are repaired and the document is validated again:
//! - a missing required property whose schema declares a `default` receives it
//! - properties rejected by `additionalProperties` are removed
//!
//! Any other violation fails the whole document, reporting every violation of
//! the failing pass.

use jsonschema::error::ValidationErrorKind;
use jsonschema::paths::JSONPointer;
use jsonschema::{Draft, JSONSchema, ValidationError};
use serde_json::Value;

use crate::value::strip_nulls;

/// Format names checked with the `regex` crate. `java-regex` is kept for
/// schemas written against older plugin manifests.
const REGEX_FORMATS: [&str; 2] = ["regex", "java-regex"];

const DEFAULT_MAX_PASSES: usize = 16;
const MAX_REF_HOPS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("configuration is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("configuration does not match schema: {}", .0.join("; "))]
    Violations(Vec<String>),
}

impl SchemaError {
    /// Human-readable violation messages, empty for non-validation failures.
    pub fn messages(&self) -> &[String] {
        match self {
            SchemaError::Violations(messages) => messages,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Violation {
    MissingRequired {
        at: Vec<String>,
        property: Option<String>,
        schema_at: Vec<String>,
        message: String,
    },
    Unexpected {
        at: Vec<String>,
        properties: Vec<String>,
        message: String,
    },
    Other {
        message: String,
    },
}

impl Violation {
    fn classify(error: &ValidationError<'_>) -> Self {
        let message = format!("{}: {}", format_pointer(&error.instance_path), error);
        let at = error.instance_path.clone().into_vec();
        match &error.kind {
            ValidationErrorKind::Required { property } => Violation::MissingRequired {
                at,
                property: property.as_str().map(str::to_string),
                schema_at: error.schema_path.clone().into_vec(),
                message,
            },
            ValidationErrorKind::AdditionalProperties { unexpected } => Violation::Unexpected {
                at,
                properties: unexpected.clone(),
                message,
            },
            _ => Violation::Other { message },
        }
    }

    fn message(&self) -> &str {
        match self {
            Violation::MissingRequired { message, .. }
            | Violation::Unexpected { message, .. }
            | Violation::Other { message } => message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonSchemaValidator {
    max_passes: usize,
}

impl Default for JsonSchemaValidator {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a serialized configuration against an optional serialized
    /// schema and return the sanitized configuration.
    ///
    /// Without a schema the configuration is only stripped of nulls.
    pub fn validate(
        &self,
        schema: Option<&str>,
        configuration: &str,
    ) -> Result<String, SchemaError> {
        let configuration: Value = serde_json::from_str(configuration)?;
        let schema = match schema.map(str::trim).filter(|s| !s.is_empty()) {
            Some(schema) => schema,
            None => return Ok(strip_nulls(configuration).to_string()),
        };
        let schema: Value = serde_json::from_str(schema)
            .map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;
        Ok(self.sanitize(&schema, configuration)?.to_string())
    }

    pub fn sanitize(&self, schema: &Value, configuration: Value) -> Result<Value, SchemaError> {
        let compiled = compile(schema)?;
        let mut document = strip_nulls(configuration);

        for pass in 0..self.max_passes {
            let violations = collect_violations(&compiled, &document);
            if violations.is_empty() {
                return Ok(document);
            }
            let messages: Vec<String> =
                violations.iter().map(|v| v.message().to_string()).collect();
            tracing::debug!(pass, violations = messages.len(), "sanitizing configuration");

            let mut changed = false;
            for violation in &violations {
                match violation {
                    Violation::MissingRequired {
                        at,
                        property: Some(property),
                        schema_at,
                        ..
                    } => match default_for(schema, schema_at, property) {
                        Some(default) => {
                            changed |=
                                insert_member(&mut document, at, property, default.clone());
                        }
                        None => return Err(SchemaError::Violations(messages)),
                    },
                    Violation::Unexpected { at, properties, .. } if !properties.is_empty() => {
                        changed |= remove_members(&mut document, at, properties);
                    }
                    _ => return Err(SchemaError::Violations(messages)),
                }
            }
            if !changed {
                return Err(SchemaError::Violations(messages));
            }
        }

        let violations = collect_violations(&compiled, &document);
        if violations.is_empty() {
            return Ok(document);
        }
        let mut messages: Vec<String> =
            violations.iter().map(|v| v.message().to_string()).collect();
        messages.push(format!(
            "configuration still invalid after {} sanitization passes",
            self.max_passes
        ));
        Err(SchemaError::Violations(messages))
    }
}

fn collect_violations(compiled: &JSONSchema, document: &Value) -> Vec<Violation> {
    match compiled.validate(document) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.map(|e| Violation::classify(&e)).collect(),
    }
}

fn compile(schema: &Value) -> Result<JSONSchema, SchemaError> {
    let mut options = JSONSchema::options();
    options.with_draft(Draft::Draft7);
    for name in REGEX_FORMATS {
        options.with_format(name, is_regex);
    }
    options.compile(schema).map_err(|e| {
        SchemaError::InvalidSchema(format!("{}: {}", format_pointer(&e.schema_path), e))
    })
}

fn is_regex(pattern: &str) -> bool {
    regex::Regex::new(pattern).is_ok()
}

fn format_pointer(pointer: &JSONPointer) -> String {
    let text = pointer.to_string();
    if text.is_empty() { "/".into() } else { text }
}

/// Default declared for `property` by the subschema that raised `required`.
///
/// Local `$ref`s (`#/...`) met along the way are followed.
fn default_for<'s>(schema: &'s Value, schema_at: &[String], property: &str) -> Option<&'s Value> {
    let (keyword, parent) = schema_at.split_last()?;
    if keyword != "required" {
        return None;
    }
    let subschema = deref(schema, walk(schema, parent)?)?;
    let property_schema = deref(schema, subschema.get("properties")?.get(property)?)?;
    property_schema.get("default")
}

fn walk<'v>(root: &'v Value, tokens: &[String]) -> Option<&'v Value> {
    tokens.iter().try_fold(root, |current, token| {
        if token == "$ref" {
            return resolve_ref(root, current.get("$ref")?.as_str()?);
        }
        match deref(root, current)? {
            Value::Object(map) => map.get(token),
            Value::Array(items) => token.parse::<usize>().ok().and_then(|idx| items.get(idx)),
            _ => None,
        }
    })
}

/// Follow `$ref` chains until a schema without one is reached.
fn deref<'v>(root: &'v Value, mut value: &'v Value) -> Option<&'v Value> {
    for _ in 0..MAX_REF_HOPS {
        match value.get("$ref").and_then(Value::as_str) {
            Some(reference) => value = resolve_ref(root, reference)?,
            None => return Some(value),
        }
    }
    None
}

fn resolve_ref<'v>(root: &'v Value, reference: &str) -> Option<&'v Value> {
    root.pointer(reference.strip_prefix('#')?)
}

fn walk_mut<'v>(value: &'v mut Value, tokens: &[String]) -> Option<&'v mut Value> {
    tokens.iter().try_fold(value, |current, token| match current {
        Value::Object(map) => map.get_mut(token),
        Value::Array(items) => token.parse::<usize>().ok().and_then(|idx| items.get_mut(idx)),
        _ => None,
    })
}

fn insert_member(document: &mut Value, at: &[String], property: &str, value: Value) -> bool {
    match walk_mut(document, at) {
        Some(Value::Object(map)) if !map.contains_key(property) => {
            map.insert(property.to_string(), value);
            true
        }
        _ => false,
    }
}

fn remove_members(document: &mut Value, at: &[String], properties: &[String]) -> bool {
    match walk_mut(document, at) {
        Some(Value::Object(map)) => properties
            .iter()
            .fold(false, |changed, property| map.remove(property).is_some() || changed),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sanitize(schema: Value, input: Value) -> Result<Value, SchemaError> {
        JsonSchemaValidator::new().sanitize(&schema, input)
    }

    #[test]
    fn backfills_required_default() {
        let schema = json!({
            "required": ["x"],
            "properties": {"x": {"type": "string", "default": "d"}}
        });
        assert_eq!(sanitize(schema, json!({})).unwrap(), json!({"x": "d"}));
    }

    #[test]
    fn strips_additional_properties() {
        let schema = json!({
            "additionalProperties": false,
            "properties": {"a": {"type": "string"}}
        });
        assert_eq!(
            sanitize(schema, json!({"a": "ok", "b": "drop"})).unwrap(),
            json!({"a": "ok"})
        );
    }

    #[test]
    fn backfills_nested_defaults() {
        let schema = json!({
            "type": "object",
            "properties": {
                "ssl": {
                    "type": "object",
                    "required": ["trustAll"],
                    "properties": {"trustAll": {"type": "boolean", "default": false}}
                }
            }
        });
        assert_eq!(
            sanitize(schema, json!({"ssl": {}})).unwrap(),
            json!({"ssl": {"trustAll": false}})
        );
    }

    #[test]
    fn backfills_defaults_behind_local_refs() {
        let schema = json!({
            "definitions": {
                "ssl": {
                    "required": ["trustAll"],
                    "properties": {"trustAll": {"default": false}}
                }
            },
            "properties": {"ssl": {"$ref": "#/definitions/ssl"}}
        });
        assert_eq!(
            sanitize(schema, json!({"ssl": {}})).unwrap(),
            json!({"ssl": {"trustAll": false}})
        );
    }

    #[test]
    fn backfills_default_declared_on_referenced_property() {
        let schema = json!({
            "definitions": {"timeout": {"type": "integer", "default": 3000}},
            "required": ["timeout"],
            "properties": {"timeout": {"$ref": "#/definitions/timeout"}}
        });
        assert_eq!(sanitize(schema, json!({})).unwrap(), json!({"timeout": 3000}));
    }

    #[test]
    fn required_without_default_fails_with_messages() {
        let schema = json!({
            "required": ["x"],
            "properties": {"x": {"type": "string"}}
        });
        let err = sanitize(schema, json!({})).unwrap_err();
        assert_eq!(err.messages().len(), 1);
        assert!(err.messages()[0].contains("\"x\""));
    }

    #[test]
    fn explicit_null_counts_as_missing() {
        let schema = json!({
            "required": ["x"],
            "properties": {"x": {"type": "string", "default": "d"}}
        });
        assert_eq!(sanitize(schema, json!({"x": null})).unwrap(), json!({"x": "d"}));
    }

    #[test]
    fn type_mismatch_fails() {
        let schema = json!({"properties": {"port": {"type": "integer"}}});
        let err = sanitize(schema, json!({"port": "eighty"})).unwrap_err();
        assert!(matches!(err, SchemaError::Violations(ref m) if m.len() == 1));
    }

    #[test]
    fn invalid_default_is_reported() {
        let schema = json!({
            "required": ["x"],
            "properties": {"x": {"type": "integer", "default": "not-a-number"}}
        });
        assert!(sanitize(schema, json!({})).is_err());
    }

    #[test]
    fn java_regex_format_is_checked() {
        let schema = json!({"properties": {"pattern": {"type": "string", "format": "java-regex"}}});
        assert!(sanitize(schema.clone(), json!({"pattern": "^/api/.*$"})).is_ok());
        assert!(sanitize(schema, json!({"pattern": "(unclosed"})).is_err());
    }

    #[test]
    fn invalid_schema_is_reported() {
        let err = sanitize(json!({"type": 12}), json!({})).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidSchema(_)));
    }

    #[test]
    fn no_schema_only_strips_nulls() {
        let out = JsonSchemaValidator::new()
            .validate(None, r#"{"a":null,"b":"x"}"#)
            .unwrap();
        assert_eq!(out, r#"{"b":"x"}"#);
    }

    #[test]
    fn output_revalidates() {
        let schema = json!({
            "additionalProperties": false,
            "required": ["x"],
            "properties": {"x": {"type": "string", "default": "d"}, "y": {"type": "integer"}}
        });
        let validator = JsonSchemaValidator::new();
        let out = validator
            .validate(Some(&schema.to_string()), r#"{"y":1,"z":true}"#)
            .unwrap();
        let reparsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(reparsed, json!({"x": "d", "y": 1}));
        assert_eq!(validator.validate(Some(&schema.to_string()), &out).unwrap(), out);
    }
}
