//! Screen for markup that must never reach stored documents.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static UNSAFE_MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)",
        r"<\s*/?\s*(script|iframe|frame|frameset|object|embed|applet",
        r"|style|link|meta|base|form|svg)\b",
        r"|(javascript|vbscript|livescript)\s*:",
        r"|data\s*:\s*text/html",
        // Event handlers and CSS expressions only count inside a tag.
        r"|<[a-z][^>]*\son[a-z]+\s*=",
        r"|<[a-z][^>]*style\s*=[^>]*expression\s*\(",
    ))
    .expect("unsafe markup pattern is valid")
});

/// `true` when `text` carries no script-capable markup.
pub fn is_safe(text: &str) -> bool {
    !UNSAFE_MARKUP.is_match(text)
}

/// Walk `value` and report the first unsafe string or object key.
pub fn check_value(value: &Value) -> Result<(), String> {
    match value {
        Value::String(text) if !is_safe(text) => Err(text.clone()),
        Value::Array(items) => items.iter().try_for_each(check_value),
        Value::Object(map) => map.iter().try_for_each(|(key, v)| {
            if is_safe(key) {
                check_value(v)
            } else {
                Err(key.clone())
            }
        }),
        _ => Ok(()),
    }
}
