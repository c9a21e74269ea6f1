//! Input sanitization against query-operator and script injection.
//!
//! Two independent cleanups are applied to every body, query string and
//! path that reaches a handler:
//!
//! - **Operator keys**: object keys starting with `$` or containing `.` are
//!   removed. Document stores interpret such keys as query operators
//!   (`{"email": {"$gt": ""}}`) or nested paths.
//! - **Markup**: `<` and `>` in strings are replaced with `&lt;` and `&gt;`,
//!   so stored values can never be rendered as executable markup.
//!
//! The functions here are pure; the pipeline stage that applies them to
//! requests lives in [`crate::middleware::sanitize`].

use std::borrow::Cow;

use serde_json::{Map, Value};

/// Counts of what a sanitization pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    /// Keys dropped because they look like query operators, or because
    /// their escaped form collided with another key.
    pub removed_keys: usize,
    /// Strings (keys or values) that had markup escaped.
    pub escaped_strings: usize,
}

impl SanitizeReport {
    pub fn is_clean(&self) -> bool {
        self.removed_keys == 0 && self.escaped_strings == 0
    }

    fn merge(&mut self, other: SanitizeReport) {
        self.removed_keys += other.removed_keys;
        self.escaped_strings += other.escaped_strings;
    }
}

/// Whether an object key would be read as an operator or a nested path.
pub fn is_operator_key(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

/// Like [`is_operator_key`], but also inspects bracket segments of
/// query-style keys such as `price[$gt]` or `filter[a.b]`.
pub fn is_operator_query_key(key: &str) -> bool {
    key.split(['[', ']'])
        .filter(|segment| !segment.is_empty())
        .any(is_operator_key)
}

/// Escape markup characters. Borrows when nothing needs escaping.
pub fn escape_markup(input: &str) -> Cow<'_, str> {
    if !input.contains(['<', '>']) {
        return Cow::Borrowed(input);
    }

    let mut escaped = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

/// Sanitize a JSON value in place, recursing through objects and arrays.
pub fn sanitize_value(value: &mut Value) -> SanitizeReport {
    let mut report = SanitizeReport::default();

    match value {
        Value::String(s) => {
            if let Cow::Owned(escaped) = escape_markup(s) {
                *s = escaped;
                report.escaped_strings += 1;
            }
        }
        Value::Array(items) => {
            for item in items {
                report.merge(sanitize_value(item));
            }
        }
        Value::Object(map) => {
            let entries = std::mem::take(map);
            let mut cleaned = Map::with_capacity(entries.len());
            let mut escaped_keys = Vec::new();

            for (key, mut nested) in entries {
                if is_operator_key(&key) {
                    report.removed_keys += 1;
                    continue;
                }

                report.merge(sanitize_value(&mut nested));

                let escaped = match escape_markup(&key) {
                    Cow::Owned(escaped) => Some(escaped),
                    Cow::Borrowed(_) => None,
                };
                match escaped {
                    Some(escaped) => {
                        report.escaped_strings += 1;
                        escaped_keys.push((escaped, nested));
                    }
                    None => {
                        cleaned.insert(key, nested);
                    }
                }
            }

            // A key that arrived clean wins over one equal only after escaping
            for (key, nested) in escaped_keys {
                if cleaned.contains_key(&key) {
                    report.removed_keys += 1;
                    continue;
                }
                cleaned.insert(key, nested);
            }

            *map = cleaned;
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }

    report
}

/// Sanitize a `application/x-www-form-urlencoded` string (query or form body).
///
/// Pairs whose key is an operator key are dropped; remaining keys and values
/// are markup-escaped and re-encoded.
pub fn sanitize_form(encoded: &str) -> (String, SanitizeReport) {
    let mut report = SanitizeReport::default();
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());

    for (key, value) in url::form_urlencoded::parse(encoded.as_bytes()) {
        if is_operator_query_key(&key) {
            report.removed_keys += 1;
            continue;
        }

        let clean_key = escape_markup(&key);
        let clean_value = escape_markup(&value);
        report.escaped_strings += usize::from(matches!(clean_key, Cow::Owned(_)));
        report.escaped_strings += usize::from(matches!(clean_value, Cow::Owned(_)));

        serializer.append_pair(&clean_key, &clean_value);
    }

    (serializer.finish(), report)
}

/// Neutralize markup in a request path while keeping it percent-encoded.
///
/// Path parameters are decoded by the router after this stage runs, so an
/// encoded `%3Cscript%3E` segment is rewritten to decode as `&lt;script&gt;`.
pub fn sanitize_path(path: &str) -> Cow<'_, str> {
    const REPLACEMENTS: [(&str, &str); 6] = [
        ("%3C", "%26lt%3B"),
        ("%3c", "%26lt%3B"),
        ("%3E", "%26gt%3B"),
        ("%3e", "%26gt%3B"),
        ("<", "%26lt%3B"),
        (">", "%26gt%3B"),
    ];

    if !REPLACEMENTS.iter().any(|(from, _)| path.contains(from)) {
        return Cow::Borrowed(path);
    }

    let mut cleaned = path.to_string();
    for (from, to) in REPLACEMENTS {
        cleaned = cleaned.replace(from, to);
    }
    Cow::Owned(cleaned)
}
