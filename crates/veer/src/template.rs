//! Capture and request-field interpolation.
//!
//! # Supported placeholders
//!
//! - `$1`, `$2`, ... - the N-th capture of the matching pattern
//! - `$%1`, `$%2`, ... - the N-th capture, percent-decoded
//! - `$$` - a literal `$`
//! - `${request.method}`, `${request.url}`, `${request.path}`
//! - `${request.query.<name>}` - query parameter value
//! - `${request.headers.<name>}` - header value (case-insensitive)
//!
//! Placeholders that cannot be resolved expand to an empty string.
//! Substituted text is never rescanned, so a capture containing `$1` stays
//! literal.
//!
//! # Example
//!
//! ```yaml
//! mappings:
//!   - match: '^/api/(.*)'
//!     url: 'http://localhost:8080/${request.headers.x-tenant}/$1'
//! ```

use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

static TEMPLATE_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_template_regex() -> &'static Regex {
    TEMPLATE_REGEX.get_or_init(|| {
        Regex::new(
            r"\$(?:(\$)|(%?)(\d+)|\{request\.([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z0-9_-]+)?)\})",
        )
        .unwrap()
    })
}

/// Request values available to `${request.*}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct RequestData {
    pub method: String,
    /// Current url (path and query)
    pub url: String,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Header values, keys lowercased
    pub headers: HashMap<String, String>,
}

impl RequestData {
    pub fn new(method: &str, url: &str, headers: &hyper::HeaderMap) -> Self {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };
        let headers = headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_lowercase(), val.to_string()))
            })
            .collect();

        Self {
            method: method.to_string(),
            url: url.to_string(),
            path: path.to_string(),
            query: parse_query_string(query),
            headers,
        }
    }

    /// Get a value by dotted name (e.g. "query.name", "headers.content-type")
    pub fn get(&self, name: &str) -> Option<String> {
        let parts: Vec<&str> = name.splitn(2, '.').collect();

        match parts.as_slice() {
            ["method"] => Some(self.method.clone()),
            ["url"] => Some(self.url.clone()),
            ["path"] => Some(self.path.clone()),
            ["query", key] => self.query.get(*key).cloned(),
            ["headers", key] => self.headers.get(&key.to_lowercase()).cloned(),
            _ => None,
        }
    }
}

/// Parse a query string into a map, decoding values.
pub fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(q) = query {
        for pair in q.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                let decoded = urlencoding::decode(value).unwrap_or_default().to_string();
                params.insert(key.to_string(), decoded);
            } else if !pair.is_empty() {
                params.insert(pair.to_string(), String::new());
            }
        }
    }
    params
}

/// Whether the template references anything at all.
pub fn has_placeholders(template: &str) -> bool {
    get_template_regex().is_match(template)
}

/// Whether any string leaf of `value` references anything.
pub fn value_has_placeholders(value: &Value) -> bool {
    match value {
        Value::String(s) => has_placeholders(s),
        Value::Array(items) => items.iter().any(value_has_placeholders),
        Value::Object(map) => map.values().any(value_has_placeholders),
        _ => false,
    }
}

/// Expand a template string. `captures[0]` is `$1`.
pub fn interpolate(template: &str, captures: &[String], request: &RequestData) -> String {
    if !template.contains('$') {
        return template.to_string();
    }

    get_template_regex()
        .replace_all(template, |caps: &Captures| {
            if caps.get(1).is_some() {
                return "$".to_string();
            }
            if let Some(index) = caps.get(3) {
                let value = index
                    .as_str()
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n >= 1)
                    .and_then(|n| captures.get(n - 1))
                    .cloned()
                    .unwrap_or_default();
                let decode = caps.get(2).is_some_and(|m| !m.as_str().is_empty());
                return if decode {
                    urlencoding::decode(&value)
                        .map(|v| v.into_owned())
                        .unwrap_or(value)
                } else {
                    value
                };
            }
            caps.get(4)
                .and_then(|name| request.get(name.as_str()))
                .unwrap_or_default()
        })
        .into_owned()
}

/// Expand every string leaf of a structured value. Object keys are kept.
pub fn interpolate_value(value: &Value, captures: &[String], request: &RequestData) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate(s, captures, request)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_value(item, captures, request))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, captures, request)))
                .collect(),
        ),
        other => other.clone(),
    }
}
