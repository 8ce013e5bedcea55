//! Raw mapping entries, as written in configuration files or assembled in
//! code.

use crate::handlers::{CaptureSinkFactory, CustomHandler, MiddlewareFactory};
use crate::matcher::Pattern;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MatchSpec {
    /// Regular expression tested against path and query
    Regex(String),
    Prefix { prefix: String },
}

/// `GET`, `"GET,POST"` or `[GET, POST]`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MethodSpec {
    One(String),
    Many(Vec<String>),
}

impl MethodSpec {
    pub fn tokens(&self) -> Vec<&str> {
        match self {
            MethodSpec::One(list) => list.split(',').collect(),
            MethodSpec::Many(list) => list.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawMapping {
    #[serde(rename = "match", default)]
    pub match_spec: Option<MatchSpec>,
    #[serde(default)]
    pub method: Option<MethodSpec>,

    // ===== Handler kinds (exactly one) =====
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Name of a registered custom handler
    #[serde(default)]
    pub custom: Option<String>,
    #[serde(default)]
    pub status: Option<i64>,
    /// Name of a registered middleware factory
    #[serde(rename = "use", default)]
    pub use_name: Option<String>,

    // ===== Options =====
    #[serde(default)]
    pub ignore_if_not_found: bool,
    #[serde(default)]
    pub ignore_unverifiable_certificate: bool,
    #[serde(default)]
    pub caching_strategy: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub mime_types: BTreeMap<String, String>,
    /// Response headers of a status mapping
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Capture file template of a url mapping
    #[serde(default)]
    pub capture: Option<String>,
    #[serde(default)]
    pub options: Option<Value>,

    // ===== Programmatic only =====
    #[serde(skip)]
    pub predicate: Option<Arc<dyn Pattern>>,
    #[serde(skip)]
    pub custom_handler: Option<Arc<dyn CustomHandler>>,
    #[serde(skip)]
    pub middleware: Option<Arc<dyn MiddlewareFactory>>,
    #[serde(skip)]
    pub capture_sink: Option<Arc<dyn CaptureSinkFactory>>,
}

impl RawMapping {
    /// Mapping without a pattern: matches every url.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            match_spec: Some(MatchSpec::Regex(pattern.into())),
            ..Self::default()
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            match_spec: Some(MatchSpec::Prefix {
                prefix: prefix.into(),
            }),
            ..Self::default()
        }
    }

    pub fn predicate(pattern: Arc<dyn Pattern>) -> Self {
        Self {
            predicate: Some(pattern),
            ..Self::default()
        }
    }

    pub fn method(mut self, methods: impl Into<String>) -> Self {
        self.method = Some(MethodSpec::One(methods.into()));
        self
    }

    pub fn file(mut self, template: impl Into<String>) -> Self {
        self.file = Some(template.into());
        self
    }

    pub fn url(mut self, template: impl Into<String>) -> Self {
        self.url = Some(template.into());
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(i64::from(status));
        self
    }

    pub fn custom(mut self, name: impl Into<String>) -> Self {
        self.custom = Some(name.into());
        self
    }

    pub fn custom_handler(mut self, handler: Arc<dyn CustomHandler>) -> Self {
        self.custom_handler = Some(handler);
        self
    }

    pub fn use_named(mut self, name: impl Into<String>) -> Self {
        self.use_name = Some(name.into());
        self
    }

    pub fn use_middleware(mut self, factory: Arc<dyn MiddlewareFactory>) -> Self {
        self.middleware = Some(factory);
        self
    }

    pub fn options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    pub fn ignore_if_not_found(mut self) -> Self {
        self.ignore_if_not_found = true;
        self
    }

    pub fn ignore_unverifiable_certificate(mut self) -> Self {
        self.ignore_unverifiable_certificate = true;
        self
    }

    pub fn caching_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.caching_strategy = Some(strategy.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn mime_type(mut self, extension: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.mime_types.insert(extension.into(), content_type.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn capture(mut self, template: impl Into<String>) -> Self {
        self.capture = Some(template.into());
        self
    }

    pub fn capture_sink(mut self, factory: Arc<dyn CaptureSinkFactory>) -> Self {
        self.capture_sink = Some(factory);
        self
    }
}

impl fmt::Debug for RawMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMapping")
            .field("match", &self.match_spec)
            .field("predicate", &self.predicate)
            .field("method", &self.method)
            .field("file", &self.file)
            .field("url", &self.url)
            .field("custom", &self.custom)
            .field(
                "custom_handler",
                &self.custom_handler.as_ref().map(|h| h.name().to_string()),
            )
            .field("status", &self.status)
            .field("use", &self.use_name)
            .field(
                "middleware",
                &self.middleware.as_ref().map(|m| m.name().to_string()),
            )
            .field("ignore_if_not_found", &self.ignore_if_not_found)
            .finish_non_exhaustive()
    }
}
