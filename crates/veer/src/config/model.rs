//! Validated, immutable configuration.

use crate::events::EventListener;
use crate::handlers::{CaptureSinkFactory, CustomHandler, KvStore, Middleware, MiddlewareFactory};
use crate::matcher::{MethodFilter, Pattern};
use hyper::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ordered mapping table plus process-level settings. Replaced wholesale,
/// never mutated.
pub struct Configuration {
    pub(crate) mappings: Vec<Mapping>,
    pub(crate) max_redirects: u32,
    pub(crate) cwd: PathBuf,
    pub(crate) listeners: Vec<Arc<dyn EventListener>>,
    pub(crate) event_capacity: usize,
    /// Extension side-table, indexed by mapping ordinal
    pub(crate) states: Vec<MappingState>,
}

impl Configuration {
    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn listeners(&self) -> &[Arc<dyn EventListener>] {
        &self.listeners
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    /// Private state of the mapping at `index`.
    pub fn state(&self, index: usize) -> Option<&MappingState> {
        self.states.get(index)
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("mappings", &self.mappings)
            .field("max_redirects", &self.max_redirects)
            .field("cwd", &self.cwd)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Mapping-scoped state, created at validation and kept for the
/// configuration's lifetime.
#[derive(Default)]
pub struct MappingState {
    pub store: KvStore,
    pub(crate) middleware: tokio::sync::OnceCell<Arc<dyn Middleware>>,
}

#[derive(Debug)]
pub struct Mapping {
    pub index: usize,
    pub pattern: Arc<dyn Pattern>,
    pub methods: MethodFilter,
    pub handler: HandlerKind,
    pub ignore_if_not_found: bool,
    /// Effective working directory for file paths and captures
    pub cwd: PathBuf,
}

#[derive(Debug)]
pub enum HandlerKind {
    File(FileTarget),
    Url(UrlTarget),
    Custom(CustomTarget),
    Status(StatusTarget),
    Use(UseTarget),
}

impl HandlerKind {
    pub fn name(&self) -> &'static str {
        match self {
            HandlerKind::File(_) => "file",
            HandlerKind::Url(_) => "url",
            HandlerKind::Custom(_) => "custom",
            HandlerKind::Status(_) => "status",
            HandlerKind::Use(_) => "use",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachingStrategy {
    /// Conditional GET on `Last-Modified` / `If-Modified-Since`
    Modified,
}

#[derive(Debug, Clone)]
pub struct FileTarget {
    pub template: String,
    pub caching: Option<CachingStrategy>,
    /// Extension (lowercase, no dot) to content type
    pub mime_types: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct UrlTarget {
    pub template: String,
    pub ignore_unverifiable_certificate: bool,
    pub capture: Option<Arc<dyn CaptureSinkFactory>>,
}

pub struct CustomTarget {
    pub handler: Arc<dyn CustomHandler>,
    pub options: Value,
    /// `options` contains placeholders and is interpolated per request
    pub templated: bool,
}

impl fmt::Debug for CustomTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomTarget")
            .field("handler", &self.handler.name())
            .field("options", &self.options)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct StatusTarget {
    pub status: StatusCode,
    /// Header name to value template, in declaration order
    pub headers: Vec<(String, String)>,
}

pub struct UseTarget {
    pub factory: Arc<dyn MiddlewareFactory>,
    pub options: Value,
    pub templated: bool,
}

impl fmt::Debug for UseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseTarget")
            .field("factory", &self.factory.name())
            .field("options", &self.options)
            .finish()
    }
}
