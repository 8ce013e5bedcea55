//! Configuration: raw (deserialized) form, handler registry and the
//! validated, immutable [`Configuration`].

mod mapping;
mod model;
mod registry;
mod validate;

use crate::errors::{Error, Result};
use crate::events::{EventListener, DEFAULT_EVENT_CAPACITY};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use mapping::{MatchSpec, MethodSpec, RawMapping};
pub use model::{
    CachingStrategy, Configuration, CustomTarget, FileTarget, HandlerKind, Mapping, MappingState,
    StatusTarget, UrlTarget, UseTarget,
};
pub use registry::HandlerRegistry;
pub use validate::validate;

pub const DEFAULT_MAX_REDIRECTS: u32 = 10;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawConfig {
    #[serde(default)]
    pub mappings: Vec<RawMapping>,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    /// Default working directory; relative mapping `cwd`s resolve against it
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Plugin hooks, programmatic only
    #[serde(skip)]
    pub listeners: Vec<Arc<dyn EventListener>>,
}

fn default_max_redirects() -> u32 {
    DEFAULT_MAX_REDIRECTS
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            mappings: Vec::new(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            cwd: None,
            listen: ListenConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            listeners: Vec::new(),
        }
    }
}

impl RawConfig {
    pub fn new(mappings: Vec<RawMapping>) -> Self {
        Self {
            mappings,
            ..Self::default()
        }
    }

    /// Load a YAML (or JSON) file. The default cwd is the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfiguration {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        let mut config = Self::parse(&contents)?;
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.cwd = Some(match config.cwd.take() {
            Some(cwd) if cwd.is_relative() => dir.join(cwd),
            Some(cwd) => cwd,
            None => dir,
        });
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| Error::InvalidConfiguration {
            reason: e.to_string(),
        })
    }

    pub fn with_mapping(mut self, mapping: RawMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn with_max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validate against the builtin registry.
    pub fn build(self) -> Result<Configuration> {
        validate(self, &HandlerRegistry::new())
    }

    pub fn build_with(self, registry: &HandlerRegistry) -> Result<Configuration> {
        validate(self, registry)
    }
}

impl fmt::Debug for RawConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawConfig")
            .field("mappings", &self.mappings)
            .field("max_redirects", &self.max_redirects)
            .field("cwd", &self.cwd)
            .field("listen", &self.listen)
            .field("event_capacity", &self.event_capacity)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
