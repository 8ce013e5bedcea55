use crate::handlers::{CacheHandler, CustomHandler, MiddlewareFactory};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Named callables that configuration files refer to with `custom: <name>`
/// and `use: <name>`.
#[derive(Clone)]
pub struct HandlerRegistry {
    custom: HashMap<String, Arc<dyn CustomHandler>>,
    middleware: HashMap<String, Arc<dyn MiddlewareFactory>>,
}

impl HandlerRegistry {
    /// Registry with the builtin handlers (`cache`).
    pub fn new() -> Self {
        Self::empty().with_custom("cache", Arc::new(CacheHandler))
    }

    pub fn empty() -> Self {
        Self {
            custom: HashMap::new(),
            middleware: HashMap::new(),
        }
    }

    pub fn register_custom(&mut self, name: impl Into<String>, handler: Arc<dyn CustomHandler>) {
        self.custom.insert(name.into(), handler);
    }

    pub fn register_middleware(
        &mut self,
        name: impl Into<String>,
        factory: Arc<dyn MiddlewareFactory>,
    ) {
        self.middleware.insert(name.into(), factory);
    }

    pub fn with_custom(mut self, name: impl Into<String>, handler: Arc<dyn CustomHandler>) -> Self {
        self.register_custom(name, handler);
        self
    }

    pub fn with_middleware(
        mut self,
        name: impl Into<String>,
        factory: Arc<dyn MiddlewareFactory>,
    ) -> Self {
        self.register_middleware(name, factory);
        self
    }

    pub fn custom(&self, name: &str) -> Option<Arc<dyn CustomHandler>> {
        self.custom.get(name).cloned()
    }

    pub fn middleware(&self, name: &str) -> Option<Arc<dyn MiddlewareFactory>> {
        self.middleware.get(name).cloned()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut custom: Vec<_> = self.custom.keys().collect();
        custom.sort();
        let mut middleware: Vec<_> = self.middleware.keys().collect();
        middleware.sort();
        f.debug_struct("HandlerRegistry")
            .field("custom", &custom)
            .field("middleware", &middleware)
            .finish()
    }
}
