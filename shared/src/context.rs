use std::sync::Arc;

use crate::{config::NodeConfig, error_registry::ErrorRegistry};

struct ContextInner {
    config: NodeConfig,
    errors: ErrorRegistry,
}

/// Process-level state shared by the nodes created from it: configuration
/// and the error registry. Cloning is cheap and shares the state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new() -> Self {
        Self::with_config(NodeConfig::default())
    }

    pub fn with_config(config: NodeConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                errors: ErrorRegistry::new(),
            }),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn errors(&self) -> &ErrorRegistry {
        &self.inner.errors
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
