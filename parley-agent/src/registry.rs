// ABOUTME: Registry pattern for backend selection at startup.
// ABOUTME: Each BackendKind registers a factory; the host builds the configured one once.

use crate::config::{BackendKind, BackendsConfig};
use crate::traits::AgentBackend;
use anyhow::{anyhow, Result};
use std::collections::HashMap;

/// Factory function that builds a backend from the `[backends]` config
pub type BackendFactory =
    Box<dyn Fn(&BackendsConfig) -> Result<Box<dyn AgentBackend>> + Send + Sync>;

/// Registry mapping each protocol family to its factory
pub struct AgentRegistry {
    factories: HashMap<BackendKind, BackendFactory>,
}

impl AgentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory for a kind
    pub fn register<F>(mut self, kind: BackendKind, factory: F) -> Self
    where
        F: Fn(&BackendsConfig) -> Result<Box<dyn AgentBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
        self
    }

    /// Create the backend for a kind with the given config
    pub fn create(&self, kind: BackendKind, config: &BackendsConfig) -> Result<Box<dyn AgentBackend>> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| {
                let available: Vec<String> =
                    self.available().iter().map(|k| k.to_string()).collect();
                anyhow!(
                    "Unknown backend: {} (registered: {})",
                    kind,
                    available.join(", ")
                )
            })?;
        factory(config)
    }

    /// Select the configured kind and build it
    pub fn create_selected(&self, config: &BackendsConfig) -> Result<Box<dyn AgentBackend>> {
        let kind = config.select()?;
        tracing::debug!(backend = %kind, "Backend selected");
        self.create(kind, config)
    }

    /// List registered kinds
    pub fn available(&self) -> Vec<BackendKind> {
        self.factories.keys().copied().collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        use crate::backends::byte_stream::ByteStreamBackend;
        use crate::backends::synchronous::SynchronousBackend;
        use crate::backends::traced::TracedStreamingBackend;

        Self::new()
            .register(BackendKind::TracedStreaming, TracedStreamingBackend::factory())
            .register(BackendKind::Synchronous, SynchronousBackend::factory())
            .register(BackendKind::ByteStream, ByteStreamBackend::factory())
    }
}
