//! Maps event types to pipeline factories.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::engine::{Pipeline, PipelineError};
use crate::event::Event;
use crate::nodes::PipelineServices;

/// Builds a fresh pipeline for one run.
pub type PipelineFactory = fn(&Arc<PipelineServices>) -> Result<Pipeline, PipelineError>;

/// Failures raised while turning an event into a pipeline.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Resolved key has no registered factory.
    #[error("Unknown pipeline type: {0}")]
    UnknownPipeline(String),
    /// Factory produced an invalid pipeline.
    #[error(transparent)]
    Build(#[from] PipelineError),
}

/// Lookup table from event type to pipeline factory, with a fallback key.
pub struct PipelineRegistry {
    services: Arc<PipelineServices>,
    factories: HashMap<&'static str, PipelineFactory>,
    default_key: &'static str,
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("keys", &self.keys())
            .field("default_key", &self.default_key)
            .finish()
    }
}

impl PipelineRegistry {
    /// Create an empty registry that falls back to `default_key`.
    pub fn new(services: Arc<PipelineServices>, default_key: &'static str) -> Self {
        Self {
            services,
            factories: HashMap::new(),
            default_key,
        }
    }

    /// Register `factory` under `key`, replacing any earlier registration.
    pub fn register(&mut self, key: &'static str, factory: PipelineFactory) -> &mut Self {
        self.factories.insert(key, factory);
        self
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<&'static str> = self.factories.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Key of the pipeline that should handle `event`.
    ///
    /// Falls back to the default key, with a warning, when the event type is unregistered.
    pub fn resolve(&self, event: &Event) -> &'static str {
        let event_type = event.event_type();
        match self.factories.get_key_value(event_type) {
            Some((key, _)) => *key,
            None => {
                tracing::warn!(
                    event_type,
                    fallback = self.default_key,
                    "Unknown event_type; falling back to default pipeline"
                );
                self.default_key
            }
        }
    }

    /// Build a fresh pipeline instance for `event`.
    pub fn instantiate(&self, event: &Event) -> Result<Pipeline, RegistryError> {
        let key = self.resolve(event);
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| RegistryError::UnknownPipeline(key.to_string()))?;
        Ok(factory(&self.services)?)
    }

    /// Shared collaborators handed to every factory.
    pub fn services(&self) -> &Arc<PipelineServices> {
        &self.services
    }
}
