//! Per-run state carried through a pipeline.
//!
//! A [`TaskContext`] has four parts: the validated event, a map of node results keyed by node
//! name, a persistent metadata map, and a [`WorkingState`] for artifacts that only live for the
//! duration of the run. Only [`TaskContextRecord`] is serializable, so the working state can
//! never leak into persistence.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::documents::{StructuredDocument, TextChunk};
use crate::event::Event;

/// Transient artifacts handed between ingestion nodes.
#[derive(Debug, Default)]
pub struct WorkingState {
    /// Converted document produced by extraction.
    pub document: Option<StructuredDocument>,
    /// Local copy of the source file.
    pub source_path: Option<PathBuf>,
    /// Chunks produced by the chunking node.
    pub chunks: Option<Vec<TextChunk>>,
}

impl WorkingState {
    /// Whether every artifact has been consumed or released.
    pub fn is_empty(&self) -> bool {
        self.document.is_none() && self.source_path.is_none() && self.chunks.is_none()
    }

    /// Drop every artifact.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Mutable record threaded through every node of a pipeline run.
#[derive(Debug)]
pub struct TaskContext {
    event: Event,
    nodes: Map<String, Value>,
    metadata: Map<String, Value>,
    state: WorkingState,
}

impl TaskContext {
    /// Start a fresh context for `event`.
    pub fn new(event: Event) -> Self {
        Self {
            event,
            nodes: Map::new(),
            metadata: Map::new(),
            state: WorkingState::default(),
        }
    }

    /// Start a context with metadata already attached (e.g. a preset document id).
    pub fn with_metadata(event: Event, metadata: Map<String, Value>) -> Self {
        Self {
            metadata,
            ..Self::new(event)
        }
    }

    /// The event that triggered this run.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Results recorded so far, keyed by node name.
    pub fn nodes(&self) -> &Map<String, Value> {
        &self.nodes
    }

    /// Result recorded by a specific node.
    pub fn node_result(&self, name: &str) -> Option<&Value> {
        self.nodes.get(name)
    }

    /// Record (or replace) the result for `name`.
    pub fn record_node(&mut self, name: &str, result: Value) {
        self.nodes.insert(name.to_string(), result);
    }

    /// Persistent metadata.
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Mutable access to the persistent metadata.
    pub fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.metadata
    }

    /// Object stored under `metadata[key]`, if present.
    pub fn metadata_section(&self, key: &str) -> Option<&Map<String, Value>> {
        self.metadata.get(key).and_then(Value::as_object)
    }

    /// Object stored under `metadata[key]`, created if absent.
    ///
    /// A non-object value already stored under `key` is replaced.
    pub fn metadata_section_mut(&mut self, key: &str) -> &mut Map<String, Value> {
        let entry = self
            .metadata
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            tracing::warn!(key, "Replacing non-object metadata section");
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => map,
            _ => unreachable!("metadata section normalized to an object"),
        }
    }

    /// Transient working state.
    pub fn state(&self) -> &WorkingState {
        &self.state
    }

    /// Mutable access to the transient working state.
    pub fn state_mut(&mut self) -> &mut WorkingState {
        &mut self.state
    }

    /// Persistable snapshot: event, node results and metadata.
    pub fn to_record(&self) -> TaskContextRecord {
        TaskContextRecord {
            event: self.event.clone(),
            nodes: self.nodes.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Consume the context, dropping the working state.
    pub fn into_record(self) -> TaskContextRecord {
        TaskContextRecord {
            event: self.event,
            nodes: self.nodes,
            metadata: self.metadata,
        }
    }
}

/// Serializable projection of a [`TaskContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContextRecord {
    /// Event that triggered the run.
    pub event: Event,
    /// Node results keyed by node name, in execution order.
    #[serde(default)]
    pub nodes: Map<String, Value>,
    /// Persistent metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}
