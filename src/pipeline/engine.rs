//! Executes a validated [`PipelineSchema`] against a [`TaskContext`].
//!
//! The walk is breadth-first from the start node: every node runs at most once, successors run
//! in declaration order, and the first failure aborts the run.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::Instrument;

use super::context::TaskContext;
use super::node::{ErrorKind, Node, NodeError};
use super::schema::PipelineSchema;
use crate::event::Event;

/// Failures raised while building or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Schema declared no nodes.
    #[error("pipeline '{pipeline}' declares no nodes")]
    Empty {
        /// Pipeline name.
        pipeline: &'static str,
    },
    /// Start node is not among the declared nodes.
    #[error("start node '{start}' is not declared in pipeline '{pipeline}'")]
    UnknownStart {
        /// Pipeline name.
        pipeline: &'static str,
        /// Declared start node.
        start: &'static str,
    },
    /// Two declarations share a name.
    #[error("node '{node}' is declared twice in pipeline '{pipeline}'")]
    DuplicateNode {
        /// Pipeline name.
        pipeline: &'static str,
        /// Duplicated node name.
        node: &'static str,
    },
    /// A connection names an undeclared node.
    #[error("node '{from}' connects to undeclared node '{to}' in pipeline '{pipeline}'")]
    UnknownConnection {
        /// Pipeline name.
        pipeline: &'static str,
        /// Source node.
        from: &'static str,
        /// Missing target.
        to: &'static str,
    },
    /// A node failed during the run.
    #[error("node '{node}' failed: {source}")]
    NodeFailed {
        /// Failing node.
        node: &'static str,
        /// Error raised by the node.
        #[source]
        source: NodeError,
    },
}

impl PipelineError {
    /// Classify this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NodeFailed { source, .. } => source.kind(),
            _ => ErrorKind::Wiring,
        }
    }
}

/// An executable, validated pipeline.
pub struct Pipeline {
    name: &'static str,
    description: &'static str,
    nodes: Vec<Arc<dyn Node>>,
    order: Vec<usize>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("order", &self.execution_order())
            .finish()
    }
}

impl Pipeline {
    /// Validate `schema` and precompute its execution order.
    pub fn new(name: &'static str, schema: PipelineSchema) -> Result<Self, PipelineError> {
        if schema.nodes.is_empty() {
            return Err(PipelineError::Empty { pipeline: name });
        }

        let mut index_by_name: HashMap<&'static str, usize> = HashMap::new();
        for (index, config) in schema.nodes.iter().enumerate() {
            if index_by_name.insert(config.name(), index).is_some() {
                return Err(PipelineError::DuplicateNode {
                    pipeline: name,
                    node: config.name(),
                });
            }
        }

        let start = *index_by_name
            .get(schema.start)
            .ok_or(PipelineError::UnknownStart {
                pipeline: name,
                start: schema.start,
            })?;

        let mut edges: Vec<Vec<usize>> = Vec::with_capacity(schema.nodes.len());
        for config in &schema.nodes {
            let mut targets = Vec::with_capacity(config.connections.len());
            for target in &config.connections {
                let index =
                    index_by_name
                        .get(target)
                        .ok_or(PipelineError::UnknownConnection {
                            pipeline: name,
                            from: config.name(),
                            to: *target,
                        })?;
                targets.push(*index);
            }
            edges.push(targets);
        }

        let order = breadth_first_order(start, &edges);
        if order.len() < schema.nodes.len() {
            let unreachable: Vec<&'static str> = schema
                .nodes
                .iter()
                .enumerate()
                .filter(|(index, _)| !order.contains(index))
                .map(|(_, config)| config.name())
                .collect();
            tracing::warn!(pipeline = name, ?unreachable, "Pipeline declares unreachable nodes");
        }

        Ok(Self {
            name,
            description: schema.description,
            nodes: schema.nodes.into_iter().map(|config| config.node).collect(),
            order,
        })
    }

    /// Registry key this pipeline was built under.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Human-readable purpose.
    pub fn description(&self) -> &'static str {
        self.description
    }

    /// Node names in the order they will run.
    pub fn execution_order(&self) -> Vec<&'static str> {
        self.order
            .iter()
            .map(|index| self.nodes[*index].name())
            .collect()
    }

    /// Run the pipeline for `event` starting from an empty context.
    pub async fn run(&self, event: Event) -> Result<TaskContext, PipelineError> {
        self.run_with_context(TaskContext::new(event)).await
    }

    /// Run the pipeline over an existing context.
    pub async fn run_with_context(
        &self,
        mut context: TaskContext,
    ) -> Result<TaskContext, PipelineError> {
        let span = tracing::info_span!(
            "pipeline",
            pipeline = self.name,
            event_type = context.event().event_type()
        );

        async move {
            let started = Instant::now();
            for index in &self.order {
                let node = &self.nodes[*index];
                let node_started = Instant::now();
                context = node
                    .process(context)
                    .instrument(tracing::debug_span!("node", node = node.name()))
                    .await
                    .map_err(|source| {
                        tracing::error!(
                            node = node.name(),
                            kind = ?source.kind(),
                            error = %source,
                            "Node failed"
                        );
                        PipelineError::NodeFailed {
                            node: node.name(),
                            source,
                        }
                    })?;
                tracing::debug!(
                    node = node.name(),
                    elapsed_ms = node_started.elapsed().as_millis() as u64,
                    "Node completed"
                );
            }
            tracing::info!(
                nodes = self.order.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Pipeline completed"
            );
            Ok(context)
        }
        .instrument(span)
        .await
    }
}

fn breadth_first_order(start: usize, edges: &[Vec<usize>]) -> Vec<usize> {
    let mut visited = vec![false; edges.len()];
    let mut order = Vec::with_capacity(edges.len());
    let mut queue = VecDeque::from([start]);
    visited[start] = true;

    while let Some(current) = queue.pop_front() {
        order.push(current);
        for next in &edges[current] {
            if !visited[*next] {
                visited[*next] = true;
                queue.push_back(*next);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breadth_first_visits_each_node_once() {
        // 0 -> 1, 2 ; 1 -> 3 ; 2 -> 3, 0
        let edges = vec![vec![1, 2], vec![3], vec![3, 0], vec![]];
        assert_eq!(breadth_first_order(0, &edges), vec![0, 1, 2, 3]);
    }

    #[test]
    fn breadth_first_skips_unreachable_nodes() {
        let edges = vec![vec![1], vec![], vec![0]];
        assert_eq!(breadth_first_order(0, &edges), vec![0, 1]);
    }
}
