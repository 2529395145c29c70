//! Declarative pipeline shape: a start node plus outgoing connections per node.

use std::sync::Arc;

use super::node::Node;

/// One node and the names of the nodes it hands off to.
#[derive(Clone)]
pub struct NodeConfig {
    /// Node instance.
    pub node: Arc<dyn Node>,
    /// Downstream node names, in fan-out order.
    pub connections: Vec<&'static str>,
}

impl NodeConfig {
    /// Declare a node with no outgoing edges.
    pub fn new(node: Arc<dyn Node>) -> Self {
        Self {
            node,
            connections: Vec::new(),
        }
    }

    /// Add an outgoing edge.
    pub fn connect(mut self, target: &'static str) -> Self {
        self.connections.push(target);
        self
    }

    /// Name of the declared node.
    pub fn name(&self) -> &'static str {
        self.node.name()
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("node", &self.name())
            .field("connections", &self.connections)
            .finish()
    }
}

/// Full pipeline declaration.
#[derive(Debug, Clone)]
pub struct PipelineSchema {
    /// Human-readable purpose.
    pub description: &'static str,
    /// Name of the first node to run.
    pub start: &'static str,
    /// Declared nodes.
    pub nodes: Vec<NodeConfig>,
}

impl PipelineSchema {
    /// Start an empty declaration.
    pub fn new(description: &'static str, start: &'static str) -> Self {
        Self {
            description,
            start,
            nodes: Vec::new(),
        }
    }

    /// Add a node declaration.
    pub fn node(mut self, config: NodeConfig) -> Self {
        self.nodes.push(config);
        self
    }

    /// Declare a linear chain where each node hands off to the next.
    pub fn chain(description: &'static str, nodes: Vec<Arc<dyn Node>>) -> Self {
        let start = nodes.first().map(|node| node.name()).unwrap_or_default();
        let names: Vec<&'static str> = nodes.iter().map(|node| node.name()).collect();
        let configs = nodes
            .into_iter()
            .enumerate()
            .map(|(index, node)| {
                let config = NodeConfig::new(node);
                match names.get(index + 1) {
                    Some(next) => config.connect(*next),
                    None => config,
                }
            })
            .collect();
        Self {
            description,
            start,
            nodes: configs,
        }
    }
}
