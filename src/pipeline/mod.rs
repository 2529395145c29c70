//! Pipeline engine: context, nodes, schema validation, execution and registry.

pub mod context;
pub mod engine;
pub mod node;
pub mod registry;
pub mod schema;

pub use context::{TaskContext, TaskContextRecord, WorkingState};
pub use engine::{Pipeline, PipelineError};
pub use node::{ErrorKind, Node, NodeError};
pub use registry::{PipelineFactory, PipelineRegistry, RegistryError};
pub use schema::{NodeConfig, PipelineSchema};
