//! `engine` crate — workflow graph model, builder, validation and the
//! execution engine.

pub mod builder;
pub mod condition;
pub mod error;
pub mod executor;
pub mod graph;
pub mod graph_model;
pub mod models;
pub mod state;
pub mod validator;

pub use builder::{EdgeSpec, NodeSpec, WorkflowBuilder};
pub use condition::{Condition, EdgeCondition, Operator};
pub use error::{EngineError, GraphStructureError};
pub use executor::{EngineConfig, ExecuteOptions, ExecuteResponse, ExecutionEngine};
pub use graph_model::GraphModel;
pub use models::{Edge, Node, NodeData, NodeType, WorkflowDefinition};
pub use state::{ExecutionState, ExecutionStatus, UnknownStatus};
pub use validator::{validate_workflow, ValidationError, ValidationReport};
