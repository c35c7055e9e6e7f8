//! `nodes` crate — the `OperationHandler` trait, the handler registry and
//! built-in operations.
//!
//! Every operation, built-in or host-supplied, must implement
//! [`OperationHandler`]. The engine crate dispatches through this trait object
//! after a registry lookup.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use error::NodeError;
pub use registry::HandlerRegistry;
pub use traits::{ExecutionContext, OperationHandler};
