//! Core intermediate representation, tensor types and shape rules for kestrel.
//!
//! This crate provides the foundational abstractions that the other kestrel crates
//! depend on:
//! - Graph-based IR of the compute graph (`IrGraph`, `IrNode`, `IrEdge`)
//! - Typed per-node access for lowering and folding (`NodeCtx`)
//! - The broadcast shape engine (`BroadcastInfo`)
//! - Operator and Pass traits for constant folding
//! - Operator registry for dynamic dispatch of compute kernels

pub mod broadcast;
pub mod ir;
pub mod node_ctx;
pub mod operator;
pub mod pass;
pub mod registry;
pub mod types;

// Re-export commonly used types
pub use broadcast::{BroadcastInfo, broadcast_shape};
pub use ir::{AttributeValue, EdgeData, IrEdge, IrEdgeId, IrGraph, IrNode, IrNodeId};
pub use node_ctx::NodeCtx;
pub use operator::Operator;
pub use pass::{Pass, Stage, run_passes};
pub use registry::OperatorRegistry;
pub use types::{DataType, Dim, TensorData, TensorShape, TensorValue};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for kestrel-core operations.
///
/// `InvalidArgument` and `NotCompatible` are recoverable for folding callers
/// (the optimization simply does not apply); `Internal` and `Resource` are
/// always fatal for the current compile attempt.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Shapes not compatible: {0}")]
    NotCompatible(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Attribute error: {0}")]
    Attribute(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether a folding caller may treat this error as "does not apply here".
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::InvalidArgument(_) | Error::NotCompatible(_))
    }
}
