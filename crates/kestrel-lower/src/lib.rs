//! Lowering of optimized compute graphs into executable value-holder graphs.
//!
//! This crate takes a folded [`kestrel_core::IrGraph`] and turns every node into
//! a small subgraph of value holders: constants, allocations, argument-buffer
//! builders, kernel launches, stream synchronizations and release guarders.
//! The resulting [`LoweringGraph`] is handed to an executor that dispatches on
//! the synthetic operation names in [`kernel_names`].
//!
//! # Example
//!
//! ```no_run
//! use kestrel_core::IrGraph;
//! use kestrel_lower::{
//!     CompileResults, ConverterRegistry, LoweringContext, LoweringOptions, lower_graph,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let graph = IrGraph::new();
//! let registry = ConverterRegistry::with_defaults();
//! let mut ctx = LoweringContext::new(LoweringOptions::default(), CompileResults::new());
//! let lowered = lower_graph(&graph, &registry, &mut ctx, &kestrel_lower::default_passes())?;
//! println!("{} holders", ctx.graph.node_count());
//! # let _ = lowered;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod attrs;
pub mod compile_result;
pub mod context;
pub mod converters;
pub mod custom_kernels;
pub mod driver;
pub mod ext_info;
pub mod fusion;
pub mod holder;
pub mod kernel_names;
pub mod planner;
pub mod registry;

pub use compile_result::{AicpuTaskDef, CompileResult, CompileResults, KernelDialect, TaskDef};
pub use context::{LowerInput, LowerResult, LoweringContext, LoweringOptions};
pub use custom_kernels::{CustomKernelRegistry, LoadedSo, SoLoader};
pub use driver::{LoweredGraph, lower_graph};
pub use ext_info::{ExtInfoBuilder, ExtInfoHandler};
pub use fusion::{HostInputsFusionPass, LoweringPass, default_passes};
pub use holder::{
    ConstValue, DevMemValue, Frame, Holder, HolderId, HolderKind, HolderOutput, LoweringGraph,
    Placement,
};
pub use planner::{ShapeCategory, UnknownShapeType};
pub use registry::{ConverterRegistry, NodeConverter};

/// Result type for lowering operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while lowering a graph.
///
/// Every variant raised while converting a node names that node; internal
/// consistency failures have their own variants and are never downgraded.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input for node '{node}' ({op_type}): {message}")]
    InvalidInput {
        node: String,
        op_type: String,
        message: String,
    },

    #[error("No compile result for node '{node}' ({op_type})")]
    MissingCompileResult { node: String, op_type: String },

    #[error("Node '{node}' ({op_type}) expects {expected} task defs, found {actual}")]
    TaskCountMismatch {
        node: String,
        op_type: String,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed ext-info for node '{node}': {message}")]
    MalformedExtInfo { node: String, message: String },

    #[error("Fused copy '{node}' feeds {indices} indexed update slots but has {outputs} outputs")]
    FusionIndexMismatch {
        node: String,
        indices: usize,
        outputs: usize,
    },

    #[error("Resource error for node '{node}': {message}")]
    Resource { node: String, message: String },

    #[error("Unsupported operator: no converter for node '{node}' ({op_type})")]
    UnsupportedOp { node: String, op_type: String },

    #[error("Failed to lower node '{node}' ({op_type}): {source}")]
    Lowering {
        node: String,
        op_type: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Lowering graph error: {0}")]
    Graph(String),

    #[error(transparent)]
    Core(#[from] kestrel_core::Error),
}

impl Error {
    /// Build an `InvalidInput` error for a node.
    pub fn invalid_input(
        node: &kestrel_core::NodeCtx<'_>,
        message: impl std::fmt::Display,
    ) -> Self {
        Error::InvalidInput {
            node: node.name().to_string(),
            op_type: node.op_type().to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error signals an upstream consistency bug rather than bad input.
    pub fn is_internal(&self) -> bool {
        match self {
            Error::MalformedExtInfo { .. }
            | Error::TaskCountMismatch { .. }
            | Error::FusionIndexMismatch { .. }
            | Error::Graph(_) => true,
            Error::Lowering { source, .. } => source.is_internal(),
            _ => false,
        }
    }
}
