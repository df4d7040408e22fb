//! Compile-time compute kernels for kestrel.
//!
//! These kernels evaluate nodes whose inputs are all constants so that the
//! constant-folding pass can replace them before lowering.
//!
//! # Operator Families
//!
//! - **Binary elementwise**: Add, Sub, Mul, Div (broadcasting via `BroadcastInfo`)
//!
//! # Individual Operators
//!
//! - Shape manipulation (Reshape, Squeeze, Unsqueeze)

pub mod families;
pub mod operators;
pub mod passes;

mod helpers;
mod registry;

pub use families::BinaryElementwiseOp;
pub use operators::{ReshapeOp, SqueezeOp, UnsqueezeOp};
pub use passes::ConstantFoldingPass;
pub use registry::core_operator_registry;
