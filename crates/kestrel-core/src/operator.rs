//! Operator trait for compile-time compute kernels.

use crate::Result;
use crate::node_ctx::NodeCtx;
use crate::types::TensorValue;

/// A compute kernel that can evaluate a node whose inputs are all constants.
///
/// Kernels report `Error::InvalidArgument` or `Error::NotCompatible` when they do
/// not apply to the given inputs; the folding pass leaves such nodes unchanged.
///
/// # Example
///
/// ```ignore
/// struct IdentityOp;
///
/// impl Operator for IdentityOp {
///     fn name(&self) -> &str {
///         "Identity"
///     }
///
///     fn compute(&self, _ctx: &NodeCtx<'_>, inputs: &[TensorValue]) -> Result<Vec<TensorValue>> {
///         Ok(vec![inputs[0].clone()])
///     }
/// }
/// ```
pub trait Operator: Send + Sync {
    /// Operator type this kernel implements (e.g., "Add", "Squeeze").
    fn name(&self) -> &str;

    /// Evaluate the node on constant inputs, producing one value per output.
    fn compute(&self, ctx: &NodeCtx<'_>, inputs: &[TensorValue]) -> Result<Vec<TensorValue>>;
}
