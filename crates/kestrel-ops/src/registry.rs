//! Folding kernels shipped with kestrel.

use kestrel_core::OperatorRegistry;

use crate::families::BinaryElementwiseOp;
use crate::operators::{ReshapeOp, SqueezeOp, UnsqueezeOp};

/// Kernels for the arithmetic and shape ops that commonly feed shape inputs.
///
/// Callers may register more kernels on the result; a later registration of
/// the same op type wins.
pub fn core_operator_registry() -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();

    registry
        .register("Add", BinaryElementwiseOp::add())
        .register("Sub", BinaryElementwiseOp::sub())
        .register("Mul", BinaryElementwiseOp::mul())
        .register("Div", BinaryElementwiseOp::div());

    registry
        .register("Reshape", ReshapeOp)
        .register("Squeeze", SqueezeOp)
        .register("Unsqueeze", UnsqueezeOp);

    registry
}
