//! Reshape-like ops: same bytes, new logical shape.

use kestrel_core::NodeCtx;

use crate::context::{LowerInput, LowerResult};
use crate::converters::check_inputs;
use crate::planner::{ShapeCategory, infer_output_shapes, shape_category};
use crate::registry::ConverterRegistry;
use crate::{Error, Result};

const RESHAPE_OPS: &[&str] = &[
    "Reshape",
    "Squeeze",
    "Unsqueeze",
    "Flatten",
    "Bitcast",
    "ExpandDims",
    "ReFormat",
    "ReshapeRecovery",
];

pub fn register(registry: &mut ConverterRegistry) {
    for op_type in RESHAPE_OPS {
        registry.register(*op_type, lower_reshape);
    }
}

/// Every output aliases the memory of input 0; only the shape is computed.
pub fn lower_reshape(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    let Some(&data) = input.input_addrs.first() else {
        return Err(Error::invalid_input(node, "reshape-like op without a data input"));
    };

    let category = match shape_category(node)? {
        ShapeCategory::Static => ShapeCategory::Static,
        // Output shape is a function of the input shapes (and constant shape inputs).
        _ => ShapeCategory::DependsOnInputShape,
    };
    let shapes = infer_output_shapes(input.ctx, node, category, &input.input_shapes)?;
    let outputs = vec![data; shapes.len()];
    tracing::debug!(outputs = outputs.len(), "outputs alias input 0");

    Ok(LowerResult::new(Vec::new(), shapes, outputs))
}
