//! Floating-point overflow status registers.

use kestrel_core::NodeCtx;

use crate::context::{LowerInput, LowerResult};
use crate::converters::{check_inputs, release_all};
use crate::holder::Placement;
use crate::kernel_names as names;
use crate::planner::{allocate_outputs, static_output_shapes};
use crate::registry::ConverterRegistry;
use crate::{Error, Result};

pub fn register(registry: &mut ConverterRegistry) {
    registry
        .register("NPUGetFloatStatus", lower_get_float_status)
        .register("NPUClearFloatStatus", lower_clear_float_status);
}

/// Read the status register into a fresh device buffer.
pub fn lower_get_float_status(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    if node.output_count() != 1 {
        return Err(Error::invalid_input(
            node,
            format!("expected 1 output, got {}", node.output_count()),
        ));
    }
    let ctx = &mut *input.ctx;
    let shapes = static_output_shapes(ctx, node)?;
    let outputs = allocate_outputs(ctx, node, &shapes, Placement::Device)?;

    let stream = ctx.stream()?;
    let launch = ctx
        .graph
        .add_compute(names::NPU_GET_FLOAT_STATUS, &[stream, outputs[0].value], 0)?;

    release_all(ctx, input.input_addrs.iter().chain(&outputs), launch)?;
    Ok(LowerResult::new(vec![launch], shapes, outputs))
}

/// Reset the status register. Declared outputs are allocated but never written.
pub fn lower_clear_float_status(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    let ctx = &mut *input.ctx;
    let shapes = static_output_shapes(ctx, node)?;
    let outputs = allocate_outputs(ctx, node, &shapes, Placement::Device)?;

    let stream = ctx.stream()?;
    let launch = ctx.graph.add_compute(names::NPU_CLEAR_FLOAT_STATUS, &[stream], 0)?;

    release_all(ctx, input.input_addrs.iter().chain(&outputs), launch)?;
    Ok(LowerResult::new(vec![launch], shapes, outputs))
}
