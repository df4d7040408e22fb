//! Shape and ShapeN: the result is the input shape metadata itself.

use kestrel_core::NodeCtx;

use crate::context::{LowerInput, LowerResult};
use crate::converters::check_inputs;
use crate::holder::{DevMemValue, HolderOutput, Placement};
use crate::kernel_names as names;
use crate::registry::ConverterRegistry;
use crate::{Error, Result};

pub fn register(registry: &mut ConverterRegistry) {
    registry.register("Shape", lower_shape);
    registry.register("ShapeN", lower_shape);
}

/// Build one host-resident shape tensor per input.
///
/// No device memory is involved: the data lives on the host wherever the
/// input tensor is placed.
pub fn lower_shape(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    let n = node.input_count();
    if n == 0 || node.output_count() != n {
        return Err(Error::invalid_input(
            node,
            format!("{n} inputs and {} outputs, expected one output per input", node.output_count()),
        ));
    }

    let ctx = &mut *input.ctx;
    let build = ctx
        .graph
        .add_compute(names::BUILD_SHAPE_TENSOR_DATA, &input.input_shapes, 2 * n)?;
    ctx.graph.set_placement(build, Placement::Host, None)?;

    let mut shapes = Vec::with_capacity(n);
    let mut addrs = Vec::with_capacity(n);
    for i in 0..n {
        shapes.push(HolderOutput::new(build, 2 * i));
        let data = HolderOutput::new(build, 2 * i + 1);
        ctx.graph.add_guarder(names::FREE_MEMORY, data)?;
        addrs.push(DevMemValue::new(data, Placement::Host, None));
    }

    Ok(LowerResult::new(vec![build], shapes, addrs))
}
