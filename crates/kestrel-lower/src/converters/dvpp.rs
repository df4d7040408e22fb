//! Media-processing tasks.

use kestrel_core::NodeCtx;

use crate::attrs::lib_names;
use crate::compile_result::TaskDef;
use crate::context::{LowerInput, LowerResult};
use crate::converters::{check_inputs, release_all};
use crate::holder::{ConstValue, Placement};
use crate::kernel_names as names;
use crate::planner::{allocate_outputs, infer_output_shapes, shape_category};
use crate::registry::ConverterRegistry;
use crate::{Error, Result};

pub fn register(registry: &mut ConverterRegistry) {
    registry.register_lib(lib_names::DVPP, lower_dvpp);
}

pub fn lower_dvpp(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    let category = shape_category(node)?;
    let ctx = &mut *input.ctx;
    let sqe = ctx
        .compile_result(node)?
        .task_defs
        .iter()
        .find_map(|task| match task {
            TaskDef::Dvpp(dvpp) => Some(dvpp.sqe.clone()),
            _ => None,
        })
        .ok_or_else(|| Error::TaskCountMismatch {
            node: node.name().to_string(),
            op_type: node.op_type().to_string(),
            expected: 1,
            actual: 0,
        })?;

    let shapes = infer_output_shapes(ctx, node, category, &input.input_shapes)?;
    let outputs = allocate_outputs(ctx, node, &shapes, Placement::Device)?;

    let stream = ctx.stream()?;
    let mut args = vec![stream, ctx.graph.add_const(ConstValue::Bytes(sqe))];
    args.extend(input.input_addrs.iter().map(|a| a.value));
    args.extend(outputs.iter().map(|o| o.value));
    let launch = ctx.graph.add_compute(names::LAUNCH_DVPP_TASK, &args, 0)?;

    release_all(ctx, input.input_addrs.iter().chain(&outputs), launch)?;
    Ok(LowerResult::new(vec![launch], shapes, outputs))
}
