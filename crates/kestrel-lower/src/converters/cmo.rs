//! Cache-maintenance hints.

use kestrel_core::NodeCtx;

use crate::compile_result::TaskDef;
use crate::context::{LowerInput, LowerResult};
use crate::converters::{check_inputs, release_all};
use crate::holder::ConstValue;
use crate::kernel_names as names;
use crate::registry::ConverterRegistry;
use crate::{Error, Result};

pub fn register(registry: &mut ConverterRegistry) {
    registry.register("Cmo", lower_cmo);
}

/// Launch one prefetch task over the input addresses. The node has no outputs.
pub fn lower_cmo(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    let ctx = &mut *input.ctx;
    let cmo_type = ctx
        .compile_result(node)?
        .task_defs
        .iter()
        .find_map(|task| match task {
            TaskDef::Cmo(cmo) => Some(cmo.cmo_type),
            _ => None,
        })
        .ok_or_else(|| Error::TaskCountMismatch {
            node: node.name().to_string(),
            op_type: node.op_type().to_string(),
            expected: 1,
            actual: 0,
        })?;

    let stream = ctx.stream()?;
    let mut args = vec![stream, ctx.graph.add_const(ConstValue::Int(cmo_type))];
    args.extend(input.input_addrs.iter().map(|a| a.value));
    let launch = ctx.graph.add_compute(names::LAUNCH_CMO_TASK, &args, 0)?;

    release_all(ctx, &input.input_addrs, launch)?;
    Ok(LowerResult::void(vec![launch]))
}
