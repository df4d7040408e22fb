//! Converter for CPU kernels running on the host.
//!
//! Host kernels have no stream and never copy ext-info to a device. Op types
//! with a registered host procedure are called directly; everything else
//! goes through the generic CPU-kernel argument path.

use std::collections::HashMap;

use kestrel_core::NodeCtx;

use crate::args::{CpuKernelIo, build_args, update_ext_info, update_io_addr};
use crate::attrs::{self, lib_names};
use crate::context::{LowerInput, LowerResult, LoweringContext};
use crate::converters::{check_inputs, outputs_of, release_all};
use crate::holder::{ConstValue, DevMemValue, HolderOutput, Placement};
use crate::kernel_names as names;
use crate::planner::{
    ShapeCategory, alloc_memory, alloc_summaries, allocate_outputs, infer_output_shapes,
    shape_category, tensor_size,
};
use crate::registry::ConverterRegistry;
use crate::{Error, Result};

/// Host procedures callable without argument buffers, keyed by op type.
#[derive(Debug, Clone, Default)]
pub struct HostProcRegistry {
    procs: HashMap<String, String>,
}

impl HostProcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (op_type, proc_name) in [
            ("Add", "host_add"),
            ("Sub", "host_sub"),
            ("Mul", "host_mul"),
            ("Div", "host_div"),
            ("Cast", "host_cast"),
            ("Identity", "host_identity"),
        ] {
            registry.register(op_type, proc_name);
        }
        registry
    }

    pub fn register(&mut self, op_type: impl Into<String>, proc_name: impl Into<String>) -> &mut Self {
        self.procs.insert(op_type.into(), proc_name.into());
        self
    }

    pub fn get(&self, op_type: &str) -> Option<&str> {
        self.procs.get(op_type).map(String::as_str)
    }
}

pub fn register(registry: &mut ConverterRegistry) {
    registry.register_lib(lib_names::HOST_CPU, lower_host_cpu);
    for op_type in ["Add", "Sub", "Mul", "Div", "Cast", "Identity"] {
        registry.register_for_placement(op_type, Placement::Host, lower_host_cpu);
    }
}

/// Lower a node executed by a host CPU kernel.
#[tracing::instrument(skip_all, fields(node = node.name(), op_type = node.op_type()))]
pub fn lower_host_cpu(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    let category = shape_category(node)?;
    let ctx = &mut *input.ctx;

    if let Some(proc_name) = ctx.host_procs().get(node.op_type()).map(str::to_string) {
        tracing::debug!(proc_name, "direct host procedure");
        return match category {
            ShapeCategory::DependsOnCompute => {
                lower_proc_depend_compute(ctx, node, input.input_shapes.as_slice(), &input.input_addrs, proc_name)
            }
            _ => lower_proc(ctx, node, category, &input.input_shapes, &input.input_addrs, proc_name),
        };
    }

    lower_generic(ctx, node, category, &input.input_shapes, &input.input_addrs)
}

fn lower_proc(
    ctx: &mut LoweringContext,
    node: &NodeCtx<'_>,
    category: ShapeCategory,
    input_shapes: &[HolderOutput],
    input_addrs: &[DevMemValue],
    proc_name: String,
) -> Result<LowerResult> {
    let shapes = infer_output_shapes(ctx, node, category, input_shapes)?;
    let outputs = host_outputs(ctx, node, &shapes, input_addrs)?;

    let mut inputs = vec![ctx.graph.add_const(ConstValue::Str(proc_name))];
    inputs.extend_from_slice(input_shapes);
    inputs.extend(input_addrs.iter().map(|a| a.value));
    inputs.extend_from_slice(&shapes);
    inputs.extend(outputs.iter().map(|o| o.value));
    let compute = ctx.graph.add_compute(names::HOST_PROC_COMPUTE, &inputs, 0)?;

    release_all(ctx, input_addrs.iter().chain(&outputs), compute)?;
    Ok(LowerResult::new(vec![compute], shapes, outputs))
}

/// The procedure allocates its own outputs and returns shapes and addresses.
fn lower_proc_depend_compute(
    ctx: &mut LoweringContext,
    node: &NodeCtx<'_>,
    input_shapes: &[HolderOutput],
    input_addrs: &[DevMemValue],
    proc_name: String,
) -> Result<LowerResult> {
    let n = node.output_count();
    let mut inputs = vec![ctx.graph.add_const(ConstValue::Str(proc_name))];
    inputs.extend_from_slice(input_shapes);
    inputs.extend(input_addrs.iter().map(|a| a.value));
    let compute = ctx.graph.add_compute(names::HOST_PROC_COMPUTE, &inputs, 2 * n)?;
    ctx.graph.set_placement(compute, Placement::Host, None)?;

    let mut outputs = Vec::with_capacity(n);
    for value in outputs_of(compute, n, n) {
        ctx.graph.add_guarder(names::FREE_MEMORY, value)?;
        outputs.push(DevMemValue::new(value, Placement::Host, None));
    }

    release_all(ctx, input_addrs, compute)?;
    Ok(LowerResult::new(vec![compute], outputs_of(compute, 0, n), outputs))
}

fn lower_generic(
    ctx: &mut LoweringContext,
    node: &NodeCtx<'_>,
    category: ShapeCategory,
    input_shapes: &[HolderOutput],
    input_addrs: &[DevMemValue],
) -> Result<LowerResult> {
    let tasks: Vec<_> = ctx.compile_result(node)?.aicpu_tasks().cloned().collect();
    let [task] = tasks.as_slice() else {
        return Err(Error::TaskCountMismatch {
            node: node.name().to_string(),
            op_type: node.op_type().to_string(),
            expected: 1,
            actual: tasks.len(),
        });
    };
    let io = CpuKernelIo::from_node(node)?;

    let (shapes, outputs) = match category {
        ShapeCategory::DependsOnCompute => {
            let summaries = alloc_summaries(ctx, node.output_count(), Placement::Host)?;
            (Vec::new(), summaries)
        }
        _ => {
            let shapes = infer_output_shapes(ctx, node, category, input_shapes)?;
            let outputs = host_outputs(ctx, node, &shapes, input_addrs)?;
            (shapes, outputs)
        }
    };

    let args = build_args(ctx, &io, task, Placement::Host)?;
    let update_ext = update_ext_info(ctx, &io, &args, input_shapes, &shapes, None, None)?;
    let update_io = update_io_addr(ctx, args.args, input_addrs, &outputs)?;
    let compute = ctx
        .graph
        .add_compute(names::AICPU_HOST_COMPUTE, &[args.args, args.ext_info], 0)?;
    ctx.graph.add_dependency(update_io, compute)?;
    if let Some(update_ext) = update_ext {
        ctx.graph.add_dependency(update_ext, compute)?;
    }

    if category != ShapeCategory::DependsOnCompute {
        release_all(ctx, input_addrs.iter().chain(&outputs), compute)?;
        return Ok(LowerResult::new(vec![compute], shapes, outputs));
    }

    // Host kernels finish synchronously, so results are read back without a sync.
    let n = node.output_count();
    let count = ctx.graph.add_const(ConstValue::Int(n as i64));
    let read_shapes = ctx
        .graph
        .add_compute(names::GET_OUTPUT_SHAPES_FROM_EXT_INFO, &[args.ext_info, count], n)?;
    ctx.graph.add_dependency(compute, read_shapes)?;
    let shapes = outputs_of(read_shapes, 0, n);

    let mut data_inputs: Vec<HolderOutput> = outputs.iter().map(|s| s.value).collect();
    data_inputs.extend(&shapes);
    let data = ctx
        .graph
        .add_compute(names::GET_OUTPUT_DATA_FROM_SUMMARY, &data_inputs, n)?;
    ctx.graph.set_placement(data, Placement::Host, None)?;
    let mut results = Vec::with_capacity(n);
    for value in outputs_of(data, 0, n) {
        ctx.graph.add_guarder(names::FREE_MEMORY, value)?;
        results.push(DevMemValue::new(value, Placement::Host, None));
    }

    release_all(ctx, input_addrs.iter().chain(&outputs), data)?;
    Ok(LowerResult::new(vec![data], shapes, results))
}

/// Host output memory.
///
/// Small-shape nodes may alias inputs: `_host_output_ref_input[i]` names the
/// input whose memory output `i` reuses, or `-1` for a fresh allocation.
fn host_outputs(
    ctx: &mut LoweringContext,
    node: &NodeCtx<'_>,
    shapes: &[HolderOutput],
    input_addrs: &[DevMemValue],
) -> Result<Vec<DevMemValue>> {
    if !node.attr_bool_or(attrs::HOST_SMALL_SHAPE, false)? {
        return allocate_outputs(ctx, node, shapes, Placement::Host);
    }

    let refs = node.attr_ints_or_empty(attrs::HOST_OUTPUT_REF_INPUT)?;
    let mut outputs = Vec::with_capacity(shapes.len());
    for (i, &shape) in shapes.iter().enumerate() {
        let alias = refs.get(i).copied().unwrap_or(-1);
        if alias == -1 {
            let size = tensor_size(ctx, shape, node.output_edge(i)?.dtype)?;
            outputs.push(alloc_memory(ctx, Placement::Host, size)?);
            continue;
        }
        let aliased = usize::try_from(alias)
            .ok()
            .and_then(|index| input_addrs.get(index))
            .ok_or_else(|| {
                Error::invalid_input(
                    node,
                    format!(
                        "output {i} refs input {alias}, node has {} inputs",
                        input_addrs.len()
                    ),
                )
            })?;
        tracing::debug!(output = i, input = alias, "output aliases input memory");
        outputs.push(*aliased);
    }
    Ok(outputs)
}
