//! Converter for CPU kernels hosted on the accelerator.
//!
//! Static and input-shape dependent kernels follow one skeleton: size and
//! allocate outputs, build arguments, patch ext-info and addresses, launch.
//! Depend-on-compute kernels launch into fixed-size result summaries, sync
//! the stream, then read the real shapes back. Ported kernels additionally
//! run a copy kernel that relocates results into the final output buffers.

use kestrel_core::NodeCtx;

use crate::args::{ArgsHolders, CpuKernelIo, build_args, update_ext_info, update_io_addr};
use crate::attrs::lib_names;
use crate::compile_result::{AicpuTaskDef, KernelDialect};
use crate::context::{LowerInput, LowerResult, LoweringContext};
use crate::converters::{check_inputs, outputs_of, release_all};
use crate::holder::{ConstValue, DevMemValue, HolderId, HolderOutput, Placement};
use crate::kernel_names as names;
use crate::planner::{
    ShapeCategory, alloc_log_workspace, alloc_memory, alloc_summaries, allocate_outputs,
    infer_output_shapes, stream_affinity, tensor_size,
};
use crate::registry::ConverterRegistry;
use crate::{Error, Result};

pub fn register(registry: &mut ConverterRegistry) {
    registry
        .register_lib(lib_names::AICPU_TF, lower_aicpu)
        .register_lib(lib_names::AICPU_ASCEND, lower_aicpu);
}

/// Lower a node compiled into one or two CPU kernel tasks.
#[tracing::instrument(skip_all, fields(node = node.name(), op_type = node.op_type()))]
pub fn lower_aicpu(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    let io = CpuKernelIo::from_node(node)?;
    let ctx = &mut *input.ctx;

    let tasks: Vec<AicpuTaskDef> = ctx.compile_result(node)?.aicpu_tasks().cloned().collect();
    let dialect = tasks.first().map_or(KernelDialect::Tf, AicpuTaskDef::dialect);
    let expected = match (io.category, dialect) {
        (ShapeCategory::DependsOnCompute, KernelDialect::Tf) => 2,
        _ => 1,
    };
    if tasks.len() != expected {
        return Err(Error::TaskCountMismatch {
            node: node.name().to_string(),
            op_type: node.op_type().to_string(),
            expected,
            actual: tasks.len(),
        });
    }

    let stream = ctx.stream()?;
    let inputs = ensure_on_device(ctx, node, &input.input_shapes, &input.input_addrs, stream)?;
    tracing::debug!(category = ?io.category, ?dialect, "lowering cpu kernel");

    let kernel = Kernel {
        node,
        io: &io,
        stream,
        input_shapes: &input.input_shapes,
        inputs: &inputs,
    };
    let result = match (io.category, dialect) {
        (ShapeCategory::DependsOnCompute, KernelDialect::Tf) => {
            kernel.lower_relocated(ctx, &tasks[0], &tasks[1])?
        }
        (ShapeCategory::DependsOnCompute, KernelDialect::Cc) => {
            kernel.lower_from_summary(ctx, &tasks[0])?
        }
        _ => kernel.lower_direct(ctx, &tasks[0])?,
    };

    // Caller-owned inputs must also outlive the launch.
    if let Some(&last) = result.order_holders.last() {
        release_all(ctx, &input.input_addrs, last)?;
    }
    Ok(result)
}

/// Copy host-resident inputs to device memory on the kernel's stream.
fn ensure_on_device(
    ctx: &mut LoweringContext,
    node: &NodeCtx<'_>,
    shapes: &[HolderOutput],
    addrs: &[DevMemValue],
    stream: HolderOutput,
) -> Result<Vec<DevMemValue>> {
    let mut on_device = Vec::with_capacity(addrs.len());
    for (i, (&shape, addr)) in shapes.iter().zip(addrs).enumerate() {
        if addr.placement != Placement::Host {
            on_device.push(*addr);
            continue;
        }
        let dtype = node.input_edge(i)?.dtype;
        let size = tensor_size(ctx, shape, dtype)?;
        let allocator = ctx.allocator(Placement::Device)?;
        let ensure = ctx.graph.add_compute(
            names::ENSURE_TENSOR_AT_DEVICE,
            &[allocator, stream, addr.value, size],
            1,
        )?;
        let stream_id = stream_affinity(ctx, Placement::Device);
        ctx.graph.set_placement(ensure, Placement::Device, stream_id)?;
        let mem = HolderOutput::first(ensure);
        ctx.graph.add_guarder(names::FREE_MEMORY, mem)?;
        on_device.push(DevMemValue::new(mem, Placement::Device, stream_id));
    }
    Ok(on_device)
}

/// Launch `args` on `stream` once every holder in `after` has run.
fn launch(
    ctx: &mut LoweringContext,
    task: &AicpuTaskDef,
    args: &ArgsHolders,
    stream: HolderOutput,
    after: &[HolderId],
) -> Result<HolderId> {
    let op = match task.dialect() {
        KernelDialect::Tf => names::LAUNCH_TF_KERNEL,
        KernelDialect::Cc => names::LAUNCH_CC_KERNEL,
    };
    let block_dim = ctx.graph.add_const(ConstValue::Int(i64::from(task.block_dim.max(1))));
    let launch = ctx.graph.add_compute(op, &[args.args, stream, block_dim], 0)?;
    for &dep in after.iter().chain(args.so_load.iter()) {
        ctx.graph.add_dependency(dep, launch)?;
    }
    Ok(launch)
}

fn sync_stream(ctx: &mut LoweringContext, stream: HolderOutput, after: HolderId) -> Result<HolderId> {
    let sync = ctx.graph.add_compute(names::SYNC_STREAM, &[stream], 0)?;
    ctx.graph.add_dependency(after, sync)?;
    Ok(sync)
}

/// Re-attribute an error raised while building the relocation kernel to `node`.
fn attribute_to(node: &NodeCtx<'_>, err: Error) -> Error {
    match err {
        Error::MalformedExtInfo { message, .. } => Error::MalformedExtInfo {
            node: node.name().to_string(),
            message: format!("relocation kernel: {message}"),
        },
        Error::Resource { message, .. } => Error::Resource {
            node: node.name().to_string(),
            message: format!("relocation kernel: {message}"),
        },
        Error::InvalidInput { message, .. } => {
            Error::invalid_input(node, format!("relocation kernel: {message}"))
        }
        other => other,
    }
}

struct Kernel<'k, 'a> {
    node: &'k NodeCtx<'a>,
    io: &'k CpuKernelIo,
    stream: HolderOutput,
    input_shapes: &'k [HolderOutput],
    inputs: &'k [DevMemValue],
}

impl Kernel<'_, '_> {
    /// Static and input-shape dependent kernels write straight into their outputs.
    fn lower_direct(&self, ctx: &mut LoweringContext, task: &AicpuTaskDef) -> Result<LowerResult> {
        let shapes = infer_output_shapes(ctx, self.node, self.io.category, self.input_shapes)?;
        let outputs = allocate_outputs(ctx, self.node, &shapes, Placement::Device)?;
        let workspace = alloc_log_workspace(ctx, self.io)?;

        let args = build_args(ctx, self.io, task, Placement::Device)?;
        let update_ext = update_ext_info(
            ctx,
            self.io,
            &args,
            self.input_shapes,
            &shapes,
            workspace.as_ref(),
            Some(self.stream),
        )?;
        let update_io = update_io_addr(ctx, args.args, self.inputs, &outputs)?;

        let mut after = vec![update_io];
        after.extend(update_ext);
        let launch = launch(ctx, task, &args, self.stream, &after)?;

        let last = match args.blocking_event {
            Some(event) => {
                let wait = ctx
                    .graph
                    .add_compute(names::WAIT_ASYNC_EVENT, &[event, self.stream], 0)?;
                ctx.graph.add_dependency(launch, wait)?;
                wait
            }
            None => launch,
        };

        release_all(ctx, self.inputs.iter().chain(&outputs).chain(&workspace), last)?;
        Ok(LowerResult::new(vec![last], shapes, outputs))
    }

    /// Launch into result summaries and sync. Returns the arguments and the sync holder.
    fn launch_into_summaries(
        &self,
        ctx: &mut LoweringContext,
        task: &AicpuTaskDef,
        summaries: &[DevMemValue],
    ) -> Result<(ArgsHolders, HolderId)> {
        let args = build_args(ctx, self.io, task, Placement::Device)?;
        let update_ext = update_ext_info(
            ctx,
            self.io,
            &args,
            self.input_shapes,
            &[],
            None,
            Some(self.stream),
        )?;
        let update_io = update_io_addr(ctx, args.args, self.inputs, summaries)?;

        let mut after = vec![update_io];
        after.extend(update_ext);
        let launch = launch(ctx, task, &args, self.stream, &after)?;
        let sync = sync_stream(ctx, self.stream, launch)?;
        Ok((args, sync))
    }

    /// Ported depend-on-compute kernels: read shapes from the summaries,
    /// allocate real outputs and relocate the data with a copy kernel.
    fn lower_relocated(
        &self,
        ctx: &mut LoweringContext,
        task: &AicpuTaskDef,
        copy_task: &AicpuTaskDef,
    ) -> Result<LowerResult> {
        let n = self.node.output_count();
        let summaries = alloc_summaries(ctx, n, Placement::Device)?;
        let (_, sync) = self.launch_into_summaries(ctx, task, &summaries)?;

        let summary_values: Vec<HolderOutput> = summaries.iter().map(|s| s.value).collect();
        let read = ctx
            .graph
            .add_compute(names::GET_SHAPES_FROM_SUMMARY, &summary_values, 2 * n)?;
        ctx.graph.add_dependency(sync, read)?;
        let shapes = outputs_of(read, 0, n);
        let data = outputs_of(read, n, n);

        let mut sizes = Vec::with_capacity(n);
        let mut outputs = Vec::with_capacity(n);
        for (i, &shape) in shapes.iter().enumerate() {
            let size = tensor_size(ctx, shape, self.node.output_edge(i)?.dtype)?;
            outputs.push(alloc_memory(ctx, Placement::Device, size)?);
            sizes.push(size);
        }

        let mut desc_inputs = data.clone();
        desc_inputs.extend(outputs.iter().map(|o| o.value));
        desc_inputs.extend(&sizes);
        let descs = ctx
            .graph
            .add_compute(names::BUILD_RELOCATE_COPY_DESCS, &desc_inputs, n)?;
        let stream_id = stream_affinity(ctx, Placement::Device);
        ctx.graph.set_placement(descs, Placement::Device, stream_id)?;
        let descs: Vec<DevMemValue> = outputs_of(descs, 0, n)
            .into_iter()
            .map(|d| DevMemValue::new(d, Placement::Device, stream_id))
            .collect();

        let copy_io = CpuKernelIo::for_relocation(self.io, n);
        let copy_args = build_args(ctx, &copy_io, copy_task, Placement::Device)
            .map_err(|e| attribute_to(self.node, e))?;
        let copy_update = update_io_addr(ctx, copy_args.args, &descs, &[])?;
        let copy_launch = launch(
            ctx,
            copy_task,
            &copy_args,
            self.stream,
            &[copy_update],
        )?;
        let copy_sync = sync_stream(ctx, self.stream, copy_launch)?;

        release_all(
            ctx,
            self.inputs.iter().chain(&summaries).chain(&outputs),
            copy_sync,
        )?;
        Ok(LowerResult::new(vec![copy_sync], shapes, outputs))
    }

    /// Native depend-on-compute kernels report shapes through ext-info and
    /// leave their results in buffers referenced by the summaries.
    fn lower_from_summary(&self, ctx: &mut LoweringContext, task: &AicpuTaskDef) -> Result<LowerResult> {
        let n = self.node.output_count();
        let summaries = alloc_summaries(ctx, n, Placement::Device)?;
        let (args, sync) = self.launch_into_summaries(ctx, task, &summaries)?;

        let count = ctx.graph.add_const(ConstValue::Int(n as i64));
        let read_shapes = ctx
            .graph
            .add_compute(names::GET_OUTPUT_SHAPES_FROM_EXT_INFO, &[args.ext_info, count], n)?;
        ctx.graph.add_dependency(sync, read_shapes)?;
        let shapes = outputs_of(read_shapes, 0, n);

        let mut data_inputs: Vec<HolderOutput> = summaries.iter().map(|s| s.value).collect();
        data_inputs.extend(&shapes);
        let data = ctx
            .graph
            .add_compute(names::GET_OUTPUT_DATA_FROM_SUMMARY, &data_inputs, n)?;
        let stream_id = stream_affinity(ctx, Placement::Device);
        ctx.graph.set_placement(data, Placement::Device, stream_id)?;

        let mut outputs = Vec::with_capacity(n);
        for value in outputs_of(data, 0, n) {
            ctx.graph.add_guarder(names::FREE_MEMORY, value)?;
            outputs.push(DevMemValue::new(value, Placement::Device, stream_id));
        }

        release_all(ctx, self.inputs.iter().chain(&summaries), data)?;
        Ok(LowerResult::new(vec![data], shapes, outputs))
    }
}
