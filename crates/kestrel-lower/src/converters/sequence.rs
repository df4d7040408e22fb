//! Sequence container ops.
//!
//! Sequences live in a container session shared by every sequence op of a
//! lowering context. The session is created once in the init frame,
//! destroyed by a guarder and cleared at the end of every main-frame run.
//! Sequence handles are host values owned by the container, so they carry
//! no guarder of their own.

use kestrel_core::{DataType, NodeCtx};

use crate::context::{LowerInput, LowerResult, LoweringContext};
use crate::converters::{check_arity, check_inputs, release_all};
use crate::holder::{ConstValue, DevMemValue, Frame, HolderId, HolderOutput, Placement};
use crate::kernel_names as names;
use crate::planner::stream_affinity;
use crate::registry::ConverterRegistry;
use crate::{Error, Result};

const CONTAINER_KEY: &str = "SequenceContainer";

pub fn register(registry: &mut ConverterRegistry) {
    registry
        .register("SequenceEmpty", lower_sequence_empty)
        .register("SequenceInsert", lower_sequence_insert)
        .register("SequenceAt", lower_sequence_at)
        .register("SequenceLength", lower_sequence_length)
        .register("SplitToSequence", lower_split_to_sequence);
}

/// Container session of this context, created on first use.
pub fn container_session(ctx: &mut LoweringContext) -> Result<HolderOutput> {
    ctx.unique_holder(CONTAINER_KEY, |ctx| {
        let container_id = ctx.next_container_id();
        tracing::debug!(container_id, "creating sequence container");
        let session = ctx.in_frame(Frame::Init, |ctx| {
            let id = ctx.graph.add_const(ConstValue::Int(container_id as i64));
            let create = ctx.graph.add_compute(names::CREATE_CONTAINER_SESSION, &[id], 1)?;
            let session = HolderOutput::first(create);
            ctx.graph.add_guarder(names::DESTROY_CONTAINER_SESSION, session)?;
            Ok(session)
        })?;
        ctx.in_frame(Frame::Main, |ctx| {
            let clear = ctx.graph.add_compute(names::CLEAR_CONTAINER, &[session], 0)?;
            ctx.graph.pin_to_frame_end(clear)
        })?;
        Ok(session)
    })
}

fn check_single_output(node: &NodeCtx<'_>) -> Result<()> {
    if node.output_count() != 1 {
        return Err(Error::invalid_input(
            node,
            format!("expected 1 output, got {}", node.output_count()),
        ));
    }
    Ok(())
}

/// Emit a sequence kernel returning `(shape, addr)` and release the inputs after it.
fn emit(
    ctx: &mut LoweringContext,
    op_type: &str,
    args: &[HolderOutput],
    input_addrs: &[DevMemValue],
    owned_output: Option<Placement>,
) -> Result<LowerResult> {
    let op = ctx.graph.add_compute(op_type, args, 2)?;
    let placement = owned_output.unwrap_or(Placement::Host);
    let stream_id = stream_affinity(ctx, placement);
    ctx.graph.set_placement(op, placement, stream_id)?;

    let addr = HolderOutput::new(op, 1);
    if owned_output.is_some() {
        ctx.graph.add_guarder(names::FREE_MEMORY, addr)?;
    }
    release_all(ctx, input_addrs, op)?;
    Ok(single(op, addr, placement, stream_id))
}

fn single(op: HolderId, addr: HolderOutput, placement: Placement, stream_id: Option<i64>) -> LowerResult {
    LowerResult::new(
        vec![op],
        vec![HolderOutput::new(op, 0)],
        vec![DevMemValue::new(addr, placement, stream_id)],
    )
}

pub fn lower_sequence_empty(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    check_arity(node, 0, 0)?;
    check_single_output(node)?;
    let dtype = node.attr_i64_or("dtype", DataType::F32.code() as i64)?;

    let ctx = &mut *input.ctx;
    let session = container_session(ctx)?;
    let dtype = ctx.graph.add_const(ConstValue::Int(dtype));
    emit(ctx, names::SEQUENCE_EMPTY, &[session, dtype], &[], None)
}

/// Inputs: sequence, tensor and an optional insert position.
pub fn lower_sequence_insert(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    check_arity(node, 2, 3)?;
    check_single_output(node)?;

    let ctx = &mut *input.ctx;
    let session = container_session(ctx)?;
    let mut args = vec![session];
    for (shape, addr) in input.input_shapes.iter().zip(&input.input_addrs) {
        args.push(*shape);
        args.push(addr.value);
    }
    emit(ctx, names::SEQUENCE_INSERT, &args, &input.input_addrs, None)
}

/// Inputs: sequence and position. The element is copied into fresh device memory.
pub fn lower_sequence_at(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    check_arity(node, 2, 2)?;
    check_single_output(node)?;

    let ctx = &mut *input.ctx;
    let session = container_session(ctx)?;
    let allocator = ctx.allocator(Placement::Device)?;
    let args = [
        session,
        input.input_addrs[0].value,
        input.input_shapes[1],
        input.input_addrs[1].value,
        allocator,
    ];
    emit(ctx, names::SEQUENCE_AT, &args, &input.input_addrs, Some(Placement::Device))
}

/// The length is a host scalar allocated by the kernel.
pub fn lower_sequence_length(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    check_arity(node, 1, 1)?;
    check_single_output(node)?;

    let ctx = &mut *input.ctx;
    let session = container_session(ctx)?;
    let allocator = ctx.allocator(Placement::Host)?;
    let args = [session, input.input_addrs[0].value, allocator];
    emit(ctx, names::SEQUENCE_LENGTH, &args, &input.input_addrs, Some(Placement::Host))
}

/// Inputs: tensor and an optional split tensor.
pub fn lower_split_to_sequence(node: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> Result<LowerResult> {
    check_inputs(node, input)?;
    check_arity(node, 1, 2)?;
    check_single_output(node)?;
    let axis = node.attr_i64_or("axis", 0)?;
    let keepdims = node.attr_i64_or("keepdims", 1)?;

    let ctx = &mut *input.ctx;
    let session = container_session(ctx)?;
    let allocator = ctx.allocator(Placement::Device)?;
    let axis = ctx.graph.add_const(ConstValue::Int(axis));
    let keepdims = ctx.graph.add_const(ConstValue::Bool(keepdims != 0));
    let mut args = vec![
        session,
        allocator,
        input.input_shapes[0],
        input.input_addrs[0].value,
        axis,
        keepdims,
    ];
    if let (Some(&shape), Some(split)) = (input.input_shapes.get(1), input.input_addrs.get(1)) {
        args.push(shape);
        args.push(split.value);
    }
    emit(ctx, names::SPLIT_TO_SEQUENCE, &args, &input.input_addrs, None)
}
