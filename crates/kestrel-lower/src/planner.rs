//! Output shape and memory planning.
//!
//! Decides how the output shapes of a node become known at execution time
//! and emits the holders that size and allocate output memory.

use kestrel_core::{DataType, NodeCtx};

use crate::args::CpuKernelIo;
use crate::attrs;
use crate::context::LoweringContext;
use crate::holder::{ConstValue, DevMemValue, Frame, HolderOutput, Placement};
use crate::kernel_names as names;
use crate::{Error, Result};

/// Bytes reserved per output for a depend-on-compute result summary.
pub const SUMMARY_SIZE: i64 = 32;

/// Bytes of the kernel log workspace.
pub const LOG_WORKSPACE_SIZE: i64 = 64 * 1024;

/// Value of the `_unknown_shape_type` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownShapeType {
    DependInShape = 1,
    DependConstValue = 2,
    DependShapeRange = 3,
    DependCompute = 4,
}

impl UnknownShapeType {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::DependInShape),
            2 => Some(Self::DependConstValue),
            3 => Some(Self::DependShapeRange),
            4 => Some(Self::DependCompute),
            _ => None,
        }
    }
}

/// How the output shapes of a node become known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeCategory {
    /// Every input and output shape is known at lowering time.
    Static,
    /// Output shapes follow from the input shapes.
    DependsOnInputShape,
    /// Output shapes are only known after the kernel ran.
    DependsOnCompute,
}

impl ShapeCategory {
    pub fn is_static(self) -> bool {
        self == ShapeCategory::Static
    }
}

/// Classify `node` from its tensor shapes and `_unknown_shape_type`.
pub fn shape_category(node: &NodeCtx<'_>) -> Result<ShapeCategory> {
    let mut all_static = true;
    for i in 0..node.input_count() {
        all_static &= node.input_edge(i)?.shape.is_static();
    }
    let mut outputs_static = true;
    for i in 0..node.output_count() {
        outputs_static &= node.output_edge(i)?.shape.is_static();
    }
    if all_static && outputs_static {
        return Ok(ShapeCategory::Static);
    }

    let raw = node.attr_i64_or(attrs::UNKNOWN_SHAPE_TYPE, UnknownShapeType::DependInShape as i64)?;
    let kind = UnknownShapeType::from_i64(raw)
        .ok_or_else(|| Error::invalid_input(node, format!("invalid unknown shape type {raw}")))?;
    if kind == UnknownShapeType::DependCompute && !outputs_static {
        Ok(ShapeCategory::DependsOnCompute)
    } else {
        Ok(ShapeCategory::DependsOnInputShape)
    }
}

/// Shape holders for every output of `node`.
///
/// Static outputs become constants. Otherwise an `InferShape` holder runs
/// the registered shape function on the input shapes; the function lookup
/// is created once per op type.
pub fn infer_output_shapes(
    ctx: &mut LoweringContext,
    node: &NodeCtx<'_>,
    category: ShapeCategory,
    input_shapes: &[HolderOutput],
) -> Result<Vec<HolderOutput>> {
    match category {
        ShapeCategory::Static => static_output_shapes(ctx, node),
        ShapeCategory::DependsOnInputShape => {
            let op_type = node.op_type();
            let func = ctx.unique_holder(&format!("InferShapeFunc-{op_type}"), |ctx| {
                ctx.in_frame(Frame::Init, |ctx| {
                    let op = ctx.graph.add_const(ConstValue::Str(op_type.to_string()));
                    let find = ctx.graph.add_compute(names::FIND_INFER_SHAPE_FUNC, &[op], 1)?;
                    Ok(HolderOutput::first(find))
                })
            })?;
            let mut inputs = Vec::with_capacity(input_shapes.len() + 1);
            inputs.push(func);
            inputs.extend_from_slice(input_shapes);
            let infer = ctx
                .graph
                .add_compute(names::INFER_SHAPE, &inputs, node.output_count())?;
            Ok((0..node.output_count())
                .map(|i| HolderOutput::new(infer, i))
                .collect())
        }
        ShapeCategory::DependsOnCompute => Err(Error::invalid_input(
            node,
            "output shapes of a depend-on-compute node are only known after launch",
        )),
    }
}

/// Constant shape holders from the declared output shapes.
pub fn static_output_shapes(
    ctx: &mut LoweringContext,
    node: &NodeCtx<'_>,
) -> Result<Vec<HolderOutput>> {
    (0..node.output_count())
        .map(|i| {
            let edge = node.output_edge(i)?;
            let dims = edge.shape.as_static().ok_or_else(|| {
                Error::invalid_input(node, format!("output {i} shape {:?} is not static", edge.shape))
            })?;
            let dims = dims.iter().map(|&d| d as i64).collect();
            Ok(ctx.graph.add_const(ConstValue::Ints(dims)))
        })
        .collect()
}

/// Byte size of a tensor with the given shape holder.
pub fn tensor_size(
    ctx: &mut LoweringContext,
    shape: HolderOutput,
    dtype: DataType,
) -> Result<HolderOutput> {
    let known = ctx
        .graph
        .const_value(shape)
        .and_then(ConstValue::as_ints)
        .filter(|dims| dims.iter().all(|&d| d >= 0))
        .map(|dims| dims.iter().product::<i64>());
    if let Some(numel) = known {
        return Ok(ctx
            .graph
            .add_const(ConstValue::Int(numel * dtype.size() as i64)));
    }
    let dtype = ctx.graph.add_const(ConstValue::Int(dtype.code() as i64));
    let calc = ctx.graph.add_compute(names::CALC_TENSOR_SIZE, &[shape, dtype], 1)?;
    Ok(HolderOutput::first(calc))
}

/// Allocate `size` bytes on `placement`, freed by a guarder.
pub fn alloc_memory(
    ctx: &mut LoweringContext,
    placement: Placement,
    size: HolderOutput,
) -> Result<DevMemValue> {
    let allocator = ctx.allocator(placement)?;
    let alloc = ctx.graph.add_compute(names::ALLOC_MEMORY, &[allocator, size], 1)?;
    let stream_id = stream_affinity(ctx, placement);
    ctx.graph.set_placement(alloc, placement, stream_id)?;
    let mem = HolderOutput::first(alloc);
    ctx.graph.add_guarder(names::FREE_MEMORY, mem)?;
    Ok(DevMemValue::new(mem, placement, stream_id))
}

/// Stream device memory is bound to; host memory has none.
pub fn stream_affinity(ctx: &LoweringContext, placement: Placement) -> Option<i64> {
    match placement {
        Placement::Device => Some(ctx.options().stream_id),
        Placement::Host | Placement::Control => None,
    }
}

/// Allocate one buffer per output of `node`, sized from `shapes`.
pub fn allocate_outputs(
    ctx: &mut LoweringContext,
    node: &NodeCtx<'_>,
    shapes: &[HolderOutput],
    placement: Placement,
) -> Result<Vec<DevMemValue>> {
    if shapes.len() != node.output_count() {
        return Err(Error::invalid_input(
            node,
            format!("{} output shapes for {} outputs", shapes.len(), node.output_count()),
        ));
    }
    shapes
        .iter()
        .enumerate()
        .map(|(i, &shape)| {
            let dtype = node.output_edge(i)?.dtype;
            let size = tensor_size(ctx, shape, dtype)?;
            alloc_memory(ctx, placement, size)
        })
        .collect()
}

/// Fixed-size result summaries, one per output of a depend-on-compute node.
pub fn alloc_summaries(
    ctx: &mut LoweringContext,
    count: usize,
    placement: Placement,
) -> Result<Vec<DevMemValue>> {
    (0..count)
        .map(|_| {
            let size = ctx.graph.add_const(ConstValue::Int(SUMMARY_SIZE));
            alloc_memory(ctx, placement, size)
        })
        .collect()
}

/// Log workspace for kernels that request one.
pub fn alloc_log_workspace(
    ctx: &mut LoweringContext,
    io: &CpuKernelIo,
) -> Result<Option<DevMemValue>> {
    if !io.workspace_types.contains(&attrs::WORKSPACE_TYPE_LOG) {
        return Ok(None);
    }
    let size = ctx.graph.add_const(ConstValue::Int(LOG_WORKSPACE_SIZE));
    alloc_memory(ctx, Placement::Device, size).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_result::CompileResults;
    use crate::context::LoweringOptions;
    use kestrel_core::{AttributeValue, IrEdge, IrGraph, IrNode, IrNodeId, TensorShape};

    fn node_with_output(graph: &mut IrGraph, shape: TensorShape, kind: Option<i64>) -> IrNodeId {
        let x = graph.add_edge(IrEdge::new("x", DataType::F32, TensorShape::Static(vec![4])));
        let y = graph.add_edge(IrEdge::new("y", DataType::F32, shape));
        let mut node = IrNode::new("Unique").with_name("unique");
        if let Some(kind) = kind {
            node.set_attribute(attrs::UNKNOWN_SHAPE_TYPE, AttributeValue::Int(kind));
        }
        node.add_input(x);
        node.add_output(y);
        graph.add_node(node)
    }

    #[test]
    fn test_categories() {
        let mut graph = IrGraph::new();
        let s = node_with_output(&mut graph, TensorShape::Static(vec![4]), Some(4));
        let d = node_with_output(&mut graph, TensorShape::UnknownRank, None);
        let c = node_with_output(&mut graph, TensorShape::UnknownRank, Some(4));
        let bad = node_with_output(&mut graph, TensorShape::UnknownRank, Some(7));

        let category = |id| shape_category(&NodeCtx::new(&graph, id).unwrap());
        assert_eq!(category(s).unwrap(), ShapeCategory::Static);
        assert_eq!(category(d).unwrap(), ShapeCategory::DependsOnInputShape);
        assert_eq!(category(c).unwrap(), ShapeCategory::DependsOnCompute);
        assert!(category(bad).is_err());
    }

    #[test]
    fn test_static_outputs_are_sized_at_lowering() {
        let mut graph = IrGraph::new();
        let id = node_with_output(&mut graph, TensorShape::Static(vec![2, 3]), None);
        let node = NodeCtx::new(&graph, id).unwrap();
        let mut ctx = LoweringContext::new(LoweringOptions::default(), CompileResults::new());

        let shapes = infer_output_shapes(&mut ctx, &node, ShapeCategory::Static, &[]).unwrap();
        let addrs = allocate_outputs(&mut ctx, &node, &shapes, Placement::Device).unwrap();

        assert_eq!(ctx.graph.const_value(shapes[0]), Some(&ConstValue::Ints(vec![2, 3])));
        let alloc = addrs[0].value.holder;
        let size = ctx.graph.inputs(alloc)[1];
        assert_eq!(ctx.graph.const_value(size), Some(&ConstValue::Int(24)));
        assert!(ctx.graph.guarder(addrs[0].value).is_some());
        assert_eq!(addrs[0].stream_id, Some(0));
        assert!(ctx.graph.holders_by_type(names::CALC_TENSOR_SIZE).is_empty());
    }

    #[test]
    fn test_infer_function_cached_per_op_type() {
        let mut graph = IrGraph::new();
        let a = node_with_output(&mut graph, TensorShape::UnknownRank, None);
        let b = node_with_output(&mut graph, TensorShape::UnknownRank, None);
        let mut ctx = LoweringContext::new(LoweringOptions::default(), CompileResults::new());
        let input = ctx.graph.add_const(ConstValue::Ints(vec![4]));

        for id in [a, b] {
            let node = NodeCtx::new(&graph, id).unwrap();
            let shapes =
                infer_output_shapes(&mut ctx, &node, ShapeCategory::DependsOnInputShape, &[input])
                    .unwrap();
            assert_eq!(shapes.len(), 1);
            allocate_outputs(&mut ctx, &node, &shapes, Placement::Device).unwrap();
        }

        assert_eq!(ctx.graph.holders_by_type(names::FIND_INFER_SHAPE_FUNC).len(), 1);
        assert_eq!(ctx.graph.holders_by_type(names::INFER_SHAPE).len(), 2);
        assert_eq!(ctx.graph.holders_by_type(names::CALC_TENSOR_SIZE).len(), 2);
    }
}
