//! Lowering driver.
//!
//! Walks a compute graph in topological order, hands every node to its
//! converter and wires the converter outputs into the consumers. Lowering
//! stops at the first node that fails.

use std::collections::HashMap;

use kestrel_core::{IrEdgeId, IrGraph, NodeCtx, TensorShape};

use crate::context::{LowerInput, LowerResult, LoweringContext};
use crate::fusion::LoweringPass;
use crate::holder::{ConstValue, DevMemValue, HolderId, HolderOutput, Placement};
use crate::kernel_names as names;
use crate::planner::stream_affinity;
use crate::registry::ConverterRegistry;
use crate::{Error, Result};

/// Graph outputs of a lowered graph.
#[derive(Debug, Clone)]
pub struct LoweredGraph {
    /// The `NetOutput` holder consuming every graph output.
    pub net_output: HolderId,
    pub out_shapes: Vec<HolderOutput>,
    pub out_addrs: Vec<DevMemValue>,
}

/// Lowered value of each compute-graph edge.
struct Values {
    by_edge: HashMap<IrEdgeId, (HolderOutput, DevMemValue)>,
    /// Holders that must finish before the memory of an edge may be read.
    writers: HashMap<IrEdgeId, Vec<HolderId>>,
}

impl Values {
    fn new() -> Self {
        Self {
            by_edge: HashMap::new(),
            writers: HashMap::new(),
        }
    }

    /// Writers of every edge in `edges`, without duplicates.
    fn writers_of(&self, edges: &[IrEdgeId]) -> Vec<HolderId> {
        let mut writers: Vec<HolderId> = Vec::new();
        for edge in edges {
            for &holder in self.writers.get(edge).into_iter().flatten() {
                if !writers.contains(&holder) {
                    writers.push(holder);
                }
            }
        }
        writers
    }

    /// Value of `edge`, embedding compile-time data as constants on first use.
    fn get(
        &mut self,
        graph: &IrGraph,
        ctx: &mut LoweringContext,
        edge_id: IrEdgeId,
    ) -> Result<(HolderOutput, DevMemValue)> {
        if let Some(&value) = self.by_edge.get(&edge_id) {
            return Ok(value);
        }
        let edge = graph.edge(edge_id)?;
        let (shape, data) = if let Some(tensor) = edge.constant_value().cloned() {
            let dims = tensor.shape.iter().map(|&d| d as i64).collect();
            (ConstValue::Ints(dims), ConstValue::Tensor(tensor))
        } else if edge.shape == TensorShape::Absent {
            (ConstValue::Ints(Vec::new()), ConstValue::Bytes(Vec::new()))
        } else {
            return Err(Error::Graph(format!("edge '{}' has no producer", edge.name)));
        };
        let shape = ctx.graph.add_const(shape);
        let data = ctx.graph.add_const(data);
        let value = (shape, DevMemValue::new(data, Placement::Host, None));
        self.by_edge.insert(edge_id, value);
        Ok(value)
    }
}

/// Lower every node of `graph` into `ctx.graph`, then run `passes`.
#[tracing::instrument(skip_all, fields(nodes = graph.node_count()))]
pub fn lower_graph(
    graph: &IrGraph,
    registry: &ConverterRegistry,
    ctx: &mut LoweringContext,
    passes: &[Box<dyn LoweringPass>],
) -> Result<LoweredGraph> {
    let mut values = Values::new();

    let placement = ctx.options().input_placement;
    let stream_id = stream_affinity(ctx, placement);
    for (index, &edge) in graph.inputs.iter().enumerate() {
        let feed = ctx.graph.add_feed(index, placement);
        let addr = DevMemValue::new(HolderOutput::new(feed, 1), placement, stream_id);
        values.by_edge.insert(edge, (HolderOutput::first(feed), addr));
    }

    let mut void_order: Vec<HolderId> = Vec::new();
    for node_id in graph.topological_order() {
        let node = NodeCtx::new(graph, node_id)?;
        let mark = ctx.graph.creation_mark();
        let result = lower_node(graph, registry, ctx, &mut values, &node)
            .map_err(|e| attribute_to(&node, e))?;

        let writers = values.writers_of(&node.node.inputs);
        let reads: Vec<HolderOutput> = node
            .node
            .inputs
            .iter()
            .filter_map(|edge| values.by_edge.get(edge))
            .map(|(_, addr)| addr.value)
            .collect();
        order_readers(ctx, mark, &reads, &writers)?;

        if node.output_count() == 0 {
            void_order.extend(result.order_holders);
            continue;
        }
        // Nodes without holders of their own only alias their inputs.
        let own_writers = if result.order_holders.is_empty() {
            writers
        } else {
            result.order_holders
        };
        for (i, &edge) in node.node.outputs.iter().enumerate() {
            values
                .by_edge
                .insert(edge, (result.out_shapes[i], result.out_addrs[i]));
            values.writers.insert(edge, own_writers.clone());
        }
    }

    let mut shapes = Vec::with_capacity(graph.outputs.len());
    let mut addrs = Vec::with_capacity(graph.outputs.len());
    for &edge in &graph.outputs {
        let (shape, addr) = values.get(graph, ctx, edge)?;
        shapes.push(shape);
        addrs.push(addr);
    }
    let mut inputs = shapes.clone();
    inputs.extend(addrs.iter().map(|a| a.value));
    let net_output = ctx.graph.add_compute(names::NET_OUTPUT, &inputs, 0)?;
    for &holder in void_order.iter().chain(&values.writers_of(&graph.outputs)) {
        ctx.graph.add_dependency(holder, net_output)?;
    }
    for addr in &addrs {
        ctx.graph.release_after(addr.value, net_output)?;
    }

    for pass in passes {
        let _span = tracing::debug_span!("lowering_pass", name = pass.name()).entered();
        let changed = pass.run(ctx)?;
        tracing::debug!(changed, "pass finished");
    }

    tracing::debug!(holders = ctx.graph.node_count(), "graph lowered");
    Ok(LoweredGraph {
        net_output,
        out_shapes: shapes,
        out_addrs: addrs,
    })
}

/// Order every holder created since `mark` that reads one of `reads` after
/// the holders writing it. Holders in other frames are left alone.
fn order_readers(
    ctx: &mut LoweringContext,
    mark: usize,
    reads: &[HolderOutput],
    writers: &[HolderId],
) -> Result<()> {
    if writers.is_empty() {
        return Ok(());
    }
    for reader in ctx.graph.created_since(mark) {
        if !ctx.graph.inputs(reader).iter().any(|input| reads.contains(input)) {
            continue;
        }
        let frame = ctx.graph.holder(reader)?.frame;
        for &writer in writers {
            if ctx.graph.holder(writer)?.frame == frame {
                ctx.graph.add_dependency(writer, reader)?;
            }
        }
    }
    Ok(())
}

fn lower_node(
    graph: &IrGraph,
    registry: &ConverterRegistry,
    ctx: &mut LoweringContext,
    values: &mut Values,
    node: &NodeCtx<'_>,
) -> Result<LowerResult> {
    let converter = registry.find(node)?.ok_or_else(|| Error::UnsupportedOp {
        node: node.name().to_string(),
        op_type: node.op_type().to_string(),
    })?;
    tracing::debug!(node = node.name(), op_type = node.op_type(), "lowering node");

    let mut input_shapes = Vec::with_capacity(node.input_count());
    let mut input_addrs = Vec::with_capacity(node.input_count());
    for &edge in &node.node.inputs {
        let (shape, addr) = values.get(graph, ctx, edge)?;
        input_shapes.push(shape);
        input_addrs.push(addr);
    }

    let mut input = LowerInput {
        input_shapes,
        input_addrs,
        ctx,
    };
    let result = converter(node, &mut input)?;
    check_result(node, &result)?;
    Ok(result)
}

/// One shape and one address per declared output; both empty for void nodes.
fn check_result(node: &NodeCtx<'_>, result: &LowerResult) -> Result<()> {
    let n = node.output_count();
    if result.out_shapes.len() != n || result.out_addrs.len() != n {
        return Err(Error::Graph(format!(
            "converter produced {} shapes and {} addresses for {n} outputs",
            result.out_shapes.len(),
            result.out_addrs.len()
        )));
    }
    Ok(())
}

fn attribute_to(node: &NodeCtx<'_>, err: Error) -> Error {
    match err {
        Error::Lowering { .. } | Error::UnsupportedOp { .. } => err,
        other => Error::Lowering {
            node: node.name().to_string(),
            op_type: node.op_type().to_string(),
            source: Box::new(other),
        },
    }
}
