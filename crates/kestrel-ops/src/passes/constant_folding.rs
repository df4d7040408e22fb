//! Constant folding pass.
//!
//! Forward pass in topological order that evaluates operations at compile time when
//! all inputs are known constants.

use kestrel_core::{Error, IrGraph, IrNodeId, NodeCtx, OperatorRegistry, Pass, Result, Stage};

/// Pass that folds constant operations at compile time.
///
/// Walks the graph in topological order. For each single-output node whose
/// inputs all carry compile-time data and whose op type has a registered
/// kernel, the kernel is evaluated and the node is replaced by a constant on
/// its output edge. Because folding happens in order, chains of constant
/// nodes collapse in a single run.
///
/// Recoverable kernel errors (`InvalidArgument`, `NotCompatible`) mean "does
/// not apply": the node stays in the graph. Any other error aborts the pass.
pub struct ConstantFoldingPass;

impl ConstantFoldingPass {
    pub fn new() -> Self {
        Self
    }

    /// Attempt to fold a single node. Returns whether the node was replaced.
    fn fold_node(
        &self,
        node_id: IrNodeId,
        graph: &mut IrGraph,
        registry: &OperatorRegistry,
    ) -> Result<bool> {
        let ctx = NodeCtx::new(graph, node_id)?;
        let Some(operator) = registry.lookup(ctx.op_type()) else {
            return Ok(false);
        };
        if ctx.output_count() != 1 {
            return Ok(false);
        }

        let mut inputs = Vec::with_capacity(ctx.input_count());
        for i in 0..ctx.input_count() {
            match ctx.input_value(i)? {
                Some(value) => inputs.push(value),
                None => return Ok(false),
            }
        }

        let outputs = match operator.compute(&ctx, &inputs) {
            Ok(outputs) => outputs,
            Err(e) if e.is_recoverable() => {
                tracing::debug!(node = ctx.name(), op_type = ctx.op_type(), error = %e, "not folded");
                return Ok(false);
            }
            Err(e) => {
                return Err(Error::Internal(format!(
                    "failed to fold node '{}' ({}): {e}",
                    ctx.name(),
                    ctx.op_type()
                )));
            }
        };

        let [value] = <[_; 1]>::try_from(outputs).map_err(|outputs: Vec<_>| {
            Error::Internal(format!(
                "operator {} returned {} values for node '{}' with 1 output",
                ctx.op_type(),
                outputs.len(),
                ctx.name()
            ))
        })?;

        tracing::debug!(node = ctx.name(), op_type = ctx.op_type(), shape = ?value.shape, "folded");
        graph.fold_node_to_constant(node_id, value)?;
        Ok(true)
    }
}

impl Pass for ConstantFoldingPass {
    fn name(&self) -> &str {
        "constant_folding"
    }

    fn stage(&self) -> Stage {
        Stage::Folding
    }

    #[tracing::instrument(skip_all, fields(nodes = graph.node_count()))]
    fn run(&self, graph: &mut IrGraph, registry: &OperatorRegistry) -> Result<bool> {
        let mut changed = false;
        for node_id in graph.topological_order() {
            changed |= self.fold_node(node_id, graph, registry)?;
        }
        Ok(changed)
    }
}

impl Default for ConstantFoldingPass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_operator_registry;
    use kestrel_core::{DataType, IrEdge, IrNode, TensorData, TensorShape, TensorValue};

    fn constant(graph: &mut IrGraph, name: &str, data: TensorData, shape: &[usize]) -> kestrel_core::IrEdgeId {
        graph.add_edge(IrEdge::with_constant(
            name,
            TensorValue::from_data(data, shape.to_vec()).unwrap(),
        ))
    }

    #[test]
    fn test_folds_chain() {
        let mut graph = IrGraph::new();
        let a = constant(&mut graph, "a", TensorData::I64(vec![1, 2]), &[2]);
        let b = constant(&mut graph, "b", TensorData::I64(vec![10, 20]), &[2]);
        let c = graph.add_edge(IrEdge::new("c", DataType::I64, TensorShape::Static(vec![2])));
        let d = graph.add_edge(IrEdge::new("d", DataType::I64, TensorShape::Static(vec![2])));

        let mut add = IrNode::new("Add").with_name("add");
        add.add_input(a);
        add.add_input(b);
        add.add_output(c);
        graph.add_node(add);

        let mut mul = IrNode::new("Mul").with_name("mul");
        mul.add_input(c);
        mul.add_input(c);
        mul.add_output(d);
        graph.add_node(mul);

        let changed = ConstantFoldingPass::new()
            .run(&mut graph, &core_operator_registry())
            .unwrap();
        assert!(changed);
        assert_eq!(graph.node_count(), 0);
        let folded = graph.edge(d).unwrap().constant_value().unwrap();
        assert_eq!(folded.as_i64(), Some(&[121, 484][..]));
    }

    #[test]
    fn test_incompatible_node_left_unchanged() {
        let mut graph = IrGraph::new();
        let a = constant(&mut graph, "a", TensorData::F32(vec![0.0; 12]), &[3, 4]);
        let b = constant(&mut graph, "b", TensorData::F32(vec![0.0; 15]), &[3, 5]);
        let c = graph.add_edge(IrEdge::new("c", DataType::F32, TensorShape::UnknownRank));

        let mut add = IrNode::new("Add").with_name("bad_add");
        add.add_input(a);
        add.add_input(b);
        add.add_output(c);
        let id = graph.add_node(add);

        let changed = ConstantFoldingPass::new()
            .run(&mut graph, &core_operator_registry())
            .unwrap();
        assert!(!changed);
        assert!(graph.node(id).is_ok());
        assert!(!graph.edge(c).unwrap().is_constant());
    }

    #[test]
    fn test_runtime_inputs_not_folded() {
        let mut graph = IrGraph::new();
        let x = graph.add_edge(IrEdge::new("x", DataType::F32, TensorShape::Static(vec![2])));
        let y = constant(&mut graph, "y", TensorData::F32(vec![1.0, 1.0]), &[2]);
        let z = graph.add_edge(IrEdge::new("z", DataType::F32, TensorShape::Static(vec![2])));
        graph.inputs.push(x);

        let mut add = IrNode::new("Add");
        add.add_input(x);
        add.add_input(y);
        add.add_output(z);
        graph.add_node(add);

        let changed = ConstantFoldingPass::new()
            .run(&mut graph, &core_operator_registry())
            .unwrap();
        assert!(!changed);
        assert_eq!(graph.node_count(), 1);
    }
}
