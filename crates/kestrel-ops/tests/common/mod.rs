//! Common test utilities for operator tests.
//!
//! Graph builders shared by the folding integration tests.

#![allow(dead_code)]

use kestrel_core::{
    DataType, IrEdge, IrEdgeId, IrGraph, IrNode, IrNodeId, TensorData, TensorShape, TensorValue,
};

pub use kestrel_core::{Operator, Pass};
pub use kestrel_ops::{ConstantFoldingPass, core_operator_registry};

/// Install a test-friendly tracing subscriber (ignored if one is already set).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Add a constant edge holding `data` with `shape`.
pub fn add_constant(graph: &mut IrGraph, name: &str, data: TensorData, shape: &[usize]) -> IrEdgeId {
    let value = TensorValue::from_data(data, shape.to_vec()).expect("valid constant");
    graph.add_edge(IrEdge::with_constant(name, value))
}

/// Create a two-input, one-output graph whose inputs are constants.
///
/// Graph structure:
/// - Constants: a, b
/// - Operation: OpType(a, b) -> c (shape unknown until folded)
/// - Output: c
pub fn make_constant_binary_graph(
    op_type: &str,
    a: (TensorData, &[usize]),
    b: (TensorData, &[usize]),
) -> (IrGraph, IrNodeId, IrEdgeId) {
    let mut graph = IrGraph::new();
    let dtype: DataType = a.0.dtype();
    let a = add_constant(&mut graph, "a", a.0, a.1);
    let b = add_constant(&mut graph, "b", b.0, b.1);
    let c = graph.add_edge(IrEdge::new("c", dtype, TensorShape::UnknownRank));

    let mut node = IrNode::new(op_type).with_name(format!("{}_0", op_type.to_lowercase()));
    node.add_input(a);
    node.add_input(b);
    node.add_output(c);
    let id = graph.add_node(node);
    graph.outputs.push(c);

    (graph, id, c)
}
