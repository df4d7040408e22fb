//! Common test utilities for lowering tests.
//!
//! Builders for small compute graphs and compiled results.

#![allow(dead_code)]

use kestrel_core::{AttributeValue, DataType, IrEdge, IrEdgeId, IrGraph, IrNode, TensorShape};
use kestrel_lower::attrs;
use kestrel_lower::ext_info::{ExtInfoBuilder, SessionInfo, ShapeAndType};
use kestrel_lower::{
    CompileResults, ConverterRegistry, HolderId, LoweredGraph, LoweringContext, LoweringGraph,
    LoweringOptions, default_passes, lower_graph,
};

/// Install a test-friendly tracing subscriber (ignored if one is already set).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub fn static_shape(dims: &[usize]) -> TensorShape {
    TensorShape::Static(dims.to_vec())
}

/// Builder for a graph holding a single node.
///
/// Every node input is a graph input and every node output a graph output.
pub struct SingleNode {
    node: IrNode,
    inputs: Vec<IrEdge>,
    outputs: Vec<IrEdge>,
}

impl SingleNode {
    pub fn new(op_type: &str, name: &str) -> Self {
        Self {
            node: IrNode::new(op_type).with_name(name),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, shape: TensorShape) -> Self {
        let name = format!("in{}", self.inputs.len());
        self.inputs.push(IrEdge::new(name, DataType::F32, shape));
        self
    }

    pub fn output(mut self, shape: TensorShape) -> Self {
        let name = format!("out{}", self.outputs.len());
        self.outputs.push(IrEdge::new(name, DataType::F32, shape));
        self
    }

    pub fn attr(mut self, key: &str, value: AttributeValue) -> Self {
        self.node.set_attribute(key, value);
        self
    }

    pub fn lib(self, lib_name: &str) -> Self {
        self.attr(attrs::KERNEL_LIB_NAME, AttributeValue::String(lib_name.to_string()))
    }

    pub fn build(self) -> IrGraph {
        let mut graph = IrGraph::new();
        let mut node = self.node;
        for edge in self.inputs {
            let id = graph.add_edge(edge);
            graph.inputs.push(id);
            node.add_input(id);
        }
        for edge in self.outputs {
            let id = graph.add_edge(edge);
            graph.outputs.push(id);
            node.add_output(id);
        }
        graph.add_node(node);
        graph
    }
}

/// Add a runtime edge named `name`.
pub fn edge(graph: &mut IrGraph, name: &str, dtype: DataType, shape: TensorShape) -> IrEdgeId {
    graph.add_edge(IrEdge::new(name, dtype, shape))
}

/// Ext-info with one shape record per input and output.
pub fn ext_info(inputs: usize, outputs: usize) -> Vec<u8> {
    let shape = ShapeAndType::new(DataType::F32.code(), &[4]).expect("rank within limit");
    ExtInfoBuilder::new()
        .shape_type(1)
        .input_shapes(&vec![shape; inputs])
        .output_shapes(&vec![shape; outputs])
        .session_info(SessionInfo::default())
        .bitmap(0)
        .build()
}

/// Lower `graph` with the default converters and passes.
pub fn lower(
    graph: &IrGraph,
    options: LoweringOptions,
    results: CompileResults,
) -> (LoweringContext, kestrel_lower::Result<LoweredGraph>) {
    init_tracing();
    let registry = ConverterRegistry::with_defaults();
    let mut ctx = LoweringContext::new(options, results);
    let lowered = lower_graph(graph, &registry, &mut ctx, &default_passes());
    (ctx, lowered)
}

/// Whether `to` is reachable from `from` over data and control edges.
pub fn reaches(graph: &LoweringGraph, from: HolderId, to: HolderId) -> bool {
    let mut stack = vec![from];
    let mut seen = vec![from];
    while let Some(id) = stack.pop() {
        if id == to {
            return true;
        }
        let next = graph
            .control_successors(id)
            .into_iter()
            .chain(graph.consumers(id).into_iter().map(|(consumer, _, _)| consumer));
        for n in next {
            if !seen.contains(&n) {
                seen.push(n);
                stack.push(n);
            }
        }
    }
    false
}
