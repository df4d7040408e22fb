//! Operator graph handed to constant folding and then to lowering.
//!
//! Nodes are operators. Tensors live in a side-table and are addressed by
//! [`IrEdgeId`], so a tensor keeps its id when folding replaces its producer
//! with a constant. Lowering walks whatever nodes are left in topological order.

use crate::types::{DataType, TensorShape, TensorValue};
use crate::{Error, Result};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::Topo;

use std::collections::HashMap;

pub type IrNodeId = NodeIndex;

/// Index of a tensor in [`IrGraph`]'s tensor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrEdgeId(pub usize);

/// Typed node attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Float(f32),
    Int(i64),
    Bool(bool),
    String(String),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

impl AttributeValue {
    /// Short type name used in attribute error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::Float(_) => "float",
            AttributeValue::Int(_) => "int",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::String(_) => "string",
            AttributeValue::Floats(_) => "floats",
            AttributeValue::Ints(_) => "ints",
            AttributeValue::Strings(_) => "strings",
        }
    }
}

/// Operators plus the tensors flowing between them.
///
/// The petgraph edges only record producer-before-consumer order; tensor
/// metadata stays in `tensors`.
pub struct IrGraph {
    graph: StableGraph<IrNode, ()>,
    tensors: Vec<IrEdge>,
    producers: HashMap<IrEdgeId, IrNodeId>,

    /// Tensors fed by the caller, in feed order.
    pub inputs: Vec<IrEdgeId>,

    /// Tensors returned to the caller, in output order.
    pub outputs: Vec<IrEdgeId>,
}

impl IrGraph {
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            tensors: Vec::new(),
            producers: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn node(&self, id: IrNodeId) -> Result<&IrNode> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {id:?} not found")))
    }

    pub fn edge(&self, id: IrEdgeId) -> Result<&IrEdge> {
        self.tensors
            .get(id.0)
            .ok_or_else(|| Error::InvalidGraph(format!("Tensor {id:?} not found")))
    }

    /// Add an operator. Its inputs must already have their producers added
    /// for the operator to be ordered after them.
    pub fn add_node(&mut self, node: IrNode) -> IrNodeId {
        let producers: Vec<IrNodeId> = node
            .inputs
            .iter()
            .filter_map(|input| self.producers.get(input).copied())
            .collect();
        let outputs = node.outputs.clone();
        let id = self.graph.add_node(node);

        for output in outputs {
            self.producers.insert(output, id);
        }
        for producer in producers {
            self.graph.add_edge(producer, id, ());
        }
        id
    }

    pub fn add_edge(&mut self, edge: IrEdge) -> IrEdgeId {
        self.tensors.push(edge);
        IrEdgeId(self.tensors.len() - 1)
    }

    /// Replace a single-output operator with the constant it computes.
    ///
    /// The output tensor keeps its id, so consumers read the constant in place.
    pub fn fold_node_to_constant(&mut self, id: IrNodeId, value: TensorValue) -> Result<()> {
        let node = self.node(id)?;
        let [output] = node.outputs[..] else {
            return Err(Error::InvalidGraph(format!(
                "cannot fold '{}': expected 1 output, got {}",
                node.name,
                node.outputs.len()
            )));
        };

        let tensor = self
            .tensors
            .get_mut(output.0)
            .ok_or_else(|| Error::InvalidGraph(format!("Tensor {output:?} not found")))?;
        tensor.dtype = value.dtype;
        tensor.shape = TensorShape::Static(value.shape.clone());
        tensor.data = EdgeData::Constant(value);

        self.producers.remove(&output);
        self.graph.remove_node(id);
        Ok(())
    }

    pub fn topological_order(&self) -> Vec<IrNodeId> {
        let mut topo = Topo::new(&self.graph);
        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(id) = topo.next(&self.graph) {
            order.push(id);
        }
        order
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}

impl Default for IrGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// One operator and the tensors it reads and writes.
#[derive(Debug, Clone)]
pub struct IrNode {
    /// Unique within a graph once lowering starts.
    pub name: String,
    pub op_type: String,
    pub attributes: HashMap<String, AttributeValue>,
    pub inputs: Vec<IrEdgeId>,
    pub outputs: Vec<IrEdgeId>,
}

impl IrNode {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            op_type: op_type.into(),
            attributes: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn inputs(&self) -> &[IrEdgeId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[IrEdgeId] {
        &self.outputs
    }

    pub fn add_input(&mut self, edge_id: IrEdgeId) {
        self.inputs.push(edge_id);
    }

    pub fn add_output(&mut self, edge_id: IrEdgeId) {
        self.outputs.push(edge_id);
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(key.into(), value);
    }
}

/// Whether a tensor's value is known before execution.
#[derive(Debug, Clone)]
pub enum EdgeData {
    /// Produced by an operator or fed at run time.
    Runtime,

    /// Given as a weight or produced by constant folding.
    Constant(TensorValue),
}

/// A tensor flowing between operators.
#[derive(Debug, Clone)]
pub struct IrEdge {
    pub name: String,
    pub dtype: DataType,
    pub shape: TensorShape,
    pub data: EdgeData,
}

impl IrEdge {
    pub fn new(name: impl Into<String>, dtype: DataType, shape: TensorShape) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
            data: EdgeData::Runtime,
        }
    }

    /// A constant tensor; dtype and shape come from the value.
    pub fn with_constant(name: impl Into<String>, value: TensorValue) -> Self {
        Self {
            name: name.into(),
            dtype: value.dtype,
            shape: TensorShape::Static(value.shape.clone()),
            data: EdgeData::Constant(value),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.data, EdgeData::Constant(_))
    }

    pub fn constant_value(&self) -> Option<&TensorValue> {
        match &self.data {
            EdgeData::Constant(value) => Some(value),
            EdgeData::Runtime => None,
        }
    }
}
