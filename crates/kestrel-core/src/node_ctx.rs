//! Read-only view over one IR node.
//!
//! `NodeCtx` bundles a node with the graph it lives in so that folding kernels
//! and lowering converters can reach input/output tensor descriptors, constant
//! inputs and typed attributes without juggling ids. Attribute errors always
//! carry the node's name and type.

use crate::ir::{AttributeValue, IrEdge, IrGraph, IrNode, IrNodeId};
use crate::types::TensorValue;
use crate::{Error, Result};

/// Context for a single node of an [`IrGraph`].
#[derive(Clone, Copy)]
pub struct NodeCtx<'a> {
    /// The IR node being processed.
    pub node: &'a IrNode,

    /// The node ID in the graph.
    pub node_id: IrNodeId,

    /// The full IR graph (for accessing input edges and their data).
    pub graph: &'a IrGraph,
}

impl<'a> NodeCtx<'a> {
    /// Create a context for `node_id`.
    pub fn new(graph: &'a IrGraph, node_id: IrNodeId) -> Result<Self> {
        Ok(Self {
            node: graph.node(node_id)?,
            node_id,
            graph,
        })
    }

    pub fn name(&self) -> &'a str {
        &self.node.name
    }

    pub fn op_type(&self) -> &'a str {
        &self.node.op_type
    }

    pub fn input_count(&self) -> usize {
        self.node.inputs().len()
    }

    pub fn output_count(&self) -> usize {
        self.node.outputs().len()
    }

    /// Get the input edge (tensor descriptor) for the given index.
    pub fn input_edge(&self, index: usize) -> Result<&'a IrEdge> {
        let inputs = self.node.inputs();
        let input_id = inputs.get(index).ok_or_else(|| {
            self.invalid(format!(
                "input index {index} out of range (node has {} inputs)",
                inputs.len()
            ))
        })?;
        self.graph.edge(*input_id)
    }

    /// Get the output edge (tensor descriptor) for the given index.
    pub fn output_edge(&self, index: usize) -> Result<&'a IrEdge> {
        let outputs = self.node.outputs();
        let output_id = outputs.get(index).ok_or_else(|| {
            self.invalid(format!(
                "output index {index} out of range (node has {} outputs)",
                outputs.len()
            ))
        })?;
        self.graph.edge(*output_id)
    }

    /// Constant value of an input, if it is known at compile time.
    pub fn input_value(&self, index: usize) -> Result<Option<TensorValue>> {
        Ok(self.input_edge(index)?.constant_value().cloned())
    }

    /// Get a node attribute by name.
    pub fn attr(&self, name: &str) -> Option<&'a AttributeValue> {
        self.node.attributes.get(name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.node.attributes.contains_key(name)
    }

    /// Get a required i64 attribute.
    pub fn attr_i64(&self, name: &str) -> Result<i64> {
        match self.attr(name) {
            Some(AttributeValue::Int(v)) => Ok(*v),
            other => Err(self.attr_error(name, "int", other)),
        }
    }

    /// Get an optional i64 attribute with a default.
    pub fn attr_i64_or(&self, name: &str, default: i64) -> Result<i64> {
        if self.has_attr(name) {
            self.attr_i64(name)
        } else {
            Ok(default)
        }
    }

    /// Get an optional bool attribute; integer attributes are accepted as flags.
    pub fn attr_bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.attr(name) {
            None => Ok(default),
            Some(AttributeValue::Bool(v)) => Ok(*v),
            Some(AttributeValue::Int(v)) => Ok(*v != 0),
            other => Err(self.attr_error(name, "bool", other)),
        }
    }

    /// Get a required string attribute.
    pub fn attr_string(&self, name: &str) -> Result<&'a str> {
        match self.attr(name) {
            Some(AttributeValue::String(v)) => Ok(v.as_str()),
            other => Err(self.attr_error(name, "string", other)),
        }
    }

    /// Get a required ints attribute.
    pub fn attr_ints(&self, name: &str) -> Result<&'a [i64]> {
        match self.attr(name) {
            Some(AttributeValue::Ints(v)) => Ok(v.as_slice()),
            other => Err(self.attr_error(name, "ints", other)),
        }
    }

    /// Get an optional ints attribute; missing means empty.
    pub fn attr_ints_or_empty(&self, name: &str) -> Result<&'a [i64]> {
        if self.has_attr(name) {
            self.attr_ints(name)
        } else {
            Ok(&[])
        }
    }

    /// Build an `InvalidArgument` error that names this node.
    pub fn invalid(&self, message: impl std::fmt::Display) -> Error {
        Error::InvalidArgument(format!(
            "node '{}' ({}): {message}",
            self.node.name, self.node.op_type
        ))
    }

    fn attr_error(&self, name: &str, expected: &str, found: Option<&AttributeValue>) -> Error {
        let detail = match found {
            None => format!("missing required {expected} attribute '{name}'"),
            Some(value) => format!(
                "attribute '{name}' has type {}, expected {expected}",
                value.kind()
            ),
        };
        Error::Attribute(format!(
            "node '{}' ({}): {detail}",
            self.node.name, self.node.op_type
        ))
    }
}
