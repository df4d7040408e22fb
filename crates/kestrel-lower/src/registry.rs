//! Converter registry.
//!
//! Maps operator types to node converters. Lookup tries the op type
//! qualified by the node's `_placement` attribute, then the bare op type,
//! then the node's kernel library.

use std::collections::HashMap;

use kestrel_core::NodeCtx;

use crate::attrs;
use crate::context::{LowerInput, LowerResult};
use crate::holder::Placement;
use crate::{Result, converters};

/// Lowers one graph node into holders.
pub type NodeConverter = fn(&NodeCtx<'_>, &mut LowerInput<'_>) -> Result<LowerResult>;

/// Registry of node converters.
#[derive(Default)]
pub struct ConverterRegistry {
    by_type: HashMap<String, NodeConverter>,
    by_placement: HashMap<(String, Placement), NodeConverter>,
    by_lib: HashMap<String, NodeConverter>,
}

impl ConverterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in converter.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        converters::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, op_type: impl Into<String>, converter: NodeConverter) -> &mut Self {
        self.by_type.insert(op_type.into(), converter);
        self
    }

    /// Register a converter used only for nodes placed on `placement`.
    pub fn register_for_placement(
        &mut self,
        op_type: impl Into<String>,
        placement: Placement,
        converter: NodeConverter,
    ) -> &mut Self {
        self.by_placement.insert((op_type.into(), placement), converter);
        self
    }

    /// Register the fallback converter for a kernel library.
    pub fn register_lib(&mut self, lib_name: impl Into<String>, converter: NodeConverter) -> &mut Self {
        self.by_lib.insert(lib_name.into(), converter);
        self
    }

    /// Find the converter for `node`.
    pub fn find(&self, node: &NodeCtx<'_>) -> Result<Option<NodeConverter>> {
        let op_type = node.op_type();
        if node.has_attr(attrs::PLACEMENT) {
            let placement = Placement::from_attr(node.attr_string(attrs::PLACEMENT)?);
            if let Some(placement) = placement {
                if let Some(&converter) = self.by_placement.get(&(op_type.to_string(), placement)) {
                    return Ok(Some(converter));
                }
            }
        }
        if let Some(&converter) = self.by_type.get(op_type) {
            return Ok(Some(converter));
        }
        if node.has_attr(attrs::KERNEL_LIB_NAME) {
            let lib = node.attr_string(attrs::KERNEL_LIB_NAME)?;
            return Ok(self.by_lib.get(lib).copied());
        }
        Ok(None)
    }

    pub fn len(&self) -> usize {
        self.by_type.len() + self.by_placement.len() + self.by_lib.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_result::CompileResults;
    use crate::context::{LoweringContext, LoweringOptions};
    use crate::Error;
    use kestrel_core::{AttributeValue, IrGraph, IrNode};

    fn by_type(_: &NodeCtx<'_>, _: &mut LowerInput<'_>) -> Result<LowerResult> {
        Err(Error::Graph("by_type".to_string()))
    }

    fn by_placement(_: &NodeCtx<'_>, _: &mut LowerInput<'_>) -> Result<LowerResult> {
        Err(Error::Graph("by_placement".to_string()))
    }

    fn by_lib(_: &NodeCtx<'_>, _: &mut LowerInput<'_>) -> Result<LowerResult> {
        Err(Error::Graph("by_lib".to_string()))
    }

    /// Which converter `registry` picks for `node`, by the marker it reports.
    fn pick(registry: &ConverterRegistry, node: IrNode) -> Option<String> {
        let mut graph = IrGraph::new();
        let id = graph.add_node(node);
        let node = NodeCtx::new(&graph, id).unwrap();
        let converter = registry.find(&node).unwrap()?;
        let mut ctx = LoweringContext::new(LoweringOptions::default(), CompileResults::new());
        let mut input = LowerInput {
            input_shapes: Vec::new(),
            input_addrs: Vec::new(),
            ctx: &mut ctx,
        };
        match converter(&node, &mut input) {
            Err(Error::Graph(marker)) => Some(marker),
            _ => Some("other".to_string()),
        }
    }

    #[test]
    fn test_lookup_order() {
        let mut registry = ConverterRegistry::new();
        registry
            .register("Cast", by_type)
            .register_for_placement("Cast", Placement::Host, by_placement)
            .register_lib(attrs::lib_names::AICPU_TF, by_lib);

        assert_eq!(pick(&registry, IrNode::new("Cast")).as_deref(), Some("by_type"));

        let host = IrNode::new("Cast")
            .with_attr(attrs::PLACEMENT, AttributeValue::String("host".to_string()));
        assert_eq!(pick(&registry, host).as_deref(), Some("by_placement"));

        let device = IrNode::new("Cast")
            .with_attr(attrs::PLACEMENT, AttributeValue::String("device".to_string()));
        assert_eq!(pick(&registry, device).as_deref(), Some("by_type"));

        let lib = IrNode::new("Unknown").with_attr(
            attrs::KERNEL_LIB_NAME,
            AttributeValue::String(attrs::lib_names::AICPU_TF.to_string()),
        );
        assert_eq!(pick(&registry, lib).as_deref(), Some("by_lib"));
        assert_eq!(pick(&registry, IrNode::new("Unknown")), None);
    }

    #[test]
    fn test_defaults_cover_structural_ops() {
        let registry = ConverterRegistry::with_defaults();
        let mut graph = IrGraph::new();
        for op in ["Reshape", "Squeeze", "Shape", "ShapeN", "SequenceAt", "NPUGetFloatStatus"] {
            let id = graph.add_node(IrNode::new(op));
            let node = NodeCtx::new(&graph, id).unwrap();
            assert!(registry.find(&node).unwrap().is_some(), "missing {op}");
        }
    }
}
