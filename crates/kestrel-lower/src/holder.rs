//! Value-holder DAG produced by lowering.
//!
//! Every holder produces a fixed number of indexed outputs. Data edges carry
//! one output of the source holder into one input slot of the destination;
//! control edges only order execution. Memory lifetimes are expressed with
//! guarder holders: a guarder takes the guarded value as its only data input
//! and runs its release operation once every holder ordered before it
//! (through [`LoweringGraph::release_after`]) has finished.

use std::collections::HashMap;

use kestrel_core::TensorValue;
use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, Topo};

use crate::{Error, Result};

/// Identifier of a holder in the lowering graph.
pub type HolderId = NodeIndex;

/// One output of a holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HolderOutput {
    pub holder: HolderId,
    pub index: usize,
}

impl HolderOutput {
    pub fn new(holder: HolderId, index: usize) -> Self {
        Self { holder, index }
    }

    /// The first output of `holder`.
    pub fn first(holder: HolderId) -> Self {
        Self { holder, index: 0 }
    }
}

/// Memory domain a value occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Placement {
    Host,
    #[default]
    Device,
    /// Pure ordering, no memory.
    Control,
}

impl Placement {
    /// Code passed to the executor's allocator factory.
    pub fn code(self) -> i64 {
        match self {
            Placement::Host => 0,
            Placement::Device => 1,
            Placement::Control => -1,
        }
    }

    /// Parse the value of the `_placement` attribute.
    pub fn from_attr(value: &str) -> Option<Self> {
        match value {
            "host" => Some(Placement::Host),
            "device" => Some(Placement::Device),
            _ => None,
        }
    }
}

/// Execution phase a holder belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Frame {
    /// Runs once when the lowered graph is loaded.
    Init,
    /// Runs on every invocation.
    #[default]
    Main,
    /// Runs once on teardown.
    DeInit,
}

/// Compile-time value embedded in the lowering graph.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Bytes(Vec<u8>),
    Int(i64),
    Ints(Vec<i64>),
    Str(String),
    Bool(bool),
    Tensor(TensorValue),
}

impl ConstValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConstValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            ConstValue::Ints(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ConstValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConstValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

/// What a holder does.
#[derive(Debug, Clone, PartialEq)]
pub enum HolderKind {
    Const(ConstValue),
    /// Graph input supplied by the caller; outputs are (shape, addr).
    Feed { index: usize },
    /// Runtime operation dispatched by `op_type`.
    Compute,
    /// Release operation for the value on input 0.
    Guarder,
}

/// A node of the lowering graph.
#[derive(Debug, Clone)]
pub struct Holder {
    /// Unique, generated name.
    pub name: String,

    /// Synthetic operation the executor dispatches on.
    pub op_type: String,

    pub kind: HolderKind,

    pub frame: Frame,

    /// Number of values this holder produces.
    pub output_count: usize,

    /// Where the produced values live.
    pub placement: Placement,

    /// Stream the produced values are bound to, if any.
    pub stream_id: Option<i64>,
}

/// Edge of the lowering graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderEdge {
    Data { src_index: usize, dst_index: usize },
    Control,
}

/// A memory handle with its placement and stream affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevMemValue {
    pub value: HolderOutput,
    pub placement: Placement,
    pub stream_id: Option<i64>,
}

impl DevMemValue {
    pub fn new(value: HolderOutput, placement: Placement, stream_id: Option<i64>) -> Self {
        Self {
            value,
            placement,
            stream_id,
        }
    }
}

/// The lowering graph: holders connected by data and control edges.
#[derive(Debug, Default)]
pub struct LoweringGraph {
    graph: StableGraph<Holder, HolderEdge>,
    guarders: HashMap<HolderOutput, HolderId>,
    frame: Frame,
    frame_end: Vec<HolderId>,
    created: Vec<HolderId>,
    next_id: usize,
}

impl LoweringGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame new holders are placed in.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Switch the current frame, returning the previous one.
    pub fn set_frame(&mut self, frame: Frame) -> Frame {
        std::mem::replace(&mut self.frame, frame)
    }

    fn push(&mut self, op_type: &str, kind: HolderKind, output_count: usize) -> HolderId {
        let name = format!("{op_type}_{}", self.next_id);
        self.next_id += 1;
        let frame = self.frame;
        let id = self.graph.add_node(Holder {
            name,
            op_type: op_type.to_string(),
            kind,
            frame,
            output_count,
            placement: Placement::Control,
            stream_id: None,
        });
        self.created.push(id);
        id
    }

    /// Position in the creation log, for [`Self::created_since`].
    pub fn creation_mark(&self) -> usize {
        self.created.len()
    }

    /// Live holders created after `mark`, oldest first.
    pub fn created_since(&self, mark: usize) -> Vec<HolderId> {
        self.created
            .get(mark..)
            .unwrap_or_default()
            .iter()
            .copied()
            .filter(|&id| self.graph.contains_node(id))
            .collect()
    }

    fn check_output(&self, value: HolderOutput) -> Result<()> {
        let holder = self.holder(value.holder)?;
        if value.index >= holder.output_count {
            return Err(Error::Graph(format!(
                "holder '{}' has {} outputs, output {} requested",
                holder.name, holder.output_count, value.index
            )));
        }
        Ok(())
    }

    fn connect(&mut self, inputs: &[HolderOutput], dst: HolderId) {
        for (dst_index, input) in inputs.iter().enumerate() {
            self.graph.add_edge(
                input.holder,
                dst,
                HolderEdge::Data {
                    src_index: input.index,
                    dst_index,
                },
            );
        }
    }

    /// Add a constant holder and return its single output.
    pub fn add_const(&mut self, value: ConstValue) -> HolderOutput {
        let id = self.push("Const", HolderKind::Const(value), 1);
        self.graph[id].placement = Placement::Host;
        HolderOutput::first(id)
    }

    /// Add a graph-input feed. Output 0 is the shape, output 1 the address.
    pub fn add_feed(&mut self, index: usize, placement: Placement) -> HolderId {
        let id = self.push("Feed", HolderKind::Feed { index }, 2);
        self.graph[id].placement = placement;
        id
    }

    /// Add a compute holder consuming `inputs` in order.
    pub fn add_compute(
        &mut self,
        op_type: &str,
        inputs: &[HolderOutput],
        output_count: usize,
    ) -> Result<HolderId> {
        for &input in inputs {
            self.check_output(input)?;
        }
        let id = self.push(op_type, HolderKind::Compute, output_count);
        self.connect(inputs, id);
        Ok(id)
    }

    /// Add a guarder releasing `guarded` once all holders ordered before it finish.
    pub fn add_guarder(&mut self, op_type: &str, guarded: HolderOutput) -> Result<HolderId> {
        self.check_output(guarded)?;
        let id = self.push(op_type, HolderKind::Guarder, 0);
        self.connect(&[guarded], id);
        if let Some(previous) = self.guarders.insert(guarded, id) {
            tracing::warn!(previous = ?previous, guarder = ?id, "value guarded twice");
        }
        Ok(id)
    }

    /// Order `dst` after `src`. Duplicate edges are ignored.
    pub fn add_dependency(&mut self, src: HolderId, dst: HolderId) -> Result<()> {
        self.holder(src)?;
        self.holder(dst)?;
        if src == dst {
            return Err(Error::Graph(format!(
                "holder '{}' cannot depend on itself",
                self.graph[src].name
            )));
        }
        if !self.has_dependency(src, dst) {
            self.graph.add_edge(src, dst, HolderEdge::Control);
        }
        Ok(())
    }

    /// Delay the release of `value` until `node` has run.
    ///
    /// Returns `false` when the value has no guarder (it is not owned memory).
    pub fn release_after(&mut self, value: HolderOutput, node: HolderId) -> Result<bool> {
        match self.guarders.get(&value).copied() {
            Some(guarder) if guarder != node => {
                self.add_dependency(node, guarder)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Pin `id` to the very end of the main frame.
    pub fn pin_to_frame_end(&mut self, id: HolderId) -> Result<()> {
        self.holder(id)?;
        if !self.frame_end.contains(&id) {
            self.frame_end.push(id);
        }
        Ok(())
    }

    /// Holders pinned to the end of the main frame, in pin order.
    pub fn frame_end(&self) -> &[HolderId] {
        &self.frame_end
    }

    pub fn holder(&self, id: HolderId) -> Result<&Holder> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::Graph(format!("holder {id:?} not found")))
    }

    pub fn holder_mut(&mut self, id: HolderId) -> Result<&mut Holder> {
        self.graph
            .node_weight_mut(id)
            .ok_or_else(|| Error::Graph(format!("holder {id:?} not found")))
    }

    /// Bind the values of `id` to a placement and stream.
    pub fn set_placement(
        &mut self,
        id: HolderId,
        placement: Placement,
        stream_id: Option<i64>,
    ) -> Result<()> {
        let holder = self.holder_mut(id)?;
        holder.placement = placement;
        holder.stream_id = stream_id;
        Ok(())
    }

    /// Data inputs of `id` in slot order.
    pub fn inputs(&self, id: HolderId) -> Vec<HolderOutput> {
        let mut inputs: Vec<(usize, HolderOutput)> = self
            .graph
            .edges_directed(id, Direction::Incoming)
            .filter_map(|e| match *e.weight() {
                HolderEdge::Data {
                    src_index,
                    dst_index,
                } => Some((dst_index, HolderOutput::new(e.source(), src_index))),
                HolderEdge::Control => None,
            })
            .collect();
        inputs.sort_by_key(|(slot, _)| *slot);
        inputs.into_iter().map(|(_, output)| output).collect()
    }

    /// Data consumers of `id` as `(consumer, src_index, dst_index)`.
    pub fn consumers(&self, id: HolderId) -> Vec<(HolderId, usize, usize)> {
        self.graph
            .edges_directed(id, Direction::Outgoing)
            .filter_map(|e| match *e.weight() {
                HolderEdge::Data {
                    src_index,
                    dst_index,
                } => Some((e.target(), src_index, dst_index)),
                HolderEdge::Control => None,
            })
            .collect()
    }

    pub fn control_predecessors(&self, id: HolderId) -> Vec<HolderId> {
        self.control_neighbors(id, Direction::Incoming)
    }

    pub fn control_successors(&self, id: HolderId) -> Vec<HolderId> {
        self.control_neighbors(id, Direction::Outgoing)
    }

    fn control_neighbors(&self, id: HolderId, dir: Direction) -> Vec<HolderId> {
        self.graph
            .edges_directed(id, dir)
            .filter(|e| *e.weight() == HolderEdge::Control)
            .map(|e| match dir {
                Direction::Incoming => e.source(),
                Direction::Outgoing => e.target(),
            })
            .collect()
    }

    pub fn has_dependency(&self, src: HolderId, dst: HolderId) -> bool {
        self.graph
            .edges_directed(src, Direction::Outgoing)
            .any(|e| e.target() == dst && *e.weight() == HolderEdge::Control)
    }

    /// Guarder releasing `value`, if any.
    pub fn guarder(&self, value: HolderOutput) -> Option<HolderId> {
        self.guarders.get(&value).copied()
    }

    /// Value of a constant output.
    pub fn const_value(&self, value: HolderOutput) -> Option<&ConstValue> {
        match &self.graph.node_weight(value.holder)?.kind {
            HolderKind::Const(v) if value.index == 0 => Some(v),
            _ => None,
        }
    }

    /// All holders with the given synthetic operation.
    pub fn holders_by_type(&self, op_type: &str) -> Vec<HolderId> {
        self.graph
            .node_indices()
            .filter(|&id| self.graph[id].op_type == op_type)
            .collect()
    }

    /// Move every consumer of `from` onto `to`, keeping the consumer slots.
    pub fn redirect_output(&mut self, from: HolderOutput, to: HolderOutput) -> Result<()> {
        self.check_output(from)?;
        self.check_output(to)?;
        let moved: Vec<(EdgeIndex, HolderId, usize)> = self
            .graph
            .edges_directed(from.holder, Direction::Outgoing)
            .filter_map(|e| match *e.weight() {
                HolderEdge::Data {
                    src_index,
                    dst_index,
                } if src_index == from.index => Some((e.id(), e.target(), dst_index)),
                _ => None,
            })
            .collect();
        for (edge, target, dst_index) in moved {
            self.graph.remove_edge(edge);
            self.graph.add_edge(
                to.holder,
                target,
                HolderEdge::Data {
                    src_index: to.index,
                    dst_index,
                },
            );
        }
        if let Some(guarder) = self.guarders.remove(&from) {
            self.guarders.insert(to, guarder);
        }
        Ok(())
    }

    /// Move every control edge of `from` onto `to`.
    pub fn move_control_edges(&mut self, from: HolderId, to: HolderId) -> Result<()> {
        self.holder(to)?;
        let edges: Vec<(EdgeIndex, HolderId, HolderId)> = self
            .graph
            .edges_directed(from, Direction::Incoming)
            .chain(self.graph.edges_directed(from, Direction::Outgoing))
            .filter(|e| *e.weight() == HolderEdge::Control)
            .map(|e| (e.id(), e.source(), e.target()))
            .collect();
        for (edge, src, dst) in edges {
            self.graph.remove_edge(edge);
            let (src, dst) = if src == from { (to, dst) } else { (src, to) };
            if src != dst {
                self.add_dependency(src, dst)?;
            }
        }
        Ok(())
    }

    /// Remove a holder nothing reads from anymore.
    pub fn remove_holder(&mut self, id: HolderId) -> Result<Holder> {
        if !self.consumers(id).is_empty() {
            return Err(Error::Graph(format!(
                "holder '{}' still has data consumers",
                self.holder(id)?.name
            )));
        }
        self.frame_end.retain(|&pinned| pinned != id);
        self.guarders.retain(|value, guarder| value.holder != id && *guarder != id);
        self.graph
            .remove_node(id)
            .ok_or_else(|| Error::Graph(format!("holder {id:?} not found")))
    }

    /// Holders in dependency order.
    pub fn topological_order(&self) -> Vec<HolderId> {
        let mut topo = Topo::new(&self.graph);
        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(id) = topo.next(&self.graph) {
            order.push(id);
        }
        order
    }

    pub fn holders(&self) -> impl Iterator<Item = (HolderId, &Holder)> {
        self.graph
            .node_indices()
            .map(move |id| (id, &self.graph[id]))
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
