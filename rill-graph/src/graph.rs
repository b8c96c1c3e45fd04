//! The mutable dataflow graph: nodes with typed multi-output ports,
//! data and control edges, and the designated source/sink pseudo-nodes.

use crate::{AttrMap, AttrValue, ElementType};
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rill_utils::{Error, GetName, Id, RillResult};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Stable identity of a node within one graph.
pub type NodeId = petgraph::stable_graph::NodeIndex;

/// Reserved names for the two pseudo-nodes every graph carries.
const SOURCE_NAME: &str = "_source";
const SINK_NAME: &str = "_sink";

/// A port on a node: either a value-carrying output/input slot or the
/// distinguished control slot.
///
/// The derived ordering puts data ports (by index) before the control
/// port, which is the operand order the importer relies on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Port {
    Data(u32),
    Control,
}

impl Port {
    pub fn is_control(&self) -> bool {
        matches!(self, Port::Control)
    }

    pub fn index(&self) -> Option<u32> {
        match self {
            Port::Data(i) => Some(*i),
            Port::Control => None,
        }
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Port::Data(i) => write!(f, "{}", i),
            Port::Control => write!(f, "^"),
        }
    }
}

/// A directed edge from `(src, src_output)` to `(dst, dst_input)`.
/// Control-only dependencies use [`Port::Control`] on both endpoints.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub src_output: Port,
    pub dst_input: Port,
}

impl Edge {
    pub fn control() -> Self {
        Edge {
            src_output: Port::Control,
            dst_input: Port::Control,
        }
    }

    pub fn is_control(&self) -> bool {
        self.dst_input.is_control()
    }
}

/// Structural classification of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// An ordinary executable operation (or a call to a library
    /// function) identified by its operation name.
    Operator(Id),
    /// Control-flow join accepting a value from either predecessor.
    Merge,
    /// Predicate-driven demultiplexer.
    Switch,
    /// Converts a value into a loop-continuation predicate.
    LoopCond,
    /// Loop-body entry marker.
    Enter,
    /// Loop-body exit marker.
    Exit,
    /// Loop feedback: carries a value from one iteration to the next.
    Feedback,
    /// Fires a control token once all control inputs have fired.
    ControlTrigger,
    /// Formal-parameter placeholder inside a function body.
    Arg,
    /// Return-value placeholder inside a function body.
    Ret,
    /// The graph's virtual source pseudo-node.
    Source,
    /// The graph's virtual sink pseudo-node.
    Sink,
}

impl OpKind {
    /// The operation name used when converting a node of this kind.
    pub fn op_name(&self) -> Id {
        match self {
            OpKind::Operator(name) => *name,
            OpKind::Merge => "Merge".into(),
            OpKind::Switch => "Switch".into(),
            OpKind::LoopCond => "LoopCond".into(),
            OpKind::Enter => "Enter".into(),
            OpKind::Exit => "Exit".into(),
            OpKind::Feedback => "Feedback".into(),
            OpKind::ControlTrigger => "ControlTrigger".into(),
            OpKind::Arg => "Arg".into(),
            OpKind::Ret => "Ret".into(),
            OpKind::Source => SOURCE_NAME.into(),
            OpKind::Sink => SINK_NAME.into(),
        }
    }
}

/// A node in the dataflow graph.
#[derive(Clone, Debug)]
pub struct Node {
    /// Name, unique within the graph.
    pub name: Id,
    pub kind: OpKind,
    /// Attribute name to value, in insertion order.
    pub attrs: AttrMap,
    /// Declared element type of each output.
    pub outputs: SmallVec<[ElementType; 2]>,
    /// Device placement string; may be empty.
    pub device: String,
    /// Names of the nodes this node was derived from by earlier
    /// compiler passes, if any.
    pub original_node_names: Vec<String>,
    /// Function names paired with `original_node_names`.
    pub original_func_names: Vec<String>,
}

impl Node {
    pub fn new<S: Into<Id>>(name: S, kind: OpKind) -> Self {
        Node {
            name: name.into(),
            kind,
            attrs: AttrMap::new(),
            outputs: SmallVec::new(),
            device: String::new(),
            original_node_names: Vec::new(),
            original_func_names: Vec::new(),
        }
    }

    /// Convenience constructor for an ordinary operator node.
    pub fn op<S: Into<Id>, O: Into<Id>>(name: S, op: O) -> Self {
        Node::new(name, OpKind::Operator(op.into()))
    }

    pub fn with_output(mut self, ty: ElementType) -> Self {
        self.outputs.push(ty);
        self
    }

    pub fn with_attr<S: Into<String>>(mut self, key: S, value: AttrValue) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn with_device<S: Into<String>>(mut self, device: S) -> Self {
        self.device = device.into();
        self
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// True for real nodes; false for the source/sink pseudo-nodes.
    pub fn is_op(&self) -> bool {
        !matches!(self.kind, OpKind::Source | OpKind::Sink)
    }

    /// The operation name of this node (the operator name, or the
    /// canonical name of the structural kind).
    pub fn op_name(&self) -> Id {
        self.kind.op_name()
    }
}

impl GetName for Node {
    fn name(&self) -> Id {
        self.name
    }
}

/// Producer/consumer compatibility stamp carried by a graph and copied
/// verbatim onto the module produced from it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionDef {
    pub producer: i32,
    pub min_consumer: i32,
    pub bad_consumers: Vec<i32>,
}

/// A dataflow graph. Owns its nodes and edges; the two pseudo-nodes are
/// created up front and never removed.
#[derive(Clone, Debug)]
pub struct Graph {
    graph: StableDiGraph<Node, Edge>,
    source: NodeId,
    sink: NodeId,
    by_name: HashMap<Id, NodeId>,
    pub versions: VersionDef,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = StableDiGraph::new();
        let source = graph.add_node(Node::new(SOURCE_NAME, OpKind::Source));
        let sink = graph.add_node(Node::new(SINK_NAME, OpKind::Sink));
        let by_name = [(Id::new(SOURCE_NAME), source), (Id::new(SINK_NAME), sink)]
            .into_iter()
            .collect();
        Graph {
            graph,
            source,
            sink,
            by_name,
            versions: VersionDef::default(),
        }
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn sink(&self) -> NodeId {
        self.sink
    }

    /// Add a node. Names must be unique within the graph.
    pub fn add_node(&mut self, node: Node) -> RillResult<NodeId> {
        if self.by_name.contains_key(&node.name) {
            return Err(Error::malformed_structure(format!(
                "duplicate node name `{}'",
                node.name
            )));
        }
        let name = node.name;
        let id = self.graph.add_node(node);
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: NodeId) {
        if let Some(node) = self.graph.remove_node(id) {
            self.by_name.remove(&node.name);
        }
    }

    /// Add a data edge from `(src, src_output)` to `(dst, dst_input)`.
    pub fn add_edge(&mut self, src: NodeId, src_output: u32, dst: NodeId, dst_input: u32) {
        self.graph.add_edge(
            src,
            dst,
            Edge {
                src_output: Port::Data(src_output),
                dst_input: Port::Data(dst_input),
            },
        );
    }

    /// Add a control-only edge from `src` to `dst`.
    pub fn add_control_edge(&mut self, src: NodeId, dst: NodeId) {
        self.graph.add_edge(src, dst, Edge::control());
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.graph[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.graph[id]
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.contains_node(id)
    }

    /// Look up a node by name.
    pub fn find_node<S: Into<Id>>(&self, name: S) -> Option<NodeId> {
        self.by_name.get(&name.into()).copied()
    }

    /// Iterate over all node ids, pseudo-nodes included.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_indices()
    }

    /// Number of nodes, pseudo-nodes included.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Incoming edges of `dst` as `(src, edge)` pairs, in arbitrary
    /// order.
    pub fn in_edges(&self, dst: NodeId) -> Vec<(NodeId, Edge)> {
        self.graph
            .edges_directed(dst, Direction::Incoming)
            .map(|e| (e.source(), *e.weight()))
            .collect()
    }

    /// Outgoing edges of `src` as `(dst, edge)` pairs, in arbitrary
    /// order.
    pub fn out_edges(&self, src: NodeId) -> Vec<(NodeId, Edge)> {
        self.graph
            .edges_directed(src, Direction::Outgoing)
            .map(|e| (e.target(), *e.weight()))
            .collect()
    }

    /// Successor node ids of `src` (deduplicated, arbitrary order).
    pub fn successors(&self, src: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .graph
            .neighbors_directed(src, Direction::Outgoing)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Remove the first edge matching `(src, src_output) -> (dst,
    /// dst_input)`. Returns true if an edge was removed.
    pub fn remove_edge(&mut self, src: NodeId, src_output: Port, dst: NodeId, dst_input: Port) -> bool {
        let found = self
            .graph
            .edges_directed(dst, Direction::Incoming)
            .find(|e| {
                e.source() == src
                    && e.weight().src_output == src_output
                    && e.weight().dst_input == dst_input
            })
            .map(|e| e.id());
        match found {
            Some(eid) => {
                self.graph.remove_edge(eid);
                true
            }
            None => false,
        }
    }

    /// Move every outgoing edge of `from` to originate at `to`. Data
    /// outputs are renumbered to output 0 (the replacement must be a
    /// single-output node); control edges stay control edges.
    pub fn redirect_consumers(&mut self, from: NodeId, to: NodeId) {
        let outgoing = self.out_edges(from);
        for (dst, edge) in outgoing {
            let src_output = if edge.src_output.is_control() {
                Port::Control
            } else {
                Port::Data(0)
            };
            self.graph.add_edge(
                to,
                dst,
                Edge {
                    src_output,
                    dst_input: edge.dst_input,
                },
            );
        }
        let stale: Vec<_> = self
            .graph
            .edges_directed(from, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for eid in stale {
            self.graph.remove_edge(eid);
        }
    }

    /// Reconnect the virtual source and sink: every real node without
    /// predecessors gains a control edge from the source, every real
    /// node without successors a control edge to the sink.
    pub fn fixup_source_and_sink(&mut self) {
        let ids: Vec<_> = self
            .graph
            .node_indices()
            .filter(|&id| id != self.source && id != self.sink)
            .collect();
        for id in ids {
            if self
                .graph
                .neighbors_directed(id, Direction::Incoming)
                .next()
                .is_none()
            {
                self.add_control_edge(self.source, id);
            }
            if self
                .graph
                .neighbors_directed(id, Direction::Outgoing)
                .next()
                .is_none()
            {
                self.add_control_edge(id, self.sink);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_names() {
        let mut g = Graph::new();
        g.add_node(Node::op("a", "Const")).unwrap();
        assert!(g.add_node(Node::op("a", "Const")).is_err());
    }

    #[test]
    fn fixup_connects_isolated_nodes() {
        let mut g = Graph::new();
        let n = g
            .add_node(Node::op("a", "Const").with_output(ElementType::F32))
            .unwrap();
        g.fixup_source_and_sink();
        assert!(g.in_edges(n).iter().any(|(src, e)| *src == g.source() && e.is_control()));
        assert!(g.out_edges(n).iter().any(|(dst, e)| *dst == g.sink() && e.is_control()));
    }

    #[test]
    fn redirect_consumers_renumbers_outputs() {
        let mut g = Graph::new();
        let a = g
            .add_node(Node::op("a", "Producer").with_output(ElementType::F32))
            .unwrap();
        let b = g
            .add_node(Node::op("b", "Consumer").with_output(ElementType::F32))
            .unwrap();
        let p = g
            .add_node(Node::op("p", "Placeholder").with_output(ElementType::F32))
            .unwrap();
        g.add_edge(a, 0, b, 0);
        g.redirect_consumers(a, p);
        assert!(g.out_edges(a).is_empty());
        let edges = g.out_edges(p);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].0, b);
        assert_eq!(edges[0].1.src_output, Port::Data(0));
    }
}
