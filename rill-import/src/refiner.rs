//! Iterative shape refinement over a prepared (acyclic) graph.
//!
//! The refiner assigns every node output a [`TensorType`] and re-runs
//! the per-kind inference rules in dependency order until nothing
//! changes or the caller's iteration cap is hit. Refinement is
//! monotone: information already known is never discarded.

use crate::registry::{InferenceContext, OpShapeRegistry};
use ahash::AHashMap;
use rill_graph::{Graph, NodeId, ShapeHandle, TensorType};
use rill_utils::{Error, RillResult};

/// Per-node, per-output inferred types.
pub struct ShapeRefiner<'r> {
    registry: &'r OpShapeRegistry,
    outputs: AHashMap<NodeId, Vec<TensorType>>,
}

impl<'r> ShapeRefiner<'r> {
    pub fn new(registry: &'r OpShapeRegistry) -> Self {
        ShapeRefiner {
            registry,
            outputs: AHashMap::new(),
        }
    }

    /// Initialize the output types of `id` from its declared element
    /// types and its kind's inference rule. A missing rule degrades to
    /// unknown shapes.
    pub fn add_node(&mut self, graph: &Graph, id: NodeId) {
        let node = graph.node(id);
        let shapes = self.run_rule(graph, id);
        let types = node
            .outputs
            .iter()
            .zip(shapes)
            .map(|(&element, shape)| TensorType::new(element, shape))
            .collect();
        self.outputs.insert(id, types);
    }

    /// Re-run the inference rule for `id`, merging monotonically into
    /// the stored types. Returns true if any output shape changed.
    pub fn update_node(&mut self, graph: &Graph, id: NodeId) -> bool {
        let shapes = self.run_rule(graph, id);
        let Some(types) = self.outputs.get_mut(&id) else {
            return false;
        };
        let mut changed = false;
        for (ty, new_shape) in types.iter_mut().zip(shapes) {
            let merged = ty.shape.merge(&new_shape);
            if !merged.same_as(&ty.shape) {
                changed = true;
            }
            ty.shape = merged;
        }
        changed
    }

    /// Force the type of output `idx` of `id`. Later refinement rounds
    /// only ever make it more precise.
    pub fn set_output(&mut self, id: NodeId, idx: usize, ty: TensorType) {
        let slot = self.outputs.entry(id).or_default();
        if slot.len() <= idx {
            slot.resize(idx + 1, TensorType::unranked(ty.element));
        }
        slot[idx] = ty;
    }

    /// The inferred type of output `idx` of `id`.
    pub fn output(&self, id: NodeId, idx: usize) -> RillResult<TensorType> {
        self.outputs
            .get(&id)
            .and_then(|tys| tys.get(idx))
            .cloned()
            .ok_or_else(|| {
                Error::internal(format!(
                    "no inferred type for output {} of node id {:?}",
                    idx, id
                ))
            })
    }

    /// Types of the data inputs of `id`, in input-port order. Inputs
    /// whose producer has not been seen yet contribute unknowns.
    fn input_types(&self, graph: &Graph, id: NodeId) -> Vec<TensorType> {
        let mut edges: Vec<_> = graph
            .in_edges(id)
            .into_iter()
            .filter(|(_, e)| !e.is_control())
            .collect();
        edges.sort_by_key(|(_, e)| e.dst_input);
        edges
            .into_iter()
            .filter_map(|(src, e)| {
                let idx = e.src_output.index()? as usize;
                if let Ok(ty) = self.output(src, idx) {
                    return Some(ty);
                }
                let decl = graph.node(src).outputs.get(idx)?;
                Some(TensorType::unranked(*decl))
            })
            .collect()
    }

    fn run_rule(&self, graph: &Graph, id: NodeId) -> Vec<ShapeHandle> {
        let node = graph.node(id);
        let num_outputs = node.num_outputs();
        let rule = match self.registry.find(node.op_name()) {
            Some(rule) => rule,
            None => {
                log::debug!(
                    "no shape rule for `{}'; outputs of `{}' stay unknown",
                    node.op_name(),
                    node.name
                );
                return vec![ShapeHandle::Unranked; num_outputs];
            }
        };
        let inputs = self.input_types(graph, id);
        let cx = InferenceContext {
            node,
            inputs: &inputs,
        };
        let mut shapes = rule(&cx);
        // A rule that produced the wrong arity still yields something
        // usable for the outputs it covered.
        shapes.resize(num_outputs, ShapeHandle::Unranked);
        shapes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_graph::{AttrValue, ElementType, Node, TensorData, TensorValue};

    #[test]
    fn identity_propagates_shapes_across_rounds() {
        let registry = OpShapeRegistry::with_builtins();
        let mut g = Graph::new();
        let c = g
            .add_node(
                Node::op("c", "Const")
                    .with_output(ElementType::I32)
                    .with_attr(
                        "value",
                        AttrValue::Tensor(
                            TensorValue::new([4], TensorData::I32(vec![0; 4])).unwrap(),
                        ),
                    ),
            )
            .unwrap();
        let i = g
            .add_node(Node::op("i", "Identity").with_output(ElementType::I32))
            .unwrap();
        g.add_edge(c, 0, i, 0);

        let mut refiner = ShapeRefiner::new(&registry);
        refiner.add_node(&g, c);
        refiner.add_node(&g, i);
        assert_eq!(
            refiner.output(i, 0).unwrap().shape,
            ShapeHandle::ranked([4])
        );
        // A further round is a no-op.
        assert!(!refiner.update_node(&g, c));
        assert!(!refiner.update_node(&g, i));
    }

    #[test]
    fn forced_outputs_survive_refinement() {
        let registry = OpShapeRegistry::with_builtins();
        let mut g = Graph::new();
        let a = g
            .add_node(Node::new("a", rill_graph::OpKind::Arg).with_output(ElementType::F32))
            .unwrap();
        let mut refiner = ShapeRefiner::new(&registry);
        refiner.add_node(&g, a);
        refiner.set_output(
            a,
            0,
            TensorType::new(ElementType::F32, ShapeHandle::ranked([-1, 4])),
        );
        // The Arg kind has no rule; the forced shape must not regress.
        assert!(!refiner.update_node(&g, a));
        assert_eq!(
            refiner.output(a, 0).unwrap().shape,
            ShapeHandle::ranked([-1, 4])
        );
    }
}
