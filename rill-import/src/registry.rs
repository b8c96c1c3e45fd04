//! Pluggable per-operation-kind shape inference rules.
//!
//! A rule maps the shapes of a node's data inputs (and its attributes)
//! to the shapes of its outputs. The registry is caller-owned and passed
//! into the importer; a kind with no registered rule degrades to
//! all-outputs-unknown rather than failing.

use rill_graph::{Node, ShapeHandle, TensorType};
use rill_utils::Id;
use std::collections::HashMap;

/// Everything a shape rule may consult.
pub struct InferenceContext<'a> {
    /// The node being inferred.
    pub node: &'a Node,
    /// Types of the data inputs, in input-port order.
    pub inputs: &'a [TensorType],
}

impl InferenceContext<'_> {
    /// Shape of data input `i`, unranked when the input is absent.
    pub fn input_shape(&self, i: usize) -> ShapeHandle {
        self.inputs
            .get(i)
            .map(|t| t.shape.clone())
            .unwrap_or(ShapeHandle::Unranked)
    }
}

/// A shape rule: one output shape per declared node output.
pub type ShapeRule = Box<dyn Fn(&InferenceContext) -> Vec<ShapeHandle>>;

/// Registry of shape rules, keyed by operation name (for ordinary
/// operators) or by the canonical structural-kind name.
#[derive(Default)]
pub struct OpShapeRegistry {
    rules: HashMap<Id, ShapeRule>,
}

impl OpShapeRegistry {
    /// An empty registry: every inference degrades to unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the rules for the structural kinds and
    /// a handful of common operators.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();

        // A constant's shape is the shape of its value.
        reg.register("Const", |cx| {
            let shape = cx
                .node
                .attrs
                .get("value")
                .and_then(|v| match v {
                    rill_graph::AttrValue::Tensor(t) => Some(t.shape()),
                    _ => None,
                })
                .unwrap_or(ShapeHandle::Unranked);
            vec![shape]
        });

        // Placeholders carry their shape as an attribute.
        reg.register("Placeholder", |cx| {
            let shape = cx
                .node
                .attrs
                .get("shape")
                .and_then(|v| v.as_shape().cloned())
                .unwrap_or(ShapeHandle::Unranked);
            vec![shape]
        });

        // Shape-preserving unary operators.
        for name in ["Identity", "Relu", "Neg", "Abs", "StopGradient"] {
            reg.register(name, |cx| vec![cx.input_shape(0)]);
        }

        // Elementwise binary operators: combine what both sides know.
        for name in ["Add", "Sub", "Mul", "Div", "Maximum", "Minimum"] {
            reg.register(name, |cx| {
                vec![cx.input_shape(0).merge(&cx.input_shape(1))]
            });
        }

        // Structural kinds.
        reg.register("Merge", |cx| {
            // The joined value: precise only when every input agrees.
            let first = cx.input_shape(0);
            let value = if cx
                .inputs
                .iter()
                .all(|t| t.shape.same_as(&first))
            {
                first
            } else {
                ShapeHandle::Unranked
            };
            vec![value, ShapeHandle::scalar()]
        });
        reg.register("Switch", |cx| {
            vec![cx.input_shape(0), cx.input_shape(0)]
        });
        for name in ["Enter", "Exit", "Feedback"] {
            reg.register(name, |cx| vec![cx.input_shape(0)]);
        }
        reg.register("LoopCond", |_| vec![ShapeHandle::scalar()]);
        reg.register("ControlTrigger", |_| vec![]);
        reg.register("Ret", |_| vec![]);

        reg
    }

    /// Register (or replace) the rule for `name`.
    pub fn register<S, F>(&mut self, name: S, rule: F)
    where
        S: Into<Id>,
        F: Fn(&InferenceContext) -> Vec<ShapeHandle> + 'static,
    {
        self.rules.insert(name.into(), Box::new(rule));
    }

    /// Look up the rule for `name`.
    pub fn find(&self, name: Id) -> Option<&ShapeRule> {
        self.rules.get(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_graph::{ElementType, Node, TensorData, TensorValue};

    #[test]
    fn const_rule_reads_the_value_attribute() {
        let reg = OpShapeRegistry::with_builtins();
        let value =
            TensorValue::new([2, 3], TensorData::I32(vec![0; 6])).unwrap();
        let node = Node::op("c", "Const")
            .with_output(ElementType::I32)
            .with_attr("value", rill_graph::AttrValue::Tensor(value));
        let cx = InferenceContext {
            node: &node,
            inputs: &[],
        };
        let rule = reg.find("Const".into()).unwrap();
        assert_eq!(rule(&cx), vec![ShapeHandle::ranked([2, 3])]);
    }

    #[test]
    fn unregistered_kinds_have_no_rule() {
        let reg = OpShapeRegistry::with_builtins();
        assert!(reg.find("SomethingExotic".into()).is_none());
    }
}
