//! Operations, SSA values, and regions.

use crate::{Attributes, Location, Type, RRC};
use std::rc::Rc;

/// Structural classification of an IR operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// Single-entry wrapper region around one ordinary computation.
    Island,
    /// An ordinary (named) computation; lives inside an island.
    Generic,
    /// Predicate-driven demultiplexer (bare control-structure op).
    Switch,
    /// Control-flow join (bare control-structure op).
    Merge,
    /// Loop-body entry (bare control-structure op).
    Enter,
    /// Loop-body exit (bare control-structure op).
    Exit,
    /// Loop-continuation predicate (bare control-structure op).
    LoopCond,
    /// Control-only trigger (bare control-structure op).
    ControlTrigger,
    /// Producer half of a loop-feedback pair; emits the carried value
    /// and the pairing token.
    FeedbackSource,
    /// Consumer half of a loop-feedback pair; takes the token plus the
    /// real operands.
    FeedbackSink,
    /// The structured graph region holding a function's operations.
    Graph,
    /// Terminator of a graph region, collecting the function results.
    Fetch,
    /// Terminator of an island region.
    Yield,
    /// Terminator of a function body.
    Return,
}

/// One operation in the IR.
#[derive(Debug)]
pub struct Operation {
    /// Full namespaced operation name, e.g. `rill.island`.
    pub name: rill_utils::Id,
    pub opcode: Opcode,
    /// Data operands; bare control-structure operations carry their
    /// control operands at the tail of this list.
    pub operands: Vec<Value>,
    pub result_types: Vec<Type>,
    pub attributes: Attributes,
    pub location: Location,
    /// Nested region ([`Opcode::Island`] and [`Opcode::Graph`] only).
    pub region: Region,
}

impl Operation {
    pub fn num_results(&self) -> usize {
        self.result_types.len()
    }
}

/// Take the `index`-th result of `op` as a value.
pub fn result(op: &RRC<Operation>, index: usize) -> Value {
    Value::Result {
        op: Rc::clone(op),
        index,
    }
}

/// The last result of `op`, which by convention is its control token.
pub fn control_result(op: &RRC<Operation>) -> Value {
    let index = op.borrow().num_results() - 1;
    result(op, index)
}

/// An SSA value: either the result of an operation or a function block
/// argument.
#[derive(Clone)]
pub enum Value {
    Result { op: RRC<Operation>, index: usize },
    Arg { index: usize, ty: Type },
}

impl Value {
    pub fn ty(&self) -> Type {
        match self {
            Value::Result { op, index } => op.borrow().result_types[*index].clone(),
            Value::Arg { ty, .. } => ty.clone(),
        }
    }

    /// The operation defining this value, if it is an operation result.
    pub fn defining_op(&self) -> Option<RRC<Operation>> {
        match self {
            Value::Result { op, .. } => Some(Rc::clone(op)),
            Value::Arg { .. } => None,
        }
    }

    /// Identity comparison: same defining op (by pointer) and result
    /// index, or same argument index.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (
                Value::Result { op: a, index: i },
                Value::Result { op: b, index: j },
            ) => Rc::ptr_eq(a, b) && i == j,
            (Value::Arg { index: i, .. }, Value::Arg { index: j, .. }) => i == j,
            _ => false,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Result { op, index } => {
                write!(f, "%{}#{}", op.borrow().name, index)
            }
            Value::Arg { index, .. } => write!(f, "%arg{}", index),
        }
    }
}

/// An ordered list of operations. Owns its contents; order is the
/// program order used by the printer and by insertion primitives.
#[derive(Debug, Default)]
pub struct Region {
    ops: Vec<RRC<Operation>>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[RRC<Operation>] {
        &self.ops
    }

    pub fn push(&mut self, op: RRC<Operation>) {
        self.ops.push(op);
    }

    /// Insert `op` before every other operation in the region.
    pub fn insert_at_front(&mut self, op: RRC<Operation>) {
        self.ops.insert(0, op);
    }

    /// Insert `op` immediately before `target`. Returns false if the
    /// target is not in this region.
    pub fn insert_before(&mut self, target: &RRC<Operation>, op: RRC<Operation>) -> bool {
        match self.position(target) {
            Some(at) => {
                self.ops.insert(at, op);
                true
            }
            None => false,
        }
    }

    /// Remove `target` from the region. Returns false if absent.
    pub fn erase(&mut self, target: &RRC<Operation>) -> bool {
        match self.position(target) {
            Some(at) => {
                self.ops.remove(at);
                true
            }
            None => false,
        }
    }

    fn position(&self, target: &RRC<Operation>) -> Option<usize> {
        self.ops.iter().position(|op| Rc::ptr_eq(op, target))
    }

    /// Rewrite every use of `old` to `new`, in this region and every
    /// nested region.
    pub fn replace_value_uses(&self, old: &Value, new: &Value) {
        for op in &self.ops {
            let mut op = op.borrow_mut();
            for operand in op.operands.iter_mut() {
                if operand.same_as(old) {
                    *operand = new.clone();
                }
            }
            op.region.replace_value_uses(old, new);
        }
    }

    /// Redirect every use of any result of `old` to the same-indexed
    /// result of `new`, in this region and every nested region.
    pub fn replace_op_uses(&self, old: &RRC<Operation>, new: &RRC<Operation>) {
        for op in &self.ops {
            if Rc::ptr_eq(op, old) || Rc::ptr_eq(op, new) {
                continue;
            }
            let mut op = op.borrow_mut();
            for operand in op.operands.iter_mut() {
                if let Value::Result { op: def, index } = operand {
                    if Rc::ptr_eq(def, old) {
                        let index = *index;
                        *operand = result(new, index);
                    }
                }
            }
            op.region.replace_op_uses(old, new);
        }
    }
}
