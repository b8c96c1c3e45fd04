//! Named sub-graphs: function definitions reachable from call
//! attributes, plus their gradient associations.

use crate::{AttrMap, ElementType, Graph, NodeId, OpKind};
use linked_hash_map::LinkedHashMap;
use rill_utils::{Error, Id, RillResult};

/// A formal parameter or result of a function definition.
#[derive(Clone, Debug)]
pub struct ArgDef {
    pub name: Id,
    pub ty: ElementType,
}

impl ArgDef {
    pub fn new<S: Into<Id>>(name: S, ty: ElementType) -> Self {
        ArgDef {
            name: name.into(),
            ty,
        }
    }
}

/// A function definition: a body graph whose `Arg`/`Ret` nodes mark the
/// formal parameters and results (each carrying an integer `index`
/// attribute), the declared signature, and definition-level attributes.
#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub name: Id,
    pub input_args: Vec<ArgDef>,
    pub output_args: Vec<ArgDef>,
    pub stateful: bool,
    pub attrs: AttrMap,
    pub body: Graph,
}

impl FunctionDef {
    pub fn new<S: Into<Id>>(name: S, body: Graph) -> Self {
        FunctionDef {
            name: name.into(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            stateful: false,
            attrs: AttrMap::new(),
            body,
        }
    }

    /// The body's `Arg` nodes ordered by their `index` attribute.
    pub fn arg_nodes(&self) -> RillResult<Vec<NodeId>> {
        self.indexed_nodes(OpKind::Arg, self.input_args.len())
    }

    /// The body's `Ret` nodes ordered by their `index` attribute.
    pub fn ret_nodes(&self) -> RillResult<Vec<NodeId>> {
        self.indexed_nodes(OpKind::Ret, self.output_args.len())
    }

    fn indexed_nodes(&self, kind: OpKind, expected: usize) -> RillResult<Vec<NodeId>> {
        let mut found: Vec<Option<NodeId>> = vec![None; expected];
        for id in self.body.node_ids() {
            let node = self.body.node(id);
            if node.kind != kind {
                continue;
            }
            let index = node
                .attrs
                .get("index")
                .and_then(|v| v.as_int())
                .ok_or_else(|| {
                    Error::malformed_structure(format!(
                        "node `{}' is missing its index attribute",
                        node.name
                    ))
                })?;
            let slot = found.get_mut(index as usize).ok_or_else(|| {
                Error::malformed_structure(format!(
                    "node `{}' has out-of-range index {}",
                    node.name, index
                ))
            })?;
            if slot.replace(id).is_some() {
                return Err(Error::malformed_structure(format!(
                    "duplicate index {} on node `{}'",
                    index, node.name
                )));
            }
        }
        found
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| {
                    Error::malformed_structure(format!(
                        "function `{}' declares {} but its body has no node with index {}",
                        self.name, expected, i
                    ))
                })
            })
            .collect()
    }
}

/// The library of function definitions attached to a graph.
#[derive(Clone, Debug, Default)]
pub struct FunctionLibrary {
    funcs: LinkedHashMap<Id, FunctionDef>,
    gradients: LinkedHashMap<Id, Id>,
}

impl FunctionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any previous one with the same
    /// name.
    pub fn insert(&mut self, def: FunctionDef) {
        self.funcs.insert(def.name, def);
    }

    /// Associate `grad` as the gradient function of `func`.
    pub fn set_gradient<S: Into<Id>, G: Into<Id>>(&mut self, func: S, grad: G) {
        self.gradients.insert(func.into(), grad.into());
    }

    pub fn find<S: Into<Id>>(&self, name: S) -> Option<&FunctionDef> {
        self.funcs.get(&name.into())
    }

    pub fn find_gradient<S: Into<Id>>(&self, name: S) -> Option<Id> {
        self.gradients.get(&name.into()).copied()
    }

    /// Names of every definition, in registration order.
    pub fn names(&self) -> impl Iterator<Item = Id> + '_ {
        self.funcs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}
