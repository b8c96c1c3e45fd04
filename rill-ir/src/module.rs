//! Functions and the module that owns them.

use crate::{Attributes, FunctionType, Region};
use rill_graph::VersionDef;
use rill_utils::{GetName, Id};

/// A converted function: one per source function, including the main
/// graph (converted as `main`).
#[derive(Debug)]
pub struct Func {
    pub name: Id,
    pub signature: FunctionType,
    pub attributes: Attributes,
    /// The function body. Contains the structured graph operation
    /// followed by the function terminator.
    pub body: Region,
}

impl Func {
    pub fn new<S: Into<Id>>(name: S, signature: FunctionType) -> Self {
        Func {
            name: name.into(),
            signature,
            attributes: Attributes::new(),
            body: Region::new(),
        }
    }
}

impl GetName for Func {
    fn name(&self) -> Id {
        self.name
    }
}

/// The produced translation unit: all converted functions plus the
/// version stamp copied from the input graph.
#[derive(Debug, Default)]
pub struct Module {
    functions: Vec<Func>,
    pub versions: VersionDef,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a function. Functions are only ever appended, never
    /// replaced.
    pub fn push(&mut self, func: Func) {
        self.functions.push(func);
    }

    pub fn find<S: Into<Id>>(&self, name: S) -> Option<&Func> {
        let name = name.into();
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn functions(&self) -> &[Func] {
        &self.functions
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
