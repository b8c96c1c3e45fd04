//! Caller-supplied configuration for one import request.

use rill_graph::{ElementType, ShapeHandle};
use rill_utils::{Error, RillResult};
use std::collections::BTreeMap;

/// Required type and shape of one declared graph input.
#[derive(Clone, Debug)]
pub struct ArrayInfo {
    pub element: ElementType,
    pub shape: ShapeHandle,
}

impl ArrayInfo {
    pub fn new(element: ElementType, shape: ShapeHandle) -> Self {
        ArrayInfo { element, shape }
    }
}

/// Configuration for one import request.
///
/// Declared inputs are keyed by node name; iteration order (and thus
/// argument order) is the sorted name order. Declared outputs preserve
/// the order they were given in and accept an optional `:port` suffix.
#[derive(Clone, Debug)]
pub struct ImportConfig {
    pub inputs: BTreeMap<String, ArrayInfo>,
    pub outputs: Vec<String>,
    /// Delete nodes that do not reach a declared input or output.
    pub prune_unused_nodes: bool,
    /// Treat the whole graph as a single function body whose `Arg` and
    /// `Ret` nodes define the signature.
    pub graph_as_function: bool,
    /// Rewrite legacy-style input nodes into plain placeholders before
    /// importing.
    pub convert_legacy_inputs: bool,
    /// Iteration cap for the shape-refinement fixpoint. Exceeding the
    /// cap degrades shapes, it does not fail.
    pub shape_refine_rounds: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            prune_unused_nodes: false,
            graph_as_function: false,
            convert_legacy_inputs: false,
            shape_refine_rounds: 2,
        }
    }
}

impl ImportConfig {
    /// Declare an input node with its required element type and shape.
    pub fn input(
        mut self,
        name: impl Into<String>,
        element: ElementType,
        shape: ShapeHandle,
    ) -> Self {
        self.inputs.insert(name.into(), ArrayInfo::new(element, shape));
        self
    }

    /// Declare an output, `name` or `name:port`.
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }
}

/// Split an output declaration into node name and output port.
pub(crate) fn parse_output(spec: &str) -> RillResult<(&str, usize)> {
    match spec.split_once(':') {
        None => Ok((spec, 0)),
        Some((name, port)) => {
            let port = port.parse::<usize>().map_err(|_| {
                Error::invalid_argument(format!("invalid port specification: {}", spec))
            })?;
            Ok((name, port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_specs_accept_ports() {
        assert_eq!(parse_output("y").unwrap(), ("y", 0));
        assert_eq!(parse_output("y:2").unwrap(), ("y", 2));
        assert!(parse_output("y:x").unwrap_err().is_invalid_argument());
    }
}
