//! The input data model for the rill importer: a mutable dataflow graph
//! with typed multi-output nodes, control dependencies, an attached
//! function library, and the analyses that prepare a graph for
//! conversion (cycle removal, deterministic ordering, pruning).

mod algorithm;
mod attr;
mod debug;
mod graph;
mod library;
mod tensor;
mod types;

pub use algorithm::{
    prune_reverse_reachable, remove_backedges, reverse_post_order, RemovedEdge,
};
pub use attr::{AttrList, AttrMap, AttrValue, FuncAttr};
pub use debug::{DebugInfo, FileLineCol};
pub use graph::{Edge, Graph, Node, NodeId, OpKind, Port, VersionDef};
pub use library::{ArgDef, FunctionDef, FunctionLibrary};
pub use tensor::{TensorData, TensorValue};
pub use types::{ElementType, ShapeHandle, TensorType, UNKNOWN_DIM};
