//! The intermediate representation produced by the importer.
//!
//! A [`Module`] holds one [`Func`] per converted source function. Each
//! function body is a single structured graph region whose contents are
//! [`Operation`]s in SSA form: ordinary computations are wrapped in
//! single-operation island regions, control-structure operations stand
//! bare and carry an extra control-token result.

mod attribute;
mod builder;
mod common;
mod location;
mod mangling;
mod module;
mod operation;
mod printer;
mod types;

pub use attribute::{Attribute, Attributes, NamedAttribute};
pub use builder::OperationState;
pub use common::{rrc, RRC};
pub use location::Location;
pub use mangling::{
    demangle_attr_name, demangle_shape, demangle_type, mangle_attr_name, mangle_shape,
    mangle_type,
};
pub use module::{Func, Module};
pub use operation::{control_result, result, Opcode, Operation, Region, Value};
pub use printer::Printer;
pub use types::{FunctionType, Type};

// The IR shares the graph's type vocabulary.
pub use rill_graph::{ElementType, ShapeHandle, TensorType, TensorValue};
pub use rill_utils::{GetName, Id};
