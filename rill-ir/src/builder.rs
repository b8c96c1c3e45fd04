//! Operation construction. Mirrors the "fill in a state, then build"
//! shape the importer wants: operands, result types and attributes are
//! accumulated piecemeal before the operation is materialized.

use crate::{rrc, Attribute, Attributes, Location, Opcode, Operation, Region, Type, Value, RRC};
use rill_utils::Id;

/// Accumulated state for one operation under construction.
#[derive(Debug)]
pub struct OperationState {
    pub name: Id,
    pub opcode: Opcode,
    pub location: Location,
    pub operands: Vec<Value>,
    pub result_types: Vec<Type>,
    pub attributes: Attributes,
}

impl OperationState {
    pub fn new<S: Into<Id>>(location: Location, name: S, opcode: Opcode) -> Self {
        OperationState {
            name: name.into(),
            opcode,
            location,
            operands: Vec::new(),
            result_types: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    pub fn add_operand(&mut self, value: Value) {
        self.operands.push(value);
    }

    pub fn add_operands(&mut self, values: impl IntoIterator<Item = Value>) {
        self.operands.extend(values);
    }

    pub fn add_result_type(&mut self, ty: Type) {
        self.result_types.push(ty);
    }

    pub fn add_attribute<S: Into<Id>>(&mut self, name: S, value: Attribute) {
        self.attributes.push(name, value);
    }

    /// Materialize the operation with an empty nested region.
    pub fn build(self) -> RRC<Operation> {
        self.build_with_region(Region::new())
    }

    /// Materialize the operation with the given nested region.
    pub fn build_with_region(self, region: Region) -> RRC<Operation> {
        rrc(Operation {
            name: self.name,
            opcode: self.opcode,
            operands: self.operands,
            result_types: self.result_types,
            attributes: self.attributes,
            location: self.location,
            region,
        })
    }
}
