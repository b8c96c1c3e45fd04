//! The graph's native attribute encoding: scalars, typed values, lists,
//! tensor constants, and nested function references.

use crate::{ElementType, ShapeHandle, TensorValue};
use linked_hash_map::LinkedHashMap;

/// Ordered attribute map attached to nodes and function definitions.
pub type AttrMap = LinkedHashMap<String, AttrValue>;

/// A reference to a function by name, optionally carrying attribute
/// bindings for the callee.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct FuncAttr {
    pub name: String,
    pub attrs: AttrMap,
}

impl FuncAttr {
    pub fn new(name: impl Into<String>) -> Self {
        FuncAttr {
            name: name.into(),
            attrs: AttrMap::new(),
        }
    }
}

/// A list attribute holding homogeneous sub-lists. When flattened, the
/// sub-lists are exhausted in the fixed order ints, strings, floats,
/// bools, types, shapes, tensors, function references.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct AttrList {
    pub ints: Vec<i64>,
    pub strs: Vec<String>,
    pub floats: Vec<f32>,
    pub bools: Vec<bool>,
    pub types: Vec<ElementType>,
    pub shapes: Vec<ShapeHandle>,
    pub tensors: Vec<TensorValue>,
    pub funcs: Vec<FuncAttr>,
}

/// One attribute value in the graph's native encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Str(String),
    Float(f32),
    Bool(bool),
    Type(ElementType),
    Shape(ShapeHandle),
    Tensor(TensorValue),
    List(AttrList),
    Func(FuncAttr),
    /// A deferred binding to a value supplied elsewhere. Not supported
    /// by the importer.
    Placeholder(String),
    /// No value was set.
    Unset,
}

impl AttrValue {
    /// The shape carried by this attribute, if it is shape-valued.
    pub fn as_shape(&self) -> Option<&ShapeHandle> {
        match self {
            AttrValue::Shape(s) => Some(s),
            _ => None,
        }
    }

    /// The element type carried by this attribute, if type-valued.
    pub fn as_type(&self) -> Option<ElementType> {
        match self {
            AttrValue::Type(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&AttrList> {
        match self {
            AttrValue::List(l) => Some(l),
            _ => None,
        }
    }
}
