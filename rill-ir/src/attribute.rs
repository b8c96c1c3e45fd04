//! IR attribute values and ordered attribute lists.

use itertools::Itertools;
use rill_graph::TensorValue;
use rill_utils::Id;

/// One IR attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Int(i64),
    Float(f32),
    Bool(bool),
    Str(String),
    /// Attribute that carries no value beyond its presence.
    Unit,
    /// A typed, shaped constant.
    Elements(TensorValue),
    /// Positional list of attribute values.
    Array(Vec<Attribute>),
    /// Reference to another IR symbol (a function, typically).
    SymbolRef(Id),
    /// Nested name/value pairs.
    Dict(Vec<NamedAttribute>),
}

impl Attribute {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Id> {
        match self {
            Attribute::SymbolRef(s) => Some(*s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attribute::Int(i) => write!(f, "{}", i),
            Attribute::Float(x) => write!(f, "{:e}", x),
            Attribute::Bool(b) => write!(f, "{}", b),
            Attribute::Str(s) => write!(f, "{:?}", s),
            Attribute::Unit => write!(f, "unit"),
            Attribute::Elements(t) => {
                write!(f, "dense<{} elements>", t.data.len())
            }
            Attribute::Array(items) => {
                let rendered = items
                    .iter()
                    .map(|a| a.to_string())
                    .join(", ");
                write!(f, "[{}]", rendered)
            }
            Attribute::SymbolRef(s) => write!(f, "@{}", s),
            Attribute::Dict(entries) => {
                let rendered = entries
                    .iter()
                    .map(|e| format!("{} = {}", e.name, e.value))
                    .join(", ");
                write!(f, "{{{}}}", rendered)
            }
        }
    }
}

/// An attribute together with its name.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedAttribute {
    pub name: Id,
    pub value: Attribute,
}

impl NamedAttribute {
    pub fn new<S: Into<Id>>(name: S, value: Attribute) -> Self {
        NamedAttribute {
            name: name.into(),
            value,
        }
    }
}

/// An ordered attribute list. Order is meaningful: the importer emits
/// attributes deterministically and the printer renders them in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes {
    attrs: Vec<NamedAttribute>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<S: Into<Id>>(&mut self, name: S, value: Attribute) {
        self.attrs.push(NamedAttribute::new(name, value));
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedAttribute> {
        self.attrs.iter()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

impl IntoIterator for Attributes {
    type Item = NamedAttribute;
    type IntoIter = std::vec::IntoIter<NamedAttribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attrs.into_iter()
    }
}

impl FromIterator<NamedAttribute> for Attributes {
    fn from_iter<T: IntoIterator<Item = NamedAttribute>>(iter: T) -> Self {
        Attributes {
            attrs: iter.into_iter().collect(),
        }
    }
}

impl Extend<NamedAttribute> for Attributes {
    fn extend<T: IntoIterator<Item = NamedAttribute>>(&mut self, iter: T) {
        self.attrs.extend(iter)
    }
}
