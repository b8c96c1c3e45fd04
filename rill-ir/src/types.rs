//! IR-level types: tensor values, the control token, and function
//! signatures.

use itertools::Itertools;
use rill_graph::TensorType;

/// The type of one IR value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    /// A tensor value.
    Tensor(TensorType),
    /// The synthetic "this operation has completed" result carried by
    /// every bare control-structure operation.
    Control,
    /// The pairing token produced by a feedback source and consumed by
    /// its sink.
    Token,
}

impl Type {
    pub fn is_control(&self) -> bool {
        matches!(self, Type::Control)
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(t) => Some(t),
            _ => None,
        }
    }
}

impl From<TensorType> for Type {
    fn from(t: TensorType) -> Self {
        Type::Tensor(t)
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Tensor(t) => t.fmt(f),
            Type::Control => write!(f, "!rill.control"),
            Type::Token => write!(f, "!rill.token"),
        }
    }
}

/// A function signature: input types and result types.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionType {
    pub inputs: Vec<Type>,
    pub results: Vec<Type>,
}

impl FunctionType {
    pub fn new(inputs: Vec<Type>, results: Vec<Type>) -> Self {
        FunctionType { inputs, results }
    }
}

impl std::fmt::Display for FunctionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let list = |tys: &[Type]| {
            tys.iter()
                .map(|t| t.to_string())
                .join(", ")
        };
        write!(f, "({}) -> ({})", list(&self.inputs), list(&self.results))
    }
}
