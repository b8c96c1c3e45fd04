//! Element types and shapes. Shapes distinguish "unknown rank" from
//! "known rank with unknown dimensions"; the unknown-dimension sentinel
//! is any negative value.

use itertools::Itertools;
use smallvec::SmallVec;

/// Sentinel for a dimension whose size is not known.
pub const UNKNOWN_DIM: i64 = -1;

/// Scalar element type of a tensor value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
    Str,
    /// Handle to a piece of mutable state; may carry subtypes.
    Resource,
    /// Opaque container type; may carry subtypes.
    Variant,
}

impl ElementType {
    /// Short stable spelling, used by the canonical type mangling.
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::I8 => "i8",
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::U8 => "u8",
            ElementType::U16 => "u16",
            ElementType::U32 => "u32",
            ElementType::U64 => "u64",
            ElementType::Bool => "bool",
            ElementType::Str => "str",
            ElementType::Resource => "resource",
            ElementType::Variant => "variant",
        }
    }

    /// Inverse of [`ElementType::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "f32" => ElementType::F32,
            "f64" => ElementType::F64,
            "i8" => ElementType::I8,
            "i16" => ElementType::I16,
            "i32" => ElementType::I32,
            "i64" => ElementType::I64,
            "u8" => ElementType::U8,
            "u16" => ElementType::U16,
            "u32" => ElementType::U32,
            "u64" => ElementType::U64,
            "bool" => ElementType::Bool,
            "str" => ElementType::Str,
            "resource" => ElementType::Resource,
            "variant" => ElementType::Variant,
            _ => return None,
        })
    }

    /// True for container element types that can carry nested subtypes.
    pub fn has_subtypes(&self) -> bool {
        matches!(self, ElementType::Resource | ElementType::Variant)
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A possibly-unknown shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShapeHandle {
    /// Rank is not known.
    Unranked,
    /// Rank is known; individual dimensions may still be unknown
    /// (negative values).
    Ranked(SmallVec<[i64; 4]>),
}

impl ShapeHandle {
    pub fn scalar() -> Self {
        ShapeHandle::Ranked(SmallVec::new())
    }

    pub fn ranked(dims: impl IntoIterator<Item = i64>) -> Self {
        ShapeHandle::Ranked(dims.into_iter().collect())
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            ShapeHandle::Unranked => None,
            ShapeHandle::Ranked(dims) => Some(dims.len()),
        }
    }

    pub fn dims(&self) -> Option<&[i64]> {
        match self {
            ShapeHandle::Unranked => None,
            ShapeHandle::Ranked(dims) => Some(dims),
        }
    }

    /// Number of elements, if every dimension is known.
    pub fn num_elements(&self) -> Option<i64> {
        self.dims().and_then(|dims| {
            dims.iter()
                .try_fold(1i64, |acc, &d| if d < 0 { None } else { Some(acc * d) })
        })
    }

    /// Equality used for fixpoint convergence: both unranked, or equal
    /// rank with each dimension pair equal or either side unknown. All
    /// negative dimension values denote the same unknown.
    pub fn same_as(&self, other: &ShapeHandle) -> bool {
        match (self, other) {
            (ShapeHandle::Unranked, ShapeHandle::Unranked) => true,
            (ShapeHandle::Ranked(a), ShapeHandle::Ranked(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(&x, &y)| x < 0 || y < 0 || x == y)
            }
            _ => false,
        }
    }

    /// Monotone refinement: returns the more precise of the two shapes,
    /// never discarding information already known in `self`.
    pub fn merge(&self, newer: &ShapeHandle) -> ShapeHandle {
        match (self, newer) {
            (ShapeHandle::Unranked, _) => newer.clone(),
            (_, ShapeHandle::Unranked) => self.clone(),
            (ShapeHandle::Ranked(old), ShapeHandle::Ranked(new)) => {
                if old.len() != new.len() {
                    // Conflicting ranks: keep what we had.
                    return self.clone();
                }
                ShapeHandle::Ranked(
                    old.iter()
                        .zip(new.iter())
                        .map(|(&o, &n)| if o >= 0 { o } else { n })
                        .collect(),
                )
            }
        }
    }
}

impl std::fmt::Display for ShapeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShapeHandle::Unranked => write!(f, "*"),
            ShapeHandle::Ranked(dims) => {
                let rendered = dims
                    .iter()
                    .map(|&d| {
                        if d < 0 {
                            "?".to_string()
                        } else {
                            d.to_string()
                        }
                    })
                    .join("x");
                write!(f, "[{}]", rendered)
            }
        }
    }
}

/// A fully described tensor type: element type, shape, and (for
/// container element types) the nested subtypes of the contained values.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub element: ElementType,
    pub shape: ShapeHandle,
    pub subtypes: Vec<TensorType>,
}

impl TensorType {
    pub fn new(element: ElementType, shape: ShapeHandle) -> Self {
        TensorType {
            element,
            shape,
            subtypes: Vec::new(),
        }
    }

    pub fn unranked(element: ElementType) -> Self {
        Self::new(element, ShapeHandle::Unranked)
    }

    pub fn with_subtypes(mut self, subtypes: Vec<TensorType>) -> Self {
        self.subtypes = subtypes;
        self
    }
}

impl std::fmt::Display for TensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.shape {
            ShapeHandle::Unranked => write!(f, "tensor<*x{}>", self.element)?,
            ShapeHandle::Ranked(dims) if dims.is_empty() => {
                write!(f, "tensor<{}>", self.element)?
            }
            ShapeHandle::Ranked(dims) => {
                write!(f, "tensor<")?;
                for &d in dims {
                    if d < 0 {
                        write!(f, "?x")?;
                    } else {
                        write!(f, "{}x", d)?;
                    }
                }
                write!(f, "{}>", self.element)?;
            }
        }
        if !self.subtypes.is_empty() {
            write!(f, "<{}>", self.subtypes.iter().map(|t| t.to_string()).join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_dims_compare_equal() {
        let a = ShapeHandle::ranked([-1, 4]);
        let b = ShapeHandle::ranked([-2, 4]);
        assert!(a.same_as(&b));
        assert!(a.same_as(&ShapeHandle::ranked([3, 4])));
        assert!(!a.same_as(&ShapeHandle::ranked([3, 4, 5])));
        assert!(!a.same_as(&ShapeHandle::Unranked));
    }

    #[test]
    fn merge_is_monotone() {
        let old = ShapeHandle::ranked([2, -1]);
        let new = ShapeHandle::ranked([-1, 7]);
        assert_eq!(old.merge(&new), ShapeHandle::ranked([2, 7]));
        // Never regress to unranked.
        assert_eq!(old.merge(&ShapeHandle::Unranked), old);
    }

    #[test]
    fn display_marks_unknowns() {
        let t = TensorType::new(ElementType::F32, ShapeHandle::ranked([-1, 4]));
        assert_eq!(t.to_string(), "tensor<?x4xf32>");
        assert_eq!(
            TensorType::unranked(ElementType::I64).to_string(),
            "tensor<*xi64>"
        );
    }
}
