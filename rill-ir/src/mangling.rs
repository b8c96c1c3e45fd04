//! Canonical, reversible string encodings for type- and shape-valued
//! attributes, so they survive the trip through string attributes
//! without loss.

use itertools::Itertools;
use rill_graph::{ElementType, ShapeHandle};
use rill_utils::{Error, RillResult};

const TYPE_PREFIX: &str = "dtype$";
const SHAPE_PREFIX: &str = "shape$";
const ATTR_PREFIX: &str = "rill.";

/// Encode an element type as a string attribute payload.
pub fn mangle_type(ty: ElementType) -> String {
    format!("{}{}", TYPE_PREFIX, ty.as_str())
}

/// Inverse of [`mangle_type`].
pub fn demangle_type(s: &str) -> RillResult<ElementType> {
    let rest = s.strip_prefix(TYPE_PREFIX).ok_or_else(|| {
        Error::malformed_structure(format!("`{}' is not a mangled element type", s))
    })?;
    ElementType::parse(rest).ok_or_else(|| {
        Error::malformed_structure(format!("unknown element type `{}'", rest))
    })
}

/// Encode a shape as a string attribute payload. Unranked shapes encode
/// as `*`; unknown dimensions as `?`.
pub fn mangle_shape(shape: &ShapeHandle) -> String {
    match shape {
        ShapeHandle::Unranked => format!("{}*", SHAPE_PREFIX),
        ShapeHandle::Ranked(dims) => {
            let body = dims
                .iter()
                .map(|&d| {
                    if d < 0 {
                        "?".to_string()
                    } else {
                        d.to_string()
                    }
                })
                .join("x");
            format!("{}{}", SHAPE_PREFIX, body)
        }
    }
}

/// Inverse of [`mangle_shape`].
pub fn demangle_shape(s: &str) -> RillResult<ShapeHandle> {
    let rest = s.strip_prefix(SHAPE_PREFIX).ok_or_else(|| {
        Error::malformed_structure(format!("`{}' is not a mangled shape", s))
    })?;
    if rest == "*" {
        return Ok(ShapeHandle::Unranked);
    }
    if rest.is_empty() {
        return Ok(ShapeHandle::scalar());
    }
    let dims = rest
        .split('x')
        .map(|part| {
            if part == "?" {
                Ok(-1)
            } else {
                part.parse::<i64>().map_err(|_| {
                    Error::malformed_structure(format!(
                        "bad dimension `{}' in mangled shape",
                        part
                    ))
                })
            }
        })
        .collect::<RillResult<Vec<i64>>>()?;
    Ok(ShapeHandle::ranked(dims))
}

/// Namespace a function-definition attribute name.
pub fn mangle_attr_name(name: &str) -> String {
    format!("{}{}", ATTR_PREFIX, name)
}

/// Inverse of [`mangle_attr_name`].
pub fn demangle_attr_name(name: &str) -> Option<&str> {
    name.strip_prefix(ATTR_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn types_round_trip() {
        for ty in [
            ElementType::F32,
            ElementType::I64,
            ElementType::Bool,
            ElementType::Resource,
        ] {
            assert_eq!(demangle_type(&mangle_type(ty)).unwrap(), ty);
        }
    }

    #[test]
    fn shapes_round_trip() {
        for shape in [
            ShapeHandle::Unranked,
            ShapeHandle::scalar(),
            ShapeHandle::ranked([2, -1, 4]),
        ] {
            assert_eq!(demangle_shape(&mangle_shape(&shape)).unwrap(), shape);
        }
    }

    #[test]
    fn rejects_foreign_strings() {
        assert!(demangle_type("f32").is_err());
        assert!(demangle_shape("shape$2xq").is_err());
    }
}
