//! Typed, shaped constant values and their wire codec.
//!
//! The encoding is deliberately simple: a header naming the element type
//! and shape, followed by the flat element buffer in little-endian
//! order. Decode failures are typed errors, never panics.

use crate::{ElementType, ShapeHandle};
use rill_utils::{Error, RillResult};
use smallvec::SmallVec;

/// Flat element storage for a tensor constant.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::Bool(v) => v.len(),
            TensorData::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn element_type(&self) -> ElementType {
        match self {
            TensorData::F32(_) => ElementType::F32,
            TensorData::F64(_) => ElementType::F64,
            TensorData::I32(_) => ElementType::I32,
            TensorData::I64(_) => ElementType::I64,
            TensorData::Bool(_) => ElementType::Bool,
            TensorData::Str(_) => ElementType::Str,
        }
    }
}

/// A decoded tensor constant: element type, concrete shape, and the flat
/// element buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorValue {
    pub dims: SmallVec<[i64; 4]>,
    pub data: TensorData,
}

impl TensorValue {
    /// Build a tensor value, checking that the buffer length matches the
    /// shape's element count.
    pub fn new(dims: impl IntoIterator<Item = i64>, data: TensorData) -> RillResult<Self> {
        let dims: SmallVec<[i64; 4]> = dims.into_iter().collect();
        let expected: i64 = dims.iter().product();
        if expected < 0 {
            return Err(Error::malformed_structure(
                "tensor constants cannot have unknown dimensions",
            ));
        }
        if expected as usize != data.len() {
            return Err(Error::malformed_structure(format!(
                "tensor buffer holds {} elements but the shape requires {}",
                data.len(),
                expected
            )));
        }
        Ok(TensorValue { dims, data })
    }

    pub fn scalar_f32(v: f32) -> Self {
        TensorValue {
            dims: SmallVec::new(),
            data: TensorData::F32(vec![v]),
        }
    }

    pub fn scalar_i64(v: i64) -> Self {
        TensorValue {
            dims: SmallVec::new(),
            data: TensorData::I64(vec![v]),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    pub fn shape(&self) -> ShapeHandle {
        ShapeHandle::ranked(self.dims.iter().copied())
    }

    /// Encode into the flat wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let tag = self.element_type().as_str();
        out.push(tag.len() as u8);
        out.extend_from_slice(tag.as_bytes());
        out.extend_from_slice(&(self.dims.len() as u32).to_le_bytes());
        for &d in &self.dims {
            out.extend_from_slice(&d.to_le_bytes());
        }
        match &self.data {
            TensorData::F32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            TensorData::F64(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            TensorData::I32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            TensorData::I64(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            TensorData::Bool(v) => v.iter().for_each(|&x| out.push(x as u8)),
            TensorData::Str(v) => {
                for s in v {
                    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
            }
        }
        out
    }

    /// Decode from the flat wire format.
    pub fn from_bytes(bytes: &[u8]) -> RillResult<Self> {
        let mut cur = Cursor { bytes, at: 0 };
        let tag_len = cur.u8()? as usize;
        let tag = std::str::from_utf8(cur.take(tag_len)?)
            .map_err(|_| Error::malformed_structure("tensor header is not valid utf-8"))?;
        let element = ElementType::parse(tag).ok_or_else(|| {
            Error::malformed_structure(format!("unknown element type tag `{}'", tag))
        })?;
        let rank = cur.u32()? as usize;
        let mut dims: SmallVec<[i64; 4]> = SmallVec::with_capacity(rank);
        for _ in 0..rank {
            dims.push(cur.i64()?);
        }
        let count: i64 = dims.iter().product();
        let count = usize::try_from(count)
            .map_err(|_| Error::malformed_structure("negative dimension in tensor header"))?;
        let data = match element {
            ElementType::F32 => {
                TensorData::F32((0..count).map(|_| cur.f32()).collect::<RillResult<_>>()?)
            }
            ElementType::F64 => {
                TensorData::F64((0..count).map(|_| cur.f64()).collect::<RillResult<_>>()?)
            }
            ElementType::I32 => {
                TensorData::I32((0..count).map(|_| cur.i32()).collect::<RillResult<_>>()?)
            }
            ElementType::I64 => {
                TensorData::I64((0..count).map(|_| cur.i64()).collect::<RillResult<_>>()?)
            }
            ElementType::Bool => TensorData::Bool(
                (0..count)
                    .map(|_| cur.u8().map(|b| b != 0))
                    .collect::<RillResult<_>>()?,
            ),
            ElementType::Str => {
                let mut strs = Vec::with_capacity(count);
                for _ in 0..count {
                    let len = cur.u32()? as usize;
                    let s = std::str::from_utf8(cur.take(len)?).map_err(|_| {
                        Error::malformed_structure("tensor string element is not valid utf-8")
                    })?;
                    strs.push(s.to_string());
                }
                TensorData::Str(strs)
            }
            other => {
                return Err(Error::unimplemented(format!(
                    "tensor constants of element type {}",
                    other
                )))
            }
        };
        TensorValue::new(dims, data)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> RillResult<&'a [u8]> {
        if self.at + n > self.bytes.len() {
            return Err(Error::malformed_structure("truncated tensor encoding"));
        }
        let s = &self.bytes[self.at..self.at + n];
        self.at += n;
        Ok(s)
    }

    fn u8(&mut self) -> RillResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> RillResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> RillResult<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> RillResult<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> RillResult<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> RillResult<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_wire_format() {
        let t = TensorValue::new([2, 2], TensorData::I32(vec![1, 2, 3, 4])).unwrap();
        let decoded = TensorValue::from_bytes(&t.to_bytes()).unwrap();
        assert_eq!(t, decoded);
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let err = TensorValue::new([3], TensorData::F32(vec![1.0])).unwrap_err();
        assert!(err.to_string().contains("requires 3"));
    }

    #[test]
    fn rejects_truncated_input() {
        let t = TensorValue::scalar_f32(1.5);
        let bytes = t.to_bytes();
        assert!(TensorValue::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
