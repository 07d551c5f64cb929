//! Payload values exchanged with the engine.
//!
//! Requests and replies are nested string-keyed maps whose leaves are scalars,
//! strings, heterogeneous lists, or rectangular homogeneous arrays.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// String-keyed mapping used for every request and reply payload.
pub type Map = BTreeMap<String, Value>;

/// A single payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Heterogeneous sequence, passed through the array transform untouched.
    List(Vec<Value>),
    /// Rectangular array with a single element kind.
    Array(NdArray),
    Map(Map),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as a float; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<NdArray> for Value {
    fn from(a: NdArray) -> Self {
        Value::Array(a)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

/// Element storage of an [`NdArray`], in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Int(v) => v.len(),
            ArrayData::Float(v) => v.len(),
            ArrayData::Bool(v) => v.len(),
            ArrayData::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements as scalar values, in storage order.
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            ArrayData::Int(v) => v.iter().copied().map(Value::Int).collect(),
            ArrayData::Float(v) => v.iter().copied().map(Value::Float).collect(),
            ArrayData::Bool(v) => v.iter().copied().map(Value::Bool).collect(),
            ArrayData::Str(v) => v.iter().cloned().map(Value::Str).collect(),
        }
    }

    /// Rebuild array storage from scalar values.
    ///
    /// All-int lists stay integer, mixed int/float lists widen to float, and an
    /// empty list carries no element kind so it becomes float.
    pub fn from_values(values: &[Value]) -> Result<ArrayData> {
        if values.is_empty() {
            return Ok(ArrayData::Float(Vec::new()));
        }
        if values.iter().all(|v| matches!(v, Value::Int(_))) {
            return Ok(ArrayData::Int(
                values.iter().filter_map(Value::as_i64).collect(),
            ));
        }
        if values
            .iter()
            .all(|v| matches!(v, Value::Int(_) | Value::Float(_)))
        {
            return Ok(ArrayData::Float(
                values.iter().filter_map(Value::as_f64).collect(),
            ));
        }
        if values.iter().all(|v| matches!(v, Value::Bool(_))) {
            return Ok(ArrayData::Bool(
                values.iter().filter_map(Value::as_bool).collect(),
            ));
        }
        if values.iter().all(|v| matches!(v, Value::Str(_))) {
            return Ok(ArrayData::Str(
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ));
        }
        let kinds: Vec<&str> = values.iter().map(Value::kind).collect();
        Err(Error::Deserialization(format!(
            "array elements must share one scalar kind, got {:?}",
            kinds
        )))
    }
}

/// Rectangular array of any rank.
#[derive(Debug, Clone)]
pub struct NdArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl NdArray {
    /// Create an array, checking that the shape matches the element count.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                Error::Deserialization(format!("shape {:?} overflows the element count", shape))
            })?;
        if expected != data.len() {
            return Err(Error::Deserialization(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional float array.
    pub fn from_f64(values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            data: ArrayData::Float(values),
        }
    }

    /// One-dimensional string array.
    pub fn from_strings(values: Vec<String>) -> Self {
        Self {
            shape: vec![values.len()],
            data: ArrayData::Str(values),
        }
    }

    /// `n x 3` float array from row vectors.
    pub fn from_rows(rows: &[[f64; 3]]) -> Self {
        Self {
            shape: vec![rows.len(), 3],
            data: ArrayData::Float(rows.iter().flatten().copied().collect()),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Numeric elements widened to `f64`, or `None` for bool/string arrays.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match &self.data {
            ArrayData::Float(v) => Some(v.clone()),
            ArrayData::Int(v) => Some(v.iter().map(|&i| i as f64).collect()),
            _ => None,
        }
    }

    /// Rows of an `n x 3` numeric array.
    pub fn to_rows(&self) -> Option<Vec<[f64; 3]>> {
        if self.shape.len() != 2 || self.shape[1] != 3 {
            return None;
        }
        let flat = self.to_f64_vec()?;
        Some(
            flat.chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
        )
    }

    /// Copy of this array with every element scaled; `None` for non-numeric data.
    pub fn scaled(&self, factor: f64) -> Option<NdArray> {
        let flat = self.to_f64_vec()?;
        Some(NdArray {
            shape: self.shape.clone(),
            data: ArrayData::Float(flat.into_iter().map(|x| x * factor).collect()),
        })
    }
}

impl PartialEq for NdArray {
    // Empty arrays of equal shape match whatever their element kind: the wire
    // cannot carry the kind of an empty sequence.
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && (self.data.is_empty() || self.data == other.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_must_match_len() {
        assert!(NdArray::new(vec![2, 3], ArrayData::Int(vec![1, 2, 3, 4, 5, 6])).is_ok());
        let err = NdArray::new(vec![2, 2], ArrayData::Int(vec![1, 2, 3])).unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[test]
    fn test_from_values_kinds() {
        let ints = ArrayData::from_values(&[Value::Int(1), Value::Int(2)]).unwrap();
        assert_eq!(ints, ArrayData::Int(vec![1, 2]));

        let mixed = ArrayData::from_values(&[Value::Int(1), Value::Float(2.5)]).unwrap();
        assert_eq!(mixed, ArrayData::Float(vec![1.0, 2.5]));

        let strs = ArrayData::from_values(&["H".into(), "O".into()]).unwrap();
        assert_eq!(strs, ArrayData::Str(vec!["H".into(), "O".into()]));

        assert!(ArrayData::from_values(&[Value::Int(1), Value::Str("x".into())]).is_err());
    }

    #[test]
    fn test_rows_roundtrip() {
        let rows = [[0.0, 0.0, 0.0], [1.0, 2.0, 3.0]];
        let array = NdArray::from_rows(&rows);
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array.to_rows().unwrap(), rows.to_vec());
        assert!(NdArray::from_f64(vec![1.0, 2.0]).to_rows().is_none());
    }

    #[test]
    fn test_empty_arrays_compare_by_shape() {
        let a = NdArray::new(vec![0], ArrayData::Int(vec![])).unwrap();
        let b = NdArray::new(vec![0], ArrayData::Float(vec![])).unwrap();
        let c = NdArray::new(vec![0, 3], ArrayData::Float(vec![])).unwrap();
        assert_eq!(a, b);
        assert_ne!(b, c);
    }
}
