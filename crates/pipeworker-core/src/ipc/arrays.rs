//! Array flattening for the wire format.
//!
//! The message encoding has no multi-dimensional array type. An array stored
//! at key `K` travels as a flat element list at `K` plus its shape, reversed,
//! at `K_dim_`.

use super::value::{ArrayData, Map, NdArray, Value};
use crate::error::{Error, Result};

/// Suffix of the companion key carrying an array's shape.
pub const DIM_SUFFIX: &str = "_dim_";

/// Replace every array in `payload` (recursively) by flat data plus shape.
pub fn flatten(payload: &Map) -> Map {
    let mut out = Map::new();
    for (key, value) in payload {
        match value {
            Value::Array(array) => {
                out.insert(key.clone(), Value::List(array.data().to_values()));
                let dims = array
                    .shape()
                    .iter()
                    .rev()
                    .map(|&d| Value::Int(d as i64))
                    .collect();
                out.insert(format!("{}{}", key, DIM_SUFFIX), Value::List(dims));
            }
            Value::Map(inner) => {
                out.insert(key.clone(), Value::Map(flatten(inner)));
            }
            other => {
                out.insert(key.clone(), other.clone());
            }
        }
    }
    out
}

/// Reverse [`flatten`]: reshape every list that has a `_dim_` sibling.
///
/// Shape keys are dropped from the result.
pub fn unflatten(mut payload: Map) -> Result<Map> {
    let mut out = Map::new();
    let keys: Vec<String> = payload.keys().cloned().collect();
    for key in keys {
        if key.ends_with(DIM_SUFFIX) {
            continue;
        }
        let Some(value) = payload.remove(&key) else {
            continue;
        };
        let dim_key = format!("{}{}", key, DIM_SUFFIX);
        let value = if let Some(dims) = payload.get(&dim_key) {
            Value::Array(reshape(&key, value, dims)?)
        } else if let Value::Map(inner) = value {
            Value::Map(unflatten(inner)?)
        } else {
            value
        };
        out.insert(key, value);
    }
    Ok(out)
}

fn reshape(key: &str, value: Value, dims: &Value) -> Result<NdArray> {
    let Value::List(dims) = dims else {
        return Err(Error::Deserialization(format!(
            "Shape of '{}' must be a list, got {}",
            key,
            dims.kind()
        )));
    };
    let mut shape = Vec::with_capacity(dims.len());
    for dim in dims.iter().rev() {
        let d = dim
            .as_i64()
            .filter(|&d| d >= 0)
            .ok_or_else(|| {
                Error::Deserialization(format!("Invalid dimension {:?} for '{}'", dim, key))
            })?;
        shape.push(d as usize);
    }

    let data = match value {
        Value::List(items) => ArrayData::from_values(&items)?,
        Value::Array(array) => array.data().clone(),
        // A single scalar with shape [1] or [] is still a valid array.
        scalar @ (Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Str(_)) => {
            ArrayData::from_values(&[scalar])?
        }
        other => {
            return Err(Error::Deserialization(format!(
                "Cannot reshape {} stored at '{}'",
                other.kind(),
                key
            )));
        }
    };

    NdArray::new(shape, data)
        .map_err(|e| Error::Deserialization(format!("Array '{}': {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Map {
        let coords = NdArray::from_rows(&[[0.0, 0.0, 0.1], [1.5, -2.0, 3.25]]);
        let symbols = NdArray::from_strings(vec!["O".into(), "H".into()]);
        let cube = NdArray::new(vec![2, 2, 2], ArrayData::Int((0..8).collect())).unwrap();
        let empty = NdArray::new(vec![0], ArrayData::Float(vec![])).unwrap();

        let mut inner = Map::new();
        inner.insert("cube".into(), cube.into());
        inner.insert("label".into(), "nested".into());

        let mut map = Map::new();
        map.insert("coords".into(), coords.into());
        map.insert("atomSymbols".into(), symbols.into());
        map.insert("empty".into(), empty.into());
        map.insert("inner".into(), Value::Map(inner));
        map.insert("totalCharge".into(), Value::Float(0.0));
        map.insert("name".into(), "water".into());
        map
    }

    #[test]
    fn test_flatten_stores_reversed_shape() {
        let flat = flatten(&sample());

        assert_eq!(
            flat["coords_dim_"],
            Value::List(vec![Value::Int(3), Value::Int(2)])
        );
        match &flat["coords"] {
            Value::List(items) => {
                assert_eq!(items.len(), 6);
                assert_eq!(items[3], Value::Float(1.5));
            }
            other => panic!("coords not flattened: {:?}", other),
        }
        assert_eq!(flat["empty_dim_"], Value::List(vec![Value::Int(0)]));
        assert_eq!(flat["empty"], Value::List(vec![]));

        let inner = flat["inner"].as_map().unwrap();
        assert!(inner.contains_key("cube_dim_"));
        assert_eq!(flat["name"], Value::from("water"));
    }

    #[test]
    fn test_unflatten_inverts_flatten() {
        let original = sample();
        let restored = unflatten(flatten(&original)).unwrap();
        assert_eq!(restored, original);
        assert!(!restored.keys().any(|k| k.ends_with(DIM_SUFFIX)));
    }

    #[test]
    fn test_roundtrip_survives_wire_encoding() {
        use crate::ipc::message::{decode, encode};

        let original = sample();
        let bytes = encode(&flatten(&original)).unwrap();
        let restored = unflatten(decode(&bytes).unwrap()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_unflatten_rejects_bad_shape() {
        let mut map = Map::new();
        map.insert(
            "x".into(),
            Value::List(vec![Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)]),
        );
        map.insert(
            "x_dim_".into(),
            Value::List(vec![Value::Int(2), Value::Int(2)]),
        );
        assert!(matches!(unflatten(map), Err(Error::Deserialization(_))));
    }

    #[test]
    fn test_unflatten_rejects_overflowing_shape() {
        let mut map = Map::new();
        map.insert("x".into(), Value::List(vec![]));
        map.insert(
            "x_dim_".into(),
            Value::List(vec![Value::Int(1 << 62), Value::Int(1 << 62)]),
        );
        let err = unflatten(map).unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
        assert!(err.is_transport());
    }

    #[test]
    fn test_orphan_dim_keys_are_dropped() {
        let mut map = Map::new();
        map.insert("stale_dim_".into(), Value::List(vec![Value::Int(3)]));
        map.insert("plain".into(), Value::List(vec![Value::Int(1), "a".into()]));
        let out = unflatten(map).unwrap();
        assert_eq!(out.len(), 1);
        assert!(matches!(out["plain"], Value::List(_)));
    }
}
