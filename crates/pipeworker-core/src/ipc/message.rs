//! CBOR encoding of payload maps.
//!
//! Every frame body is one CBOR map with string keys. Arrays are expected to
//! have gone through [`flatten`](super::arrays::flatten) already; an array that
//! reaches the encoder is written as its flat element list.

use ciborium::Value as Cbor;

use super::value::{Map, Value};
use crate::error::{Error, Result};

/// Encode a payload map into a frame body.
pub fn encode(map: &Map) -> Result<Vec<u8>> {
    let value = map_to_cbor(map);
    let mut bytes = Vec::new();
    ciborium::into_writer(&value, &mut bytes)
        .map_err(|e| Error::Serialization(format!("Failed to encode message: {}", e)))?;
    Ok(bytes)
}

/// Decode a frame body into a payload map.
pub fn decode(bytes: &[u8]) -> Result<Map> {
    let value: Cbor = ciborium::from_reader(bytes)
        .map_err(|e| Error::Deserialization(format!("Failed to decode message: {}", e)))?;
    match from_cbor(value)? {
        Value::Map(map) => Ok(map),
        other => Err(Error::Deserialization(format!(
            "Expected a map at the top level of a message, got {}",
            other.kind()
        ))),
    }
}

fn map_to_cbor(map: &Map) -> Cbor {
    Cbor::Map(
        map.iter()
            .map(|(k, v)| (Cbor::Text(k.clone()), to_cbor(v)))
            .collect(),
    )
}

/// Convert a payload value into its CBOR form.
pub fn to_cbor(value: &Value) -> Cbor {
    match value {
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Int(i) => Cbor::Integer((*i).into()),
        Value::Float(f) => Cbor::Float(*f),
        Value::Str(s) => Cbor::Text(s.clone()),
        Value::List(items) => Cbor::Array(items.iter().map(to_cbor).collect()),
        Value::Array(array) => Cbor::Array(array.data().to_values().iter().map(to_cbor).collect()),
        Value::Map(map) => map_to_cbor(map),
    }
}

/// Convert a decoded CBOR value into a payload value.
pub fn from_cbor(value: Cbor) -> Result<Value> {
    Ok(match value {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Integer(i) => {
            let wide = i128::from(i);
            let narrow = i64::try_from(wide).map_err(|_| {
                Error::Deserialization(format!("Integer {} does not fit in 64 bits", wide))
            })?;
            Value::Int(narrow)
        }
        Cbor::Float(f) => Value::Float(f),
        Cbor::Text(s) => Value::Str(s),
        Cbor::Bytes(bytes) => Value::List(bytes.into_iter().map(|b| Value::Int(i64::from(b))).collect()),
        Cbor::Array(items) => Value::List(
            items
                .into_iter()
                .map(from_cbor)
                .collect::<Result<Vec<_>>>()?,
        ),
        Cbor::Map(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                let key = match key {
                    Cbor::Text(s) => s,
                    other => {
                        return Err(Error::Deserialization(format!(
                            "Message map keys must be strings, got {:?}",
                            other
                        )));
                    }
                };
                map.insert(key, from_cbor(value)?);
            }
            Value::Map(map)
        }
        Cbor::Tag(_, inner) => from_cbor(*inner)?,
        other => {
            return Err(Error::Deserialization(format!(
                "Unsupported CBOR value: {:?}",
                other
            )));
        }
    })
}
