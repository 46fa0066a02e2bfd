//! Cycle-tolerant record serializer
//!
//! `encode` walks the record graph keeping the identities of the shared nodes
//! on the current path. Meeting one of them again means the graph loops back
//! on itself; that edge is written as the circular sentinel instead of
//! failing the whole write. A shared node reached twice through different
//! branches (a diamond) is not a cycle and is encoded in full both times.
//!
//! The only values `encode` refuses are the ones JSON cannot carry: non-finite
//! floats, and nesting deeper than [`MAX_NESTING_DEPTH`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map as JsonMap, Number, Value as Json};
use vellum_core::{Error, Map, Result, Value};

/// Field name of the circular-reference sentinel
pub const CIRCULAR_TAG: &str = "$circular";
/// Field name of the bytes wrapper
pub const BYTES_TAG: &str = "$bytes";
/// Deepest nesting accepted by `encode`; stays under serde_json's parse limit
pub const MAX_NESTING_DEPTH: usize = 100;

/// Record serializer
#[derive(Debug, Default, Clone, Copy)]
pub struct SafeSerializer;

impl SafeSerializer {
    /// Encode a record graph to text
    ///
    /// # Errors
    /// `Serialization` for non-finite floats or excessive nesting.
    pub fn encode(value: &Value) -> Result<String> {
        let json = Self::to_json(value)?;
        Ok(serde_json::to_string(&json)?)
    }

    /// Decode text written by `encode`
    ///
    /// # Errors
    /// `Serialization` for malformed text or a malformed `$bytes` wrapper.
    pub fn decode(text: &str) -> Result<Value> {
        let json: Json = serde_json::from_str(text)?;
        from_json(json)
    }

    /// Detach a record graph into a JSON tree, cutting cycles
    pub fn to_json(value: &Value) -> Result<Json> {
        let mut path = Vec::new();
        to_json(value, &mut path, 0)
    }
}

fn to_json(value: &Value, path: &mut Vec<usize>, depth: usize) -> Result<Json> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::serialization(format!(
            "record nesting exceeds {} levels",
            MAX_NESTING_DEPTH
        )));
    }
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => Json::Number(Number::from_f64(*f).ok_or_else(|| {
            Error::serialization(format!("float {} cannot be stored", f))
        })?),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(b) => tagged(BYTES_TAG, Json::String(STANDARD.encode(b))),
        Value::Array(items) => Json::Array(
            items
                .iter()
                .map(|v| to_json(v, path, depth + 1))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Object(map) => {
            let mut out = JsonMap::new();
            for (k, v) in map {
                out.insert(k.clone(), to_json(v, path, depth + 1)?);
            }
            Json::Object(out)
        }
        Value::Shared(node) => {
            let id = node.node_id();
            if path.contains(&id) {
                return Ok(tagged(CIRCULAR_TAG, Json::Bool(true)));
            }
            path.push(id);
            let inner = to_json(&node.read(), path, depth);
            path.pop();
            inner?
        }
        Value::Circular => tagged(CIRCULAR_TAG, Json::Bool(true)),
    })
}

fn tagged(tag: &str, payload: Json) -> Json {
    let mut map = JsonMap::new();
    map.insert(tag.to_string(), payload);
    Json::Object(map)
}

fn from_json(json: Json) -> Result<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(0.0)),
        },
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Json::Object(map) => {
            if map.len() == 1 {
                if let Some(Json::Bool(true)) = map.get(CIRCULAR_TAG) {
                    return Ok(Value::Circular);
                }
                if let Some(Json::String(encoded)) = map.get(BYTES_TAG) {
                    let bytes = STANDARD
                        .decode(encoded)
                        .map_err(|e| Error::serialization(format!("bad {} payload: {}", BYTES_TAG, e)))?;
                    return Ok(Value::Bytes(bytes));
                }
            }
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k, from_json(v)?);
            }
            Value::Object(out)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_core::SharedValue;

    #[test]
    fn test_plain_record_round_trip() {
        let record = Value::from(json!({
            "name": "Ada",
            "visits": 3,
            "balance": 12.5,
            "history": [{"service": "cut", "at": 1}, {"service": "color", "at": 2}],
            "notes": null
        }));
        let text = SafeSerializer::encode(&record).unwrap();
        assert_eq!(SafeSerializer::decode(&text).unwrap(), record);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = Value::object().with("b", 1).with("a", 2);
        let b = Value::object().with("a", 2).with("b", 1);
        assert_eq!(
            SafeSerializer::encode(&a).unwrap(),
            SafeSerializer::encode(&b).unwrap()
        );
    }

    #[test]
    fn test_cycle_is_replaced_by_sentinel() {
        let customer = SharedValue::new(Value::object().with("name", "Ada"));
        let visit = Value::object()
            .with("service", "cut")
            .with("customer", Value::Shared(customer.clone()));
        customer.update(|v| {
            if let Some(map) = v.as_object_mut() {
                map.insert("visits".into(), Value::Array(vec![visit.clone()]));
            }
        });

        let text = SafeSerializer::encode(&Value::Shared(customer.clone())).unwrap();
        assert!(text.contains(CIRCULAR_TAG));

        let decoded = SafeSerializer::decode(&text).unwrap();
        let visits = decoded.get("visits").unwrap().as_array().unwrap();
        assert_eq!(visits[0].get_str("service"), Some("cut"));
        assert_eq!(visits[0].get("customer"), Some(&Value::Circular));

        customer.set(Value::Null);
    }

    #[test]
    fn test_self_reference() {
        let node = SharedValue::new(Value::Null);
        node.set(Value::Array(vec![Value::Int(1), Value::Shared(node.clone())]));
        let decoded = SafeSerializer::decode(&SafeSerializer::encode(&Value::Shared(node.clone())).unwrap()).unwrap();
        assert_eq!(decoded, Value::Array(vec![Value::Int(1), Value::Circular]));
        node.set(Value::Null);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let tag = SharedValue::new(Value::from("vip"));
        let record = Value::object()
            .with("a", Value::Shared(tag.clone()))
            .with("b", Value::Shared(tag));
        let decoded = SafeSerializer::decode(&SafeSerializer::encode(&record).unwrap()).unwrap();
        assert_eq!(decoded.get_str("a"), Some("vip"));
        assert_eq!(decoded.get_str("b"), Some("vip"));
    }

    #[test]
    fn test_non_finite_float_is_unsupported() {
        let record = Value::object().with("ratio", f64::NAN);
        assert!(matches!(
            SafeSerializer::encode(&record),
            Err(Error::Serialization(_))
        ));
        assert!(SafeSerializer::encode(&Value::Float(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_bytes_round_trip() {
        let record = Value::object().with("avatar", Value::Bytes(vec![0, 1, 254, 255]));
        let text = SafeSerializer::encode(&record).unwrap();
        assert!(text.contains(BYTES_TAG));
        assert_eq!(SafeSerializer::decode(&text).unwrap(), record);
    }

    #[test]
    fn test_excessive_nesting_is_rejected() {
        let mut v = Value::Int(0);
        for _ in 0..(MAX_NESTING_DEPTH + 5) {
            v = Value::Array(vec![v]);
        }
        assert!(matches!(SafeSerializer::encode(&v), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_malformed_text() {
        assert!(matches!(
            SafeSerializer::decode("{\"unterminated\": "),
            Err(Error::Serialization(_))
        ));
        assert!(SafeSerializer::decode("{\"$bytes\": \"***\"}").is_err());
    }
}
