//! Record value model
//!
//! This module defines:
//! - Value: unified enum for every record stored by the engine
//! - SharedValue: reference-counted node that lets callers build graphs
//!
//! ## Record graphs
//!
//! Records handed to the engine are usually plain trees, but domain code can
//! hold on to shared nodes (`Value::Shared`) and accidentally close a loop.
//! The engine never rejects such a record outright: the serializer replaces
//! the back edge with a sentinel, which decodes to `Value::Circular`.
//!
//! ## Type Rules
//!
//! - `Int(1) != Float(1.0)`: different types are never equal
//! - `Bytes` are not `String`
//! - Two `Shared` values are equal only when they are the same node

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Ordered map used for record objects
///
/// `BTreeMap` keeps field order deterministic so the same record always
/// encodes to the same text.
pub type Map = BTreeMap<String, Value>;

/// Record value
#[derive(Debug, Clone)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (must be finite to be stored)
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Array of values
    Array(Vec<Value>),
    /// Object with string keys
    Object(Map),
    /// Shared node; may participate in a cycle
    Shared(SharedValue),
    /// Marker left where a circular reference was cut during encoding
    Circular,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            // Identity, not structure: structural comparison could loop forever
            (Value::Shared(a), Value::Shared(b)) => a.ptr_eq(b),
            (Value::Circular, Value::Circular) => true,
            _ => false,
        }
    }
}

impl Value {
    /// Create an empty object
    pub fn object() -> Self {
        Value::Object(Map::new())
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
            Value::Shared(_) => "Shared",
            Value::Circular => "Circular",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this is an object value
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as &[Value] if this is an Array value
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get as &Map if this is an Object value
    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Get as &mut Map if this is an Object value
    pub fn as_object_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Look up a field of an object; `None` for non-objects
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_object().and_then(|o| o.get(field))
    }

    /// Look up a string field of an object
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Look up an integer field of an object
    pub fn get_int(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_int)
    }

    /// Builder-style field insert; turns non-objects into an empty object first
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.is_object() {
            self = Value::object();
        }
        if let Value::Object(map) = &mut self {
            map.insert(field.into(), value.into());
        }
        self
    }

    /// Return a tree copy with every shared node replaced by its contents.
    ///
    /// Back edges are replaced with `Value::Circular`, matching what the
    /// serializer would produce.
    pub fn detached(&self) -> Value {
        let mut path = Vec::new();
        self.detach_inner(&mut path)
    }

    fn detach_inner(&self, path: &mut Vec<usize>) -> Value {
        match self {
            Value::Array(items) => Value::Array(items.iter().map(|v| v.detach_inner(path)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.detach_inner(path)))
                    .collect(),
            ),
            Value::Shared(node) => {
                let id = node.node_id();
                if path.contains(&id) {
                    return Value::Circular;
                }
                path.push(id);
                let inner = node.read().detach_inner(path);
                path.pop();
                inner
            }
            other => other.clone(),
        }
    }
}

// ============================================================================
// SharedValue
// ============================================================================

/// Reference-counted, interior-mutable record node
///
/// Cloning a `SharedValue` clones the handle, not the contents.
#[derive(Clone, Default)]
pub struct SharedValue(Arc<RwLock<Value>>);

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl SharedValue {
    /// Wrap a value in a new shared node
    pub fn new(value: Value) -> Self {
        SharedValue(Arc::new(RwLock::new(value)))
    }

    /// Read access to the node contents
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Value> {
        self.0.read()
    }

    /// Replace the node contents
    pub fn set(&self, value: Value) {
        *self.0.write() = value;
    }

    /// Mutate the node contents in place
    pub fn update<F: FnOnce(&mut Value)>(&self, f: F) {
        f(&mut self.0.write());
    }

    /// Stable identity of the node for cycle detection
    pub fn node_id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// True when both handles point at the same node
    pub fn ptr_eq(&self, other: &SharedValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print contents: they may point back at us
        write!(f, "SharedValue({:#x})", self.node_id())
    }
}

// ============================================================================
// From implementations for ergonomic API usage
// ============================================================================

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
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
        Value::Int(i as i64)
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::Int(i.min(i64::MAX as u64) as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i.min(i64::MAX as usize) as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(a)
    }
}

impl From<Map> for Value {
    fn from(o: Map) -> Self {
        Value::Object(o)
    }
}

impl From<SharedValue> for Value {
    fn from(node: SharedValue) -> Self {
        Value::Shared(node)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// serde_json interop for ergonomic record construction
// ============================================================================

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
