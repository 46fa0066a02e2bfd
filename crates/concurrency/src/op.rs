//! Transaction operations and write origin

use vellum_core::Value;

/// One operation of a transaction batch
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOp {
    /// Write `value` under `key`
    Put {
        /// Target key
        key: String,
        /// Record to encode and store
        value: Value,
    },
    /// Remove `key` (absent keys are fine)
    Delete {
        /// Target key
        key: String,
    },
}

impl TransactionOp {
    /// Put operation
    pub fn put(key: impl Into<String>, value: impl Into<Value>) -> Self {
        TransactionOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Delete operation
    pub fn delete(key: impl Into<String>) -> Self {
        TransactionOp::Delete { key: key.into() }
    }

    /// Key this operation touches
    pub fn key(&self) -> &str {
        match self {
            TransactionOp::Put { key, .. } | TransactionOp::Delete { key } => key,
        }
    }

    /// Value left under the key once this operation commits
    pub fn final_value(&self) -> Option<&Value> {
        match self {
            TransactionOp::Put { value, .. } => Some(value),
            TransactionOp::Delete { .. } => None,
        }
    }

    /// Stored name of the operation kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            TransactionOp::Put { .. } => "put",
            TransactionOp::Delete { .. } => "delete",
        }
    }
}

/// Where a write came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Origin {
    /// Initiated on this node; replicated after commit
    #[default]
    Local,
    /// Applied from a peer; never echoed back
    Remote,
}

impl Origin {
    /// True for local writes
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }
}
