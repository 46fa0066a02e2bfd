//! Record codec.
//!
//! All records pass through [`SafeSerializer`] on their way into and out of a
//! [`KeyValueStore`](crate::KeyValueStore). Stored text is JSON with two
//! reserved single-key objects:
//!
//! - `{"$circular": true}`: a circular reference that was cut during encoding
//! - `{"$bytes": "<base64>"}`: a `Value::Bytes` payload
//!
//! # Usage
//!
//! ```ignore
//! use vellum_storage::codec::SafeSerializer;
//!
//! let text = SafeSerializer::encode(&record)?;
//! let back = SafeSerializer::decode(&text)?;
//! ```

mod safe;

pub use safe::{SafeSerializer, BYTES_TAG, CIRCULAR_TAG, MAX_NESTING_DEPTH};
