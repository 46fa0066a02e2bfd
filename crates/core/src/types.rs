//! Core identifier types
//!
//! - EntityId: id of one tiered entity (index row + detail blob)
//! - KindName: name of an entity kind, which doubles as its key prefix

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Word that can never be used as an entity id (it names the index key)
pub const RESERVED_ID: &str = "index";

/// Longest entity id, in bytes
pub const MAX_ID_LEN: usize = 80;

/// Longest kind name, in bytes; with [`MAX_ID_LEN`] every derived key stays
/// short enough to serve as a file name
pub const MAX_KIND_LEN: usize = 32;

fn valid_token(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_ID_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Identifier of a tiered entity
///
/// Ids are ASCII letters, digits, `-` and `_`. New ids are UUID v4 strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Create a new random id (UUID v4)
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse and validate an id
    ///
    /// # Errors
    /// Returns `InvalidOperation` for empty ids, ids containing characters
    /// outside `[A-Za-z0-9_-]`, and the reserved id `index`.
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if !valid_token(&s) {
            return Err(Error::invalid(format!("invalid entity id '{}'", s)));
        }
        if s == RESERVED_ID {
            return Err(Error::invalid("entity id 'index' is reserved"));
        }
        Ok(Self(s))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EntityId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        EntityId::parse(s)
    }
}

impl TryFrom<&str> for EntityId {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        EntityId::parse(s)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Name of an entity kind (`entity`, `customer`, ...)
///
/// Lowercase ASCII letters, digits and `-`; no underscore, so the
/// `{kind}_{id}` key form splits unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KindName(String);

impl KindName {
    /// The default kind, producing `entity_index` and `entity_{id}` keys
    pub fn default_kind() -> Self {
        KindName("entity".to_string())
    }

    /// Parse and validate a kind name
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let ok = !s.is_empty()
            && s.len() <= MAX_KIND_LEN
            && s.bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if !ok {
            return Err(Error::invalid(format!("invalid kind name '{}'", s)));
        }
        Ok(KindName(s))
    }

    /// The name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KindName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for KindName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        KindName::parse(s)
    }
}

impl From<KindName> for String {
    fn from(k: KindName) -> Self {
        k.0
    }
}
