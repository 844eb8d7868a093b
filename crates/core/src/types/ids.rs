//! Record and collection identities

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Client-generated identity of a record
///
/// Stable for the whole local lifetime of a record and never sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(Uuid);

impl LocalId {
    /// Creates a new random LocalId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a LocalId from a UUID string
    pub fn from_string(s: &str) -> CoreResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|source| CoreError::InvalidLocalId {
                value: s.to_string(),
                source,
            })
    }

    /// Returns the LocalId as a string
    pub fn as_string(&self) -> String {
        self.0.to_string()
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity recognised by the backend
///
/// Opaque to the engine: it is only compared for equality and passed back to
/// the collaborator. Numeric identities are stored in their decimal form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Creates a ServerId, rejecting empty strings
    pub fn parse(s: impl Into<String>) -> CoreResult<Self> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(CoreError::EmptyServerId);
        }
        Ok(Self(s))
    }

    /// Returns the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the numeric value if this identity is a decimal integer
    pub fn as_u64(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl From<u64> for ServerId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a synchronised record collection
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionKey(String);

impl CollectionKey {
    /// Creates a CollectionKey, rejecting empty names
    pub fn parse(s: impl Into<String>) -> CoreResult<Self> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(CoreError::EmptyCollectionKey);
        }
        Ok(Self(s))
    }

    /// Returns the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key is blank
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for CollectionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CollectionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
