//! Local and remote record shapes

use crate::error::{CoreError, CoreResult};
use crate::types::{Fields, LocalId, ServerId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An application entity as it lives in local state
///
/// The sync fields (`server_id`, `updated_at`) are kept apart from the
/// application `fields`, so payloads sent to the server never carry them.
/// A local record never carries a delete flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Client-side primary key
    pub local_id: LocalId,
    /// Backend identity, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    /// Last server update time, absent on purely local records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Application fields
    #[serde(default)]
    pub fields: Fields,
}

impl Record {
    /// Creates a purely local record with a fresh local identity
    pub fn new(fields: Fields) -> Self {
        Self {
            local_id: LocalId::new(),
            server_id: None,
            updated_at: None,
            fields,
        }
    }

    /// Creates a record from a JSON object
    pub fn from_value(value: Value) -> CoreResult<Self> {
        Ok(Self::new(fields_from_value(value)?))
    }

    /// Sets a known server identity (client-assigned identities)
    pub fn with_server_id(mut self, server_id: ServerId) -> Self {
        self.server_id = Some(server_id);
        self
    }

    /// Builds a local record from a live remote record under a fresh local identity
    pub fn from_remote(remote: &RemoteRecord) -> Self {
        Self {
            local_id: LocalId::new(),
            server_id: Some(remote.id.clone()),
            updated_at: Some(remote.updated_at),
            fields: remote.fields.clone(),
        }
    }

    /// Returns a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field value
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Overwrites the given fields, leaving the others untouched
    pub fn merge_fields(&mut self, fields: &Fields) {
        for (key, value) in fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Applies the server-assigned fields returned by a create
    pub fn apply_ack(&mut self, ack: &ServerAck) {
        self.server_id = Some(ack.id.clone());
        if ack.updated_at.is_some() {
            self.updated_at = ack.updated_at;
        }
        self.merge_fields(&ack.fields);
    }

    /// Returns true if the server knows this record
    pub fn is_server_known(&self) -> bool {
        self.server_id.is_some()
    }
}

/// A record as reported by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Backend identity
    pub id: ServerId,
    /// Server update time
    pub updated_at: Timestamp,
    /// Soft-delete marker; never persisted locally
    #[serde(default)]
    pub deleted: bool,
    /// Application fields
    #[serde(default)]
    pub fields: Fields,
}

impl RemoteRecord {
    /// Creates a live remote record
    pub fn new(id: ServerId, updated_at: Timestamp, fields: Fields) -> Self {
        Self {
            id,
            updated_at,
            deleted: false,
            fields,
        }
    }

    /// Marks this record as soft-deleted
    pub fn tombstone(mut self) -> Self {
        self.deleted = true;
        self
    }
}

/// Partial server fields returned by a successful create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAck {
    /// Assigned backend identity
    pub id: ServerId,
    /// Server update time
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    /// Any additional server-computed fields
    #[serde(default)]
    pub fields: Fields,
}

impl ServerAck {
    /// Creates an ack carrying only the identity and timestamp
    pub fn new(id: ServerId, updated_at: Timestamp) -> Self {
        Self {
            id,
            updated_at: Some(updated_at),
            fields: Fields::new(),
        }
    }
}

/// Converts a JSON object into a field map
pub fn fields_from_value(value: Value) -> CoreResult<Fields> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Err(CoreError::NotAnObject { kind: "null" }),
        Value::Bool(_) => Err(CoreError::NotAnObject { kind: "bool" }),
        Value::Number(_) => Err(CoreError::NotAnObject { kind: "number" }),
        Value::String(_) => Err(CoreError::NotAnObject { kind: "string" }),
        Value::Array(_) => Err(CoreError::NotAnObject { kind: "array" }),
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new(Fields::new())
    }
}
