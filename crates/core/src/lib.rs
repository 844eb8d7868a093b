//! Shared record model for MirrorSync
//!
//! Every crate in the workspace speaks in terms of these types:
//! - [`Record`]: the local shape of an application entity
//! - [`RemoteRecord`]: the shape the server hands back, including the soft-delete flag
//! - [`ServerAck`]: the partial server fields returned when a record is created
//! - [`LocalId`] / [`ServerId`] / [`CollectionKey`]: identities

pub mod error;
pub mod types;

pub use error::{CoreError, CoreResult, ErrorSeverity};
pub use types::{
    fields_from_value, timestamp, CollectionKey, Fields, LocalId, Record, RemoteRecord,
    ServerAck, ServerId, Timestamp,
};
