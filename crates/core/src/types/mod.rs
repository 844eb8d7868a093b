//! Domain types for MirrorSync
//!
//! - `ids`: local, server and collection identities
//! - `record`: local and remote record shapes
//! - `common`: timestamps and field maps

mod common;
mod ids;
mod record;

pub use common::{timestamp, Fields, Timestamp};
pub use ids::{CollectionKey, LocalId, ServerId};
pub use record::{fields_from_value, Record, RemoteRecord, ServerAck};
