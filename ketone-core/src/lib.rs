//! Ketone is a client-side record store over REST backends.
//!
//! Core concepts:
//! - **Record**: a typed, identity-mapped object with a lifecycle state
//!   (loading, loaded, new, dirty, saving, deleted, invalid, error)
//! - **Store**: owns the identity map, drives finds, loads and commits
//! - **LiveCollection**: a list of records that fills in as responses arrive
//! - **Adapter**: turns finds and commits into requests; `RestAdapter` speaks
//!   the `/<plural>[/<id>]` convention through a `Transport`
//! - **TypeRegistry**: the attribute and relationship schema of every type
//!
//! # Example
//!
//! ```
//! use ketone_core::{AdapterConfig, Codec, MemoryTransport, RestAdapter, Store, TypeDescriptor, TypeRegistry};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let mut registry = TypeRegistry::new();
//! registry.register(TypeDescriptor::new("person").attr("name", Codec::String));
//!
//! let transport = Arc::new(MemoryTransport::new());
//! let config = AdapterConfig::new().with_plural("person", "people");
//! let store = Store::new(registry, RestAdapter::new(Arc::clone(&transport), config)).unwrap();
//!
//! // Nothing is loaded yet: the record is a shell and one request is out.
//! let person = store.find("person", 1).unwrap();
//! assert!(!person.is_loaded());
//! assert_eq!(transport.last_request().unwrap().url, "/people/1");
//!
//! transport.respond(json!({"person": {"id": 1, "name": "Tom Dale"}}));
//! assert_eq!(person.decode::<String>("name").unwrap(), "Tom Dale");
//! ```
//!
//! # Ordering
//!
//! Responses are applied one at a time. Within a response every sideloaded
//! record is in the store before the primary record changes state, and
//! settlement callbacks run last, with no store locks held other than the
//! re-entrant apply lock.

extern crate self as ketone_core;

mod adapter;
mod collection;
mod commit;
mod config;
mod deferred;
mod error;
mod id;
mod identity;
mod inflect;
mod model;
mod record;
mod relationship;
mod schema;
mod serializer;
mod store;
mod transport;

pub use adapter::{Adapter, CommitBatch, Completion, FindRequest, RestAdapter};
pub use collection::LiveCollection;
pub use commit::Commit;
pub use config::AdapterConfig;
pub use deferred::Settlement;
pub use error::{ConfigError, Errors, Failure, SchemaError, StoreError, classify};
pub use id::RecordId;
pub use inflect::{Inflector, camelize, underscore};
pub use model::Model;
pub use record::{Operation, Record, RecordState, Snapshot};
pub use relationship::{HasManyRef, Reference};
pub use schema::{Attribute, Codec, Relationship, RelationshipKind, TypeDescriptor, TypeRegistry};
pub use serializer::{Extracted, Normalized, Primary, Serializer, Shape};
pub use store::Store;
pub use transport::{HttpFailure, HttpRequest, MemoryTransport, Method, Responder, Transport};

#[cfg(feature = "derive")]
pub use ketone_derive::Model;
