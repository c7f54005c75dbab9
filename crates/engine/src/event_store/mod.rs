//! Append-only event store boundary.
//!
//! Events are organized into streams, one stream per ledger key or document.
//! The stream is the serialization boundary: appends carry an expected
//! version, so two writers that read the same balance cannot both commit.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
