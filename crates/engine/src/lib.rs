//! Execution engine: event store, command dispatch, and the ledger services
//! that orchestrate cross-aggregate flows (transfers, remito fulfillment,
//! the invoice lifecycle).

pub mod command_dispatcher;
pub mod event_store;
pub mod services;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
