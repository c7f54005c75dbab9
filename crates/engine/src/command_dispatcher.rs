//! Command execution pipeline.
//!
//! Every write in the system goes through the same pipeline:
//!
//! ```text
//! 1. Load the aggregate's stream from the store
//! 2. Rehydrate the aggregate (fold historical events)
//! 3. Handle the command (pure decision logic)
//! 4. Append the decided events with an optimistic concurrency check
//! 5. Publish the committed events to the bus
//! ```
//!
//! Step 4 is the serialization boundary for every ledger key: the append
//! expects the exact version read in step 1, so two writers racing on the
//! same balance cannot both commit. If publication fails after a successful
//! append, the events are already durable and delivery is at-least-once.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use facturo_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use facturo_events::{EventBus, EventEnvelope};
use rust_decimal::Decimal;

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale stream version or a domain
    /// conflict such as a duplicate unique key).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Domain validation failure (deterministic).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Domain invariant failure (deterministic).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An outgoing stock movement would drive the quantity negative.
    #[error("insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: AggregateId,
        available: Decimal,
        requested: Decimal,
    },

    /// A lifecycle operation was attempted from a disallowed status.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Referenced aggregate absent.
    #[error("not found")]
    NotFound,

    /// Failed to deserialize historical event payloads.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),

    /// Persisting to the event store failed.
    #[error("event store failure: {0}")]
    Store(EventStoreError),

    /// Publication failed after a successful append (at-least-once).
    #[error("event publication failed: {0}")]
    Publish(String),

    /// An external collaborator (e.g. the tax authority client) failed.
    #[error("external call failed: {0}")]
    External(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::InsufficientStock {
                product_id,
                available,
                requested,
            } => DispatchError::InsufficientStock {
                product_id,
                available,
                requested,
            },
            DomainError::InvalidStateTransition(msg) => DispatchError::InvalidStateTransition(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run against the in-memory
/// implementations and a real backend can be swapped in without touching
/// domain code. Cloning is cheap when `S`/`B` are `Arc`s, which is how the
/// ledger services share one store.
#[derive(Debug, Clone)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// `make_aggregate` is a factory for a fresh instance (e.g.
    /// `Stock::empty`); the dispatcher rehydrates it from the stream before
    /// handling the command. Returns the committed events with their
    /// assigned sequence numbers.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: facturo_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(aggregate_id, aggregate_type.clone(), Uuid::now_v7(), ev)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// Load and rehydrate an aggregate without dispatching a command.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }
}

/// Decode committed events back into their typed form.
pub fn decode_events<E: DeserializeOwned>(stored: &[StoredEvent]) -> Result<Vec<E>, DispatchError> {
    stored
        .iter()
        .map(|e| {
            serde_json::from_value(e.payload.clone())
                .map_err(|err| DispatchError::Deserialize(err.to_string()))
        })
        .collect()
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Reject cross-stream data and non-monotonic sequence numbers even if a
    // buggy backend returns them.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!("loaded stream contains wrong aggregate_id at index {idx}"),
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
