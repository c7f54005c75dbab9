//! Document numbering service.

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::debug;

use facturo_events::{EventBus, EventEnvelope};
use facturo_numbering::{
    AssignNumber, DocumentType, NumberAssigned, NumberSequence, NumberSequenceCommand,
    NumberSequenceEvent, SequenceKey,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, decode_events};
use crate::event_store::EventStore;

pub(crate) const SEQUENCE_AGGREGATE: &str = "numbering.sequence";

/// Retry bound for losing the per-key append race before surfacing the
/// conflict to the caller.
const MAX_ATTEMPTS: u32 = 5;

/// Gap-avoiding per-(document type, year) number assignment.
///
/// This is the one path in the system that retries concurrency conflicts
/// internally: losing the append race just means another writer took the
/// number, so re-reading and re-deciding always converges.
#[derive(Debug, Clone)]
pub struct DocumentNumbering<S, B> {
    dispatcher: CommandDispatcher<S, B>,
}

impl<S, B> DocumentNumbering<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
        }
    }

    /// Assign the next number for (document type, year).
    pub fn next(
        &self,
        document_type: DocumentType,
        year: i32,
    ) -> Result<NumberAssigned, DispatchError> {
        let key = SequenceKey::new(document_type, year);
        let mut last_conflict = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let result = self.dispatcher.dispatch::<NumberSequence>(
                key.stream_id(),
                SEQUENCE_AGGREGATE,
                NumberSequenceCommand::AssignNumber(AssignNumber {
                    document_type,
                    year,
                    occurred_at: Utc::now(),
                }),
                NumberSequence::empty,
            );

            match result {
                Ok(committed) => {
                    return decode_events::<NumberSequenceEvent>(&committed)?
                        .into_iter()
                        .map(|NumberSequenceEvent::NumberAssigned(a)| a)
                        .next()
                        .ok_or_else(|| {
                            DispatchError::Deserialize("number assignment missing".to_string())
                        });
                }
                Err(DispatchError::Concurrency(msg)) => {
                    debug!(%document_type, year, attempt, "lost numbering race, retrying");
                    last_conflict = msg;
                }
                Err(other) => return Err(other),
            }
        }

        Err(DispatchError::Concurrency(format!(
            "numbering for {document_type}-{year} contended beyond {MAX_ATTEMPTS} attempts: {last_conflict}"
        )))
    }

    /// Shorthand using the current calendar year.
    pub fn next_current_year(
        &self,
        document_type: DocumentType,
    ) -> Result<NumberAssigned, DispatchError> {
        use chrono::Datelike;
        self.next(document_type, Utc::now().year())
    }
}
