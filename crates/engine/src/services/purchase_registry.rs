//! Purchase registry service.
//!
//! Purchases only carry accounting totals; there are no ledger legs to
//! orchestrate, so both operations are single dispatches.

use chrono::Utc;
use serde_json::Value as JsonValue;

use facturo_core::{AggregateId, AggregateRoot};
use facturo_events::{EventBus, EventEnvelope};
use facturo_purchasing::{Cancel, Purchase, PurchaseCommand, Register};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

pub(crate) const PURCHASE_AGGREGATE: &str = "purchasing.purchase";

#[derive(Debug, Clone)]
pub struct PurchaseRegistry<S, B> {
    dispatcher: CommandDispatcher<S, B>,
}

impl<S, B> PurchaseRegistry<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
        }
    }

    pub fn register(&self, cmd: Register) -> Result<Purchase, DispatchError> {
        let purchase_id = AggregateId::new();
        self.dispatcher.dispatch::<Purchase>(
            purchase_id,
            PURCHASE_AGGREGATE,
            PurchaseCommand::Register(cmd),
            Purchase::empty,
        )?;
        self.dispatcher.load(purchase_id, Purchase::empty)
    }

    pub fn cancel(
        &self,
        purchase_id: AggregateId,
        reason: Option<String>,
    ) -> Result<Purchase, DispatchError> {
        self.dispatcher.dispatch::<Purchase>(
            purchase_id,
            PURCHASE_AGGREGATE,
            PurchaseCommand::Cancel(Cancel {
                reason,
                occurred_at: Utc::now(),
            }),
            Purchase::empty,
        )?;
        self.dispatcher.load(purchase_id, Purchase::empty)
    }

    pub fn purchase_of(&self, purchase_id: AggregateId) -> Result<Purchase, DispatchError> {
        let purchase = self.dispatcher.load(purchase_id, Purchase::empty)?;
        if purchase.version() == 0 {
            return Err(DispatchError::NotFound);
        }
        Ok(purchase)
    }
}
