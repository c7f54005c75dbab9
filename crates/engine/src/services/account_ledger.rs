//! Current-account ledger service.

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::warn;

use facturo_accounts::{
    AccountKey, Currency, CurrentAccount, CurrentAccountCommand, CurrentAccountEvent, CustomerId,
    MovementPosted, PostMovement, SetCreditLimit,
};
use facturo_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, decode_events};
use crate::event_store::EventStore;

pub(crate) const ACCOUNT_AGGREGATE: &str = "account.current_account";

/// Append-only account movement ledger, one stream per (customer, currency).
///
/// Accounts are find-or-create: posting to a customer/currency pair that has
/// never moved simply starts its stream.
#[derive(Debug, Clone)]
pub struct CurrentAccountLedger<S, B> {
    dispatcher: CommandDispatcher<S, B>,
}

impl<S, B> CurrentAccountLedger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
        }
    }

    /// Append one movement and return the committed record.
    pub fn add_movement(&self, cmd: PostMovement) -> Result<MovementPosted, DispatchError> {
        let key = AccountKey::new(cmd.customer_id, cmd.currency);
        let committed = self.dispatcher.dispatch::<CurrentAccount>(
            key.stream_id(),
            ACCOUNT_AGGREGATE,
            CurrentAccountCommand::PostMovement(cmd),
            CurrentAccount::empty,
        )?;

        let posted = decode_events::<CurrentAccountEvent>(&committed)?
            .into_iter()
            .find_map(|e| match e {
                CurrentAccountEvent::MovementPosted(m) => Some(m),
                _ => None,
            })
            .ok_or_else(|| DispatchError::Deserialize("movement record missing".to_string()))?;

        let account = self.account_of(posted.customer_id, posted.currency)?;
        if account.over_limit() {
            warn!(
                customer_id = %posted.customer_id,
                currency = %posted.currency,
                balance = %account.balance(),
                credit_limit = ?account.credit_limit(),
                "customer account over credit limit"
            );
        }

        Ok(posted)
    }

    /// Set or clear the credit limit (advisory threshold, not a hard floor).
    pub fn set_credit_limit(&self, cmd: SetCreditLimit) -> Result<(), DispatchError> {
        let key = AccountKey::new(cmd.customer_id, cmd.currency);
        self.dispatcher.dispatch::<CurrentAccount>(
            key.stream_id(),
            ACCOUNT_AGGREGATE,
            CurrentAccountCommand::SetCreditLimit(cmd),
            CurrentAccount::empty,
        )?;
        Ok(())
    }

    /// Current folded state for a key (a missing stream is a zero account).
    pub fn account_of(
        &self,
        customer_id: CustomerId,
        currency: Currency,
    ) -> Result<CurrentAccount, DispatchError> {
        let key = AccountKey::new(customer_id, currency);
        self.dispatcher.load(key.stream_id(), CurrentAccount::empty)
    }

    pub fn balance_of(
        &self,
        customer_id: CustomerId,
        currency: Currency,
    ) -> Result<Decimal, DispatchError> {
        Ok(self.account_of(customer_id, currency)?.balance())
    }
}
