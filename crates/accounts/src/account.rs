use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use facturo_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use facturo_events::Event;

/// Customer identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub AggregateId);

impl CustomerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Cash register identifier (payment movements reference one).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CashRegisterId(pub AggregateId);

impl CashRegisterId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CashRegisterId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Closed set of account currencies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ars,
    Usd,
}

impl Currency {
    pub fn code(self) -> &'static str {
        match self {
            Currency::Ars => "ARS",
            Currency::Usd => "USD",
        }
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

/// Composite ledger key: one account stream per (customer, currency).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub customer_id: CustomerId,
    pub currency: Currency,
}

impl AccountKey {
    pub fn new(customer_id: CustomerId, currency: Currency) -> Self {
        Self {
            customer_id,
            currency,
        }
    }

    /// Deterministic stream id for this key.
    pub fn stream_id(&self) -> AggregateId {
        let mut key = Vec::with_capacity(8 + 16 + 3);
        key.extend_from_slice(b"account/");
        key.extend_from_slice(self.customer_id.0.as_uuid().as_bytes());
        key.extend_from_slice(self.currency.code().as_bytes());
        AggregateId::derived(&key)
    }
}

/// DEBIT increases what the customer owes; CREDIT decreases it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountMovementType {
    Debit,
    Credit,
}

/// Aggregate root: CurrentAccount (one per customer + currency).
///
/// The empty stream is a zero-balance account; no explicit creation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentAccount {
    id: AggregateId,
    balance: Decimal,
    credit_limit: Option<Decimal>,
    version: u64,
}

impl CurrentAccount {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            balance: Decimal::ZERO,
            credit_limit: None,
            version: 0,
        }
    }

    /// Signed balance; positive means the customer owes.
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn credit_limit(&self) -> Option<Decimal> {
        self.credit_limit
    }

    pub fn over_limit(&self) -> bool {
        match self.credit_limit {
            Some(limit) => self.balance > limit,
            None => false,
        }
    }
}

impl AggregateRoot for CurrentAccount {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PostMovement (append one signed movement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMovement {
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub movement_type: AccountMovementType,
    pub amount: Decimal,
    pub description: String,
    pub invoice_id: Option<AggregateId>,
    pub cash_register_id: Option<CashRegisterId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetCreditLimit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCreditLimit {
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub credit_limit: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentAccountCommand {
    PostMovement(PostMovement),
    SetCreditLimit(SetCreditLimit),
}

/// Event: MovementPosted, the immutable account movement record.
///
/// `balance` is the post-movement snapshot, so the running balance can be
/// read off any point of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPosted {
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub movement_type: AccountMovementType,
    pub amount: Decimal,
    pub balance: Decimal,
    pub description: String,
    pub invoice_id: Option<AggregateId>,
    pub cash_register_id: Option<CashRegisterId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CreditLimitSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLimitSet {
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub credit_limit: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentAccountEvent {
    MovementPosted(MovementPosted),
    CreditLimitSet(CreditLimitSet),
}

impl Event for CurrentAccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CurrentAccountEvent::MovementPosted(_) => "account.movement_posted",
            CurrentAccountEvent::CreditLimitSet(_) => "account.credit_limit_set",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CurrentAccountEvent::MovementPosted(e) => e.occurred_at,
            CurrentAccountEvent::CreditLimitSet(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CurrentAccount {
    type Command = CurrentAccountCommand;
    type Event = CurrentAccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CurrentAccountEvent::MovementPosted(e) => {
                self.balance = e.balance;
            }
            CurrentAccountEvent::CreditLimitSet(e) => {
                self.credit_limit = e.credit_limit;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CurrentAccountCommand::PostMovement(cmd) => self.handle_post(cmd),
            CurrentAccountCommand::SetCreditLimit(cmd) => self.handle_set_limit(cmd),
        }
    }
}

impl CurrentAccount {
    fn ensure_key(&self, customer_id: CustomerId, currency: Currency) -> Result<(), DomainError> {
        if AccountKey::new(customer_id, currency).stream_id() != self.id {
            return Err(DomainError::invariant("account key does not match stream"));
        }
        Ok(())
    }

    fn handle_post(&self, cmd: &PostMovement) -> Result<Vec<CurrentAccountEvent>, DomainError> {
        self.ensure_key(cmd.customer_id, cmd.currency)?;

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("movement amount must be positive"));
        }
        if cmd.description.trim().is_empty() {
            return Err(DomainError::validation("movement description cannot be empty"));
        }

        let balance = match cmd.movement_type {
            AccountMovementType::Debit => self.balance + cmd.amount,
            AccountMovementType::Credit => self.balance - cmd.amount,
        };

        Ok(vec![CurrentAccountEvent::MovementPosted(MovementPosted {
            customer_id: cmd.customer_id,
            currency: cmd.currency,
            movement_type: cmd.movement_type,
            amount: cmd.amount,
            balance,
            description: cmd.description.clone(),
            invoice_id: cmd.invoice_id,
            cash_register_id: cmd.cash_register_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_limit(&self, cmd: &SetCreditLimit) -> Result<Vec<CurrentAccountEvent>, DomainError> {
        self.ensure_key(cmd.customer_id, cmd.currency)?;

        if let Some(limit) = cmd.credit_limit {
            if limit < Decimal::ZERO {
                return Err(DomainError::validation("credit limit cannot be negative"));
            }
        }

        Ok(vec![CurrentAccountEvent::CreditLimitSet(CreditLimitSet {
            customer_id: cmd.customer_id,
            currency: cmd.currency,
            credit_limit: cmd.credit_limit,
            occurred_at: cmd.occurred_at,
        })])
    }
}
