use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use facturo_accounts::Currency;
use facturo_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use facturo_events::Event;

/// Supplier identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierId(pub AggregateId);

impl SupplierId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SupplierId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Registered,
    Cancelled,
}

/// One purchase line with derived amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseItem {
    pub item_id: AggregateId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
}

impl PurchaseItem {
    pub fn subtotal(&self) -> Decimal {
        self.quantity * self.unit_price
    }

    pub fn tax_amount(&self) -> Decimal {
        self.subtotal() * self.tax_rate / Decimal::ONE_HUNDRED
    }
}

/// Aggregate root: Purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    id: AggregateId,
    supplier_id: Option<SupplierId>,
    invoice_number: String,
    currency: Currency,
    status: PurchaseStatus,
    items: Vec<PurchaseItem>,
    subtotal: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    version: u64,
}

impl Purchase {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            supplier_id: None,
            invoice_number: String::new(),
            currency: Currency::Ars,
            status: PurchaseStatus::Registered,
            items: Vec::new(),
            subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total: Decimal::ZERO,
            version: 0,
        }
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn status(&self) -> PurchaseStatus {
        self.status
    }

    pub fn items(&self) -> &[PurchaseItem] {
        &self.items
    }

    pub fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    pub fn tax_amount(&self) -> Decimal {
        self.tax_amount
    }

    pub fn total(&self) -> Decimal {
        self.total
    }
}

impl AggregateRoot for Purchase {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Line supplied at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
}

/// Command: Register (record the supplier invoice).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub supplier_id: SupplierId,
    /// The supplier's own invoice number, not one of ours.
    pub invoice_number: String,
    pub currency: Currency,
    pub items: Vec<PurchaseLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseCommand {
    Register(Register),
    Cancel(Cancel),
}

/// Event: Registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registered {
    pub supplier_id: SupplierId,
    pub invoice_number: String,
    pub currency: Currency,
    pub items: Vec<PurchaseItem>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: Cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancelled {
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseEvent {
    Registered(Registered),
    Cancelled(Cancelled),
}

impl Event for PurchaseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseEvent::Registered(_) => "purchase.registered",
            PurchaseEvent::Cancelled(_) => "purchase.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseEvent::Registered(e) => e.occurred_at,
            PurchaseEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Purchase {
    type Command = PurchaseCommand;
    type Event = PurchaseEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseEvent::Registered(e) => {
                self.supplier_id = Some(e.supplier_id);
                self.invoice_number = e.invoice_number.clone();
                self.currency = e.currency;
                self.items = e.items.clone();
                self.subtotal = e.subtotal;
                self.tax_amount = e.tax_amount;
                self.total = e.total;
                self.status = PurchaseStatus::Registered;
            }
            PurchaseEvent::Cancelled(_) => {
                self.status = PurchaseStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseCommand::Register(cmd) => self.handle_register(cmd),
            PurchaseCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Purchase {
    fn handle_register(&self, cmd: &Register) -> Result<Vec<PurchaseEvent>, DomainError> {
        if self.version > 0 {
            return Err(DomainError::invalid_transition("purchase already exists"));
        }
        if cmd.invoice_number.trim().is_empty() {
            return Err(DomainError::validation(
                "supplier invoice number cannot be empty",
            ));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("purchase needs at least one item"));
        }

        let mut items = Vec::with_capacity(cmd.items.len());
        for line in &cmd.items {
            if line.quantity <= Decimal::ZERO {
                return Err(DomainError::validation(
                    "purchase item quantity must be positive",
                ));
            }
            if line.unit_price < Decimal::ZERO {
                return Err(DomainError::validation("unit price cannot be negative"));
            }
            if line.tax_rate < Decimal::ZERO {
                return Err(DomainError::validation("tax rate cannot be negative"));
            }
            items.push(PurchaseItem {
                item_id: AggregateId::new(),
                description: line.description.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                tax_rate: line.tax_rate,
            });
        }

        let subtotal: Decimal = items.iter().map(PurchaseItem::subtotal).sum();
        let tax_amount: Decimal = items.iter().map(PurchaseItem::tax_amount).sum();

        Ok(vec![PurchaseEvent::Registered(Registered {
            supplier_id: cmd.supplier_id,
            invoice_number: cmd.invoice_number.clone(),
            currency: cmd.currency,
            items,
            subtotal,
            tax_amount,
            total: subtotal + tax_amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<PurchaseEvent>, DomainError> {
        if self.version == 0 {
            return Err(DomainError::not_found());
        }
        if self.status == PurchaseStatus::Cancelled {
            return Err(DomainError::invalid_transition(
                "purchase is already cancelled",
            ));
        }

        Ok(vec![PurchaseEvent::Cancelled(Cancelled {
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn register() -> PurchaseCommand {
        PurchaseCommand::Register(Register {
            supplier_id: SupplierId::new(AggregateId::new()),
            invoice_number: "A-0001-00004321".to_string(),
            currency: Currency::Ars,
            items: vec![PurchaseLine {
                description: "raw material".to_string(),
                quantity: dec!(3),
                unit_price: dec!(50),
                tax_rate: dec!(21),
            }],
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn registration_derives_totals() {
        let mut purchase = Purchase::empty(AggregateId::new());
        let events = purchase.handle(&register()).unwrap();
        for e in &events {
            purchase.apply(e);
        }

        assert_eq!(purchase.status(), PurchaseStatus::Registered);
        assert_eq!(purchase.subtotal(), dec!(150));
        assert_eq!(purchase.tax_amount(), dec!(31.50));
        assert_eq!(purchase.total(), dec!(181.50));
    }

    #[test]
    fn cancel_is_a_plain_status_flip() {
        let mut purchase = Purchase::empty(AggregateId::new());
        let events = purchase.handle(&register()).unwrap();
        for e in &events {
            purchase.apply(e);
        }

        let cancel = PurchaseCommand::Cancel(Cancel {
            reason: Some("duplicate entry".to_string()),
            occurred_at: Utc::now(),
        });
        let events = purchase.handle(&cancel).unwrap();
        for e in &events {
            purchase.apply(e);
        }
        assert_eq!(purchase.status(), PurchaseStatus::Cancelled);

        assert!(matches!(
            purchase.handle(&cancel),
            Err(DomainError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn empty_purchase_is_rejected() {
        let purchase = Purchase::empty(AggregateId::new());
        let err = purchase
            .handle(&PurchaseCommand::Register(Register {
                supplier_id: SupplierId::new(AggregateId::new()),
                invoice_number: "A-0001-00000001".to_string(),
                currency: Currency::Ars,
                items: vec![],
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property (total consistency): registered totals are exact sums
        /// over the supplied lines, whatever their count.
        #[test]
        fn totals_are_exact_sums_over_lines(
            raw_lines in prop::collection::vec(
                (1i64..1_000, 0i64..100_000, 0i64..30),
                1..10
            )
        ) {
            let mut expected_subtotal = Decimal::ZERO;
            let mut expected_tax = Decimal::ZERO;
            let items: Vec<PurchaseLine> = raw_lines
                .into_iter()
                .map(|(q, cents, rate)| {
                    let quantity = Decimal::from(q);
                    let unit_price = Decimal::new(cents, 2);
                    let tax_rate = Decimal::from(rate);
                    expected_subtotal += quantity * unit_price;
                    expected_tax += quantity * unit_price * tax_rate / Decimal::ONE_HUNDRED;
                    PurchaseLine {
                        description: "raw material".to_string(),
                        quantity,
                        unit_price,
                        tax_rate,
                    }
                })
                .collect();

            let mut purchase = Purchase::empty(AggregateId::new());
            let events = purchase
                .handle(&PurchaseCommand::Register(Register {
                    supplier_id: SupplierId::new(AggregateId::new()),
                    invoice_number: "A-0001-00004321".to_string(),
                    currency: Currency::Ars,
                    items,
                    occurred_at: Utc::now(),
                }))
                .unwrap();
            for e in &events {
                purchase.apply(e);
            }

            prop_assert_eq!(purchase.subtotal(), expected_subtotal);
            prop_assert_eq!(purchase.tax_amount(), expected_tax);
            prop_assert_eq!(purchase.total(), expected_subtotal + expected_tax);
        }
    }
}
