use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use facturo_accounts::CustomerId;
use facturo_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use facturo_events::Event;
use facturo_stock::{ProductId, WarehouseId};

/// How a remito interacts with the stock ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockBehavior {
    /// Discount physical stock immediately at creation; the remito is born
    /// fully delivered.
    Discount,
    /// Soft-reserve at creation; discount on each delivery and release the
    /// reservation by the same amount.
    Reserve,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemitoStatus {
    Pending,
    PartiallyDelivered,
    Delivered,
    Cancelled,
}

/// One remito line with its cumulative delivered quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemitoItem {
    pub item_id: AggregateId,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub delivered_quantity: Decimal,
}

impl RemitoItem {
    pub fn pending_quantity(&self) -> Decimal {
        self.quantity - self.delivered_quantity
    }

    pub fn is_fully_delivered(&self) -> bool {
        self.delivered_quantity >= self.quantity
    }
}

/// Aggregate root: Remito (delivery note).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remito {
    id: AggregateId,
    number: String,
    customer_id: Option<CustomerId>,
    warehouse_id: Option<WarehouseId>,
    stock_behavior: StockBehavior,
    status: RemitoStatus,
    items: Vec<RemitoItem>,
    version: u64,
}

impl Remito {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            number: String::new(),
            customer_id: None,
            warehouse_id: None,
            stock_behavior: StockBehavior::Reserve,
            status: RemitoStatus::Pending,
            items: Vec::new(),
            version: 0,
        }
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn stock_behavior(&self) -> StockBehavior {
        self.stock_behavior
    }

    pub fn status(&self) -> RemitoStatus {
        self.status
    }

    pub fn items(&self) -> &[RemitoItem] {
        &self.items
    }

    fn item(&self, item_id: AggregateId) -> Option<&RemitoItem> {
        self.items.iter().find(|i| i.item_id == item_id)
    }
}

impl AggregateRoot for Remito {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Ordered line supplied at creation (delivered quantity is derived from the
/// stock behavior).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemitoLine {
    pub item_id: AggregateId,
    pub product_id: ProductId,
    pub quantity: Decimal,
}

/// Command: Create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Create {
    pub number: String,
    pub customer_id: CustomerId,
    pub warehouse_id: WarehouseId,
    pub stock_behavior: StockBehavior,
    pub items: Vec<RemitoLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Partial-delivery request for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLine {
    pub item_id: AggregateId,
    pub quantity: Decimal,
}

/// Command: Deliver some quantity against one or more lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliver {
    pub items: Vec<DeliveryLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemitoCommand {
    Create(Create),
    Deliver(Deliver),
    Cancel(Cancel),
}

/// Event: Created.
///
/// For DISCOUNT behavior the items are already fully delivered and the
/// status starts at `Delivered`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    pub number: String,
    pub customer_id: CustomerId,
    pub warehouse_id: WarehouseId,
    pub stock_behavior: StockBehavior,
    pub items: Vec<RemitoItem>,
    pub status: RemitoStatus,
    pub occurred_at: DateTime<Utc>,
}

/// One applied delivery line with its new cumulative delivered quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredLine {
    pub item_id: AggregateId,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub delivered_quantity: Decimal,
}

/// Event: Delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivered {
    pub lines: Vec<DeliveredLine>,
    pub status: RemitoStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Per-line cancellation effects: what was still pending (reservation to
/// release under RESERVE behavior) and what had been delivered (physical
/// stock to return).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelledItem {
    pub item_id: AggregateId,
    pub product_id: ProductId,
    pub pending_quantity: Decimal,
    pub delivered_quantity: Decimal,
}

/// Event: Cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancelled {
    pub stock_behavior: StockBehavior,
    pub warehouse_id: WarehouseId,
    pub items: Vec<CancelledItem>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemitoEvent {
    Created(Created),
    Delivered(Delivered),
    Cancelled(Cancelled),
}

impl Event for RemitoEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RemitoEvent::Created(_) => "remito.created",
            RemitoEvent::Delivered(_) => "remito.delivered",
            RemitoEvent::Cancelled(_) => "remito.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RemitoEvent::Created(e) => e.occurred_at,
            RemitoEvent::Delivered(e) => e.occurred_at,
            RemitoEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Remito {
    type Command = RemitoCommand;
    type Event = RemitoEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RemitoEvent::Created(e) => {
                self.number = e.number.clone();
                self.customer_id = Some(e.customer_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.stock_behavior = e.stock_behavior;
                self.items = e.items.clone();
                self.status = e.status;
            }
            RemitoEvent::Delivered(e) => {
                for line in &e.lines {
                    if let Some(item) = self.items.iter_mut().find(|i| i.item_id == line.item_id) {
                        item.delivered_quantity = line.delivered_quantity;
                    }
                }
                self.status = e.status;
            }
            RemitoEvent::Cancelled(_) => {
                self.status = RemitoStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RemitoCommand::Create(cmd) => self.handle_create(cmd),
            RemitoCommand::Deliver(cmd) => self.handle_deliver(cmd),
            RemitoCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Remito {
    fn handle_create(&self, cmd: &Create) -> Result<Vec<RemitoEvent>, DomainError> {
        if self.version > 0 {
            return Err(DomainError::invalid_transition("remito already exists"));
        }
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("remito number cannot be empty"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("remito needs at least one item"));
        }
        for (i, line) in cmd.items.iter().enumerate() {
            if line.quantity <= Decimal::ZERO {
                return Err(DomainError::validation(
                    "remito item quantity must be positive",
                ));
            }
            if cmd.items[i + 1..].iter().any(|l| l.item_id == line.item_id) {
                return Err(DomainError::validation("duplicate remito item id"));
            }
        }

        let (items, status) = match cmd.stock_behavior {
            StockBehavior::Discount => (
                cmd.items
                    .iter()
                    .map(|l| RemitoItem {
                        item_id: l.item_id,
                        product_id: l.product_id,
                        quantity: l.quantity,
                        delivered_quantity: l.quantity,
                    })
                    .collect(),
                RemitoStatus::Delivered,
            ),
            StockBehavior::Reserve => (
                cmd.items
                    .iter()
                    .map(|l| RemitoItem {
                        item_id: l.item_id,
                        product_id: l.product_id,
                        quantity: l.quantity,
                        delivered_quantity: Decimal::ZERO,
                    })
                    .collect(),
                RemitoStatus::Pending,
            ),
        };

        Ok(vec![RemitoEvent::Created(Created {
            number: cmd.number.clone(),
            customer_id: cmd.customer_id,
            warehouse_id: cmd.warehouse_id,
            stock_behavior: cmd.stock_behavior,
            items,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deliver(&self, cmd: &Deliver) -> Result<Vec<RemitoEvent>, DomainError> {
        if self.version == 0 {
            return Err(DomainError::not_found());
        }
        match self.status {
            RemitoStatus::Pending | RemitoStatus::PartiallyDelivered => {}
            other => {
                return Err(DomainError::invalid_transition(format!(
                    "cannot deliver a remito in status {other:?}"
                )));
            }
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("delivery needs at least one line"));
        }

        // Fold requested deliveries over a working copy so duplicated item ids
        // within one request are bounded by the pending quantity too.
        let mut working = self.items.clone();
        let mut lines = Vec::with_capacity(cmd.items.len());
        for request in &cmd.items {
            if request.quantity <= Decimal::ZERO {
                return Err(DomainError::validation(
                    "delivered quantity must be positive",
                ));
            }
            let item = working
                .iter_mut()
                .find(|i| i.item_id == request.item_id)
                .ok_or(DomainError::NotFound)?;
            if request.quantity > item.pending_quantity() {
                return Err(DomainError::invalid_transition(format!(
                    "delivery of {} exceeds pending quantity {} for item {}",
                    request.quantity,
                    item.pending_quantity(),
                    item.item_id
                )));
            }
            item.delivered_quantity += request.quantity;
            lines.push(DeliveredLine {
                item_id: item.item_id,
                product_id: item.product_id,
                quantity: request.quantity,
                delivered_quantity: item.delivered_quantity,
            });
        }

        let status = if working.iter().all(RemitoItem::is_fully_delivered) {
            RemitoStatus::Delivered
        } else if working
            .iter()
            .any(|i| i.delivered_quantity > Decimal::ZERO)
        {
            RemitoStatus::PartiallyDelivered
        } else {
            RemitoStatus::Pending
        };

        Ok(vec![RemitoEvent::Delivered(Delivered {
            lines,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<RemitoEvent>, DomainError> {
        if self.version == 0 {
            return Err(DomainError::not_found());
        }
        if self.status == RemitoStatus::Cancelled {
            return Err(DomainError::invalid_transition(
                "remito is already cancelled",
            ));
        }
        let warehouse_id = self
            .warehouse_id
            .ok_or_else(|| DomainError::invariant("created remito has no warehouse"))?;

        let items = self
            .items
            .iter()
            .map(|i| CancelledItem {
                item_id: i.item_id,
                product_id: i.product_id,
                pending_quantity: i.pending_quantity(),
                delivered_quantity: i.delivered_quantity,
            })
            .collect();

        Ok(vec![RemitoEvent::Cancelled(Cancelled {
            stock_behavior: self.stock_behavior,
            warehouse_id,
            items,
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

    fn line(quantity: Decimal) -> RemitoLine {
        RemitoLine {
            item_id: AggregateId::new(),
            product_id: ProductId::new(AggregateId::new()),
            quantity,
        }
    }

    fn create(stock_behavior: StockBehavior, lines: Vec<RemitoLine>) -> RemitoCommand {
        RemitoCommand::Create(Create {
            number: "RM-2025-00000001".to_string(),
            customer_id: CustomerId::new(AggregateId::new()),
            warehouse_id: WarehouseId::new(AggregateId::new()),
            stock_behavior,
            items: lines,
            occurred_at: Utc::now(),
        })
    }

    fn apply_all(remito: &mut Remito, events: &[RemitoEvent]) {
        for e in events {
            remito.apply(e);
        }
    }

    #[test]
    fn discount_remito_is_born_fully_delivered() {
        let mut remito = Remito::empty(AggregateId::new());
        let events = remito
            .handle(&create(StockBehavior::Discount, vec![line(dec!(10))]))
            .unwrap();
        apply_all(&mut remito, &events);

        assert_eq!(remito.status(), RemitoStatus::Delivered);
        assert!(remito.items()[0].is_fully_delivered());
    }

    #[test]
    fn reserve_remito_starts_pending_with_nothing_delivered() {
        let mut remito = Remito::empty(AggregateId::new());
        let events = remito
            .handle(&create(StockBehavior::Reserve, vec![line(dec!(10))]))
            .unwrap();
        apply_all(&mut remito, &events);

        assert_eq!(remito.status(), RemitoStatus::Pending);
        assert_eq!(remito.items()[0].delivered_quantity, dec!(0));
        assert_eq!(remito.items()[0].pending_quantity(), dec!(10));
    }

    #[test]
    fn partial_then_full_delivery_walks_the_status_machine() {
        let mut remito = Remito::empty(AggregateId::new());
        let events = remito
            .handle(&create(StockBehavior::Reserve, vec![line(dec!(10))]))
            .unwrap();
        apply_all(&mut remito, &events);
        let item_id = remito.items()[0].item_id;

        let events = remito
            .handle(&RemitoCommand::Deliver(Deliver {
                items: vec![DeliveryLine {
                    item_id,
                    quantity: dec!(4),
                }],
                occurred_at: Utc::now(),
            }))
            .unwrap();
        apply_all(&mut remito, &events);
        assert_eq!(remito.status(), RemitoStatus::PartiallyDelivered);
        assert_eq!(remito.items()[0].delivered_quantity, dec!(4));

        let events = remito
            .handle(&RemitoCommand::Deliver(Deliver {
                items: vec![DeliveryLine {
                    item_id,
                    quantity: dec!(6),
                }],
                occurred_at: Utc::now(),
            }))
            .unwrap();
        apply_all(&mut remito, &events);
        assert_eq!(remito.status(), RemitoStatus::Delivered);
    }

    #[test]
    fn over_delivery_is_rejected_and_changes_nothing() {
        let mut remito = Remito::empty(AggregateId::new());
        let events = remito
            .handle(&create(StockBehavior::Reserve, vec![line(dec!(5))]))
            .unwrap();
        apply_all(&mut remito, &events);
        let item_id = remito.items()[0].item_id;

        let err = remito
            .handle(&RemitoCommand::Deliver(Deliver {
                items: vec![DeliveryLine {
                    item_id,
                    quantity: dec!(6),
                }],
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
        assert_eq!(remito.items()[0].delivered_quantity, dec!(0));
        assert_eq!(remito.status(), RemitoStatus::Pending);
    }

    #[test]
    fn duplicated_line_in_one_delivery_is_bounded_by_pending() {
        let mut remito = Remito::empty(AggregateId::new());
        let events = remito
            .handle(&create(StockBehavior::Reserve, vec![line(dec!(5))]))
            .unwrap();
        apply_all(&mut remito, &events);
        let item_id = remito.items()[0].item_id;

        let err = remito
            .handle(&RemitoCommand::Deliver(Deliver {
                items: vec![
                    DeliveryLine {
                        item_id,
                        quantity: dec!(3),
                    },
                    DeliveryLine {
                        item_id,
                        quantity: dec!(3),
                    },
                ],
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn cancel_lists_pending_and_delivered_effects() {
        let mut remito = Remito::empty(AggregateId::new());
        let events = remito
            .handle(&create(StockBehavior::Reserve, vec![line(dec!(10))]))
            .unwrap();
        apply_all(&mut remito, &events);
        let item_id = remito.items()[0].item_id;

        let events = remito
            .handle(&RemitoCommand::Deliver(Deliver {
                items: vec![DeliveryLine {
                    item_id,
                    quantity: dec!(4),
                }],
                occurred_at: Utc::now(),
            }))
            .unwrap();
        apply_all(&mut remito, &events);

        let events = remito
            .handle(&RemitoCommand::Cancel(Cancel {
                reason: Some("customer refused the shipment".to_string()),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        match &events[0] {
            RemitoEvent::Cancelled(e) => {
                assert_eq!(e.items[0].pending_quantity, dec!(6));
                assert_eq!(e.items[0].delivered_quantity, dec!(4));
            }
            other => panic!("Expected Cancelled event, got {other:?}"),
        }
        apply_all(&mut remito, &events);
        assert_eq!(remito.status(), RemitoStatus::Cancelled);
    }

    #[test]
    fn cancelling_twice_is_rejected() {
        let mut remito = Remito::empty(AggregateId::new());
        let events = remito
            .handle(&create(StockBehavior::Discount, vec![line(dec!(1))]))
            .unwrap();
        apply_all(&mut remito, &events);

        let cancel = RemitoCommand::Cancel(Cancel {
            reason: None,
            occurred_at: Utc::now(),
        });
        let events = remito.handle(&cancel).unwrap();
        apply_all(&mut remito, &events);

        assert!(matches!(
            remito.handle(&cancel),
            Err(DomainError::InvalidStateTransition(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property (delivery conservation): over any sequence of delivery
        /// requests, per-item delivered never exceeds ordered, never
        /// decreases, and the status always reflects the delivered totals.
        /// Rejected requests leave nothing half-applied.
        #[test]
        fn deliveries_never_exceed_ordered_quantities(
            ordered in prop::collection::vec(1i64..100, 1..5),
            requests in prop::collection::vec((0usize..5, 1i64..60), 0..25)
        ) {
            let lines: Vec<RemitoLine> = ordered
                .iter()
                .map(|&q| line(Decimal::from(q)))
                .collect();
            let item_ids: Vec<AggregateId> =
                lines.iter().map(|l| l.item_id).collect();

            let mut remito = Remito::empty(AggregateId::new());
            let events = remito
                .handle(&create(StockBehavior::Reserve, lines))
                .unwrap();
            apply_all(&mut remito, &events);

            for (idx, qty) in requests {
                let item_id = item_ids[idx % item_ids.len()];
                let before: Vec<Decimal> =
                    remito.items().iter().map(|i| i.delivered_quantity).collect();

                let cmd = RemitoCommand::Deliver(Deliver {
                    items: vec![DeliveryLine {
                        item_id,
                        quantity: Decimal::from(qty),
                    }],
                    occurred_at: Utc::now(),
                });
                match remito.handle(&cmd) {
                    Ok(events) => apply_all(&mut remito, &events),
                    Err(_) => {
                        let after: Vec<Decimal> = remito
                            .items()
                            .iter()
                            .map(|i| i.delivered_quantity)
                            .collect();
                        prop_assert_eq!(before, after);
                    }
                }
            }

            for item in remito.items() {
                prop_assert!(item.delivered_quantity <= item.quantity);
                prop_assert!(item.delivered_quantity >= Decimal::ZERO);
            }

            let all_done = remito.items().iter().all(|i| i.is_fully_delivered());
            let any_done =
                remito.items().iter().any(|i| i.delivered_quantity > Decimal::ZERO);
            let expected_status = if all_done {
                RemitoStatus::Delivered
            } else if any_done {
                RemitoStatus::PartiallyDelivered
            } else {
                RemitoStatus::Pending
            };
            prop_assert_eq!(remito.status(), expected_status);
        }
    }
}
