//! Remito fulfillment: creation, partial delivery and cancellation.
//!
//! Every operation validates against the remito aggregate first, then posts
//! the stock/reservation legs, and appends the remito transition last. A
//! failure anywhere triggers compensating legs for whatever already
//! committed, so the stock ledger never keeps effects of a transition that
//! was not recorded.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::error;

use facturo_accounts::CustomerId;
use facturo_core::{Aggregate, AggregateId, UserId};
use facturo_events::{EventBus, EventEnvelope};
use facturo_numbering::DocumentType;
use facturo_remitos::{
    Cancel, Create, Deliver, DeliveryLine, Remito, RemitoCommand, RemitoEvent, RemitoLine,
    StockBehavior,
};
use facturo_stock::{PostMovement, ProductId, Release, Reserve, StockMovementType, WarehouseId};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::services::stock_ledger::{ReservationTracker, StockLedger};
use crate::services::{DocumentNumbering, WarehouseDirectory};

pub(crate) const REMITO_AGGREGATE: &str = "remito.remito";

/// A committed stock-side leg, kept so it can be compensated.
#[derive(Debug, Clone)]
enum Leg {
    /// A REMITO_OUT movement; undone with a Return movement.
    Out { product_id: ProductId, quantity: Decimal },
    /// A Return movement; undone with a REMITO_OUT movement.
    Back { product_id: ProductId, quantity: Decimal },
    /// A reservation; undone with a release.
    Hold { product_id: ProductId, quantity: Decimal },
    /// A release; undone with a reservation.
    Free { product_id: ProductId, quantity: Decimal },
}

/// Request to create a remito.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRemito {
    pub customer_id: CustomerId,
    pub stock_behavior: StockBehavior,
    pub items: Vec<RemitoLine>,
    pub actor: Option<UserId>,
}

pub struct RemitoFulfillment<S, B, W> {
    dispatcher: CommandDispatcher<S, B>,
    stock: StockLedger<S, B>,
    reservations: ReservationTracker<S, B>,
    numbering: DocumentNumbering<S, B>,
    warehouses: W,
}

impl<S, B, W> RemitoFulfillment<S, B, W>
where
    S: EventStore + Clone,
    B: EventBus<EventEnvelope<JsonValue>> + Clone,
    W: WarehouseDirectory,
{
    pub fn new(store: S, bus: B, warehouses: W) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store.clone(), bus.clone()),
            stock: StockLedger::new(store.clone(), bus.clone()),
            reservations: ReservationTracker::new(store.clone(), bus.clone()),
            numbering: DocumentNumbering::new(store, bus),
            warehouses,
        }
    }

    fn default_warehouse(&self) -> Result<WarehouseId, DispatchError> {
        self.warehouses.find_default_warehouse().ok_or_else(|| {
            DispatchError::Validation("no default warehouse configured".to_string())
        })
    }

    /// Create a remito, posting its stock effects against the default
    /// warehouse.
    ///
    /// DISCOUNT posts a REMITO_OUT per item immediately and the remito is
    /// born delivered; RESERVE soft-holds each item and the remito starts
    /// pending.
    pub fn create(&self, req: CreateRemito) -> Result<Remito, DispatchError> {
        let warehouse_id = self.default_warehouse()?;
        let occurred_at = Utc::now();
        let remito_id = AggregateId::new();

        let assigned = self.numbering.next_current_year(DocumentType::Remito)?;

        let command = Create {
            number: assigned.number.clone(),
            customer_id: req.customer_id,
            warehouse_id,
            stock_behavior: req.stock_behavior,
            items: req.items.clone(),
            occurred_at,
        };

        // Validate before touching stock: an invalid remito must not post
        // any legs.
        Remito::empty(remito_id)
            .handle(&RemitoCommand::Create(command.clone()))
            .map_err(DispatchError::from)?;

        let mut legs: Vec<Leg> = Vec::with_capacity(req.items.len());
        for item in &req.items {
            let result = match req.stock_behavior {
                StockBehavior::Discount => self
                    .stock
                    .add_movement(PostMovement {
                        product_id: item.product_id,
                        warehouse_id,
                        movement_type: StockMovementType::RemitoOut,
                        quantity: item.quantity,
                        reason: Some(format!("Remito {}", assigned.number)),
                        reference_id: Some(remito_id),
                        actor: req.actor,
                        related_warehouse_id: None,
                        occurred_at,
                    })
                    .map(|_| Leg::Out {
                        product_id: item.product_id,
                        quantity: item.quantity,
                    }),
                StockBehavior::Reserve => self
                    .reservations
                    .reserve(Reserve {
                        product_id: item.product_id,
                        warehouse_id,
                        quantity: item.quantity,
                        occurred_at,
                    })
                    .map(|_| Leg::Hold {
                        product_id: item.product_id,
                        quantity: item.quantity,
                    }),
            };

            match result {
                Ok(leg) => legs.push(leg),
                Err(err) => {
                    self.rollback(&legs, warehouse_id, remito_id, req.actor, occurred_at);
                    return Err(err);
                }
            }
        }

        if let Err(err) = self.dispatcher.dispatch::<Remito>(
            remito_id,
            REMITO_AGGREGATE,
            RemitoCommand::Create(command),
            Remito::empty,
        ) {
            self.rollback(&legs, warehouse_id, remito_id, req.actor, occurred_at);
            return Err(err);
        }

        self.dispatcher.load(remito_id, Remito::empty)
    }

    /// Deliver quantities against a pending or partially delivered remito.
    pub fn deliver(
        &self,
        remito_id: AggregateId,
        items: Vec<DeliveryLine>,
        actor: Option<UserId>,
    ) -> Result<Remito, DispatchError> {
        let occurred_at = Utc::now();
        let remito = self.dispatcher.load(remito_id, Remito::empty)?;
        let warehouse_id = remito
            .warehouse_id()
            .ok_or(DispatchError::NotFound)?;

        let command = Deliver {
            items,
            occurred_at,
        };
        let decided = remito
            .handle(&RemitoCommand::Deliver(command.clone()))
            .map_err(DispatchError::from)?;
        let delivered = decided
            .iter()
            .find_map(|e| match e {
                RemitoEvent::Delivered(d) => Some(d.clone()),
                _ => None,
            })
            .ok_or_else(|| DispatchError::Deserialize("delivery event missing".to_string()))?;

        let mut legs: Vec<Leg> = Vec::new();
        for line in &delivered.lines {
            let moved = self.stock.add_movement(PostMovement {
                product_id: line.product_id,
                warehouse_id,
                movement_type: StockMovementType::RemitoOut,
                quantity: line.quantity,
                reason: Some(format!("Remito {}", remito.number())),
                reference_id: Some(remito_id),
                actor,
                related_warehouse_id: None,
                occurred_at,
            });
            match moved {
                Ok(_) => legs.push(Leg::Out {
                    product_id: line.product_id,
                    quantity: line.quantity,
                }),
                Err(err) => {
                    self.rollback(&legs, warehouse_id, remito_id, actor, occurred_at);
                    return Err(err);
                }
            }

            if remito.stock_behavior() == StockBehavior::Reserve {
                let released = self.reservations.release(Release {
                    product_id: line.product_id,
                    warehouse_id,
                    quantity: line.quantity,
                    occurred_at,
                });
                match released {
                    Ok(_) => legs.push(Leg::Free {
                        product_id: line.product_id,
                        quantity: line.quantity,
                    }),
                    Err(err) => {
                        self.rollback(&legs, warehouse_id, remito_id, actor, occurred_at);
                        return Err(err);
                    }
                }
            }
        }

        if let Err(err) = self.dispatcher.dispatch::<Remito>(
            remito_id,
            REMITO_AGGREGATE,
            RemitoCommand::Deliver(command),
            Remito::empty,
        ) {
            self.rollback(&legs, warehouse_id, remito_id, actor, occurred_at);
            return Err(err);
        }

        self.dispatcher.load(remito_id, Remito::empty)
    }

    /// Cancel a remito: pending reservations are released and delivered
    /// quantities are returned to stock.
    pub fn cancel(
        &self,
        remito_id: AggregateId,
        reason: Option<String>,
        actor: Option<UserId>,
    ) -> Result<Remito, DispatchError> {
        let occurred_at = Utc::now();
        let remito = self.dispatcher.load(remito_id, Remito::empty)?;

        let command = Cancel {
            reason,
            occurred_at,
        };
        let decided = remito
            .handle(&RemitoCommand::Cancel(command.clone()))
            .map_err(DispatchError::from)?;
        let cancelled = decided
            .iter()
            .find_map(|e| match e {
                RemitoEvent::Cancelled(c) => Some(c.clone()),
                _ => None,
            })
            .ok_or_else(|| DispatchError::Deserialize("cancellation event missing".to_string()))?;
        let warehouse_id = cancelled.warehouse_id;

        let mut legs: Vec<Leg> = Vec::new();
        for item in &cancelled.items {
            if cancelled.stock_behavior == StockBehavior::Reserve
                && item.pending_quantity > Decimal::ZERO
            {
                let released = self.reservations.release(Release {
                    product_id: item.product_id,
                    warehouse_id,
                    quantity: item.pending_quantity,
                    occurred_at,
                });
                match released {
                    Ok(_) => legs.push(Leg::Free {
                        product_id: item.product_id,
                        quantity: item.pending_quantity,
                    }),
                    Err(err) => {
                        self.rollback(&legs, warehouse_id, remito_id, actor, occurred_at);
                        return Err(err);
                    }
                }
            }

            if item.delivered_quantity > Decimal::ZERO {
                let returned = self.stock.add_movement(PostMovement {
                    product_id: item.product_id,
                    warehouse_id,
                    movement_type: StockMovementType::Return,
                    quantity: item.delivered_quantity,
                    reason: Some(format!("Remito {} cancelled", remito.number())),
                    reference_id: Some(remito_id),
                    actor,
                    related_warehouse_id: None,
                    occurred_at,
                });
                match returned {
                    Ok(_) => legs.push(Leg::Back {
                        product_id: item.product_id,
                        quantity: item.delivered_quantity,
                    }),
                    Err(err) => {
                        self.rollback(&legs, warehouse_id, remito_id, actor, occurred_at);
                        return Err(err);
                    }
                }
            }
        }

        if let Err(err) = self.dispatcher.dispatch::<Remito>(
            remito_id,
            REMITO_AGGREGATE,
            RemitoCommand::Cancel(command),
            Remito::empty,
        ) {
            self.rollback(&legs, warehouse_id, remito_id, actor, occurred_at);
            return Err(err);
        }

        self.dispatcher.load(remito_id, Remito::empty)
    }

    /// Compensate committed legs in reverse order. Compensation failures are
    /// logged, not surfaced: the original error is what the caller acts on,
    /// and the reference id ties the orphaned legs to this remito for
    /// reconciliation.
    fn rollback(
        &self,
        legs: &[Leg],
        warehouse_id: WarehouseId,
        remito_id: AggregateId,
        actor: Option<UserId>,
        occurred_at: DateTime<Utc>,
    ) {
        for leg in legs.iter().rev() {
            let undone = match *leg {
                Leg::Out { product_id, quantity } => self
                    .stock
                    .add_movement(PostMovement {
                        product_id,
                        warehouse_id,
                        movement_type: StockMovementType::Return,
                        quantity,
                        reason: Some("remito compensation".to_string()),
                        reference_id: Some(remito_id),
                        actor,
                        related_warehouse_id: None,
                        occurred_at,
                    })
                    .map(|_| ()),
                Leg::Back { product_id, quantity } => self
                    .stock
                    .add_movement(PostMovement {
                        product_id,
                        warehouse_id,
                        movement_type: StockMovementType::RemitoOut,
                        quantity,
                        reason: Some("remito compensation".to_string()),
                        reference_id: Some(remito_id),
                        actor,
                        related_warehouse_id: None,
                        occurred_at,
                    })
                    .map(|_| ()),
                Leg::Hold { product_id, quantity } => self
                    .reservations
                    .release(Release {
                        product_id,
                        warehouse_id,
                        quantity,
                        occurred_at,
                    })
                    .map(|_| ()),
                Leg::Free { product_id, quantity } => self
                    .reservations
                    .reserve(Reserve {
                        product_id,
                        warehouse_id,
                        quantity,
                        occurred_at,
                    })
                    .map(|_| ()),
            };

            if let Err(err) = undone {
                error!(
                    %remito_id,
                    ?leg,
                    ?err,
                    "remito compensation failed; stock needs manual reconciliation"
                );
            }
        }
    }
}
