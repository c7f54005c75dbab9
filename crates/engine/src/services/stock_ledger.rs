//! Stock ledger, reservation tracking and warehouse transfers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{error, warn};

use facturo_core::{AggregateId, UserId};
use facturo_events::{EventBus, EventEnvelope};
use facturo_stock::{
    MovementPosted, PostMovement, ProductId, Release, Released, Reserve, Reserved, SetMinQuantity,
    Stock, StockCommand, StockEvent, StockKey, StockMovementType, WarehouseId,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, decode_events};
use crate::event_store::EventStore;

pub(crate) const STOCK_AGGREGATE: &str = "stock.ledger";

/// Append-only stock movement ledger, one stream per (product, warehouse).
#[derive(Debug, Clone)]
pub struct StockLedger<S, B> {
    dispatcher: CommandDispatcher<S, B>,
}

impl<S, B> StockLedger<S, B>
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
    ///
    /// The movement and the balance update are one append: a rejected
    /// command (insufficient stock, stale version) writes nothing.
    pub fn add_movement(&self, cmd: PostMovement) -> Result<MovementPosted, DispatchError> {
        let key = StockKey::new(cmd.product_id, cmd.warehouse_id);
        let committed = self.dispatcher.dispatch::<Stock>(
            key.stream_id(),
            STOCK_AGGREGATE,
            StockCommand::PostMovement(cmd),
            Stock::empty,
        )?;

        let posted = decode_events::<StockEvent>(&committed)?
            .into_iter()
            .find_map(|e| match e {
                StockEvent::MovementPosted(m) => Some(m),
                _ => None,
            })
            .ok_or_else(|| DispatchError::Deserialize("movement record missing".to_string()))?;

        let stock = self.stock_of(posted.product_id, posted.warehouse_id)?;
        if stock.below_min() {
            warn!(
                product_id = %posted.product_id,
                warehouse_id = %posted.warehouse_id,
                quantity = %stock.quantity(),
                min_quantity = ?stock.min_quantity(),
                "stock below minimum threshold"
            );
        }

        Ok(posted)
    }

    /// Set or clear the low-stock threshold for a key.
    pub fn set_min_quantity(&self, cmd: SetMinQuantity) -> Result<(), DispatchError> {
        let key = StockKey::new(cmd.product_id, cmd.warehouse_id);
        self.dispatcher.dispatch::<Stock>(
            key.stream_id(),
            STOCK_AGGREGATE,
            StockCommand::SetMinQuantity(cmd),
            Stock::empty,
        )?;
        Ok(())
    }

    /// Current folded state for a key (a missing stream is a zero row).
    pub fn stock_of(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Stock, DispatchError> {
        let key = StockKey::new(product_id, warehouse_id);
        self.dispatcher.load(key.stream_id(), Stock::empty)
    }
}

/// Soft reservations over the same stock streams.
#[derive(Debug, Clone)]
pub struct ReservationTracker<S, B> {
    dispatcher: CommandDispatcher<S, B>,
}

impl<S, B> ReservationTracker<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
        }
    }

    pub fn reserve(&self, cmd: Reserve) -> Result<Reserved, DispatchError> {
        let key = StockKey::new(cmd.product_id, cmd.warehouse_id);
        let committed = self.dispatcher.dispatch::<Stock>(
            key.stream_id(),
            STOCK_AGGREGATE,
            StockCommand::Reserve(cmd),
            Stock::empty,
        )?;

        decode_events::<StockEvent>(&committed)?
            .into_iter()
            .find_map(|e| match e {
                StockEvent::Reserved(r) => Some(r),
                _ => None,
            })
            .ok_or_else(|| DispatchError::Deserialize("reservation record missing".to_string()))
    }

    pub fn release(&self, cmd: Release) -> Result<Released, DispatchError> {
        let key = StockKey::new(cmd.product_id, cmd.warehouse_id);
        let committed = self.dispatcher.dispatch::<Stock>(
            key.stream_id(),
            STOCK_AGGREGATE,
            StockCommand::Release(cmd),
            Stock::empty,
        )?;

        decode_events::<StockEvent>(&committed)?
            .into_iter()
            .find_map(|e| match e {
                StockEvent::Released(r) => Some(r),
                _ => None,
            })
            .ok_or_else(|| DispatchError::Deserialize("release record missing".to_string()))
    }
}

/// Request for a physical move between two warehouses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub product_id: ProductId,
    pub from_warehouse_id: WarehouseId,
    pub to_warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub reason: Option<String>,
    pub actor: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Both committed legs of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub transfer_id: AggregateId,
    pub outgoing: MovementPosted,
    pub incoming: MovementPosted,
}

/// Two-leg transfer saga over the stock ledger.
///
/// The outgoing leg carries the insufficient-stock check. If the incoming
/// leg fails after the outgoing leg committed, the coordinator posts a
/// compensating TransferIn back onto the source, so the source quantity is
/// restored and all three appends stay visible in the ledger.
#[derive(Debug, Clone)]
pub struct TransferCoordinator<S, B> {
    stock: StockLedger<S, B>,
}

impl<S, B> TransferCoordinator<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(stock: StockLedger<S, B>) -> Self {
        Self { stock }
    }

    pub fn transfer(&self, req: TransferRequest) -> Result<Transfer, DispatchError> {
        if req.from_warehouse_id == req.to_warehouse_id {
            return Err(DispatchError::Validation(
                "transfer source and destination must differ".to_string(),
            ));
        }

        let transfer_id = AggregateId::new();

        let outgoing = self.stock.add_movement(PostMovement {
            product_id: req.product_id,
            warehouse_id: req.from_warehouse_id,
            movement_type: StockMovementType::TransferOut,
            quantity: req.quantity,
            reason: req.reason.clone(),
            reference_id: Some(transfer_id),
            actor: req.actor,
            related_warehouse_id: Some(req.to_warehouse_id),
            occurred_at: req.occurred_at,
        })?;

        let incoming = self.stock.add_movement(PostMovement {
            product_id: req.product_id,
            warehouse_id: req.to_warehouse_id,
            movement_type: StockMovementType::TransferIn,
            quantity: req.quantity,
            reason: req.reason.clone(),
            reference_id: Some(transfer_id),
            actor: req.actor,
            related_warehouse_id: Some(req.from_warehouse_id),
            occurred_at: req.occurred_at,
        });

        match incoming {
            Ok(incoming) => Ok(Transfer {
                transfer_id,
                outgoing,
                incoming,
            }),
            Err(err) => {
                // Undo the committed outgoing leg.
                let undo = self.stock.add_movement(PostMovement {
                    product_id: req.product_id,
                    warehouse_id: req.from_warehouse_id,
                    movement_type: StockMovementType::TransferIn,
                    quantity: req.quantity,
                    reason: Some("transfer compensation".to_string()),
                    reference_id: Some(transfer_id),
                    actor: req.actor,
                    related_warehouse_id: Some(req.to_warehouse_id),
                    occurred_at: req.occurred_at,
                });
                if let Err(undo_err) = undo {
                    error!(
                        %transfer_id,
                        product_id = %req.product_id,
                        ?undo_err,
                        "transfer compensation failed; source quantity needs manual reconciliation"
                    );
                }
                Err(err)
            }
        }
    }
}
