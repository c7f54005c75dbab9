use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use facturo_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use facturo_events::Event;

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Warehouse identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarehouseId(pub AggregateId);

impl WarehouseId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for WarehouseId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Composite ledger key: one stock stream per (product, warehouse).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
        }
    }

    /// Deterministic stream id for this key.
    ///
    /// All writers against the same (product, warehouse) contend on the same
    /// stream, which is the serialization boundary for the quantity balance.
    pub fn stream_id(&self) -> AggregateId {
        let mut key = Vec::with_capacity(6 + 32);
        key.extend_from_slice(b"stock/");
        key.extend_from_slice(self.product_id.0.as_uuid().as_bytes());
        key.extend_from_slice(self.warehouse_id.0.as_uuid().as_bytes());
        AggregateId::derived(&key)
    }
}

/// Whether a movement type adds to or removes from the on-hand quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementDirection {
    Incoming,
    Outgoing,
}

/// Closed set of stock movement types.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockMovementType {
    Purchase,
    Sale,
    AdjustmentIn,
    AdjustmentOut,
    TransferIn,
    TransferOut,
    Return,
    RemitoOut,
}

impl StockMovementType {
    /// Signed effect of the movement on the on-hand quantity (exhaustive).
    pub fn direction(self) -> MovementDirection {
        match self {
            StockMovementType::Sale
            | StockMovementType::AdjustmentOut
            | StockMovementType::TransferOut
            | StockMovementType::RemitoOut => MovementDirection::Outgoing,
            StockMovementType::Purchase
            | StockMovementType::AdjustmentIn
            | StockMovementType::TransferIn
            | StockMovementType::Return => MovementDirection::Incoming,
        }
    }
}

/// Aggregate root: Stock (one per product + warehouse).
///
/// Streams are created lazily: an empty stream is a stock row with quantity 0.
/// Reservations are soft holds: they never change `quantity` and never post
/// a movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stock {
    id: AggregateId,
    quantity: Decimal,
    reserved_quantity: Decimal,
    min_quantity: Option<Decimal>,
    version: u64,
}

impl Stock {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            quantity: Decimal::ZERO,
            reserved_quantity: Decimal::ZERO,
            min_quantity: None,
            version: 0,
        }
    }

    /// Physically on-hand quantity.
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// Quantity held against future delivery (soft holds).
    pub fn reserved_quantity(&self) -> Decimal {
        self.reserved_quantity
    }

    pub fn min_quantity(&self) -> Option<Decimal> {
        self.min_quantity
    }

    /// Available-to-promise: on hand minus reserved. May be negative,
    /// since reservations are allowed to exceed on-hand (back orders).
    pub fn available_to_promise(&self) -> Decimal {
        self.quantity - self.reserved_quantity
    }

    pub fn below_min(&self) -> bool {
        match self.min_quantity {
            Some(min) => self.quantity < min,
            None => false,
        }
    }
}

impl AggregateRoot for Stock {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PostMovement (append one ledger movement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMovement {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: StockMovementType,
    pub quantity: Decimal,
    pub reason: Option<String>,
    /// Document that caused the movement (invoice, remito, transfer).
    pub reference_id: Option<AggregateId>,
    pub actor: Option<UserId>,
    /// Counterpart warehouse for transfer legs.
    pub related_warehouse_id: Option<WarehouseId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Reserve (soft hold, no movement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserve {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Release (undo part of a soft hold).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetMinQuantity (low-stock threshold).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetMinQuantity {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub min_quantity: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    PostMovement(PostMovement),
    Reserve(Reserve),
    Release(Release),
    SetMinQuantity(SetMinQuantity),
}

/// Event: MovementPosted, the immutable stock movement record.
///
/// Carries before/after snapshots so any point-in-time balance can be read
/// straight off the ledger without replaying from the start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPosted {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: StockMovementType,
    pub quantity: Decimal,
    pub previous_quantity: Decimal,
    pub new_quantity: Decimal,
    pub reason: Option<String>,
    pub reference_id: Option<AggregateId>,
    pub actor: Option<UserId>,
    pub related_warehouse_id: Option<WarehouseId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: Reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserved {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub new_reserved_quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: Released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Released {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub new_reserved_quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MinQuantitySet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinQuantitySet {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub min_quantity: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    MovementPosted(MovementPosted),
    Reserved(Reserved),
    Released(Released),
    MinQuantitySet(MinQuantitySet),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::MovementPosted(_) => "stock.movement_posted",
            StockEvent::Reserved(_) => "stock.reserved",
            StockEvent::Released(_) => "stock.released",
            StockEvent::MinQuantitySet(_) => "stock.min_quantity_set",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::MovementPosted(e) => e.occurred_at,
            StockEvent::Reserved(e) => e.occurred_at,
            StockEvent::Released(e) => e.occurred_at,
            StockEvent::MinQuantitySet(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Stock {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::MovementPosted(e) => {
                self.quantity = e.new_quantity;
            }
            StockEvent::Reserved(e) => {
                self.reserved_quantity = e.new_reserved_quantity;
            }
            StockEvent::Released(e) => {
                self.reserved_quantity = e.new_reserved_quantity;
            }
            StockEvent::MinQuantitySet(e) => {
                self.min_quantity = e.min_quantity;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::PostMovement(cmd) => self.handle_post(cmd),
            StockCommand::Reserve(cmd) => self.handle_reserve(cmd),
            StockCommand::Release(cmd) => self.handle_release(cmd),
            StockCommand::SetMinQuantity(cmd) => self.handle_set_min(cmd),
        }
    }
}

impl Stock {
    fn ensure_key(&self, product_id: ProductId, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        if StockKey::new(product_id, warehouse_id).stream_id() != self.id {
            return Err(DomainError::invariant("stock key does not match stream"));
        }
        Ok(())
    }

    fn handle_post(&self, cmd: &PostMovement) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_key(cmd.product_id, cmd.warehouse_id)?;

        if cmd.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("movement quantity must be positive"));
        }

        let previous_quantity = self.quantity;
        let new_quantity = match cmd.movement_type.direction() {
            MovementDirection::Incoming => previous_quantity + cmd.quantity,
            MovementDirection::Outgoing => previous_quantity - cmd.quantity,
        };

        if new_quantity < Decimal::ZERO {
            return Err(DomainError::insufficient_stock(
                cmd.product_id.0,
                previous_quantity,
                cmd.quantity,
            ));
        }

        Ok(vec![StockEvent::MovementPosted(MovementPosted {
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            movement_type: cmd.movement_type,
            quantity: cmd.quantity,
            previous_quantity,
            new_quantity,
            reason: cmd.reason.clone(),
            reference_id: cmd.reference_id,
            actor: cmd.actor,
            related_warehouse_id: cmd.related_warehouse_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &Reserve) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_key(cmd.product_id, cmd.warehouse_id)?;

        if cmd.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("reserve quantity must be positive"));
        }

        // Reserving beyond on-hand is allowed (back-order workflows);
        // strict ATP checking is the caller's policy.
        Ok(vec![StockEvent::Reserved(Reserved {
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            quantity: cmd.quantity,
            new_reserved_quantity: self.reserved_quantity + cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &Release) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_key(cmd.product_id, cmd.warehouse_id)?;

        if cmd.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("release quantity must be positive"));
        }

        // A release below zero means upstream bookkeeping is broken;
        // fail loudly instead of clamping.
        if cmd.quantity > self.reserved_quantity {
            return Err(DomainError::invariant(format!(
                "release of {} exceeds reserved quantity {}",
                cmd.quantity, self.reserved_quantity
            )));
        }

        Ok(vec![StockEvent::Released(Released {
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            quantity: cmd.quantity,
            new_reserved_quantity: self.reserved_quantity - cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_min(&self, cmd: &SetMinQuantity) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_key(cmd.product_id, cmd.warehouse_id)?;

        if let Some(min) = cmd.min_quantity {
            if min < Decimal::ZERO {
                return Err(DomainError::validation("min quantity cannot be negative"));
            }
        }

        Ok(vec![StockEvent::MinQuantitySet(MinQuantitySet {
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            min_quantity: cmd.min_quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}
