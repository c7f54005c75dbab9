//! Per-(product, warehouse) stock ledger.
//!
//! One `Stock` aggregate per key: its events are the immutable stock
//! movements and soft reservations, its folded state is the on-hand and
//! reserved quantities.

pub mod stock;

pub use stock::{
    MovementDirection, MovementPosted, MinQuantitySet, PostMovement, ProductId, Release, Released,
    Reserve, Reserved, SetMinQuantity, Stock, StockCommand, StockEvent, StockKey,
    StockMovementType, WarehouseId,
};
