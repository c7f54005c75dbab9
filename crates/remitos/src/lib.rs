//! Delivery notes (remitos) and their partial-fulfillment state machine.
//!
//! A remito either discounts stock immediately at creation (DISCOUNT) or
//! soft-reserves it and discounts on each delivery (RESERVE). The aggregate
//! is pure; stock and reservation side effects are orchestrated by the
//! fulfillment service on top of the events emitted here.

pub mod remito;

pub use remito::{
    Cancel, Cancelled, CancelledItem, Create, Created, Deliver, Delivered, DeliveredLine,
    DeliveryLine, Remito, RemitoCommand, RemitoEvent, RemitoItem, RemitoLine, RemitoStatus,
    StockBehavior,
};
