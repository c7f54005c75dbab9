//! Supplier-side purchase documents.
//!
//! Purchases are registered for accounting totals only; they never touch the
//! stock ledger, unlike sales invoices. Cancellation is a plain status flip
//! with no ledger legs to compensate.

pub mod purchase;

pub use purchase::{
    Cancel, Cancelled, Purchase, PurchaseCommand, PurchaseEvent, PurchaseItem, PurchaseLine,
    PurchaseStatus, Register, Registered, SupplierId,
};
