//! Sales documents: invoices, credit notes and debit notes.
//!
//! One `Invoice` aggregate per document, discriminated by `DocumentType`.
//! Issuing, payment and cancellation produce events that carry the account
//! and stock effects for the lifecycle service to post; the aggregate itself
//! stays pure.

pub mod invoice;

pub use invoice::{
    AttachCae, CaeAttached, CaeData, Cancel, Cancelled, Create, Created, Invoice, InvoiceCommand,
    InvoiceEvent, InvoiceItem, InvoiceLine, InvoiceStatus, Issue, Issued, PaymentRegistered,
    RegisterPayment,
};
