//! Ledger services: the contract surface exposed to the HTTP layer and
//! other callers.
//!
//! Single-ledger operations (a stock movement, an account movement, a number
//! assignment) are one dispatch against one stream. Cross-aggregate flows
//! (transfers, remito fulfillment, the invoice lifecycle) are sagas: each
//! leg is its own append, and a failed leg triggers compensating appends for
//! the legs already committed. The compensations are themselves ordinary
//! ledger movements, so the audit trail shows both the attempt and the undo.

pub mod account_ledger;
pub mod invoice_lifecycle;
pub mod numbering;
pub mod purchase_registry;
pub mod remito_fulfillment;
pub mod stock_ledger;

pub use account_ledger::CurrentAccountLedger;
pub use invoice_lifecycle::{
    CaeGrant, CreateInvoice, InvoiceLifecycle, TaxAuthorityClient, TaxAuthorityError,
};
pub use numbering::DocumentNumbering;
pub use purchase_registry::PurchaseRegistry;
pub use remito_fulfillment::{CreateRemito, RemitoFulfillment};
pub use stock_ledger::{ReservationTracker, StockLedger, Transfer, TransferCoordinator, TransferRequest};

use facturo_stock::WarehouseId;
use std::sync::Arc;

/// Lookup for the warehouse that absorbs document-driven stock effects.
///
/// Warehouse CRUD lives outside this engine; operations that need stock
/// effects fail with a validation error when no default is configured.
pub trait WarehouseDirectory: Send + Sync {
    fn find_default_warehouse(&self) -> Option<WarehouseId>;
}

impl<W> WarehouseDirectory for Arc<W>
where
    W: WarehouseDirectory + ?Sized,
{
    fn find_default_warehouse(&self) -> Option<WarehouseId> {
        (**self).find_default_warehouse()
    }
}

/// Directory with a statically configured default (tests/dev).
#[derive(Debug, Clone, Default)]
pub struct FixedWarehouseDirectory {
    default: Option<WarehouseId>,
}

impl FixedWarehouseDirectory {
    pub fn new(default: WarehouseId) -> Self {
        Self {
            default: Some(default),
        }
    }

    /// A directory with no default configured.
    pub fn none() -> Self {
        Self::default()
    }
}

impl WarehouseDirectory for FixedWarehouseDirectory {
    fn find_default_warehouse(&self) -> Option<WarehouseId> {
        self.default
    }
}
