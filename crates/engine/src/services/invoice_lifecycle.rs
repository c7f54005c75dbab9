//! Invoice lifecycle: creation, issuing, payment, cancellation and CAE
//! emission.
//!
//! Creation only writes the draft document (plus its number assignment).
//! Issuing is the transition that fans out into the ledgers: the account
//! movement and, for facturas, one SALE movement per line item, with
//! compensating movements when a later leg or the final status append fails.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::error;

use facturo_accounts::{
    AccountMovementType, CashRegisterId, Currency, CustomerId, PostMovement as PostAccountMovement,
};
use facturo_core::{Aggregate, AggregateId, AggregateRoot, UserId};
use facturo_events::{EventBus, EventEnvelope};
use facturo_invoicing::{
    AttachCae, CaeData, Cancel, Create, Invoice, InvoiceCommand, InvoiceEvent, InvoiceLine, Issue,
    RegisterPayment,
};
use facturo_numbering::DocumentType;
use facturo_stock::{PostMovement as PostStockMovement, ProductId, StockMovementType, WarehouseId};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::services::stock_ledger::StockLedger;
use crate::services::{CurrentAccountLedger, DocumentNumbering, WarehouseDirectory};

pub(crate) const INVOICE_AGGREGATE: &str = "invoicing.invoice";

/// Authorization returned by the tax authority for an emitted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaeGrant {
    pub cae: String,
    pub cae_expiry: NaiveDate,
    pub cbt_num: u64,
    pub pt_venta: u32,
}

#[derive(Debug, Error)]
pub enum TaxAuthorityError {
    #[error("tax authority unavailable: {0}")]
    Unavailable(String),

    #[error("emission rejected: {0}")]
    Rejected(String),
}

/// Electronic-invoice emission client (AFIP/ARCA), consumed only by the
/// emit-CAE flow. Called after the document is durably persisted, so a
/// failed emission never touches ledger state.
pub trait TaxAuthorityClient: Send + Sync {
    fn emit(&self, invoice: &Invoice) -> Result<CaeGrant, TaxAuthorityError>;
}

/// Request to create a draft document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInvoice {
    pub document_type: DocumentType,
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub exchange_rate: Decimal,
    pub items: Vec<InvoiceLine>,
}

pub struct InvoiceLifecycle<S, B, W, T> {
    dispatcher: CommandDispatcher<S, B>,
    numbering: DocumentNumbering<S, B>,
    accounts: CurrentAccountLedger<S, B>,
    stock: StockLedger<S, B>,
    warehouses: W,
    tax: T,
}

impl<S, B, W, T> InvoiceLifecycle<S, B, W, T>
where
    S: EventStore + Clone,
    B: EventBus<EventEnvelope<JsonValue>> + Clone,
    W: WarehouseDirectory,
    T: TaxAuthorityClient,
{
    pub fn new(store: S, bus: B, warehouses: W, tax: T) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store.clone(), bus.clone()),
            numbering: DocumentNumbering::new(store.clone(), bus.clone()),
            accounts: CurrentAccountLedger::new(store.clone(), bus.clone()),
            stock: StockLedger::new(store, bus),
            warehouses,
            tax,
        }
    }

    /// Create a draft document with a freshly assigned number.
    pub fn create(&self, req: CreateInvoice) -> Result<Invoice, DispatchError> {
        let occurred_at = Utc::now();
        let assigned = self.numbering.next_current_year(req.document_type)?;
        let invoice_id = AggregateId::new();

        self.dispatcher.dispatch::<Invoice>(
            invoice_id,
            INVOICE_AGGREGATE,
            InvoiceCommand::Create(Create {
                document_type: req.document_type,
                number: assigned.number,
                customer_id: req.customer_id,
                currency: req.currency,
                exchange_rate: req.exchange_rate,
                items: req.items,
                occurred_at,
            }),
            Invoice::empty,
        )?;

        self.dispatcher.load(invoice_id, Invoice::empty)
    }

    /// Issue a draft: post the account movement (DEBIT for invoices and
    /// debit notes, CREDIT for credit notes) and, for facturas, one SALE
    /// movement per line item against the default warehouse.
    pub fn issue(
        &self,
        invoice_id: AggregateId,
        actor: Option<UserId>,
    ) -> Result<Invoice, DispatchError> {
        let occurred_at = Utc::now();
        let invoice = self.dispatcher.load(invoice_id, Invoice::empty)?;

        let command = Issue { occurred_at };
        let decided = invoice
            .handle(&InvoiceCommand::Issue(command.clone()))
            .map_err(DispatchError::from)?;
        let issued = decided
            .iter()
            .find_map(|e| match e {
                InvoiceEvent::Issued(i) => Some(i.clone()),
                _ => None,
            })
            .ok_or_else(|| DispatchError::Deserialize("issue event missing".to_string()))?;

        let customer_id = invoice
            .customer_id()
            .ok_or(DispatchError::NotFound)?;
        let currency = invoice.currency();

        self.accounts.add_movement(PostAccountMovement {
            customer_id,
            currency,
            movement_type: issued.account_effect,
            amount: issued.total,
            description: invoice.number().to_string(),
            invoice_id: Some(invoice_id),
            cash_register_id: None,
            occurred_at,
        })?;

        let mut stock_legs: Vec<(ProductId, Decimal)> = Vec::new();
        if issued.posts_stock {
            let warehouse_id = self.warehouses.find_default_warehouse().ok_or_else(|| {
                let err = DispatchError::Validation(
                    "no default warehouse configured".to_string(),
                );
                self.reverse_account(
                    customer_id,
                    currency,
                    issued.account_effect,
                    issued.total,
                    invoice_id,
                    invoice.number(),
                    occurred_at,
                );
                err
            })?;

            for item in invoice.items() {
                let moved = self.stock.add_movement(PostStockMovement {
                    product_id: item.product_id,
                    warehouse_id,
                    movement_type: StockMovementType::Sale,
                    quantity: item.quantity,
                    reason: Some(invoice.number().to_string()),
                    reference_id: Some(invoice_id),
                    actor,
                    related_warehouse_id: None,
                    occurred_at,
                });
                match moved {
                    Ok(_) => stock_legs.push((item.product_id, item.quantity)),
                    Err(err) => {
                        self.undo_stock_legs(&stock_legs, warehouse_id, invoice_id, actor, occurred_at);
                        self.reverse_account(
                            customer_id,
                            currency,
                            issued.account_effect,
                            issued.total,
                            invoice_id,
                            invoice.number(),
                            occurred_at,
                        );
                        return Err(err);
                    }
                }
            }

            if let Err(err) = self.dispatcher.dispatch::<Invoice>(
                invoice_id,
                INVOICE_AGGREGATE,
                InvoiceCommand::Issue(command),
                Invoice::empty,
            ) {
                self.undo_stock_legs(&stock_legs, warehouse_id, invoice_id, actor, occurred_at);
                self.reverse_account(
                    customer_id,
                    currency,
                    issued.account_effect,
                    issued.total,
                    invoice_id,
                    invoice.number(),
                    occurred_at,
                );
                return Err(err);
            }
        } else if let Err(err) = self.dispatcher.dispatch::<Invoice>(
            invoice_id,
            INVOICE_AGGREGATE,
            InvoiceCommand::Issue(command),
            Invoice::empty,
        ) {
            self.reverse_account(
                customer_id,
                currency,
                issued.account_effect,
                issued.total,
                invoice_id,
                invoice.number(),
                occurred_at,
            );
            return Err(err);
        }

        self.dispatcher.load(invoice_id, Invoice::empty)
    }

    /// Register a payment against an issued document, posting the matching
    /// CREDIT account movement.
    pub fn pay(
        &self,
        invoice_id: AggregateId,
        amount: Decimal,
        cash_register_id: CashRegisterId,
    ) -> Result<Invoice, DispatchError> {
        let occurred_at = Utc::now();
        let invoice = self.dispatcher.load(invoice_id, Invoice::empty)?;

        let command = RegisterPayment {
            amount,
            cash_register_id,
            occurred_at,
        };
        invoice
            .handle(&InvoiceCommand::RegisterPayment(command.clone()))
            .map_err(DispatchError::from)?;

        let customer_id = invoice
            .customer_id()
            .ok_or(DispatchError::NotFound)?;

        self.accounts.add_movement(PostAccountMovement {
            customer_id,
            currency: invoice.currency(),
            movement_type: AccountMovementType::Credit,
            amount,
            description: format!("Payment {}", invoice.number()),
            invoice_id: Some(invoice_id),
            cash_register_id: Some(cash_register_id),
            occurred_at,
        })?;

        if let Err(err) = self.dispatcher.dispatch::<Invoice>(
            invoice_id,
            INVOICE_AGGREGATE,
            InvoiceCommand::RegisterPayment(command),
            Invoice::empty,
        ) {
            self.reverse_account(
                customer_id,
                invoice.currency(),
                AccountMovementType::Credit,
                amount,
                invoice_id,
                invoice.number(),
                occurred_at,
            );
            return Err(err);
        }

        self.dispatcher.load(invoice_id, Invoice::empty)
    }

    /// Cancel a document, reversing its account effect if it had been
    /// issued. Stock movements already posted are left in place.
    pub fn cancel(
        &self,
        invoice_id: AggregateId,
        reason: Option<String>,
    ) -> Result<Invoice, DispatchError> {
        let occurred_at = Utc::now();
        let invoice = self.dispatcher.load(invoice_id, Invoice::empty)?;

        let command = Cancel {
            reason,
            occurred_at,
        };
        let decided = invoice
            .handle(&InvoiceCommand::Cancel(command.clone()))
            .map_err(DispatchError::from)?;
        let cancelled = decided
            .iter()
            .find_map(|e| match e {
                InvoiceEvent::Cancelled(c) => Some(c.clone()),
                _ => None,
            })
            .ok_or_else(|| DispatchError::Deserialize("cancellation event missing".to_string()))?;

        if let Some(reversal) = cancelled.account_reversal {
            let customer_id = invoice
                .customer_id()
                .ok_or(DispatchError::NotFound)?;

            self.accounts.add_movement(PostAccountMovement {
                customer_id,
                currency: invoice.currency(),
                movement_type: reversal,
                amount: cancelled.total,
                description: format!("Cancellation {}", invoice.number()),
                invoice_id: Some(invoice_id),
                cash_register_id: None,
                occurred_at,
            })?;

            if let Err(err) = self.dispatcher.dispatch::<Invoice>(
                invoice_id,
                INVOICE_AGGREGATE,
                InvoiceCommand::Cancel(command),
                Invoice::empty,
            ) {
                self.reverse_account(
                    customer_id,
                    invoice.currency(),
                    reversal,
                    cancelled.total,
                    invoice_id,
                    invoice.number(),
                    occurred_at,
                );
                return Err(err);
            }
        } else {
            self.dispatcher.dispatch::<Invoice>(
                invoice_id,
                INVOICE_AGGREGATE,
                InvoiceCommand::Cancel(command),
                Invoice::empty,
            )?;
        }

        self.dispatcher.load(invoice_id, Invoice::empty)
    }

    /// Emit the document to the tax authority and attach the granted CAE.
    pub fn emit_cae(&self, invoice_id: AggregateId) -> Result<Invoice, DispatchError> {
        let invoice = self.dispatcher.load(invoice_id, Invoice::empty)?;
        if invoice.version() == 0 {
            return Err(DispatchError::NotFound);
        }

        let grant = self
            .tax
            .emit(&invoice)
            .map_err(|e| DispatchError::External(e.to_string()))?;

        self.dispatcher.dispatch::<Invoice>(
            invoice_id,
            INVOICE_AGGREGATE,
            InvoiceCommand::AttachCae(AttachCae {
                cae: CaeData {
                    cae: grant.cae,
                    cae_expiry: grant.cae_expiry,
                    cbt_num: grant.cbt_num,
                    pt_venta: grant.pt_venta,
                },
                occurred_at: Utc::now(),
            }),
            Invoice::empty,
        )?;

        self.dispatcher.load(invoice_id, Invoice::empty)
    }

    /// Post the opposite account movement to undo a committed one. Failures
    /// are logged, not surfaced: the invoice reference ties the orphaned
    /// movement to this document for reconciliation.
    #[allow(clippy::too_many_arguments)]
    fn reverse_account(
        &self,
        customer_id: CustomerId,
        currency: Currency,
        original: AccountMovementType,
        amount: Decimal,
        invoice_id: AggregateId,
        number: &str,
        occurred_at: DateTime<Utc>,
    ) {
        let reversal = match original {
            AccountMovementType::Debit => AccountMovementType::Credit,
            AccountMovementType::Credit => AccountMovementType::Debit,
        };
        let undone = self.accounts.add_movement(PostAccountMovement {
            customer_id,
            currency,
            movement_type: reversal,
            amount,
            description: format!("Compensation {number}"),
            invoice_id: Some(invoice_id),
            cash_register_id: None,
            occurred_at,
        });
        if let Err(err) = undone {
            error!(
                %invoice_id,
                %customer_id,
                ?err,
                "account compensation failed; balance needs manual reconciliation"
            );
        }
    }

    fn undo_stock_legs(
        &self,
        legs: &[(ProductId, Decimal)],
        warehouse_id: WarehouseId,
        invoice_id: AggregateId,
        actor: Option<UserId>,
        occurred_at: DateTime<Utc>,
    ) {
        for &(product_id, quantity) in legs.iter().rev() {
            let undone = self.stock.add_movement(PostStockMovement {
                product_id,
                warehouse_id,
                movement_type: StockMovementType::Return,
                quantity,
                reason: Some("invoice compensation".to_string()),
                reference_id: Some(invoice_id),
                actor,
                related_warehouse_id: None,
                occurred_at,
            });
            if let Err(err) = undone {
                error!(
                    %invoice_id,
                    %product_id,
                    ?err,
                    "stock compensation failed; quantity needs manual reconciliation"
                );
            }
        }
    }
}
