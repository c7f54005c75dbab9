use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use facturo_accounts::{AccountMovementType, CashRegisterId, Currency, CustomerId};
use facturo_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use facturo_events::Event;
use facturo_numbering::DocumentType;
use facturo_stock::ProductId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    PartiallyPaid,
    Paid,
    Cancelled,
}

/// One invoice line with derived amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub item_id: AggregateId,
    pub product_id: ProductId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Percentage, e.g. 21 for 21% IVA.
    pub tax_rate: Decimal,
}

impl InvoiceItem {
    pub fn subtotal(&self) -> Decimal {
        self.quantity * self.unit_price
    }

    pub fn tax_amount(&self) -> Decimal {
        self.subtotal() * self.tax_rate / Decimal::ONE_HUNDRED
    }

    pub fn total(&self) -> Decimal {
        self.subtotal() + self.tax_amount()
    }
}

/// Electronic-invoice authorization attached after emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaeData {
    pub cae: String,
    pub cae_expiry: NaiveDate,
    pub cbt_num: u64,
    pub pt_venta: u32,
}

/// Aggregate root: Invoice (also credit and debit notes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: AggregateId,
    document_type: DocumentType,
    number: String,
    customer_id: Option<CustomerId>,
    currency: Currency,
    exchange_rate: Decimal,
    status: InvoiceStatus,
    items: Vec<InvoiceItem>,
    subtotal: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    paid_amount: Decimal,
    cae: Option<CaeData>,
    version: u64,
}

impl Invoice {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            document_type: DocumentType::FacturaB,
            number: String::new(),
            customer_id: None,
            currency: Currency::Ars,
            exchange_rate: Decimal::ONE,
            status: InvoiceStatus::Draft,
            items: Vec::new(),
            subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total: Decimal::ZERO,
            paid_amount: Decimal::ZERO,
            cae: None,
            version: 0,
        }
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn exchange_rate(&self) -> Decimal {
        self.exchange_rate
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn items(&self) -> &[InvoiceItem] {
        &self.items
    }

    pub fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    pub fn tax_amount(&self) -> Decimal {
        self.tax_amount
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn paid_amount(&self) -> Decimal {
        self.paid_amount
    }

    pub fn outstanding(&self) -> Decimal {
        self.total - self.paid_amount
    }

    pub fn cae(&self) -> Option<&CaeData> {
        self.cae.as_ref()
    }

    /// The account movement this document posts when issued.
    ///
    /// Invoices and debit notes increase what the customer owes; credit
    /// notes decrease it.
    pub fn account_effect(&self) -> AccountMovementType {
        if self.document_type.is_nota_credito() {
            AccountMovementType::Credit
        } else {
            AccountMovementType::Debit
        }
    }
}

impl AggregateRoot for Invoice {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Line supplied at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub product_id: ProductId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
}

/// Command: Create (a DRAFT document with a number already assigned).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Create {
    pub document_type: DocumentType,
    pub number: String,
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub exchange_rate: Decimal,
    pub items: Vec<InvoiceLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Issue (post account and, for facturas, stock effects).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterPayment (cumulative; overpayment is rejected).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub amount: Decimal,
    pub cash_register_id: CashRegisterId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachCae (record the tax-authority authorization).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachCae {
    pub cae: CaeData,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    Create(Create),
    Issue(Issue),
    RegisterPayment(RegisterPayment),
    Cancel(Cancel),
    AttachCae(AttachCae),
}

/// Event: Created (status starts at DRAFT, totals are derived once here).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    pub document_type: DocumentType,
    pub number: String,
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub exchange_rate: Decimal,
    pub items: Vec<InvoiceItem>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: Issued.
///
/// Carries the account effect and whether stock is decremented (facturas
/// only) so the lifecycle service can post the ledger legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issued {
    pub account_effect: AccountMovementType,
    pub posts_stock: bool,
    pub total: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRegistered (cumulative paid amount snapshot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub amount: Decimal,
    pub cash_register_id: CashRegisterId,
    pub paid_amount: Decimal,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: Cancelled.
///
/// `account_reversal` is the movement that undoes the original account
/// effect, present only when the document had been issued. Stock movements
/// already posted are intentionally not reversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancelled {
    pub account_reversal: Option<AccountMovementType>,
    pub total: Decimal,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CaeAttached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaeAttached {
    pub cae: CaeData,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    Created(Created),
    Issued(Issued),
    PaymentRegistered(PaymentRegistered),
    Cancelled(Cancelled),
    CaeAttached(CaeAttached),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::Created(_) => "invoice.created",
            InvoiceEvent::Issued(_) => "invoice.issued",
            InvoiceEvent::PaymentRegistered(_) => "invoice.payment_registered",
            InvoiceEvent::Cancelled(_) => "invoice.cancelled",
            InvoiceEvent::CaeAttached(_) => "invoice.cae_attached",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::Created(e) => e.occurred_at,
            InvoiceEvent::Issued(e) => e.occurred_at,
            InvoiceEvent::PaymentRegistered(e) => e.occurred_at,
            InvoiceEvent::Cancelled(e) => e.occurred_at,
            InvoiceEvent::CaeAttached(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::Created(e) => {
                self.document_type = e.document_type;
                self.number = e.number.clone();
                self.customer_id = Some(e.customer_id);
                self.currency = e.currency;
                self.exchange_rate = e.exchange_rate;
                self.items = e.items.clone();
                self.subtotal = e.subtotal;
                self.tax_amount = e.tax_amount;
                self.total = e.total;
                self.status = InvoiceStatus::Draft;
            }
            InvoiceEvent::Issued(_) => {
                self.status = InvoiceStatus::Issued;
            }
            InvoiceEvent::PaymentRegistered(e) => {
                self.paid_amount = e.paid_amount;
                self.status = e.status;
            }
            InvoiceEvent::Cancelled(_) => {
                self.status = InvoiceStatus::Cancelled;
            }
            InvoiceEvent::CaeAttached(e) => {
                self.cae = Some(e.cae.clone());
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::Create(cmd) => self.handle_create(cmd),
            InvoiceCommand::Issue(cmd) => self.handle_issue(cmd),
            InvoiceCommand::RegisterPayment(cmd) => self.handle_payment(cmd),
            InvoiceCommand::Cancel(cmd) => self.handle_cancel(cmd),
            InvoiceCommand::AttachCae(cmd) => self.handle_attach_cae(cmd),
        }
    }
}

impl Invoice {
    fn handle_create(&self, cmd: &Create) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.version > 0 {
            return Err(DomainError::invalid_transition("invoice already exists"));
        }
        if cmd.document_type == DocumentType::Remito {
            return Err(DomainError::validation(
                "a remito is not an invoicing document",
            ));
        }
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("invoice number cannot be empty"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("invoice needs at least one item"));
        }
        if cmd.exchange_rate <= Decimal::ZERO {
            return Err(DomainError::validation("exchange rate must be positive"));
        }

        let mut items = Vec::with_capacity(cmd.items.len());
        for line in &cmd.items {
            if line.quantity <= Decimal::ZERO {
                return Err(DomainError::validation(
                    "invoice item quantity must be positive",
                ));
            }
            if line.unit_price < Decimal::ZERO {
                return Err(DomainError::validation("unit price cannot be negative"));
            }
            if line.tax_rate < Decimal::ZERO {
                return Err(DomainError::validation("tax rate cannot be negative"));
            }
            items.push(InvoiceItem {
                item_id: AggregateId::new(),
                product_id: line.product_id,
                description: line.description.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                tax_rate: line.tax_rate,
            });
        }

        let subtotal: Decimal = items.iter().map(InvoiceItem::subtotal).sum();
        let tax_amount: Decimal = items.iter().map(InvoiceItem::tax_amount).sum();

        Ok(vec![InvoiceEvent::Created(Created {
            document_type: cmd.document_type,
            number: cmd.number.clone(),
            customer_id: cmd.customer_id,
            currency: cmd.currency,
            exchange_rate: cmd.exchange_rate,
            items,
            subtotal,
            tax_amount,
            total: subtotal + tax_amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_issue(&self, cmd: &Issue) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.version == 0 {
            return Err(DomainError::not_found());
        }
        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::invalid_transition(format!(
                "cannot issue an invoice in status {:?}",
                self.status
            )));
        }

        Ok(vec![InvoiceEvent::Issued(Issued {
            account_effect: self.account_effect(),
            posts_stock: self.document_type.is_factura(),
            total: self.total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_payment(&self, cmd: &RegisterPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.version == 0 {
            return Err(DomainError::not_found());
        }
        match self.status {
            InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid => {}
            other => {
                return Err(DomainError::invalid_transition(format!(
                    "cannot register a payment on an invoice in status {other:?}"
                )));
            }
        }
        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if cmd.amount > self.outstanding() {
            return Err(DomainError::validation(format!(
                "payment of {} exceeds outstanding amount {}",
                cmd.amount,
                self.outstanding()
            )));
        }

        let paid_amount = self.paid_amount + cmd.amount;
        let status = if paid_amount >= self.total {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::PartiallyPaid
        };

        Ok(vec![InvoiceEvent::PaymentRegistered(PaymentRegistered {
            amount: cmd.amount,
            cash_register_id: cmd.cash_register_id,
            paid_amount,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.version == 0 {
            return Err(DomainError::not_found());
        }
        if self.status == InvoiceStatus::Cancelled {
            return Err(DomainError::invalid_transition(
                "invoice is already cancelled",
            ));
        }

        // Drafts never posted ledger effects, so there is nothing to reverse.
        let account_reversal = match self.status {
            InvoiceStatus::Draft => None,
            _ => Some(match self.account_effect() {
                AccountMovementType::Debit => AccountMovementType::Credit,
                AccountMovementType::Credit => AccountMovementType::Debit,
            }),
        };

        Ok(vec![InvoiceEvent::Cancelled(Cancelled {
            account_reversal,
            total: self.total,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attach_cae(&self, cmd: &AttachCae) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.version == 0 {
            return Err(DomainError::not_found());
        }
        match self.status {
            InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid | InvoiceStatus::Paid => {}
            other => {
                return Err(DomainError::invalid_transition(format!(
                    "cannot attach a CAE to an invoice in status {other:?}"
                )));
            }
        }
        if self.cae.is_some() {
            return Err(DomainError::conflict("invoice already has a CAE"));
        }
        if cmd.cae.cae.trim().is_empty() {
            return Err(DomainError::validation("CAE cannot be empty"));
        }

        Ok(vec![InvoiceEvent::CaeAttached(CaeAttached {
            cae: cmd.cae.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn line(quantity: Decimal, unit_price: Decimal, tax_rate: Decimal) -> InvoiceLine {
        InvoiceLine {
            product_id: ProductId::new(AggregateId::new()),
            description: "widget".to_string(),
            quantity,
            unit_price,
            tax_rate,
        }
    }

    fn create(document_type: DocumentType, items: Vec<InvoiceLine>) -> InvoiceCommand {
        InvoiceCommand::Create(Create {
            document_type,
            number: "FB-2025-00000001".to_string(),
            customer_id: CustomerId::new(AggregateId::new()),
            currency: Currency::Ars,
            exchange_rate: Decimal::ONE,
            items,
            occurred_at: Utc::now(),
        })
    }

    fn apply_all(invoice: &mut Invoice, events: &[InvoiceEvent]) {
        for e in events {
            invoice.apply(e);
        }
    }

    fn issued_invoice(document_type: DocumentType, items: Vec<InvoiceLine>) -> Invoice {
        let mut invoice = Invoice::empty(AggregateId::new());
        let events = invoice.handle(&create(document_type, items)).unwrap();
        apply_all(&mut invoice, &events);
        let events = invoice
            .handle(&InvoiceCommand::Issue(Issue {
                occurred_at: Utc::now(),
            }))
            .unwrap();
        apply_all(&mut invoice, &events);
        invoice
    }

    #[test]
    fn totals_are_derived_from_lines() {
        // 2 x 100 at 21% => subtotal 200, tax 42, total 242.
        let mut invoice = Invoice::empty(AggregateId::new());
        let events = invoice
            .handle(&create(
                DocumentType::FacturaB,
                vec![line(dec!(2), dec!(100), dec!(21))],
            ))
            .unwrap();
        apply_all(&mut invoice, &events);

        assert_eq!(invoice.subtotal(), dec!(200));
        assert_eq!(invoice.tax_amount(), dec!(42));
        assert_eq!(invoice.total(), dec!(242));
        assert_eq!(invoice.status(), InvoiceStatus::Draft);
    }

    #[test]
    fn issuing_a_factura_posts_debit_and_stock() {
        let invoice = issued_invoice(
            DocumentType::FacturaB,
            vec![line(dec!(2), dec!(100), dec!(21))],
        );
        assert_eq!(invoice.status(), InvoiceStatus::Issued);
        assert_eq!(invoice.account_effect(), AccountMovementType::Debit);
        assert!(invoice.document_type().is_factura());
    }

    #[test]
    fn credit_notes_credit_the_account_and_skip_stock() {
        let mut invoice = Invoice::empty(AggregateId::new());
        let events = invoice
            .handle(&create(
                DocumentType::NotaCreditoB,
                vec![line(dec!(1), dec!(100), dec!(21))],
            ))
            .unwrap();
        apply_all(&mut invoice, &events);

        let events = invoice
            .handle(&InvoiceCommand::Issue(Issue {
                occurred_at: Utc::now(),
            }))
            .unwrap();
        match &events[0] {
            InvoiceEvent::Issued(e) => {
                assert_eq!(e.account_effect, AccountMovementType::Credit);
                assert!(!e.posts_stock);
            }
            other => panic!("Expected Issued event, got {other:?}"),
        }
    }

    #[test]
    fn issuing_twice_is_rejected() {
        let invoice = issued_invoice(
            DocumentType::FacturaA,
            vec![line(dec!(1), dec!(10), dec!(21))],
        );
        assert!(matches!(
            invoice.handle(&InvoiceCommand::Issue(Issue {
                occurred_at: Utc::now()
            })),
            Err(DomainError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn partial_then_full_payment_walks_the_status_machine() {
        let mut invoice = issued_invoice(
            DocumentType::FacturaB,
            vec![line(dec!(2), dec!(100), dec!(21))],
        );
        let register = CashRegisterId::new(AggregateId::new());

        let events = invoice
            .handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
                amount: dec!(100),
                cash_register_id: register,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        apply_all(&mut invoice, &events);
        assert_eq!(invoice.status(), InvoiceStatus::PartiallyPaid);
        assert_eq!(invoice.outstanding(), dec!(142));

        let events = invoice
            .handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
                amount: dec!(142),
                cash_register_id: register,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        apply_all(&mut invoice, &events);
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert_eq!(invoice.outstanding(), dec!(0));
    }

    #[test]
    fn overpayment_is_rejected() {
        let invoice = issued_invoice(
            DocumentType::FacturaB,
            vec![line(dec!(1), dec!(100), dec!(0))],
        );
        let err = invoice
            .handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
                amount: dec!(101),
                cash_register_id: CashRegisterId::new(AggregateId::new()),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn paying_a_draft_is_rejected() {
        let mut invoice = Invoice::empty(AggregateId::new());
        let events = invoice
            .handle(&create(
                DocumentType::FacturaB,
                vec![line(dec!(1), dec!(100), dec!(21))],
            ))
            .unwrap();
        apply_all(&mut invoice, &events);

        assert!(matches!(
            invoice.handle(&InvoiceCommand::RegisterPayment(RegisterPayment {
                amount: dec!(121),
                cash_register_id: CashRegisterId::new(AggregateId::new()),
                occurred_at: Utc::now(),
            })),
            Err(DomainError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn cancelling_an_issued_invoice_reverses_the_account_effect() {
        let mut invoice = issued_invoice(
            DocumentType::FacturaB,
            vec![line(dec!(2), dec!(100), dec!(21))],
        );
        let events = invoice
            .handle(&InvoiceCommand::Cancel(Cancel {
                reason: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        match &events[0] {
            InvoiceEvent::Cancelled(e) => {
                assert_eq!(e.account_reversal, Some(AccountMovementType::Credit));
                assert_eq!(e.total, dec!(242));
            }
            other => panic!("Expected Cancelled event, got {other:?}"),
        }
        apply_all(&mut invoice, &events);
        assert_eq!(invoice.status(), InvoiceStatus::Cancelled);
    }

    #[test]
    fn cancelling_a_draft_reverses_nothing() {
        let mut invoice = Invoice::empty(AggregateId::new());
        let events = invoice
            .handle(&create(
                DocumentType::FacturaB,
                vec![line(dec!(1), dec!(50), dec!(21))],
            ))
            .unwrap();
        apply_all(&mut invoice, &events);

        let events = invoice
            .handle(&InvoiceCommand::Cancel(Cancel {
                reason: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        match &events[0] {
            InvoiceEvent::Cancelled(e) => assert_eq!(e.account_reversal, None),
            other => panic!("Expected Cancelled event, got {other:?}"),
        }
    }

    #[test]
    fn cae_can_only_be_attached_once_after_issuing() {
        let mut invoice = issued_invoice(
            DocumentType::FacturaA,
            vec![line(dec!(1), dec!(100), dec!(21))],
        );
        let cae = CaeData {
            cae: "71234567890123".to_string(),
            cae_expiry: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            cbt_num: 1,
            pt_venta: 3,
        };
        let events = invoice
            .handle(&InvoiceCommand::AttachCae(AttachCae {
                cae: cae.clone(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        apply_all(&mut invoice, &events);
        assert_eq!(invoice.cae().map(|c| c.cae.as_str()), Some(cae.cae.as_str()));

        assert!(matches!(
            invoice.handle(&InvoiceCommand::AttachCae(AttachCae {
                cae,
                occurred_at: Utc::now(),
            })),
            Err(DomainError::Conflict(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property (total consistency): for any line set, subtotal is the
        /// sum of quantity x unit price, tax is each line's subtotal at its
        /// rate, and total = subtotal + tax. Exact decimal arithmetic, no
        /// drift across line counts.
        #[test]
        fn totals_are_exact_sums_over_lines(
            raw_lines in prop::collection::vec(
                (1i64..1_000, 0i64..100_000, 0i64..30),
                1..10
            )
        ) {
            let mut expected_subtotal = Decimal::ZERO;
            let mut expected_tax = Decimal::ZERO;
            let lines: Vec<InvoiceLine> = raw_lines
                .into_iter()
                .map(|(q, cents, rate)| {
                    let quantity = Decimal::from(q);
                    let unit_price = Decimal::new(cents, 2);
                    let tax_rate = Decimal::from(rate);
                    expected_subtotal += quantity * unit_price;
                    expected_tax += quantity * unit_price * tax_rate / Decimal::ONE_HUNDRED;
                    line(quantity, unit_price, tax_rate)
                })
                .collect();

            let mut invoice = Invoice::empty(AggregateId::new());
            let events = invoice
                .handle(&create(DocumentType::FacturaB, lines))
                .unwrap();
            apply_all(&mut invoice, &events);

            prop_assert_eq!(invoice.subtotal(), expected_subtotal);
            prop_assert_eq!(invoice.tax_amount(), expected_tax);
            prop_assert_eq!(invoice.total(), expected_subtotal + expected_tax);
        }

        /// Property (payment folding): any accepted payment sequence keeps
        /// paid_amount at the exact cumulative sum, never above total, and
        /// the status tracks the outstanding amount.
        #[test]
        fn payments_accumulate_exactly(
            payment_cents in prop::collection::vec(1i64..30_000, 1..20)
        ) {
            let mut invoice = issued_invoice(
                DocumentType::FacturaB,
                vec![line(dec!(2), dec!(100), dec!(21))],
            );

            let mut paid = Decimal::ZERO;
            for cents in payment_cents {
                let amount = Decimal::new(cents, 2);
                let cmd = InvoiceCommand::RegisterPayment(RegisterPayment {
                    amount,
                    cash_register_id: CashRegisterId::new(AggregateId::new()),
                    occurred_at: Utc::now(),
                });
                if let Ok(events) = invoice.handle(&cmd) {
                    apply_all(&mut invoice, &events);
                    paid += amount;
                }
            }

            prop_assert_eq!(invoice.paid_amount(), paid);
            prop_assert!(invoice.paid_amount() <= invoice.total());
            let expected_status = if invoice.paid_amount() == invoice.total() {
                InvoiceStatus::Paid
            } else if invoice.paid_amount() > Decimal::ZERO {
                InvoiceStatus::PartiallyPaid
            } else {
                InvoiceStatus::Issued
            };
            prop_assert_eq!(invoice.status(), expected_status);
        }
    }
}
