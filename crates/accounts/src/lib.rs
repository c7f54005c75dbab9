//! Per-(customer, currency) current-account ledger.
//!
//! One `CurrentAccount` aggregate per key: events are the immutable account
//! movements, the folded state is the signed balance (positive = customer
//! owes). Accounts come into existence lazily with the first movement.

pub mod account;

pub use account::{
    AccountKey, AccountMovementType, CashRegisterId, CreditLimitSet, CurrentAccount, Currency,
    CurrentAccountCommand, CurrentAccountEvent, CustomerId, MovementPosted, PostMovement,
    SetCreditLimit,
};
