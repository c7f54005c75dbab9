//! Per-(document type, year) document numbering sequences.
//!
//! One `NumberSequence` aggregate per key: each `NumberAssigned` event is one
//! issued number, so the stream length *is* the sequence counter and two
//! writers can never commit the same number.

pub mod sequence;

pub use sequence::{
    AssignNumber, DocumentType, NumberAssigned, NumberSequence, NumberSequenceCommand,
    NumberSequenceEvent, SequenceKey,
};
