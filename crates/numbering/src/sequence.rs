use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use facturo_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use facturo_events::Event;

/// All numbered document types, each with a distinct prefix.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    FacturaA,
    FacturaB,
    FacturaC,
    NotaCreditoA,
    NotaCreditoB,
    NotaCreditoC,
    NotaDebitoA,
    NotaDebitoB,
    NotaDebitoC,
    Remito,
}

impl DocumentType {
    pub fn prefix(self) -> &'static str {
        match self {
            DocumentType::FacturaA => "FA",
            DocumentType::FacturaB => "FB",
            DocumentType::FacturaC => "FC",
            DocumentType::NotaCreditoA => "NCA",
            DocumentType::NotaCreditoB => "NCB",
            DocumentType::NotaCreditoC => "NCC",
            DocumentType::NotaDebitoA => "NDA",
            DocumentType::NotaDebitoB => "NDB",
            DocumentType::NotaDebitoC => "NDC",
            DocumentType::Remito => "RM",
        }
    }

    /// Sales invoices decrement stock and debit the customer account;
    /// credit notes go the other way, debit notes debit without stock effects.
    pub fn is_factura(self) -> bool {
        matches!(
            self,
            DocumentType::FacturaA | DocumentType::FacturaB | DocumentType::FacturaC
        )
    }

    pub fn is_nota_credito(self) -> bool {
        matches!(
            self,
            DocumentType::NotaCreditoA | DocumentType::NotaCreditoB | DocumentType::NotaCreditoC
        )
    }

    pub fn is_nota_debito(self) -> bool {
        matches!(
            self,
            DocumentType::NotaDebitoA | DocumentType::NotaDebitoB | DocumentType::NotaDebitoC
        )
    }
}

impl core::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Composite key: one sequence stream per (document type, year).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceKey {
    pub document_type: DocumentType,
    pub year: i32,
}

impl SequenceKey {
    pub fn new(document_type: DocumentType, year: i32) -> Self {
        Self {
            document_type,
            year,
        }
    }

    /// Deterministic stream id for this key.
    pub fn stream_id(&self) -> AggregateId {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(b"sequence/");
        key.extend_from_slice(self.document_type.prefix().as_bytes());
        key.push(b'/');
        key.extend_from_slice(&self.year.to_be_bytes());
        AggregateId::derived(&key)
    }
}

/// Aggregate root: NumberSequence.
///
/// Folded state is the last issued sequence value; the next assignment is
/// always `last_sequence + 1`, so numbers within one key are gap-free and
/// strictly increasing as long as appends go through the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberSequence {
    id: AggregateId,
    last_sequence: u64,
    version: u64,
}

impl NumberSequence {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            last_sequence: 0,
            version: 0,
        }
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

impl AggregateRoot for NumberSequence {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AssignNumber (take the next number for the key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignNumber {
    pub document_type: DocumentType,
    pub year: i32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberSequenceCommand {
    AssignNumber(AssignNumber),
}

/// Event: NumberAssigned, one issued document number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberAssigned {
    pub document_type: DocumentType,
    pub year: i32,
    pub sequence: u64,
    pub number: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberSequenceEvent {
    NumberAssigned(NumberAssigned),
}

impl Event for NumberSequenceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            NumberSequenceEvent::NumberAssigned(_) => "numbering.number_assigned",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            NumberSequenceEvent::NumberAssigned(e) => e.occurred_at,
        }
    }
}

/// Render the canonical document number: `{prefix}-{year}-{8-digit-seq}`.
pub fn format_number(document_type: DocumentType, year: i32, sequence: u64) -> String {
    format!("{}-{year}-{sequence:08}", document_type.prefix())
}

impl Aggregate for NumberSequence {
    type Command = NumberSequenceCommand;
    type Event = NumberSequenceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            NumberSequenceEvent::NumberAssigned(e) => {
                self.last_sequence = e.sequence;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            NumberSequenceCommand::AssignNumber(cmd) => self.handle_assign(cmd),
        }
    }
}

impl NumberSequence {
    fn handle_assign(&self, cmd: &AssignNumber) -> Result<Vec<NumberSequenceEvent>, DomainError> {
        if SequenceKey::new(cmd.document_type, cmd.year).stream_id() != self.id {
            return Err(DomainError::invariant("sequence key does not match stream"));
        }

        let sequence = self.last_sequence + 1;
        Ok(vec![NumberSequenceEvent::NumberAssigned(NumberAssigned {
            document_type: cmd.document_type,
            year: cmd.year,
            sequence,
            number: format_number(cmd.document_type, cmd.year, sequence),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assign(key: SequenceKey) -> NumberSequenceCommand {
        NumberSequenceCommand::AssignNumber(AssignNumber {
            document_type: key.document_type,
            year: key.year,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn first_number_starts_at_one_and_is_zero_padded() {
        let key = SequenceKey::new(DocumentType::FacturaB, 2025);
        let mut seq = NumberSequence::empty(key.stream_id());

        let events = seq.handle(&assign(key)).unwrap();
        match &events[0] {
            NumberSequenceEvent::NumberAssigned(e) => {
                assert_eq!(e.sequence, 1);
                assert_eq!(e.number, "FB-2025-00000001");
            }
        }
        for e in &events {
            seq.apply(e);
        }
        assert_eq!(seq.last_sequence(), 1);
    }

    #[test]
    fn numbers_increase_without_gaps() {
        let key = SequenceKey::new(DocumentType::Remito, 2025);
        let mut seq = NumberSequence::empty(key.stream_id());

        for expected in 1..=5u64 {
            let events = seq.handle(&assign(key)).unwrap();
            match &events[0] {
                NumberSequenceEvent::NumberAssigned(e) => assert_eq!(e.sequence, expected),
            }
            for e in &events {
                seq.apply(e);
            }
        }
        assert_eq!(seq.last_sequence(), 5);
    }

    #[test]
    fn years_are_independent_sequences() {
        let a = SequenceKey::new(DocumentType::FacturaA, 2024).stream_id();
        let b = SequenceKey::new(DocumentType::FacturaA, 2025).stream_id();
        assert_ne!(a, b);
    }

    #[test]
    fn every_document_type_has_a_distinct_prefix() {
        let all = [
            DocumentType::FacturaA,
            DocumentType::FacturaB,
            DocumentType::FacturaC,
            DocumentType::NotaCreditoA,
            DocumentType::NotaCreditoB,
            DocumentType::NotaCreditoC,
            DocumentType::NotaDebitoA,
            DocumentType::NotaDebitoB,
            DocumentType::NotaDebitoC,
            DocumentType::Remito,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.prefix(), b.prefix());
            }
        }
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let key = SequenceKey::new(DocumentType::FacturaA, 2025);
        let seq = NumberSequence::empty(AggregateId::new());
        assert!(seq.handle(&assign(key)).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property (uniqueness/monotonicity): N assignments yield the
        /// sequence 1..=N with distinct numbers.
        #[test]
        fn n_assignments_yield_distinct_consecutive_numbers(n in 1usize..60) {
            let key = SequenceKey::new(DocumentType::FacturaC, 2025);
            let mut seq = NumberSequence::empty(key.stream_id());
            let mut numbers = Vec::with_capacity(n);

            for expected in 1..=n as u64 {
                let events = seq.handle(&assign(key)).unwrap();
                match &events[0] {
                    NumberSequenceEvent::NumberAssigned(e) => {
                        prop_assert_eq!(e.sequence, expected);
                        numbers.push(e.number.clone());
                    }
                }
                for e in &events {
                    seq.apply(e);
                }
            }

            let before = numbers.len();
            numbers.sort();
            numbers.dedup();
            prop_assert_eq!(numbers.len(), before);
        }
    }
}
