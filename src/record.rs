//! A single approver's slot in a chain
use super::types::{ChainId, RecordId, TimeStamp, UserId};
use chrono::Utc;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ChainUserRecord {
    #[n(0)]
    pub id: RecordId,
    #[n(1)]
    pub chain_id: ChainId,
    #[n(2)]
    pub user_id: UserId, // the assigned approver, fixed at creation
    #[n(3)]
    pub sequence: u32, // 1-based position in the chain
    #[n(4)]
    pub approved_at: Option<TimeStamp<Utc>>,
    #[n(5)]
    pub approved_by: Option<UserId>, // who actually acted
    #[n(6)]
    pub is_current: bool,
}

/// Display status of a record, in the precedence the approval table uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Approved,
    Current,
    Pending,
}

impl ChainUserRecord {
    pub fn new(id: RecordId, chain_id: ChainId, user_id: UserId, sequence: u32) -> Self {
        Self {
            id,
            chain_id,
            user_id,
            sequence,
            approved_at: None,
            approved_by: None,
            is_current: sequence == 1,
        }
    }
    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }
    pub fn status(&self) -> RecordStatus {
        if self.is_approved() {
            RecordStatus::Approved
        } else if self.is_current {
            RecordStatus::Current
        } else {
            RecordStatus::Pending
        }
    }
    pub(crate) fn mark_approved(&mut self, acting: &UserId, at: TimeStamp<Utc>) {
        self.approved_at = Some(at);
        self.approved_by = Some(acting.clone());
        self.is_current = false;
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Approved => f.write_str("Approved"),
            RecordStatus::Current => f.write_str("Current"),
            RecordStatus::Pending => f.write_str("Pending"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: u32) -> ChainUserRecord {
        ChainUserRecord::new(
            RecordId::from("record_1"),
            ChainId::from("chain_1"),
            UserId::from("user_a"),
            sequence,
        )
    }

    #[test]
    fn only_first_slot_starts_current() {
        assert!(record(1).is_current);
        assert!(!record(2).is_current);
    }

    #[test]
    fn approval_takes_precedence_over_current() {
        let mut rec = record(1);
        assert_eq!(rec.status(), RecordStatus::Current);

        rec.mark_approved(&UserId::from("user_b"), TimeStamp::new());

        assert_eq!(rec.status(), RecordStatus::Approved);
        assert!(!rec.is_current);
        assert_eq!(rec.approved_by, Some(UserId::from("user_b")));
        assert_eq!(record(2).status(), RecordStatus::Pending);
    }

    #[test]
    fn record_cbor_roundtrip() {
        let mut original = record(3);
        original.mark_approved(&UserId::from("user_a"), TimeStamp::new());

        let encoded = minicbor::to_vec(&original).unwrap();
        let decoded: ChainUserRecord = minicbor::decode(&encoded).unwrap();

        assert_eq!(original, decoded);
    }
}
