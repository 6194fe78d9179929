//! The approval chain aggregate and its state machine
//!
//! A chain owns an ordered list of [`ChainUserRecord`]s. Its state is never stored directly; it
//! is derived from the `active` flag and the records' `is_current` and `approved_at` fields.
use super::error::{ChainError, ValidationError};
use super::record::ChainUserRecord;
use super::types::{ChainId, ProjectId, RecordId, TimeStamp, UserId};
use super::utils::{self, CHAIN_HRP, RECORD_HRP};
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ApprovalChain {
    #[n(0)]
    pub id: ChainId,
    #[n(1)]
    pub project_id: ProjectId,
    #[n(2)]
    pub created_by: UserId,
    #[n(3)]
    pub active: bool,
    #[n(4)]
    pub created_at: TimeStamp<Utc>,
    #[n(5)]
    pub records: Vec<ChainUserRecord>, // ordered by sequence
    /// Set when the chain completed but the project status update has not gone through yet.
    #[n(6)]
    pub completion_pending: bool,
}

/// State of a chain as derived from its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    /// Nobody has approved yet. `current` is the sequence of the first approver.
    Pending { current: u32 },
    /// Some approvals are in, the approver at `current` is up next.
    InProgress { current: u32, approved: usize },
    /// Every record is approved. Also the derived state of a chain without records.
    Completed,
    /// Unapproved records remain but none is marked current.
    Stalled,
}

/// What a call to [`ApprovalChain::approve_and_forward`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Advanced { approved: RecordId, next: RecordId },
    Completed { approved: RecordId },
    NoOp,
}

impl ApprovalChain {
    /// Build a fresh, active chain with one record per approver, in the given order.
    pub fn new(
        project_id: ProjectId,
        created_by: UserId,
        approvers: &[UserId],
    ) -> Result<Self, ChainError> {
        let id = ChainId::new(utils::new_uuid_to_bech32(CHAIN_HRP)?);
        Self::new_with(id, project_id, created_by, approvers)
    }

    /// Same as [`ApprovalChain::new`] with a caller supplied chain id.
    pub fn new_with(
        id: ChainId,
        project_id: ProjectId,
        created_by: UserId,
        approvers: &[UserId],
    ) -> Result<Self, ChainError> {
        check_approvers(approvers)?;

        let mut records = Vec::with_capacity(approvers.len());
        for (position, user) in approvers.iter().enumerate() {
            let sequence = sequence_for(position).ok_or_else(|| {
                ChainError::ValidationFailed(format!("too many approvers: {}", approvers.len()))
            })?;
            let record_id = RecordId::new(utils::new_uuid_to_bech32(RECORD_HRP)?);
            records.push(ChainUserRecord::new(
                record_id,
                id.clone(),
                user.clone(),
                sequence,
            ));
        }

        Ok(Self {
            id,
            project_id,
            created_by,
            active: true,
            created_at: TimeStamp::new(),
            records,
            completion_pending: false,
        })
    }

    pub fn records(&self) -> &[ChainUserRecord] {
        &self.records
    }

    pub fn record_for(&self, user: &UserId) -> Option<&ChainUserRecord> {
        self.records.iter().find(|r| &r.user_id == user)
    }

    pub fn has_approver(&self, user: &UserId) -> bool {
        self.record_for(user).is_some()
    }

    pub fn current_approver(&self) -> Option<&ChainUserRecord> {
        self.records.iter().find(|r| r.is_current)
    }

    /// The approver after the current one, or the first approver if nobody is current.
    pub fn next_approver(&self) -> Option<&ChainUserRecord> {
        match self.current_approver() {
            None => self.records.iter().min_by_key(|r| r.sequence),
            Some(current) => self.by_sequence(current.sequence + 1),
        }
    }

    /// The last record, once it has been approved.
    pub fn final_approval(&self) -> Option<&ChainUserRecord> {
        self.records
            .iter()
            .max_by_key(|r| r.sequence)
            .filter(|r| r.is_approved())
    }

    pub fn completed_steps(&self) -> impl Iterator<Item = &ChainUserRecord> {
        self.records.iter().filter(|r| r.is_approved())
    }

    // an empty chain counts as completed
    pub fn is_completed(&self) -> bool {
        self.completed_steps().count() == self.records.len()
    }

    pub fn state(&self) -> ChainState {
        if self.is_completed() {
            return ChainState::Completed;
        }

        match self.current_approver() {
            None => ChainState::Stalled,
            Some(current) => match self.completed_steps().count() {
                0 => ChainState::Pending {
                    current: current.sequence,
                },
                approved => ChainState::InProgress {
                    current: current.sequence,
                    approved,
                },
            },
        }
    }

    /// Approve the current record on behalf of `acting` and hand the chain to the next approver.
    ///
    /// When the current record is the last one the chain is deactivated and
    /// [`Transition::Completed`] is returned; the caller owns the project side effect. Without a
    /// pending current approver nothing is touched and [`Transition::NoOp`] is returned.
    pub fn approve_and_forward(&mut self, acting: &UserId, at: TimeStamp<Utc>) -> Transition {
        let Some(current) = self.records.iter().position(|r| r.is_current) else {
            return Transition::NoOp;
        };
        if self.records[current].is_approved() {
            return Transition::NoOp;
        }

        let next_sequence = self.records[current].sequence + 1;
        let next = self.records.iter().position(|r| r.sequence == next_sequence);

        self.records[current].mark_approved(acting, at);
        let approved = self.records[current].id.clone();

        match next {
            Some(next) => {
                self.records[next].is_current = true;
                Transition::Advanced {
                    approved,
                    next: self.records[next].id.clone(),
                }
            }
            None => {
                self.active = false;
                Transition::Completed { approved }
            }
        }
    }

    /// Check the stored invariants: dense sequences, unique approvers and a single current slot.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.records.is_empty() {
            return Err(ValidationError::Empty);
        }

        let mut seen = HashSet::new();
        let mut current = 0;
        for (position, record) in self.records.iter().enumerate() {
            let expected = sequence_for(position)
                .ok_or(ValidationError::TooManyRecords(self.records.len()))?;
            if record.sequence != expected {
                return Err(ValidationError::SequenceGap {
                    expected,
                    found: record.sequence,
                });
            }
            if record.chain_id != self.id {
                return Err(ValidationError::ForeignRecord(record.sequence));
            }
            if !seen.insert(&record.user_id) {
                return Err(ValidationError::DuplicateApprover(record.user_id.clone()));
            }
            if record.is_current {
                if record.is_approved() {
                    return Err(ValidationError::ApprovedAndCurrent(record.sequence));
                }
                current += 1;
            }
        }

        if current > 1 {
            return Err(ValidationError::MultipleCurrent);
        }
        if self.active && self.is_completed() {
            return Err(ValidationError::CompletedButActive);
        }
        if self.completion_pending && !self.is_completed() {
            return Err(ValidationError::PendingCompletionOnOpenChain);
        }

        Ok(())
    }

    fn by_sequence(&self, sequence: u32) -> Option<&ChainUserRecord> {
        self.records.iter().find(|r| r.sequence == sequence)
    }
}

// sequences start at 1
fn sequence_for(position: usize) -> Option<u32> {
    u32::try_from(position).ok()?.checked_add(1)
}

/// Approver lists must be non-empty and free of repeats.
pub fn check_approvers(approvers: &[UserId]) -> Result<(), ChainError> {
    if approvers.is_empty() {
        return Err(ChainError::ValidationFailed(
            "an approval chain needs at least one approver".into(),
        ));
    }

    let mut seen = HashSet::new();
    for user in approvers {
        if !seen.insert(user) {
            return Err(ChainError::DuplicateApprover(user.clone()));
        }
    }

    Ok(())
}

impl fmt::Display for ApprovalChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = if self.active { "active" } else { "inactive" };
        writeln!(
            f,
            "{} [{}] project {} created by {} at {}",
            self.id, active, self.project_id, self.created_by, self.created_at
        )?;

        for record in &self.records {
            write!(f, "  #{} {} {}", record.sequence, record.user_id, record.status())?;
            if let Some(at) = &record.approved_at {
                write!(f, " on {at}")?;
                if let Some(by) = &record.approved_by {
                    write!(f, " by {by}")?;
                }
            }
            writeln!(f)?;
        }

        Ok(())
    }
}
