use super::types::{ChainId, UserId};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Chain has no approvers")]
    Empty,
    #[error("Sequence numbers are not contiguous from 1: expected {expected}, found {found}")]
    SequenceGap { expected: u32, found: u32 },
    #[error("Approver {0} appears more than once in the chain")]
    DuplicateApprover(UserId),
    #[error("More than one record is marked as the current approver")]
    MultipleCurrent,
    #[error("Record at sequence {0} is both approved and current")]
    ApprovedAndCurrent(u32),
    #[error("Every approver has approved but the chain is still active")]
    CompletedButActive,
    #[error("Record at sequence {0} belongs to another chain")]
    ForeignRecord(u32),
    #[error("Chain holds {0} records, more than a sequence number can address")]
    TooManyRecords(usize),
    #[error("Project completion is pending on a chain that is not completed")]
    PendingCompletionOnOpenChain,
}

#[derive(thiserror::Error, Debug)]
pub enum ChainError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("User {0} is not allowed to perform this action")]
    Unauthorized(UserId),
    #[error("Approver {0} is listed more than once")]
    DuplicateApprover(UserId),
    #[error("Approval chain {0} was not found")]
    NotFound(ChainId),
    #[error("User {got} is not the current approver. Expected: {expected}")]
    NotCurrentApprover { expected: UserId, got: UserId },
    #[error("Approval chain {0} has no pending approver")]
    AlreadyCompleted(ChainId),
    #[error("Approval chain {0} was replaced by a newer chain")]
    Inactive(ChainId),
    #[error("Project status {0:?} does not exist")]
    MissingCompletionStatus(String),
    #[error("Stored approval chain is inconsistent: {0}")]
    Corrupt(#[from] ValidationError),
    #[error("Storage failure: {0}")]
    Store(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encode(#[from] minicbor::encode::Error<std::convert::Infallible>),
    #[error("Failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sled::transaction::TransactionError<ChainError>> for ChainError {
    fn from(value: sled::transaction::TransactionError<ChainError>) -> Self {
        match value {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => ChainError::Store(e),
        }
    }
}
