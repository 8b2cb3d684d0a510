use solana_program::{instruction::InstructionError, pubkey::Pubkey};
use solana_sdk::{signature::Signature, transaction::TransactionError};
use thiserror::Error;

use crate::state::BountyStatus;

pub type EscrowResult<T> = Result<T, EscrowError>;

/// Every failure the client can surface. Encoding and seed errors are raised
/// before any network call; `Timeout` leaves the signature available for
/// re-polling.
#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("seed component is {len} bytes, max is {max}")]
    SeedTooLong { len: usize, max: usize },

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("malformed account {address}: {reason}")]
    MalformedAccount {
        address: Pubkey,
        reason: MalformedAccount,
    },

    #[error("signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("action not allowed: {0}")]
    StateMachineViolation(#[from] StateMachineViolation),

    #[error("transaction {signature} rejected by program: {failure}")]
    ProgramError {
        signature: Signature,
        failure: ProgramFailure,
    },

    #[error("transaction {signature} not confirmed within polling budget")]
    Timeout { signature: Signature },

    #[error("read-back of {address} failed after confirmation: {reason}")]
    ReconciliationFailure { address: Pubkey, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Flat classification of [`EscrowError`] for callers that render messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SeedTooLong,
    Encoding,
    MalformedAccount,
    SignerUnavailable,
    StateMachineViolation,
    ProgramError,
    Timeout,
    ReconciliationFailure,
    Transport,
    InvalidInput,
}

impl EscrowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EscrowError::SeedTooLong { .. } => ErrorKind::SeedTooLong,
            EscrowError::Encoding(_) => ErrorKind::Encoding,
            EscrowError::MalformedAccount { .. } => ErrorKind::MalformedAccount,
            EscrowError::SignerUnavailable(_) => ErrorKind::SignerUnavailable,
            EscrowError::StateMachineViolation(_) => ErrorKind::StateMachineViolation,
            EscrowError::ProgramError { .. } => ErrorKind::ProgramError,
            EscrowError::Timeout { .. } => ErrorKind::Timeout,
            EscrowError::ReconciliationFailure { .. } => ErrorKind::ReconciliationFailure,
            EscrowError::Transport(_) => ErrorKind::Transport,
            EscrowError::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// Only a timeout (re-poll the same signature) and raw transport failures
    /// are worth retrying. Program rejections need different parameters.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Transport)
    }

    /// Signature of the submitted transaction, when one exists.
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            EscrowError::ProgramError { signature, .. } | EscrowError::Timeout { signature } => {
                Some(signature)
            }
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("amount does not fit in 64 bits")]
    AmountOverflow,

    #[error("invalid amount format: {0}")]
    InvalidAmountFormat(String),

    #[error("deadline {deadline} is not after current time {now}")]
    DeadlineInPast { deadline: i64, now: i64 },

    #[error("deadline {deadline} is beyond the latest accepted {max}")]
    DeadlineTooFar { deadline: i64, max: i64 },

    #[error("winners count must be at least 1")]
    InvalidWinnersCount,

    #[error("severity {0} outside 1..=5")]
    InvalidSeverity(u8),

    #[error("{field} is {len} bytes, max is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("submission strings total {len} bytes, account space allows {max}")]
    SubmissionTooLarge { len: usize, max: usize },

    #[error("invalid instruction data")]
    InvalidInstruction,

    #[error("serialization failed: {0}")]
    Io(String),
}

/// Why a raw account buffer could not be trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedAccount {
    #[error("account is {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("account is not initialized")]
    Uninitialized,

    #[error("option flag {flag} at offset {offset} is neither 0 nor 1")]
    InvalidOptionFlag { offset: usize, flag: u8 },

    #[error("bool byte {value} at offset {offset} is neither 0 nor 1")]
    InvalidBool { offset: usize, value: u8 },

    #[error("unknown status tag {0}")]
    UnknownStatus(u8),

    #[error("corrupt account data: {0}")]
    Corrupt(String),
}

/// An instruction that the bounty's current state does not permit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineViolation {
    #[error("a bounty already exists at this address")]
    AlreadyExists,

    #[error("no bounty exists at this address")]
    NotFound,

    #[error("{action} requires status {expected:?}, bounty is {actual:?}")]
    WrongStatus {
        action: &'static str,
        expected: BountyStatus,
        actual: BountyStatus,
    },

    #[error("{action} not allowed, bounty is terminal ({status:?})")]
    Terminal {
        action: &'static str,
        status: BountyStatus,
    },

    #[error("only the bounty creator may do this")]
    NotCreator,

    #[error("only the assigned auditor may claim")]
    NotAssignedAuditor,

    #[error("bounty deadline has passed")]
    DeadlinePassed,

    #[error("bounty deadline has not passed")]
    DeadlineNotPassed,

    #[error("no submission recorded for this auditor and id")]
    SubmissionMissing,

    #[error("submission is already a winner")]
    AlreadyWinner,

    #[error("all winners already selected")]
    WinnerLimitReached,

    #[error("payout {payout} exceeds per-winner limit {limit}")]
    PayoutExceedsLimit { payout: u64, limit: u64 },

    #[error("bounty can be finalized only after the deadline or once all winners are selected")]
    FinalizeNotReady,

    #[error("an auditor is assigned; the bounty can only be claimed by them")]
    AuditorAssigned,

    #[error("severity {0} outside 1..=5")]
    InvalidSeverity(u8),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("rpc request failed: {0}")]
    Rpc(String),

    #[error("transaction rejected before execution: {detail}")]
    Rejected {
        detail: String,
        error: Option<TransactionError>,
        logs: Vec<String>,
    },
}

/// The program's custom error table, in declaration order. Custom error
/// code `n` reported by the runtime is the `n`th entry.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProgramErrorCode {
    #[error("Invalid instruction")]
    InvalidInstruction,

    #[error("Not rent exempt")]
    NotRentExempt,

    #[error("Invalid bounty amount")]
    InvalidBountyAmount,

    #[error("Invalid deadline")]
    InvalidDeadline,

    #[error("Bounty already initialized")]
    BountyAlreadyInitialized,

    #[error("Unauthorized creator")]
    UnauthorizedCreator,

    #[error("Unauthorized hunter")]
    UnauthorizedHunter,

    #[error("Bounty not open")]
    BountyNotOpen,

    #[error("Bounty not approved")]
    BountyNotApproved,

    #[error("Deadline not passed")]
    DeadlineNotPassed,

    #[error("Failed to transfer SOL")]
    TransferFailed,

    #[error("Submission not found")]
    SubmissionNotFound,

    #[error("Invalid submission")]
    InvalidSubmission,

    #[error("Submission already approved")]
    SubmissionAlreadyApproved,

    #[error("Already voted")]
    AlreadyVoted,

    #[error("Invalid vote type")]
    InvalidVoteType,

    #[error("Invalid severity")]
    InvalidSeverity,

    #[error("Maximum winners reached")]
    MaxWinnersReached,

    #[error("Payout amount exceeds limit")]
    PayoutExceedsLimit,

    #[error("Submission already selected as winner")]
    SubmissionAlreadyWinner,
}

impl ProgramErrorCode {
    const TABLE: [ProgramErrorCode; 20] = [
        ProgramErrorCode::InvalidInstruction,
        ProgramErrorCode::NotRentExempt,
        ProgramErrorCode::InvalidBountyAmount,
        ProgramErrorCode::InvalidDeadline,
        ProgramErrorCode::BountyAlreadyInitialized,
        ProgramErrorCode::UnauthorizedCreator,
        ProgramErrorCode::UnauthorizedHunter,
        ProgramErrorCode::BountyNotOpen,
        ProgramErrorCode::BountyNotApproved,
        ProgramErrorCode::DeadlineNotPassed,
        ProgramErrorCode::TransferFailed,
        ProgramErrorCode::SubmissionNotFound,
        ProgramErrorCode::InvalidSubmission,
        ProgramErrorCode::SubmissionAlreadyApproved,
        ProgramErrorCode::AlreadyVoted,
        ProgramErrorCode::InvalidVoteType,
        ProgramErrorCode::InvalidSeverity,
        ProgramErrorCode::MaxWinnersReached,
        ProgramErrorCode::PayoutExceedsLimit,
        ProgramErrorCode::SubmissionAlreadyWinner,
    ];

    pub fn from_custom(code: u32) -> Option<Self> {
        Self::TABLE.get(code as usize).copied()
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

/// A program-level rejection, kept whole for operator troubleshooting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramFailure {
    pub error: TransactionError,
    pub instruction_index: Option<u8>,
    pub code: Option<ProgramErrorCode>,
    pub logs: Vec<String>,
}

impl ProgramFailure {
    pub fn new(error: TransactionError, logs: Vec<String>) -> Self {
        let (instruction_index, code) = match &error {
            TransactionError::InstructionError(index, InstructionError::Custom(code)) => {
                (Some(*index), ProgramErrorCode::from_custom(*code))
            }
            TransactionError::InstructionError(index, _) => (Some(*index), None),
            _ => (None, None),
        };
        Self {
            error,
            instruction_index,
            code,
            logs,
        }
    }
}

impl std::fmt::Display for ProgramFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({})", code, self.error)?,
            None => write!(f, "{}", self.error)?,
        }
        if !self.logs.is_empty() {
            write!(f, " [{} log lines]", self.logs.len())?;
        }
        Ok(())
    }
}
