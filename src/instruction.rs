use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{
    instruction::{AccountMeta, Instruction},
    pubkey::{Pubkey, MAX_SEED_LEN},
    system_program,
};

use crate::{
    error::{EncodingError, EscrowError, EscrowResult},
    identity::Identity,
    state::Submission,
};

/// Instruction payloads, Borsh-encoded: one discriminant byte followed by
/// the variant's fields in order.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub enum BountyInstruction {
    /// Create a new bounty with SOL locked in vault
    ///
    /// Accounts:
    /// 0. `[signer, writable]` Creator account - funds the bounty
    /// 1. `[writable]` Bounty account (PDA)
    /// 2. `[writable]` Vault account (PDA)
    /// 3. `[]` System program
    CreateBounty {
        amount: u64,
        /// Unix seconds
        deadline: i64,
        custom_seed: Option<Vec<u8>>,
        winners_count: Option<u8>,
    },

    /// Accounts:
    /// 0. `[signer]` Hunter account
    /// 1. `[writable]` Bounty account (PDA)
    SubmitWork { submission_url: String },

    /// Approve a hunter's submission
    ///
    /// Accounts:
    /// 0. `[signer]` Creator account
    /// 1. `[writable]` Bounty account (PDA)
    /// 2. `[]` Hunter account
    /// 3. `[]` Submission account (PDA)
    ApproveSubmission {
        hunter: Identity,
        submission_id: String,
    },

    /// Claim bounty reward after approval
    ///
    /// Accounts:
    /// 0. `[signer, writable]` Hunter account - receives the vault balance
    /// 1. `[writable]` Bounty account (PDA)
    /// 2. `[writable]` Vault account (PDA)
    /// 3. `[]` System program
    ClaimBounty,

    /// Return funds to creator once the deadline has passed
    ///
    /// Accounts:
    /// 0. `[signer, writable]` Creator account
    /// 1. `[writable]` Bounty account (PDA)
    /// 2. `[writable]` Vault account (PDA)
    /// 3. `[]` System program
    CancelBounty,

    /// Same accounts as `CancelBounty`, no deadline requirement
    CancelBountyEmergency,

    /// Accounts:
    /// 0. `[signer, writable]` Hunter account
    /// 1. `[]` Bounty account (PDA)
    /// 2. `[writable]` Submission account (PDA)
    /// 3. `[]` System program
    RecordSubmission {
        submission_id: String,
        /// 1-5
        severity: u8,
        description: String,
        ipfs_hash: String,
    },

    /// Accounts:
    /// 0. `[signer, writable]` Voter account
    /// 1. `[]` Bounty account (PDA)
    /// 2. `[writable]` Submission account (PDA)
    /// 3. `[writable]` Vote account (PDA)
    /// 4. `[]` System program
    VoteOnSubmission {
        submission_id: String,
        is_upvote: bool,
    },

    /// Accounts:
    /// 0. `[signer]` Creator account
    /// 1. `[writable]` Bounty account (PDA)
    /// 2. `[writable]` Submission account (PDA)
    /// 3. `[]` System program
    SelectWinner {
        submission_id: String,
        /// Must be <= amount / winners_count
        payout_amount: u64,
    },

    /// Accounts:
    /// 0. `[signer, writable]` Creator account
    /// 1. `[writable]` Bounty account (PDA)
    /// 2. `[writable]` Vault account (PDA)
    /// 3. `[]` System program
    FinalizeAndDistributeRemaining,
}

impl BountyInstruction {
    pub fn discriminant(&self) -> u8 {
        match self {
            BountyInstruction::CreateBounty { .. } => 0,
            BountyInstruction::SubmitWork { .. } => 1,
            BountyInstruction::ApproveSubmission { .. } => 2,
            BountyInstruction::ClaimBounty => 3,
            BountyInstruction::CancelBounty => 4,
            BountyInstruction::CancelBountyEmergency => 5,
            BountyInstruction::RecordSubmission { .. } => 6,
            BountyInstruction::VoteOnSubmission { .. } => 7,
            BountyInstruction::SelectWinner { .. } => 8,
            BountyInstruction::FinalizeAndDistributeRemaining => 9,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BountyInstruction::CreateBounty { .. } => "CreateBounty",
            BountyInstruction::SubmitWork { .. } => "SubmitWork",
            BountyInstruction::ApproveSubmission { .. } => "ApproveSubmission",
            BountyInstruction::ClaimBounty => "ClaimBounty",
            BountyInstruction::CancelBounty => "CancelBounty",
            BountyInstruction::CancelBountyEmergency => "CancelBountyEmergency",
            BountyInstruction::RecordSubmission { .. } => "RecordSubmission",
            BountyInstruction::VoteOnSubmission { .. } => "VoteOnSubmission",
            BountyInstruction::SelectWinner { .. } => "SelectWinner",
            BountyInstruction::FinalizeAndDistributeRemaining => "FinalizeAndDistributeRemaining",
        }
    }

    /// Rejects payloads the program would certainly refuse, so no fee is
    /// paid for them. `now` and `max_horizon` are unix seconds.
    pub fn validate(&self, now: i64, max_horizon: i64) -> EscrowResult<()> {
        match self {
            BountyInstruction::CreateBounty {
                amount,
                deadline,
                custom_seed,
                winners_count,
            } => {
                if *amount == 0 {
                    return Err(EncodingError::ZeroAmount.into());
                }
                if *deadline <= now {
                    return Err(EncodingError::DeadlineInPast {
                        deadline: *deadline,
                        now,
                    }
                    .into());
                }
                let max = now.saturating_add(max_horizon);
                if *deadline > max {
                    return Err(EncodingError::DeadlineTooFar {
                        deadline: *deadline,
                        max,
                    }
                    .into());
                }
                if let Some(seed) = custom_seed {
                    check_seed_len(seed.len())?;
                }
                if *winners_count == Some(0) {
                    return Err(EncodingError::InvalidWinnersCount.into());
                }
            }
            BountyInstruction::ApproveSubmission { submission_id, .. }
            | BountyInstruction::VoteOnSubmission { submission_id, .. }
            | BountyInstruction::SelectWinner { submission_id, .. } => {
                check_seed_len(submission_id.len())?;
            }
            BountyInstruction::RecordSubmission {
                submission_id,
                severity,
                description,
                ipfs_hash,
            } => {
                check_seed_len(submission_id.len())?;
                if !(1..=5).contains(severity) {
                    return Err(EncodingError::InvalidSeverity(*severity).into());
                }
                let len = submission_id.len() + description.len() + ipfs_hash.len();
                if len > Submission::MAX_STRING_BYTES {
                    return Err(EncodingError::SubmissionTooLarge {
                        len,
                        max: Submission::MAX_STRING_BYTES,
                    }
                    .into());
                }
            }
            BountyInstruction::SubmitWork { .. }
            | BountyInstruction::ClaimBounty
            | BountyInstruction::CancelBounty
            | BountyInstruction::CancelBountyEmergency
            | BountyInstruction::FinalizeAndDistributeRemaining => {}
        }
        Ok(())
    }

    pub fn pack(&self) -> Result<Vec<u8>, EncodingError> {
        self.try_to_vec()
            .map_err(|e| EncodingError::Io(e.to_string()))
    }

    pub fn unpack(data: &[u8]) -> Result<Self, EncodingError> {
        Self::try_from_slice(data).map_err(|_| EncodingError::InvalidInstruction)
    }
}

fn check_seed_len(len: usize) -> EscrowResult<()> {
    if len > MAX_SEED_LEN {
        return Err(EscrowError::SeedTooLong {
            len,
            max: MAX_SEED_LEN,
        });
    }
    Ok(())
}

fn instruction(
    program_id: &Pubkey,
    payload: &BountyInstruction,
    accounts: Vec<AccountMeta>,
) -> Result<Instruction, EncodingError> {
    Ok(Instruction::new_with_bytes(*program_id, &payload.pack()?, accounts))
}

pub fn create_bounty(
    program_id: &Pubkey,
    creator: &Pubkey,
    bounty: &Pubkey,
    vault: &Pubkey,
    amount: u64,
    deadline: i64,
    custom_seed: Option<Vec<u8>>,
    winners_count: Option<u8>,
) -> Result<Instruction, EncodingError> {
    instruction(
        program_id,
        &BountyInstruction::CreateBounty {
            amount,
            deadline,
            custom_seed,
            winners_count,
        },
        vec![
            AccountMeta::new(*creator, true),
            AccountMeta::new(*bounty, false),
            AccountMeta::new(*vault, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    )
}

pub fn submit_work(
    program_id: &Pubkey,
    hunter: &Pubkey,
    bounty: &Pubkey,
    submission_url: String,
) -> Result<Instruction, EncodingError> {
    instruction(
        program_id,
        &BountyInstruction::SubmitWork { submission_url },
        vec![
            AccountMeta::new_readonly(*hunter, true),
            AccountMeta::new(*bounty, false),
        ],
    )
}

pub fn approve_submission(
    program_id: &Pubkey,
    creator: &Pubkey,
    bounty: &Pubkey,
    hunter: &Pubkey,
    submission: &Pubkey,
    submission_id: String,
) -> Result<Instruction, EncodingError> {
    instruction(
        program_id,
        &BountyInstruction::ApproveSubmission {
            hunter: Identity::from(hunter),
            submission_id,
        },
        vec![
            AccountMeta::new_readonly(*creator, true),
            AccountMeta::new(*bounty, false),
            AccountMeta::new_readonly(*hunter, false),
            AccountMeta::new_readonly(*submission, false),
        ],
    )
}

pub fn claim_bounty(
    program_id: &Pubkey,
    hunter: &Pubkey,
    bounty: &Pubkey,
    vault: &Pubkey,
) -> Result<Instruction, EncodingError> {
    instruction(
        program_id,
        &BountyInstruction::ClaimBounty,
        vault_accounts(hunter, bounty, vault),
    )
}

pub fn cancel_bounty(
    program_id: &Pubkey,
    creator: &Pubkey,
    bounty: &Pubkey,
    vault: &Pubkey,
    emergency: bool,
) -> Result<Instruction, EncodingError> {
    let payload = if emergency {
        BountyInstruction::CancelBountyEmergency
    } else {
        BountyInstruction::CancelBounty
    };
    instruction(program_id, &payload, vault_accounts(creator, bounty, vault))
}

pub fn record_submission(
    program_id: &Pubkey,
    hunter: &Pubkey,
    bounty: &Pubkey,
    submission: &Pubkey,
    submission_id: String,
    severity: u8,
    description: String,
    ipfs_hash: String,
) -> Result<Instruction, EncodingError> {
    instruction(
        program_id,
        &BountyInstruction::RecordSubmission {
            submission_id,
            severity,
            description,
            ipfs_hash,
        },
        vec![
            AccountMeta::new(*hunter, true),
            AccountMeta::new_readonly(*bounty, false),
            AccountMeta::new(*submission, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    )
}

pub fn vote_on_submission(
    program_id: &Pubkey,
    voter: &Pubkey,
    bounty: &Pubkey,
    submission: &Pubkey,
    vote: &Pubkey,
    submission_id: String,
    is_upvote: bool,
) -> Result<Instruction, EncodingError> {
    instruction(
        program_id,
        &BountyInstruction::VoteOnSubmission {
            submission_id,
            is_upvote,
        },
        vec![
            AccountMeta::new(*voter, true),
            AccountMeta::new_readonly(*bounty, false),
            AccountMeta::new(*submission, false),
            AccountMeta::new(*vote, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    )
}

pub fn select_winner(
    program_id: &Pubkey,
    creator: &Pubkey,
    bounty: &Pubkey,
    submission: &Pubkey,
    submission_id: String,
    payout_amount: u64,
) -> Result<Instruction, EncodingError> {
    instruction(
        program_id,
        &BountyInstruction::SelectWinner {
            submission_id,
            payout_amount,
        },
        vec![
            AccountMeta::new_readonly(*creator, true),
            AccountMeta::new(*bounty, false),
            AccountMeta::new(*submission, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    )
}

pub fn finalize_and_distribute(
    program_id: &Pubkey,
    creator: &Pubkey,
    bounty: &Pubkey,
    vault: &Pubkey,
) -> Result<Instruction, EncodingError> {
    instruction(
        program_id,
        &BountyInstruction::FinalizeAndDistributeRemaining,
        vault_accounts(creator, bounty, vault),
    )
}

// signer receives lamports, so it is writable
fn vault_accounts(signer: &Pubkey, bounty: &Pubkey, vault: &Pubkey) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new(*signer, true),
        AccountMeta::new(*bounty, false),
        AccountMeta::new(*vault, false),
        AccountMeta::new_readonly(system_program::id(), false),
    ]
}

/// Converts a decimal native-asset amount ("2.5") into lamports with exact
/// integer arithmetic.
pub fn parse_sol_amount(input: &str) -> Result<u64, EncodingError> {
    const DECIMALS: usize = 9;
    let input = input.trim();
    let invalid = || EncodingError::InvalidAmountFormat(input.to_string());

    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (input, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if fraction.len() > DECIMALS {
        return Err(invalid());
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| EncodingError::AmountOverflow)?
    };
    let mut fraction_units: u128 = if fraction.is_empty() {
        0
    } else {
        fraction.parse().map_err(|_| invalid())?
    };
    for _ in fraction.len()..DECIMALS {
        fraction_units *= 10;
    }

    let lamports = whole
        .checked_mul(1_000_000_000)
        .and_then(|w| w.checked_add(fraction_units))
        .ok_or(EncodingError::AmountOverflow)?;
    u64::try_from(lamports).map_err(|_| EncodingError::AmountOverflow)
}
