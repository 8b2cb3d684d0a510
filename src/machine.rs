//! Bounty lifecycle guards.
//!
//! ```text
//! Open --approve--> Approved --claim--> Claimed
//!  |
//!  +--cancel--> Cancelled
//! ```
//!
//! Claimed and Cancelled are terminal. The checks mirror what the program
//! enforces, so an illegal action is refused before a fee is paid, and are
//! reported as [`StateMachineViolation`] rather than a network failure.

use crate::{
    error::StateMachineViolation,
    identity::Identity,
    instruction::BountyInstruction,
    state::{BountyAccount, BountyStatus, Submission},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    SubmitWork,
    Approve,
    Claim,
    Cancel,
    CancelEmergency,
    RecordSubmission,
    Vote,
    SelectWinner,
    Finalize,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::Create => "CreateBounty",
            Action::SubmitWork => "SubmitWork",
            Action::Approve => "ApproveSubmission",
            Action::Claim => "ClaimBounty",
            Action::Cancel => "CancelBounty",
            Action::CancelEmergency => "CancelBountyEmergency",
            Action::RecordSubmission => "RecordSubmission",
            Action::Vote => "VoteOnSubmission",
            Action::SelectWinner => "SelectWinner",
            Action::Finalize => "FinalizeAndDistributeRemaining",
        }
    }
}

impl From<&BountyInstruction> for Action {
    fn from(instruction: &BountyInstruction) -> Self {
        match instruction {
            BountyInstruction::CreateBounty { .. } => Action::Create,
            BountyInstruction::SubmitWork { .. } => Action::SubmitWork,
            BountyInstruction::ApproveSubmission { .. } => Action::Approve,
            BountyInstruction::ClaimBounty => Action::Claim,
            BountyInstruction::CancelBounty => Action::Cancel,
            BountyInstruction::CancelBountyEmergency => Action::CancelEmergency,
            BountyInstruction::RecordSubmission { .. } => Action::RecordSubmission,
            BountyInstruction::VoteOnSubmission { .. } => Action::Vote,
            BountyInstruction::SelectWinner { .. } => Action::SelectWinner,
            BountyInstruction::FinalizeAndDistributeRemaining => Action::Finalize,
        }
    }
}

type Guard = Result<(), StateMachineViolation>;

pub struct EscrowStateMachine;

impl EscrowStateMachine {
    /// A bounty may be created only where none is initialized yet.
    pub fn check_create(existing: Option<&BountyAccount>) -> Guard {
        match existing {
            Some(bounty) if bounty.is_initialized() => Err(StateMachineViolation::AlreadyExists),
            _ => Ok(()),
        }
    }

    pub fn check_submit_work(bounty: &BountyAccount) -> Guard {
        require_status(bounty, Action::SubmitWork, BountyStatus::Open)
    }

    pub fn check_approve(bounty: &BountyAccount, caller: &Identity, now: i64) -> Guard {
        require_status(bounty, Action::Approve, BountyStatus::Open)?;
        require_creator(bounty, caller)?;
        if now >= bounty.deadline {
            return Err(StateMachineViolation::DeadlinePassed);
        }
        Ok(())
    }

    pub fn check_claim(bounty: &BountyAccount, caller: &Identity) -> Guard {
        require_status(bounty, Action::Claim, BountyStatus::Approved)?;
        match bounty.hunter {
            Some(hunter) if hunter == *caller => Ok(()),
            _ => Err(StateMachineViolation::NotAssignedAuditor),
        }
    }

    /// Regular cancel waits for the deadline; the emergency variant does
    /// not. Neither is allowed once a submission is approved.
    pub fn check_cancel(bounty: &BountyAccount, caller: &Identity, now: i64, emergency: bool) -> Guard {
        let action = if emergency {
            Action::CancelEmergency
        } else {
            Action::Cancel
        };
        require_status(bounty, action, BountyStatus::Open)?;
        require_creator(bounty, caller)?;
        if !emergency && now <= bounty.deadline {
            return Err(StateMachineViolation::DeadlineNotPassed);
        }
        Ok(())
    }

    pub fn check_record_submission(bounty: &BountyAccount, severity: u8) -> Guard {
        require_status(bounty, Action::RecordSubmission, BountyStatus::Open)?;
        if !(1..=5).contains(&severity) {
            return Err(StateMachineViolation::InvalidSeverity(severity));
        }
        Ok(())
    }

    pub fn check_vote(bounty: &BountyAccount, submission: Option<&Submission>) -> Guard {
        require_status(bounty, Action::Vote, BountyStatus::Open)?;
        if submission.is_none() {
            return Err(StateMachineViolation::SubmissionMissing);
        }
        Ok(())
    }

    pub fn check_select_winner(
        bounty: &BountyAccount,
        caller: &Identity,
        submission: Option<&Submission>,
        payout: u64,
    ) -> Guard {
        require_status(bounty, Action::SelectWinner, BountyStatus::Open)?;
        require_creator(bounty, caller)?;
        if bounty.current_winners >= bounty.winners_count {
            return Err(StateMachineViolation::WinnerLimitReached);
        }
        let submission = submission.ok_or(StateMachineViolation::SubmissionMissing)?;
        if submission.is_winner {
            return Err(StateMachineViolation::AlreadyWinner);
        }
        let limit = per_winner_limit(bounty);
        if payout > limit {
            return Err(StateMachineViolation::PayoutExceedsLimit { payout, limit });
        }
        Ok(())
    }

    pub fn check_finalize(bounty: &BountyAccount, caller: &Identity, now: i64) -> Guard {
        require_live(bounty, Action::Finalize)?;
        require_creator(bounty, caller)?;
        // an assigned auditor's funds are released only by ClaimBounty
        if bounty.status == BountyStatus::Approved && bounty.hunter.is_some() {
            return Err(StateMachineViolation::AuditorAssigned);
        }
        let deadline_passed = now > bounty.deadline;
        let all_winners_selected = bounty.current_winners >= bounty.winners_count;
        if !deadline_passed && !all_winners_selected {
            return Err(StateMachineViolation::FinalizeNotReady);
        }
        Ok(())
    }

    /// Status the bounty should show once `action` has been confirmed.
    pub fn expected_status(action: Action, before: Option<&BountyAccount>) -> Option<BountyStatus> {
        match action {
            Action::Create => Some(BountyStatus::Open),
            Action::Approve => Some(BountyStatus::Approved),
            Action::Claim | Action::Finalize => Some(BountyStatus::Claimed),
            Action::Cancel | Action::CancelEmergency => Some(BountyStatus::Cancelled),
            Action::SelectWinner => before.map(|b| {
                if b.current_winners.saturating_add(1) >= b.winners_count {
                    BountyStatus::Approved
                } else {
                    b.status
                }
            }),
            Action::SubmitWork | Action::RecordSubmission | Action::Vote => before.map(|b| b.status),
        }
    }
}

pub fn per_winner_limit(bounty: &BountyAccount) -> u64 {
    bounty.amount / u64::from(bounty.winners_count.max(1))
}

fn require_live(bounty: &BountyAccount, action: Action) -> Guard {
    if bounty.status.is_terminal() {
        return Err(StateMachineViolation::Terminal {
            action: action.name(),
            status: bounty.status,
        });
    }
    Ok(())
}

fn require_status(bounty: &BountyAccount, action: Action, expected: BountyStatus) -> Guard {
    require_live(bounty, action)?;
    if bounty.status != expected {
        return Err(StateMachineViolation::WrongStatus {
            action: action.name(),
            expected,
            actual: bounty.status,
        });
    }
    Ok(())
}

fn require_creator(bounty: &BountyAccount, caller: &Identity) -> Guard {
    if bounty.creator != *caller {
        return Err(StateMachineViolation::NotCreator);
    }
    Ok(())
}
