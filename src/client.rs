//! One entry point per program instruction.
//!
//! Every operation runs the same pipeline: validate the payload, read the
//! bounty, check the lifecycle guard, derive the remaining addresses, encode,
//! build with a fresh blockhash, have the wallet sign, submit once, then
//! reconcile the metadata cache from the chain.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use solana_program::{instruction::Instruction, pubkey::Pubkey};
use solana_sdk::signature::Signature;
use tracing::{info, warn};

use crate::{
    config::ClientConfig,
    error::{EscrowError, EscrowResult, MalformedAccount, StateMachineViolation},
    identity::{Identity, OwnerRef},
    instruction::{self, BountyInstruction},
    machine::{Action, EscrowStateMachine},
    metadata::{BountyMetadata, MetadataStore},
    pda::{AddressDeriver, BountyAddresses},
    reconciler::{MetadataReconciler, Reconciliation},
    rpc::RpcTransport,
    state::{BountyAccount, BountyStatus, Submission},
    submitter::{Outcome, TransactionSubmitter},
    transaction::TransactionBuilder,
    wallet::{self, WalletSigner},
};

/// Unix seconds source, replaceable for tests.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// A confirmed transaction and what reconciliation made of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub signature: Signature,
    pub bounty: Pubkey,
    /// `None` when the read-back failed; the cache can be repaired later
    /// with [`EscrowClient::refresh`].
    pub reconciliation: Option<Reconciliation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedBounty {
    pub addresses: BountyAddresses,
    pub receipt: Receipt,
}

#[derive(Debug, Clone)]
pub struct CreateBountyRequest {
    /// Lamports locked in the vault.
    pub amount: u64,
    /// Unix seconds.
    pub deadline: i64,
    /// Bounty address seed, at most 32 bytes. See [`crate::pda::seed_from_title`].
    pub seed: Vec<u8>,
    pub winners_count: Option<u8>,
    /// Written to the cache once the bounty is confirmed.
    pub metadata: Option<BountyMetadata>,
}

#[derive(Debug, Clone)]
pub struct FindingRequest {
    pub submission_id: String,
    pub severity: u8,
    pub description: String,
    pub ipfs_hash: String,
}

pub struct EscrowClient<R, W, M> {
    config: ClientConfig,
    rpc: Arc<R>,
    wallet: W,
    deriver: AddressDeriver,
    builder: TransactionBuilder<R>,
    submitter: TransactionSubmitter<R>,
    reconciler: MetadataReconciler<R, M>,
    clock: Clock,
}

impl<R, W, M> EscrowClient<R, W, M>
where
    R: RpcTransport,
    W: WalletSigner,
    M: MetadataStore,
{
    pub fn new(config: ClientConfig, rpc: Arc<R>, wallet: W, store: Arc<M>) -> Self {
        Self {
            deriver: AddressDeriver::new(config.program_id),
            builder: TransactionBuilder::new(rpc.clone()),
            submitter: TransactionSubmitter::new(rpc.clone(), &config),
            reconciler: MetadataReconciler::new(rpc.clone(), store, &config),
            rpc,
            wallet,
            config,
            clock: Arc::new(system_clock),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    pub fn reconciler(&self) -> &MetadataReconciler<R, M> {
        &self.reconciler
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn validate(&self, payload: &BountyInstruction) -> EscrowResult<()> {
        payload.validate(self.now(), self.config.max_deadline_horizon_secs())
    }

    pub async fn create_bounty(&self, request: CreateBountyRequest) -> EscrowResult<CreatedBounty> {
        let payload = BountyInstruction::CreateBounty {
            amount: request.amount,
            deadline: request.deadline,
            custom_seed: Some(request.seed.clone()),
            winners_count: request.winners_count,
        };
        self.validate(&payload)?;
        let creator = self.wallet.require_identity()?;
        let addresses = self.deriver.bounty_addresses(&creator, &request.seed)?;

        match self.rpc.get_account_data(&addresses.bounty).await? {
            None => {}
            Some(data) => match BountyAccount::unpack(&data) {
                Ok(existing) => EscrowStateMachine::check_create(Some(&existing))?,
                Err(MalformedAccount::Uninitialized) => {}
                Err(reason) => {
                    return Err(EscrowError::MalformedAccount {
                        address: addresses.bounty,
                        reason,
                    })
                }
            },
        }

        let ix = instruction::create_bounty(
            self.deriver.program_id(),
            &creator.pubkey(),
            &addresses.bounty,
            &addresses.vault,
            request.amount,
            request.deadline,
            Some(request.seed),
            request.winners_count,
        )?;
        let signature = self.send(Action::Create, &creator, ix, &addresses.bounty).await?;

        if let Some(mut metadata) = request.metadata {
            if metadata.owner.is_none() {
                metadata.owner = Some(OwnerRef::Wallet(creator));
            }
            // the bounty exists on chain now; a cache failure must not hide it
            if let Err(e) = self
                .reconciler
                .store()
                .upsert_bounty_metadata(&addresses.bounty, metadata)
                .await
            {
                warn!(bounty = %addresses.bounty, signature = %signature, error = %e, "metadata not cached");
            }
        }
        let receipt = self
            .reconcile(signature, &addresses.bounty, Action::Create, None)
            .await;
        Ok(CreatedBounty { addresses, receipt })
    }

    pub async fn submit_work(&self, bounty: &Pubkey, submission_url: String) -> EscrowResult<Receipt> {
        let hunter = self.wallet.require_identity()?;
        let account = self.fetch_bounty(bounty).await?;
        EscrowStateMachine::check_submit_work(&account)?;
        let ix = instruction::submit_work(self.deriver.program_id(), &hunter.pubkey(), bounty, submission_url)?;
        self.execute(Action::SubmitWork, &hunter, ix, bounty, Some(&account))
            .await
    }

    /// Assigns `hunter` as the auditor. The hunter's submission record must
    /// already exist under `submission_id`.
    pub async fn approve_submission(
        &self,
        bounty: &Pubkey,
        hunter: &Identity,
        submission_id: &str,
    ) -> EscrowResult<Receipt> {
        self.validate(&BountyInstruction::ApproveSubmission {
            hunter: *hunter,
            submission_id: submission_id.to_string(),
        })?;
        let creator = self.wallet.require_identity()?;
        let account = self.fetch_bounty(bounty).await?;
        EscrowStateMachine::check_approve(&account, &creator, self.now())?;

        let (submission, _) = self.deriver.submission(bounty, hunter, submission_id)?;
        if self.rpc.get_account_data(&submission).await?.is_none() {
            return Err(StateMachineViolation::SubmissionMissing.into());
        }
        let ix = instruction::approve_submission(
            self.deriver.program_id(),
            &creator.pubkey(),
            bounty,
            &hunter.pubkey(),
            &submission,
            submission_id.to_string(),
        )?;
        self.execute(Action::Approve, &creator, ix, bounty, Some(&account))
            .await
    }

    pub async fn claim_bounty(&self, bounty: &Pubkey) -> EscrowResult<Receipt> {
        let hunter = self.wallet.require_identity()?;
        let account = self.fetch_bounty(bounty).await?;
        EscrowStateMachine::check_claim(&account, &hunter)?;
        let (vault, _) = self.deriver.vault(bounty)?;
        let ix = instruction::claim_bounty(self.deriver.program_id(), &hunter.pubkey(), bounty, &vault)?;
        self.execute(Action::Claim, &hunter, ix, bounty, Some(&account))
            .await
    }

    /// `emergency` skips the deadline requirement.
    pub async fn cancel_bounty(&self, bounty: &Pubkey, emergency: bool) -> EscrowResult<Receipt> {
        let creator = self.wallet.require_identity()?;
        let account = self.fetch_bounty(bounty).await?;
        EscrowStateMachine::check_cancel(&account, &creator, self.now(), emergency)?;
        let (vault, _) = self.deriver.vault(bounty)?;
        let ix = instruction::cancel_bounty(
            self.deriver.program_id(),
            &creator.pubkey(),
            bounty,
            &vault,
            emergency,
        )?;
        let action = if emergency {
            Action::CancelEmergency
        } else {
            Action::Cancel
        };
        self.execute(action, &creator, ix, bounty, Some(&account))
            .await
    }

    pub async fn record_submission(&self, bounty: &Pubkey, finding: FindingRequest) -> EscrowResult<Receipt> {
        self.validate(&BountyInstruction::RecordSubmission {
            submission_id: finding.submission_id.clone(),
            severity: finding.severity,
            description: finding.description.clone(),
            ipfs_hash: finding.ipfs_hash.clone(),
        })?;
        let hunter = self.wallet.require_identity()?;
        let account = self.fetch_bounty(bounty).await?;
        EscrowStateMachine::check_record_submission(&account, finding.severity)?;
        let (submission, _) = self
            .deriver
            .submission(bounty, &hunter, &finding.submission_id)?;
        let ix = instruction::record_submission(
            self.deriver.program_id(),
            &hunter.pubkey(),
            bounty,
            &submission,
            finding.submission_id,
            finding.severity,
            finding.description,
            finding.ipfs_hash,
        )?;
        self.execute(Action::RecordSubmission, &hunter, ix, bounty, Some(&account))
            .await
    }

    pub async fn vote(
        &self,
        bounty: &Pubkey,
        hunter: &Identity,
        submission_id: &str,
        is_upvote: bool,
    ) -> EscrowResult<Receipt> {
        self.validate(&BountyInstruction::VoteOnSubmission {
            submission_id: submission_id.to_string(),
            is_upvote,
        })?;
        let voter = self.wallet.require_identity()?;
        let account = self.fetch_bounty(bounty).await?;
        let (submission, _) = self.deriver.submission(bounty, hunter, submission_id)?;
        let record = self.read_submission(&submission).await?;
        EscrowStateMachine::check_vote(&account, record.as_ref())?;
        let (vote, _) = self.deriver.vote(&submission, &voter)?;
        let ix = instruction::vote_on_submission(
            self.deriver.program_id(),
            &voter.pubkey(),
            bounty,
            &submission,
            &vote,
            submission_id.to_string(),
            is_upvote,
        )?;
        self.execute(Action::Vote, &voter, ix, bounty, Some(&account))
            .await
    }

    pub async fn select_winner(
        &self,
        bounty: &Pubkey,
        hunter: &Identity,
        submission_id: &str,
        payout_amount: u64,
    ) -> EscrowResult<Receipt> {
        self.validate(&BountyInstruction::SelectWinner {
            submission_id: submission_id.to_string(),
            payout_amount,
        })?;
        let creator = self.wallet.require_identity()?;
        let account = self.fetch_bounty(bounty).await?;
        let (submission, _) = self.deriver.submission(bounty, hunter, submission_id)?;
        let record = self.read_submission(&submission).await?;
        EscrowStateMachine::check_select_winner(&account, &creator, record.as_ref(), payout_amount)?;
        let ix = instruction::select_winner(
            self.deriver.program_id(),
            &creator.pubkey(),
            bounty,
            &submission,
            submission_id.to_string(),
            payout_amount,
        )?;
        self.execute(Action::SelectWinner, &creator, ix, bounty, Some(&account))
            .await
    }

    pub async fn finalize(&self, bounty: &Pubkey) -> EscrowResult<Receipt> {
        let creator = self.wallet.require_identity()?;
        let account = self.fetch_bounty(bounty).await?;
        EscrowStateMachine::check_finalize(&account, &creator, self.now())?;
        let (vault, _) = self.deriver.vault(bounty)?;
        let ix = instruction::finalize_and_distribute(self.deriver.program_id(), &creator.pubkey(), bounty, &vault)?;
        self.execute(Action::Finalize, &creator, ix, bounty, Some(&account))
            .await
    }

    /// Re-polls a signature that previously timed out. Nothing is resent.
    /// `action` is the operation the signature was submitted for, so its own
    /// transition is not reported as cache drift.
    pub async fn resume(&self, signature: &Signature, bounty: &Pubkey, action: Action) -> EscrowResult<Receipt> {
        let outcome = self
            .submitter
            .confirm(signature, self.config.confirm_timeout)
            .await;
        let signature = outcome.into_result()?;
        Ok(self.reconcile(signature, bounty, action, None).await)
    }

    /// Repairs the cached record for `bounty` from the chain.
    pub async fn refresh(&self, bounty: &Pubkey) -> EscrowResult<Reconciliation> {
        self.reconciler.refresh(bounty).await
    }

    pub async fn fetch_bounty(&self, bounty: &Pubkey) -> EscrowResult<BountyAccount> {
        let data = self
            .rpc
            .get_account_data(bounty)
            .await?
            .ok_or(StateMachineViolation::NotFound)?;
        match BountyAccount::unpack(&data) {
            Ok(account) => Ok(account),
            Err(MalformedAccount::Uninitialized) => Err(StateMachineViolation::NotFound.into()),
            Err(reason) => Err(EscrowError::MalformedAccount {
                address: *bounty,
                reason,
            }),
        }
    }

    pub async fn fetch_submission(
        &self,
        bounty: &Pubkey,
        hunter: &Identity,
        submission_id: &str,
    ) -> EscrowResult<Option<Submission>> {
        let (submission, _) = self.deriver.submission(bounty, hunter, submission_id)?;
        self.read_submission(&submission).await
    }

    async fn read_submission(&self, address: &Pubkey) -> EscrowResult<Option<Submission>> {
        let Some(data) = self.rpc.get_account_data(address).await? else {
            return Ok(None);
        };
        match Submission::unpack(&data) {
            Ok(submission) => Ok(Some(submission)),
            Err(MalformedAccount::Uninitialized) => Ok(None),
            Err(reason) => Err(EscrowError::MalformedAccount {
                address: *address,
                reason,
            }),
        }
    }

    pub async fn prove_ownership(&self, nonce: &str) -> EscrowResult<(Identity, Signature)> {
        wallet::prove_ownership(&self.wallet, nonce).await
    }

    pub fn verify_ownership(identity: &Identity, nonce: &str, signature: &Signature) -> bool {
        wallet::verify_ownership(identity, nonce, signature)
    }

    async fn execute(
        &self,
        action: Action,
        signer: &Identity,
        ix: Instruction,
        bounty: &Pubkey,
        before: Option<&BountyAccount>,
    ) -> EscrowResult<Receipt> {
        let signature = self.send(action, signer, ix, bounty).await?;
        let expected = EscrowStateMachine::expected_status(action, before);
        Ok(self.reconcile(signature, bounty, action, expected).await)
    }

    async fn send(&self, action: Action, signer: &Identity, ix: Instruction, bounty: &Pubkey) -> EscrowResult<Signature> {
        let unsigned = self.builder.build(&[ix], &signer.pubkey()).await?;
        let signed = self.wallet.sign_transaction(unsigned).await?;
        info!(action = action.name(), bounty = %bounty, signer = %signer, "submitting");
        self.submitter.submit(&signed).await?.into_result()
    }

    async fn reconcile(
        &self,
        signature: Signature,
        bounty: &Pubkey,
        action: Action,
        expected: Option<BountyStatus>,
    ) -> Receipt {
        let expected = expected.or_else(|| EscrowStateMachine::expected_status(action, None));
        let reconciliation = self
            .reconciler
            .on_transaction_confirmed_expecting(
                bounty,
                &Outcome::Confirmed(signature),
                expected,
            )
            .await;
        self.receipt(signature, bounty, reconciliation)
    }

    fn receipt(&self, signature: Signature, bounty: &Pubkey, reconciliation: EscrowResult<Reconciliation>) -> Receipt {
        let reconciliation = match reconciliation {
            Ok(reconciliation) => Some(reconciliation),
            Err(e) => {
                warn!(signature = %signature, bounty = %bounty, error = %e, "confirmed but cache not reconciled");
                None
            }
        };
        Receipt {
            signature,
            bounty: *bounty,
            reconciliation,
        }
    }
}
