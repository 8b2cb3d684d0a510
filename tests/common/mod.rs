//! In-memory chain for driving the client end to end.
//!
//! Transactions are applied atomically with the program's rules. Every
//! transport call is recorded so tests can assert on what reached the
//! network.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bounty_escrow_client::{
    error::{ProgramErrorCode, TransportError},
    instruction::BountyInstruction,
    metadata::InMemoryMetadataStore,
    pda::AddressDeriver,
    rpc::{RpcTransport, SignatureStatus},
    state::{BountyAccount, BountyStatus, Submission, SubmissionStatus, Vote, VoteType},
    wallet::KeypairWallet,
    ClientConfig, EscrowClient, Identity,
};
use solana_program::{hash::Hash, instruction::InstructionError, pubkey::Pubkey};
use solana_sdk::{
    signature::{Keypair, Signature},
    transaction::{Transaction, TransactionError},
};

pub const NOW: i64 = 1_700_000_000;
pub const DAY: i64 = 86_400;

pub type TestClient = EscrowClient<FakeChain, KeypairWallet, InMemoryMetadataStore>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Send(Signature),
    Status(Signature),
    Account(Pubkey),
    Blockhash,
    Logs(Signature),
}

struct Landing {
    polls_left: u32,
    status: SignatureStatus,
}

#[derive(Default)]
struct State {
    accounts: HashMap<Pubkey, Vec<u8>>,
    lamports: HashMap<Pubkey, u64>,
    landings: HashMap<Signature, Landing>,
    logs: HashMap<Signature, Vec<String>>,
    calls: Vec<Call>,
    now: i64,
    confirm_after: u32,
}

pub struct FakeChain {
    deriver: AddressDeriver,
    state: Mutex<State>,
}

type Step = Result<(), InstructionError>;

fn custom(code: ProgramErrorCode) -> InstructionError {
    InstructionError::Custom(code.code())
}

impl FakeChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            deriver: AddressDeriver::new(bounty_escrow_client::ID),
            state: Mutex::new(State {
                now: NOW,
                ..State::default()
            }),
        })
    }

    pub fn now(&self) -> i64 {
        self.state.lock().unwrap().now
    }

    pub fn set_now(&self, now: i64) {
        self.state.lock().unwrap().now = now;
    }

    /// Number of status polls that report unknown before a landed
    /// transaction shows its result.
    pub fn set_confirm_after(&self, polls: u32) {
        self.state.lock().unwrap().confirm_after = polls;
    }

    /// Makes every pending transaction visible on the next poll.
    pub fn land_all(&self) {
        for landing in self.state.lock().unwrap().landings.values_mut() {
            landing.polls_left = 0;
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn sends(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Send(_)))
            .count()
    }

    pub fn account(&self, address: &Pubkey) -> Option<Vec<u8>> {
        self.state.lock().unwrap().accounts.get(address).cloned()
    }

    pub fn put_account(&self, address: Pubkey, data: Vec<u8>) {
        self.state.lock().unwrap().accounts.insert(address, data);
    }

    pub fn bounty(&self, address: &Pubkey) -> BountyAccount {
        BountyAccount::unpack(&self.account(address).unwrap()).unwrap()
    }

    pub fn lamports(&self, address: &Pubkey) -> u64 {
        self.state
            .lock()
            .unwrap()
            .lamports
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    fn apply(
        &self,
        state: &mut State,
        payload: BountyInstruction,
        keys: &[Pubkey],
        signers: &[bool],
    ) -> Step {
        let key = |i: usize| keys.get(i).copied().ok_or(InstructionError::NotEnoughAccountKeys);
        let signed = |i: usize| signers.get(i).copied().unwrap_or(false);
        let now = state.now;

        match payload {
            BountyInstruction::CreateBounty {
                amount,
                deadline,
                custom_seed,
                winners_count,
            } => {
                let (creator, bounty, vault) = (key(0)?, key(1)?, key(2)?);
                if !signed(0) {
                    return Err(custom(ProgramErrorCode::UnauthorizedCreator));
                }
                if amount == 0 {
                    return Err(custom(ProgramErrorCode::InvalidBountyAmount));
                }
                if deadline <= now {
                    return Err(custom(ProgramErrorCode::InvalidDeadline));
                }
                let seed = custom_seed.unwrap_or_else(|| now.to_le_bytes().to_vec());
                let addresses = self
                    .deriver
                    .bounty_addresses(&Identity::from(creator), &seed)
                    .map_err(|_| InstructionError::InvalidSeeds)?;
                if addresses.bounty != bounty || addresses.vault != vault {
                    return Err(InstructionError::InvalidAccountData);
                }
                if let Some(data) = state.accounts.get(&bounty) {
                    if BountyAccount::unpack(data).is_ok() {
                        return Err(custom(ProgramErrorCode::BountyAlreadyInitialized));
                    }
                }
                let record = BountyAccount::new_open(
                    Identity::from(creator),
                    amount,
                    deadline,
                    winners_count.unwrap_or(1),
                );
                state.accounts.insert(bounty, record.pack().unwrap());
                *state.lamports.entry(vault).or_default() += amount;
                Ok(())
            }
            BountyInstruction::SubmitWork { .. } => {
                if !signed(0) {
                    return Err(custom(ProgramErrorCode::UnauthorizedHunter));
                }
                let record = load_bounty(state, &key(1)?)?;
                if record.status != BountyStatus::Open {
                    return Err(custom(ProgramErrorCode::BountyNotOpen));
                }
                Ok(())
            }
            BountyInstruction::ApproveSubmission {
                hunter,
                submission_id,
            } => {
                let (creator, bounty, hunter_key, submission) = (key(0)?, key(1)?, key(2)?, key(3)?);
                if !signed(0) {
                    return Err(custom(ProgramErrorCode::UnauthorizedCreator));
                }
                if hunter.pubkey() != hunter_key {
                    return Err(InstructionError::InvalidArgument);
                }
                let (expected, _) = self
                    .deriver
                    .submission(&bounty, &hunter, &submission_id)
                    .map_err(|_| InstructionError::InvalidSeeds)?;
                if expected != submission || !state.accounts.contains_key(&submission) {
                    return Err(InstructionError::InvalidAccountData);
                }
                let mut record = load_bounty(state, &bounty)?;
                if record.status != BountyStatus::Open {
                    return Err(custom(ProgramErrorCode::BountyNotOpen));
                }
                if record.creator.pubkey() != creator {
                    return Err(custom(ProgramErrorCode::UnauthorizedCreator));
                }
                record.status = BountyStatus::Approved;
                record.hunter = Some(hunter);
                state.accounts.insert(bounty, record.pack().unwrap());
                Ok(())
            }
            BountyInstruction::ClaimBounty => {
                let (hunter, bounty, vault) = (key(0)?, key(1)?, key(2)?);
                if !signed(0) {
                    return Err(custom(ProgramErrorCode::UnauthorizedHunter));
                }
                let mut record = load_bounty(state, &bounty)?;
                if record.status != BountyStatus::Approved {
                    return Err(custom(ProgramErrorCode::BountyNotApproved));
                }
                if record.hunter.map(|h| h.pubkey()) != Some(hunter) {
                    return Err(custom(ProgramErrorCode::UnauthorizedHunter));
                }
                drain(state, &vault, &hunter);
                record.status = BountyStatus::Claimed;
                state.accounts.insert(bounty, record.pack().unwrap());
                Ok(())
            }
            BountyInstruction::CancelBounty | BountyInstruction::CancelBountyEmergency => {
                let emergency = matches!(payload, BountyInstruction::CancelBountyEmergency);
                let (creator, bounty, vault) = (key(0)?, key(1)?, key(2)?);
                let mut record = load_bounty(state, &bounty)?;
                if !signed(0) || record.creator.pubkey() != creator {
                    return Err(custom(ProgramErrorCode::UnauthorizedCreator));
                }
                if record.status != BountyStatus::Open {
                    return Err(custom(ProgramErrorCode::BountyNotOpen));
                }
                if !emergency && now <= record.deadline {
                    return Err(custom(ProgramErrorCode::DeadlineNotPassed));
                }
                drain(state, &vault, &creator);
                record.status = BountyStatus::Cancelled;
                state.accounts.insert(bounty, record.pack().unwrap());
                Ok(())
            }
            BountyInstruction::RecordSubmission {
                submission_id,
                severity,
                description,
                ipfs_hash,
            } => {
                let (hunter, bounty, submission) = (key(0)?, key(1)?, key(2)?);
                if !signed(0) {
                    return Err(custom(ProgramErrorCode::UnauthorizedHunter));
                }
                if !(1..=5).contains(&severity) {
                    return Err(custom(ProgramErrorCode::InvalidSeverity));
                }
                let record = load_bounty(state, &bounty)?;
                if record.status != BountyStatus::Open {
                    return Err(custom(ProgramErrorCode::BountyNotOpen));
                }
                let (expected, _) = self
                    .deriver
                    .submission(&bounty, &Identity::from(hunter), &submission_id)
                    .map_err(|_| InstructionError::InvalidSeeds)?;
                if expected != submission {
                    return Err(InstructionError::InvalidAccountData);
                }
                let entry = Submission {
                    id: submission_id,
                    bounty: Identity::from(bounty),
                    auditor: Identity::from(hunter),
                    description,
                    ipfs_hash,
                    severity,
                    upvotes: 0,
                    downvotes: 0,
                    status: SubmissionStatus::Pending,
                    payout_amount: None,
                    is_winner: false,
                    created_at: now,
                };
                state.accounts.insert(submission, entry.pack().unwrap());
                Ok(())
            }
            BountyInstruction::VoteOnSubmission { is_upvote, .. } => {
                let (voter, bounty, submission, vote) = (key(0)?, key(1)?, key(2)?, key(3)?);
                let mut entry = load_submission(state, &submission)?;
                if state.accounts.contains_key(&vote) {
                    return Err(custom(ProgramErrorCode::AlreadyVoted));
                }
                if is_upvote {
                    entry.upvotes += 1;
                } else {
                    entry.downvotes += 1;
                }
                let ballot = Vote {
                    voter: Identity::from(voter),
                    submission: Identity::from(submission),
                    bounty: Identity::from(bounty),
                    vote_type: if is_upvote { VoteType::Up } else { VoteType::Down },
                    timestamp: now,
                };
                state.accounts.insert(submission, entry.pack().unwrap());
                state.accounts.insert(vote, ballot.pack().unwrap());
                Ok(())
            }
            BountyInstruction::SelectWinner { payout_amount, .. } => {
                let (creator, bounty, submission) = (key(0)?, key(1)?, key(2)?);
                let mut record = load_bounty(state, &bounty)?;
                if !signed(0) || record.creator.pubkey() != creator {
                    return Err(custom(ProgramErrorCode::UnauthorizedCreator));
                }
                if record.status != BountyStatus::Open {
                    return Err(custom(ProgramErrorCode::BountyNotOpen));
                }
                if record.current_winners >= record.winners_count {
                    return Err(custom(ProgramErrorCode::MaxWinnersReached));
                }
                let mut entry = load_submission(state, &submission)?;
                if entry.is_winner {
                    return Err(custom(ProgramErrorCode::SubmissionAlreadyWinner));
                }
                if payout_amount > record.amount / u64::from(record.winners_count.max(1)) {
                    return Err(custom(ProgramErrorCode::PayoutExceedsLimit));
                }
                entry.is_winner = true;
                entry.payout_amount = Some(payout_amount);
                entry.status = SubmissionStatus::Approved;
                record.current_winners += 1;
                if record.current_winners >= record.winners_count {
                    record.status = BountyStatus::Approved;
                }
                state.accounts.insert(submission, entry.pack().unwrap());
                state.accounts.insert(bounty, record.pack().unwrap());
                Ok(())
            }
            BountyInstruction::FinalizeAndDistributeRemaining => {
                let (creator, bounty, vault) = (key(0)?, key(1)?, key(2)?);
                let mut record = load_bounty(state, &bounty)?;
                if !signed(0) || record.creator.pubkey() != creator {
                    return Err(custom(ProgramErrorCode::UnauthorizedCreator));
                }
                if record.status.is_terminal() {
                    return Err(custom(ProgramErrorCode::BountyNotOpen));
                }
                if now <= record.deadline && record.current_winners < record.winners_count {
                    return Err(custom(ProgramErrorCode::DeadlineNotPassed));
                }
                drain(state, &vault, &creator);
                record.status = BountyStatus::Claimed;
                state.accounts.insert(bounty, record.pack().unwrap());
                Ok(())
            }
        }
    }
}

fn load_bounty(state: &State, address: &Pubkey) -> Result<BountyAccount, InstructionError> {
    let data = state
        .accounts
        .get(address)
        .ok_or(InstructionError::UninitializedAccount)?;
    BountyAccount::unpack(data).map_err(|_| InstructionError::InvalidAccountData)
}

fn load_submission(state: &State, address: &Pubkey) -> Result<Submission, InstructionError> {
    let data = state
        .accounts
        .get(address)
        .ok_or(custom(ProgramErrorCode::SubmissionNotFound))?;
    Submission::unpack(data).map_err(|_| custom(ProgramErrorCode::InvalidSubmission))
}

fn drain(state: &mut State, from: &Pubkey, to: &Pubkey) {
    let amount = state.lamports.remove(from).unwrap_or(0);
    *state.lamports.entry(*to).or_default() += amount;
}

impl RpcTransport for FakeChain {
    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, TransportError> {
        let signature = transaction.signatures[0];
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(Call::Send(signature));
        transaction
            .verify()
            .map_err(|e| TransportError::Rpc(format!("signature verification failed: {e}")))?;

        let message = &transaction.message;
        let mut scratch = State {
            accounts: guard.accounts.clone(),
            lamports: guard.lamports.clone(),
            now: guard.now,
            ..State::default()
        };
        let mut logs = Vec::new();
        let mut result = Ok(());
        for (index, ix) in message.instructions.iter().enumerate() {
            let program = message.account_keys[ix.program_id_index as usize];
            logs.push(format!("Program {program} invoke [1]"));
            let keys: Vec<Pubkey> = ix
                .accounts
                .iter()
                .map(|&i| message.account_keys[i as usize])
                .collect();
            let signers: Vec<bool> = ix
                .accounts
                .iter()
                .map(|&i| message.is_signer(i as usize))
                .collect();
            let step = match BountyInstruction::unpack(&ix.data) {
                Ok(payload) => {
                    logs.push(format!("Program log: Instruction: {}", payload.name()));
                    self.apply(&mut scratch, payload, &keys, &signers)
                }
                Err(_) => Err(InstructionError::InvalidInstructionData),
            };
            if let Err(e) = step {
                logs.push(format!("Program {program} failed: {e}"));
                result = Err(TransactionError::InstructionError(index as u8, e));
                break;
            }
            logs.push(format!("Program {program} success"));
        }

        let status = match result {
            Ok(()) => {
                guard.accounts = scratch.accounts;
                guard.lamports = scratch.lamports;
                SignatureStatus::Confirmed
            }
            Err(e) => SignatureStatus::Failed(e),
        };
        let polls_left = guard.confirm_after;
        guard.landings.insert(signature, Landing { polls_left, status });
        guard.logs.insert(signature, logs);
        Ok(signature)
    }

    async fn get_signature_status(&self, signature: &Signature) -> Result<SignatureStatus, TransportError> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(Call::Status(*signature));
        let status = match guard.landings.get_mut(signature) {
            None => SignatureStatus::Unknown,
            Some(landing) if landing.polls_left > 0 => {
                landing.polls_left -= 1;
                SignatureStatus::Unknown
            }
            Some(landing) => landing.status.clone(),
        };
        Ok(status)
    }

    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, TransportError> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(Call::Account(*address));
        Ok(guard.accounts.get(address).cloned())
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, TransportError> {
        self.state.lock().unwrap().calls.push(Call::Blockhash);
        Ok(Hash::new_unique())
    }

    async fn get_transaction_logs(&self, signature: &Signature) -> Result<Vec<String>, TransportError> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(Call::Logs(*signature));
        Ok(guard.logs.get(signature).cloned().unwrap_or_default())
    }
}

pub fn client(chain: &Arc<FakeChain>, store: &Arc<InMemoryMetadataStore>, keypair: Keypair) -> TestClient {
    client_with_config(chain, store, keypair, ClientConfig::default())
}

pub fn client_with_config(
    chain: &Arc<FakeChain>,
    store: &Arc<InMemoryMetadataStore>,
    keypair: Keypair,
    config: ClientConfig,
) -> TestClient {
    let clock = chain.clone();
    EscrowClient::new(config, chain.clone(), KeypairWallet::new(keypair), store.clone())
        .with_clock(move || clock.now())
}
