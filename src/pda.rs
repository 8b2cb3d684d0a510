//! Derived account addresses.
//!
//! Every address the program checks is a program-derived address over a
//! namespace tag and a handful of seed components:
//!
//! - bounty: `["bounty", creator, seed]`
//! - vault: `["vault", bounty]`
//! - submission: `["submission", bounty, hunter, submission_id]`
//! - vote: `["vote", submission, voter]`
//!
//! Oversized seeds are rejected with [`EscrowError::SeedTooLong`]; callers
//! turning human text into a seed go through [`seed_from_title`] first.

use solana_program::pubkey::{Pubkey, MAX_SEED_LEN};
use tracing::debug;

use crate::{
    error::{EscrowError, EscrowResult},
    identity::Identity,
};

pub const BOUNTY_SEED: &[u8] = b"bounty";
pub const VAULT_SEED: &[u8] = b"vault";
pub const SUBMISSION_SEED: &[u8] = b"submission";
pub const VOTE_SEED: &[u8] = b"vote";

/// Addresses involved in one bounty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BountyAddresses {
    pub bounty: Pubkey,
    pub bounty_bump: u8,
    pub vault: Pubkey,
    pub vault_bump: u8,
}

/// Pure address derivation bound to one program id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressDeriver {
    program_id: Pubkey,
}

impl AddressDeriver {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// `[namespace, owner, seed]`.
    pub fn derive(&self, namespace: &[u8], owner: &Identity, seed: &[u8]) -> EscrowResult<(Pubkey, u8)> {
        self.find(&[namespace, owner.as_ref(), seed])
    }

    /// `[namespace, parent]`.
    pub fn derive_child(&self, namespace: &[u8], parent: &Pubkey) -> EscrowResult<(Pubkey, u8)> {
        self.find(&[namespace, parent.as_ref()])
    }

    pub fn bounty(&self, creator: &Identity, seed: &[u8]) -> EscrowResult<(Pubkey, u8)> {
        self.derive(BOUNTY_SEED, creator, seed)
    }

    pub fn vault(&self, bounty: &Pubkey) -> EscrowResult<(Pubkey, u8)> {
        self.derive_child(VAULT_SEED, bounty)
    }

    pub fn bounty_addresses(&self, creator: &Identity, seed: &[u8]) -> EscrowResult<BountyAddresses> {
        let (bounty, bounty_bump) = self.bounty(creator, seed)?;
        let (vault, vault_bump) = self.vault(&bounty)?;
        Ok(BountyAddresses {
            bounty,
            bounty_bump,
            vault,
            vault_bump,
        })
    }

    pub fn submission(
        &self,
        bounty: &Pubkey,
        hunter: &Identity,
        submission_id: &str,
    ) -> EscrowResult<(Pubkey, u8)> {
        self.find(&[
            SUBMISSION_SEED,
            bounty.as_ref(),
            hunter.as_ref(),
            submission_id.as_bytes(),
        ])
    }

    pub fn vote(&self, submission: &Pubkey, voter: &Identity) -> EscrowResult<(Pubkey, u8)> {
        self.find(&[VOTE_SEED, submission.as_ref(), voter.as_ref()])
    }

    fn find(&self, seeds: &[&[u8]]) -> EscrowResult<(Pubkey, u8)> {
        check_seeds(seeds)?;
        let found = Pubkey::try_find_program_address(seeds, &self.program_id).ok_or_else(|| {
            EscrowError::InvalidInput("no viable bump seed for derived address".to_string())
        })?;
        debug!(address = %found.0, bump = found.1, "derived address");
        Ok(found)
    }
}

fn check_seeds(seeds: &[&[u8]]) -> EscrowResult<()> {
    match seeds.iter().find(|seed| seed.len() > MAX_SEED_LEN) {
        Some(seed) => Err(EscrowError::SeedTooLong {
            len: seed.len(),
            max: MAX_SEED_LEN,
        }),
        None => Ok(()),
    }
}

/// Trims a human-readable title to the seed budget without splitting a
/// UTF-8 character.
pub fn seed_from_title(title: &str) -> Vec<u8> {
    let title = title.trim();
    let mut end = title.len().min(MAX_SEED_LEN);
    while !title.is_char_boundary(end) {
        end -= 1;
    }
    title.as_bytes()[..end].to_vec()
}
