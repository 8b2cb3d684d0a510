use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::{error::MalformedAccount, identity::Identity};

#[derive(
    BorshSerialize, BorshDeserialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum BountyStatus {
    Open,
    Approved,
    Claimed,
    Cancelled,
}

impl BountyStatus {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(BountyStatus::Open),
            1 => Some(BountyStatus::Approved),
            2 => Some(BountyStatus::Claimed),
            3 => Some(BountyStatus::Cancelled),
            _ => None,
        }
    }

    /// No instruction may move a bounty out of a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, BountyStatus::Claimed | BountyStatus::Cancelled)
    }
}

/// On-chain bounty record.
///
/// Layout: creator(32) | hunter Option<32> | amount u64 | deadline i64 |
/// status u8 | initialized bool | winners_count u8 | current_winners u8.
/// The program allocates [`BountyAccount::SPACE`] bytes, so the tail past
/// the serialized record is zero padding.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct BountyAccount {
    pub creator: Identity,
    pub hunter: Option<Identity>,
    pub amount: u64,
    pub deadline: i64,
    pub status: BountyStatus,
    pub initialized: bool,
    pub winners_count: u8,
    pub current_winners: u8,
}

impl BountyAccount {
    /// Serialized length with no hunter assigned.
    pub const MIN_LEN: usize = 32 + 1 + 8 + 8 + 1 + 1 + 1 + 1;
    /// Bytes the program allocates for a bounty record.
    pub const SPACE: usize = 88;
    const HUNTER_FLAG_OFFSET: usize = 32;

    pub fn new_open(creator: Identity, amount: u64, deadline: i64, winners_count: u8) -> Self {
        Self {
            creator,
            hunter: None,
            amount,
            deadline,
            status: BountyStatus::Open,
            initialized: true,
            winners_count,
            current_winners: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Decodes raw account bytes. Length, option flag and initialized flag
    /// are checked before any field is trusted.
    pub fn unpack(data: &[u8]) -> Result<Self, MalformedAccount> {
        if data.len() < Self::MIN_LEN {
            return Err(MalformedAccount::TooShort {
                len: data.len(),
                min: Self::MIN_LEN,
            });
        }

        let hunter_len = match data[Self::HUNTER_FLAG_OFFSET] {
            0 => 0,
            1 => Identity::LEN,
            flag => {
                return Err(MalformedAccount::InvalidOptionFlag {
                    offset: Self::HUNTER_FLAG_OFFSET,
                    flag,
                })
            }
        };
        let status_offset = Self::HUNTER_FLAG_OFFSET + 1 + hunter_len + 8 + 8;
        let initialized_offset = status_offset + 1;
        let min = initialized_offset + 3;
        if data.len() < min {
            return Err(MalformedAccount::TooShort {
                len: data.len(),
                min,
            });
        }
        match data[initialized_offset] {
            0 => return Err(MalformedAccount::Uninitialized),
            1 => {}
            value => {
                return Err(MalformedAccount::InvalidBool {
                    offset: initialized_offset,
                    value,
                })
            }
        }

        let mut reader = AccountReader::new(data);
        let creator = reader.read_identity()?;
        let hunter = reader.read_option(AccountReader::read_identity)?;
        let amount = reader.read_u64()?;
        let deadline = reader.read_i64()?;
        let status = reader.read_status()?;
        let initialized = reader.read_bool()?;
        let winners_count = reader.read_u8()?;
        let current_winners = reader.read_u8()?;

        Ok(Self {
            creator,
            hunter,
            amount,
            deadline,
            status,
            initialized,
            winners_count,
            current_winners,
        })
    }

    /// Serializes the record into a zero-padded buffer of program size.
    pub fn pack(&self) -> io::Result<Vec<u8>> {
        pack_padded(self, Self::SPACE)
    }
}

#[derive(
    BorshSerialize, BorshDeserialize, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
)]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
    Disputed,
}

/// On-chain record of an auditor's graded submission.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub id: String,
    pub bounty: Identity,
    pub auditor: Identity,
    pub description: String,
    pub ipfs_hash: String,
    pub severity: u8,
    pub upvotes: u64,
    pub downvotes: u64,
    pub status: SubmissionStatus,
    pub payout_amount: Option<u64>,
    pub is_winner: bool,
    pub created_at: i64,
}

impl Submission {
    /// Serialized length with empty strings and no payout.
    pub const MIN_LEN: usize = 4 + 32 + 32 + 4 + 4 + 1 + 8 + 8 + 1 + 1 + 1 + 8;
    /// Bytes the program allocates for a submission record.
    pub const SPACE: usize = 184;
    /// Room left for `id`, `description` and `ipfs_hash` once the fixed
    /// fields and a later `Some(payout)` are accounted for.
    pub const MAX_STRING_BYTES: usize = Self::SPACE - Self::MIN_LEN - 8;

    pub fn is_initialized(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn unpack(data: &[u8]) -> Result<Self, MalformedAccount> {
        if data.len() < Self::MIN_LEN {
            return Err(MalformedAccount::TooShort {
                len: data.len(),
                min: Self::MIN_LEN,
            });
        }
        let mut reader = AccountReader::new(data);
        let id = reader.read_string()?;
        if id.is_empty() {
            return Err(MalformedAccount::Uninitialized);
        }
        let bounty = reader.read_identity()?;
        let auditor = reader.read_identity()?;
        let description = reader.read_string()?;
        let ipfs_hash = reader.read_string()?;
        let severity = reader.read_u8()?;
        let upvotes = reader.read_u64()?;
        let downvotes = reader.read_u64()?;
        let status = match reader.read_u8()? {
            0 => SubmissionStatus::Pending,
            1 => SubmissionStatus::Approved,
            2 => SubmissionStatus::Rejected,
            3 => SubmissionStatus::Disputed,
            tag => return Err(MalformedAccount::UnknownStatus(tag)),
        };
        let payout_amount = reader.read_option(AccountReader::read_u64)?;
        let is_winner = reader.read_bool()?;
        let created_at = reader.read_i64()?;

        Ok(Self {
            id,
            bounty,
            auditor,
            description,
            ipfs_hash,
            severity,
            upvotes,
            downvotes,
            status,
            payout_amount,
            is_winner,
            created_at,
        })
    }

    pub fn pack(&self) -> io::Result<Vec<u8>> {
        pack_padded(self, Self::SPACE)
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteType {
    None,
    Up,
    Down,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub voter: Identity,
    pub submission: Identity,
    pub bounty: Identity,
    pub vote_type: VoteType,
    pub timestamp: i64,
}

impl Vote {
    pub const LEN: usize = 32 * 3 + 1 + 8;
    pub const SPACE: usize = 112;

    pub fn unpack(data: &[u8]) -> Result<Self, MalformedAccount> {
        if data.len() < Self::LEN {
            return Err(MalformedAccount::TooShort {
                len: data.len(),
                min: Self::LEN,
            });
        }
        let mut reader = AccountReader::new(data);
        let voter = reader.read_identity()?;
        if voter.is_zero() {
            return Err(MalformedAccount::Uninitialized);
        }
        let submission = reader.read_identity()?;
        let bounty = reader.read_identity()?;
        let vote_type = match reader.read_u8()? {
            0 => VoteType::None,
            1 => VoteType::Up,
            2 => VoteType::Down,
            tag => return Err(MalformedAccount::UnknownStatus(tag)),
        };
        let timestamp = reader.read_i64()?;
        Ok(Self {
            voter,
            submission,
            bounty,
            vote_type,
            timestamp,
        })
    }

    pub fn pack(&self) -> io::Result<Vec<u8>> {
        pack_padded(self, Self::SPACE)
    }
}

fn pack_padded<T: BorshSerialize>(value: &T, space: usize) -> io::Result<Vec<u8>> {
    let mut data = value.try_to_vec()?;
    if data.len() < space {
        data.resize(space, 0);
    }
    Ok(data)
}

/// Bounds-checked sequential reader over account bytes. Option and bool
/// bytes must be exactly 0 or 1; anything else is corruption.
struct AccountReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AccountReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MalformedAccount> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(MalformedAccount::TooShort {
                len: self.data.len(),
                min: self.pos.saturating_add(n),
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, MalformedAccount> {
        Ok(self.take(1)?[0])
    }

    fn read_u64(&mut self) -> Result<u64, MalformedAccount> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_i64(&mut self) -> Result<i64, MalformedAccount> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    fn read_bool(&mut self) -> Result<bool, MalformedAccount> {
        let offset = self.pos;
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(MalformedAccount::InvalidBool { offset, value }),
        }
    }

    fn read_identity(&mut self) -> Result<Identity, MalformedAccount> {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(self.take(Identity::LEN)?);
        Ok(Identity::new(buf))
    }

    fn read_string(&mut self) -> Result<String, MalformedAccount> {
        let mut len = [0u8; 4];
        len.copy_from_slice(self.take(4)?);
        let len = u32::from_le_bytes(len) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| MalformedAccount::Corrupt(format!("string is not utf-8: {e}")))
    }

    fn read_status(&mut self) -> Result<BountyStatus, MalformedAccount> {
        let tag = self.read_u8()?;
        BountyStatus::from_tag(tag).ok_or(MalformedAccount::UnknownStatus(tag))
    }

    fn read_option<T>(
        &mut self,
        read: fn(&mut Self) -> Result<T, MalformedAccount>,
    ) -> Result<Option<T>, MalformedAccount> {
        let offset = self.pos;
        match self.read_u8()? {
            0 => Ok(None),
            1 => read(self).map(Some),
            flag => Err(MalformedAccount::InvalidOptionFlag { offset, flag }),
        }
    }
}
