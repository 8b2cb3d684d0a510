pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod instruction;
pub mod machine;
pub mod metadata;
pub mod pda;
pub mod reconciler;
pub mod rpc;
pub mod state;
pub mod submitter;
pub mod transaction;
pub mod wallet;

pub use client::{CreateBountyRequest, CreatedBounty, EscrowClient, FindingRequest, Receipt};
pub use config::ClientConfig;
pub use error::{ErrorKind, EscrowError, EscrowResult};
pub use identity::{Identity, OwnerRef};
pub use machine::Action;
pub use submitter::Outcome;

// Deployed audit bounty program
solana_program::declare_id!("3K6VQ96CqESYiVT5kqPy6BU7ZDQbkZhVU4K5Bas7r9eh");
