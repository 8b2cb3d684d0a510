use std::{str::FromStr, time::Duration};

use solana_program::pubkey::Pubkey;
use solana_sdk::commitment_config::CommitmentConfig;

use crate::error::{EscrowError, EscrowResult};

pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

/// Backoff for the confirmation poll loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            multiplier: 1.5,
        }
    }
}

/// Bounded retries for reading an account back after a confirmed write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadBackPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReadBackPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_millis(500),
        }
    }
}

/// Connection context passed to every component that talks to the cluster.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub rpc_url: String,
    pub program_id: Pubkey,
    pub commitment: CommitmentConfig,
    pub poll: PollPolicy,
    pub confirm_timeout: Duration,
    pub read_back: ReadBackPolicy,
    /// Latest accepted deadline, relative to now.
    pub max_deadline_horizon: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            program_id: crate::ID,
            commitment: CommitmentConfig::confirmed(),
            poll: PollPolicy::default(),
            confirm_timeout: Duration::from_secs(60),
            read_back: ReadBackPolicy::default(),
            max_deadline_horizon: Duration::from_secs(5 * 365 * 24 * 60 * 60),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `ESCROW_RPC_URL` (falling back to
    /// `SOLANA_RPC_URL`) and `ESCROW_PROGRAM_ID`.
    pub fn from_env() -> EscrowResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EscrowResult<Self> {
        let mut config = Self::default();
        if let Some(url) = lookup("ESCROW_RPC_URL").or_else(|| lookup("SOLANA_RPC_URL")) {
            config.rpc_url = url;
        }
        if let Some(id) = lookup("ESCROW_PROGRAM_ID") {
            config.program_id = Pubkey::from_str(id.trim()).map_err(|e| {
                EscrowError::InvalidInput(format!("ESCROW_PROGRAM_ID `{id}`: {e}"))
            })?;
        }
        Ok(config)
    }

    pub fn with_rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.rpc_url = rpc_url.into();
        self
    }

    pub fn with_program_id(mut self, program_id: Pubkey) -> Self {
        self.program_id = program_id;
        self
    }

    pub fn with_commitment(mut self, commitment: CommitmentConfig) -> Self {
        self.commitment = commitment;
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn max_deadline_horizon_secs(&self) -> i64 {
        i64::try_from(self.max_deadline_horizon.as_secs()).unwrap_or(i64::MAX)
    }
}
