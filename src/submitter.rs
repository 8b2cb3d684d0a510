use std::{sync::Arc, time::Duration};

use solana_sdk::{signature::Signature, transaction::Transaction, transaction::TransactionError};
use tracing::{info, warn};

use crate::{
    backoff::{poll, Backoff, PollLimit, PollOutcome},
    config::{ClientConfig, PollPolicy},
    error::{EscrowError, EscrowResult, ProgramFailure, TransportError},
    rpc::{RpcTransport, SignatureStatus},
};

/// Final disposition of a submitted transaction, as far as polling could
/// tell. `Timeout` means unknown, not failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Confirmed(Signature),
    ProgramError {
        signature: Signature,
        failure: ProgramFailure,
    },
    Timeout(Signature),
}

impl Outcome {
    pub fn signature(&self) -> &Signature {
        match self {
            Outcome::Confirmed(signature)
            | Outcome::ProgramError { signature, .. }
            | Outcome::Timeout(signature) => signature,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Outcome::Confirmed(_))
    }

    pub fn into_result(self) -> EscrowResult<Signature> {
        match self {
            Outcome::Confirmed(signature) => Ok(signature),
            Outcome::ProgramError { signature, failure } => {
                Err(EscrowError::ProgramError { signature, failure })
            }
            Outcome::Timeout(signature) => Err(EscrowError::Timeout { signature }),
        }
    }
}

enum Landed {
    Confirmed,
    Failed(TransactionError),
}

/// Sends signed transactions once and confirms them by polling signature
/// status. Confirmation never depends on a subscription.
pub struct TransactionSubmitter<R> {
    rpc: Arc<R>,
    poll: PollPolicy,
    default_timeout: Duration,
}

impl<R: RpcTransport> TransactionSubmitter<R> {
    pub fn new(rpc: Arc<R>, config: &ClientConfig) -> Self {
        Self {
            rpc,
            poll: config.poll,
            default_timeout: config.confirm_timeout,
        }
    }

    pub async fn submit(&self, transaction: &Transaction) -> EscrowResult<Outcome> {
        self.submit_with_timeout(transaction, self.default_timeout).await
    }

    /// Sends `transaction` exactly once, then polls until a terminal status
    /// or `timeout`. A failed send still polls, since the node may have
    /// forwarded the transaction before the error.
    pub async fn submit_with_timeout(
        &self,
        transaction: &Transaction,
        timeout: Duration,
    ) -> EscrowResult<Outcome> {
        let signature = match transaction.signatures.first() {
            Some(signature) if transaction.is_signed() => *signature,
            _ => {
                return Err(EscrowError::SignerUnavailable(
                    "transaction is missing required signatures".to_string(),
                ))
            }
        };

        match self.rpc.send_transaction(transaction).await {
            Ok(sent) => {
                if sent != signature {
                    warn!(expected = %signature, returned = %sent, "node returned a different signature");
                }
                info!(signature = %signature, "transaction sent");
            }
            Err(TransportError::Rejected {
                detail,
                error: Some(error),
                logs,
            }) => {
                let failure = ProgramFailure::new(error, logs);
                warn!(
                    signature = %signature,
                    detail = %detail,
                    logs = ?failure.logs,
                    "transaction rejected in preflight"
                );
                return Ok(Outcome::ProgramError { signature, failure });
            }
            Err(err @ TransportError::Rejected { error: None, .. }) => {
                return Err(err.into());
            }
            Err(TransportError::Rpc(detail)) => {
                warn!(signature = %signature, detail = %detail, "send failed, polling in case it landed");
            }
        }

        Ok(self.confirm(&signature, timeout).await)
    }

    /// Polls `signature` without sending anything. Safe to call again after
    /// a timeout or a restart.
    pub async fn confirm(&self, signature: &Signature, timeout: Duration) -> Outcome {
        let rpc = &self.rpc;
        let landed = poll(
            Backoff::from(self.poll),
            PollLimit::timeout(timeout),
            |attempt| async move {
                match rpc.get_signature_status(signature).await {
                    Ok(SignatureStatus::Confirmed) => Some(Landed::Confirmed),
                    Ok(SignatureStatus::Failed(error)) => Some(Landed::Failed(error)),
                    Ok(SignatureStatus::Unknown) => None,
                    Err(e) => {
                        warn!(signature = %signature, attempt, error = %e, "status poll failed");
                        None
                    }
                }
            },
        )
        .await;

        match landed {
            PollOutcome::Ready(Landed::Confirmed) => {
                info!(signature = %signature, "transaction confirmed");
                Outcome::Confirmed(*signature)
            }
            PollOutcome::Ready(Landed::Failed(error)) => {
                let logs = match self.rpc.get_transaction_logs(signature).await {
                    Ok(logs) => logs,
                    Err(e) => {
                        warn!(signature = %signature, error = %e, "could not fetch program logs");
                        Vec::new()
                    }
                };
                let failure = ProgramFailure::new(error, logs);
                warn!(
                    signature = %signature,
                    error = %failure,
                    logs = ?failure.logs,
                    "transaction failed"
                );
                Outcome::ProgramError {
                    signature: *signature,
                    failure,
                }
            }
            PollOutcome::Exhausted { attempts } => {
                warn!(signature = %signature, attempts, "confirmation timed out");
                Outcome::Timeout(*signature)
            }
        }
    }
}
