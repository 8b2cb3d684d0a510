//! The cluster boundary.
//!
//! Every call except [`RpcTransport::send_transaction`] is a read and safe to
//! retry. `send_transaction` must be called at most once per signed envelope.

use std::future::Future;

use solana_program::{hash::Hash, pubkey::Pubkey};
use solana_sdk::{signature::Signature, transaction::Transaction, transaction::TransactionError};

use crate::error::TransportError;

/// What the cluster currently knows about a signature, judged against the
/// configured commitment level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Not seen, or seen below the target commitment.
    Unknown,
    Confirmed,
    Failed(TransactionError),
}

pub trait RpcTransport: Send + Sync {
    /// Not idempotent.
    fn send_transaction(
        &self,
        transaction: &Transaction,
    ) -> impl Future<Output = Result<Signature, TransportError>> + Send;

    fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> impl Future<Output = Result<SignatureStatus, TransportError>> + Send;

    /// Raw account data, or `None` when the account does not exist.
    fn get_account_data(
        &self,
        address: &Pubkey,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    fn get_latest_blockhash(&self) -> impl Future<Output = Result<Hash, TransportError>> + Send;

    /// Program log lines of a landed transaction, for diagnostics.
    fn get_transaction_logs(
        &self,
        signature: &Signature,
    ) -> impl Future<Output = Result<Vec<String>, TransportError>> + Send;
}

#[cfg(feature = "rpc-client")]
pub use self::client::SolanaRpcTransport;

#[cfg(feature = "rpc-client")]
mod client {
    use solana_client::{
        client_error::{ClientError, ClientErrorKind},
        nonblocking::rpc_client::RpcClient,
        rpc_config::{RpcSendTransactionConfig, RpcTransactionConfig},
        rpc_request::{RpcError, RpcResponseErrorData},
    };
    use solana_sdk::commitment_config::CommitmentConfig;
    use solana_transaction_status::UiTransactionEncoding;

    use super::*;
    use crate::config::ClientConfig;

    /// [`RpcTransport`] over the nonblocking JSON-RPC client.
    pub struct SolanaRpcTransport {
        rpc: RpcClient,
        commitment: CommitmentConfig,
    }

    impl SolanaRpcTransport {
        pub fn new(config: &ClientConfig) -> Self {
            Self {
                rpc: RpcClient::new_with_commitment(config.rpc_url.clone(), config.commitment),
                commitment: config.commitment,
            }
        }
    }

    fn rpc_error(e: ClientError) -> TransportError {
        if let ClientErrorKind::RpcError(RpcError::RpcResponseError {
            message,
            data: RpcResponseErrorData::SendTransactionPreflightFailure(result),
            ..
        }) = &e.kind
        {
            return TransportError::Rejected {
                detail: message.clone(),
                error: result.err.clone(),
                logs: result.logs.clone().unwrap_or_default(),
            };
        }
        TransportError::Rpc(e.to_string())
    }

    impl RpcTransport for SolanaRpcTransport {
        async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, TransportError> {
            let config = RpcSendTransactionConfig {
                preflight_commitment: Some(self.commitment.commitment),
                // resubmission is the caller's decision, never the node's
                max_retries: Some(0),
                ..RpcSendTransactionConfig::default()
            };
            self.rpc
                .send_transaction_with_config(transaction, config)
                .await
                .map_err(rpc_error)
        }

        async fn get_signature_status(&self, signature: &Signature) -> Result<SignatureStatus, TransportError> {
            let response = self
                .rpc
                .get_signature_statuses(&[*signature])
                .await
                .map_err(rpc_error)?;
            let status = match response.value.into_iter().next().flatten() {
                None => SignatureStatus::Unknown,
                Some(status) => match status.err.clone() {
                    Some(err) => SignatureStatus::Failed(err),
                    None if status.satisfies_commitment(self.commitment) => SignatureStatus::Confirmed,
                    None => SignatureStatus::Unknown,
                },
            };
            Ok(status)
        }

        async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, TransportError> {
            let response = self
                .rpc
                .get_account_with_commitment(address, self.commitment)
                .await
                .map_err(rpc_error)?;
            Ok(response.value.map(|account| account.data))
        }

        async fn get_latest_blockhash(&self) -> Result<Hash, TransportError> {
            self.rpc.get_latest_blockhash().await.map_err(rpc_error)
        }

        async fn get_transaction_logs(&self, signature: &Signature) -> Result<Vec<String>, TransportError> {
            let config = RpcTransactionConfig {
                encoding: Some(UiTransactionEncoding::Json),
                commitment: Some(CommitmentConfig::confirmed()),
                max_supported_transaction_version: Some(0),
            };
            let tx = self
                .rpc
                .get_transaction_with_config(signature, config)
                .await
                .map_err(rpc_error)?;
            Ok(tx
                .transaction
                .meta
                .and_then(|meta| Option::<Vec<String>>::from(meta.log_messages))
                .unwrap_or_default())
        }
    }
}
