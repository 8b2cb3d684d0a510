use std::future::Future;

use solana_sdk::{
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};

use crate::{
    error::{EscrowError, EscrowResult},
    identity::Identity,
    transaction::UnsignedTransaction,
};

/// The user's wallet. A wallet with no connected account reports
/// `identity() == None`; every signing request then fails with
/// [`EscrowError::SignerUnavailable`].
pub trait WalletSigner: Send + Sync {
    fn identity(&self) -> Option<Identity>;

    fn sign_transaction(
        &self,
        transaction: UnsignedTransaction,
    ) -> impl Future<Output = EscrowResult<Transaction>> + Send;

    fn sign_message(&self, message: &[u8]) -> impl Future<Output = EscrowResult<Signature>> + Send;

    fn require_identity(&self) -> EscrowResult<Identity> {
        self.identity()
            .ok_or_else(|| EscrowError::SignerUnavailable("no wallet connected".to_string()))
    }
}

/// Local keypair wallet.
pub struct KeypairWallet {
    keypair: Option<Keypair>,
}

impl KeypairWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Some(keypair),
        }
    }

    pub fn disconnected() -> Self {
        Self { keypair: None }
    }

    fn keypair(&self) -> EscrowResult<&Keypair> {
        self.keypair
            .as_ref()
            .ok_or_else(|| EscrowError::SignerUnavailable("no wallet connected".to_string()))
    }
}

impl WalletSigner for KeypairWallet {
    fn identity(&self) -> Option<Identity> {
        self.keypair.as_ref().map(|k| Identity::from(k.pubkey()))
    }

    async fn sign_transaction(&self, transaction: UnsignedTransaction) -> EscrowResult<Transaction> {
        let keypair = self.keypair()?;
        let payer = transaction.fee_payer();
        if payer != keypair.pubkey() {
            return Err(EscrowError::SignerUnavailable(format!(
                "connected wallet {} is not the fee payer {}",
                keypair.pubkey(),
                payer
            )));
        }
        let blockhash = transaction.blockhash();
        let mut tx = Transaction::new_unsigned(transaction.into_message());
        tx.try_sign(&[keypair], blockhash)
            .map_err(|e| EscrowError::SignerUnavailable(format!("signing failed: {e}")))?;
        Ok(tx)
    }

    async fn sign_message(&self, message: &[u8]) -> EscrowResult<Signature> {
        Ok(self.keypair()?.sign_message(message))
    }
}

/// Message a wallet signs to prove it controls `identity`. The nonce is
/// chosen by the verifier and must not be reused.
pub fn ownership_challenge(identity: &Identity, nonce: &str) -> Vec<u8> {
    format!("bounty-escrow ownership proof\nwallet: {identity}\nnonce: {nonce}").into_bytes()
}

pub async fn prove_ownership<W: WalletSigner>(wallet: &W, nonce: &str) -> EscrowResult<(Identity, Signature)> {
    let identity = wallet.require_identity()?;
    let signature = wallet
        .sign_message(&ownership_challenge(&identity, nonce))
        .await?;
    Ok((identity, signature))
}

pub fn verify_ownership(identity: &Identity, nonce: &str, signature: &Signature) -> bool {
    signature.verify(identity.as_bytes(), &ownership_challenge(identity, nonce))
}
