use std::sync::Arc;

use solana_program::{hash::Hash, instruction::Instruction, message::Message, pubkey::Pubkey};
use solana_sdk::packet::PACKET_DATA_SIZE;
use tracing::debug;

use crate::{
    error::{EncodingError, EscrowResult},
    rpc::RpcTransport,
};

/// A compiled message with fee payer and blockhash, waiting for signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    message: Message,
}

impl UnsignedTransaction {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    pub fn fee_payer(&self) -> Pubkey {
        self.message.account_keys[0]
    }

    pub fn blockhash(&self) -> Hash {
        self.message.recent_blockhash
    }

    /// Accounts whose signatures the message requires, fee payer first.
    pub fn required_signers(&self) -> &[Pubkey] {
        let n = self.message.header.num_required_signatures as usize;
        &self.message.account_keys[..n.min(self.message.account_keys.len())]
    }

    /// Size on the wire once every required signature is attached.
    pub fn wire_size(&self) -> usize {
        let signatures = self.message.header.num_required_signatures as usize;
        short_vec_len(signatures) + signatures * 64 + self.message.serialize().len()
    }
}

fn short_vec_len(n: usize) -> usize {
    match n {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        _ => 3,
    }
}

/// Compiles instructions into an [`UnsignedTransaction`], fetching the
/// blockhash at build time so it is as fresh as possible when signed.
pub struct TransactionBuilder<R> {
    rpc: Arc<R>,
}

impl<R: RpcTransport> TransactionBuilder<R> {
    pub fn new(rpc: Arc<R>) -> Self {
        Self { rpc }
    }

    pub async fn build(
        &self,
        instructions: &[Instruction],
        fee_payer: &Pubkey,
    ) -> EscrowResult<UnsignedTransaction> {
        let blockhash = self.rpc.get_latest_blockhash().await?;
        build_with_blockhash(instructions, fee_payer, blockhash)
    }
}

/// Account order and signer/writable flags are taken from the instructions
/// as given; the fee payer is placed first.
pub fn build_with_blockhash(
    instructions: &[Instruction],
    fee_payer: &Pubkey,
    blockhash: Hash,
) -> EscrowResult<UnsignedTransaction> {
    let message = Message::new_with_blockhash(instructions, Some(fee_payer), &blockhash);
    let unsigned = UnsignedTransaction { message };
    let size = unsigned.wire_size();
    if size > PACKET_DATA_SIZE {
        return Err(EncodingError::FieldTooLong {
            field: "transaction",
            len: size,
            max: PACKET_DATA_SIZE,
        }
        .into());
    }
    debug!(
        fee_payer = %fee_payer,
        blockhash = %blockhash,
        size,
        "built transaction"
    );
    Ok(unsigned)
}
