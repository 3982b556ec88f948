//! Genesis block construction.
//!
//! Genesis is the one place tokens are created outside a stimulus proposal:
//! a height-0 block with an all-zero parent carrying one stimulus
//! transaction per allocation, signed by the founding validator key.

use ep1_core::block::Block;
use ep1_core::transaction::{Transaction, TxType};
use ep1_core::types::{Address, Amount, BlockHash, PublicKeyBytes, SignatureBytes, Timestamp};
use ep1_crypto::auth::{seal_block, sign_single_sig};
use ep1_crypto::keypair::KeyPair;
use tracing::info;

/// One genesis balance grant.
#[derive(Clone, Debug)]
pub struct GenesisAllocation {
    pub recipient: Address,
    pub amount: Amount,
}

/// Build the signed genesis block for the given allocations.
pub fn build_genesis(
    proposer: &KeyPair,
    allocations: &[GenesisAllocation],
    timestamp: Timestamp,
) -> Block {
    let transactions = allocations
        .iter()
        .map(|alloc| {
            let mut tx = Transaction::unsigned(TxType::Stimulus, timestamp);
            tx.to = Some(alloc.recipient.clone());
            tx.amount = Some(alloc.amount);
            sign_single_sig(&mut tx, proposer);
            tx
        })
        .collect();

    let mut block = Block {
        height: 0,
        timestamp,
        prev_hash: BlockHash::zero(),
        transactions,
        proposer: PublicKeyBytes::from_bytes(vec![]),
        signature: SignatureBytes::from_bytes(vec![]),
        hash: BlockHash::zero(),
        audit_log: None,
    };
    seal_block(&mut block, proposer);
    info!(hash = %block.hash, allocations = allocations.len(), "built genesis block");
    block
}
