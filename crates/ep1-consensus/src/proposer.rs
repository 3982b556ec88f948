use std::sync::Arc;

use ep1_core::block::Block;
use ep1_core::constants::{MAX_BLOCK_TXS, PROPOSAL_MAX_DRIFT_NANOS};
use ep1_core::error::Ep1Error;
use ep1_core::types::{BlockHash, PublicKeyBytes, SignatureBytes, Timestamp};
use ep1_crypto::auth::seal_block;
use ep1_crypto::keypair::KeyPair;
use ep1_mempool::pool::Mempool;
use tracing::debug;

/// Assembles, signs, and hashes candidate blocks.
///
/// Pulls pending transactions but never removes them — that happens when
/// the block commits through the state-apply path.
pub struct ProposerService {
    keypair: Option<Arc<KeyPair>>,
    mempool: Arc<Mempool>,
}

impl ProposerService {
    pub fn new(keypair: Option<Arc<KeyPair>>, mempool: Arc<Mempool>) -> Self {
        Self { keypair, mempool }
    }

    pub fn public_key(&self) -> Option<PublicKeyBytes> {
        self.keypair.as_ref().map(|kp| kp.public_key.clone())
    }

    /// Build the candidate block for `height` on top of the given parent.
    ///
    /// The timestamp is the current clock, bumped to parent + 1 ns when the
    /// clock has not advanced past the parent; a clock that would place the
    /// block more than the drift cap into the future fails instead.
    pub fn build_block(
        &self,
        height: u64,
        prev_hash: BlockHash,
        prev_timestamp: Timestamp,
        now: Timestamp,
    ) -> Result<Block, Ep1Error> {
        let keypair = self
            .keypair
            .as_ref()
            .ok_or(Ep1Error::ProposerNotConfigured)?;

        let transactions = self.mempool.get_pending(MAX_BLOCK_TXS);

        let mut timestamp = now;
        if timestamp <= prev_timestamp {
            timestamp = prev_timestamp + 1;
        }
        if timestamp > now + PROPOSAL_MAX_DRIFT_NANOS {
            return Err(Ep1Error::InvalidTimestamp);
        }

        let mut block = Block {
            height,
            timestamp,
            prev_hash,
            transactions,
            proposer: PublicKeyBytes::from_bytes(Vec::new()),
            signature: SignatureBytes::from_bytes(Vec::new()),
            hash: BlockHash::zero(),
            audit_log: None,
        };
        seal_block(&mut block, keypair);
        debug!(height, txs = block.transactions.len(), hash = %block.hash, "built candidate block");
        Ok(block)
    }
}
