use std::collections::HashMap;
use std::sync::RwLock;

use ep1_core::block::Block;
use ep1_core::error::Ep1Error;
use ep1_core::types::BlockHash;
use ep1_crypto::hash::block_hash_from_payload;
use ep1_crypto::keypair::verify_signature;
use tracing::info;

struct ChainInner {
    blocks: Vec<Block>,
    by_hash: HashMap<BlockHash, usize>,
}

/// Append-only ordered block list with a secondary hash index.
///
/// The append contract covers duplicates, continuity against the current
/// tip, self-hash integrity, and the proposer signature. Proposer-schedule
/// legitimacy is the validation service's duty, not the store's. Readers
/// interleave freely; writers serialize on the inner lock.
pub struct ChainStore {
    inner: RwLock<ChainInner>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ChainInner {
                blocks: Vec::new(),
                by_hash: HashMap::new(),
            }),
        }
    }

    /// Append a block to the tip.
    pub fn append(&self, block: Block) -> Result<(), Ep1Error> {
        let mut inner = self.inner.write().expect("chain lock poisoned");

        if inner.by_hash.contains_key(&block.hash) {
            return Err(Ep1Error::DuplicateBlock(block.hash.to_hex()));
        }

        match inner.blocks.last() {
            Some(last) => {
                if block.height == 0 {
                    return Err(Ep1Error::GenesisUnexpected);
                }
                if block.height != last.height + 1 {
                    return Err(Ep1Error::InvalidHeight {
                        expected: last.height + 1,
                        got: block.height,
                    });
                }
                if block.prev_hash != last.hash {
                    return Err(Ep1Error::InvalidPrevHash(block.prev_hash.to_hex()));
                }
            }
            None => {
                if block.height != 0 {
                    return Err(Ep1Error::GenesisExpected(block.height));
                }
                if !block.prev_hash.is_zero() {
                    return Err(Ep1Error::InvalidPrevHash(block.prev_hash.to_hex()));
                }
            }
        }

        let payload = block.pre_hash_payload();
        let computed = block_hash_from_payload(&payload);
        if computed != block.hash {
            return Err(Ep1Error::HashMismatch {
                computed: computed.to_hex(),
                stored: block.hash.to_hex(),
            });
        }
        verify_signature(&block.proposer, &payload, &block.signature)?;

        let index = inner.blocks.len();
        inner.by_hash.insert(block.hash, index);
        info!(height = block.height, hash = %block.hash, txs = block.transactions.len(), "appended block");
        inner.blocks.push(block);
        Ok(())
    }

    /// Current tip, if any.
    pub fn last_block(&self) -> Option<Block> {
        self.inner
            .read()
            .expect("chain lock poisoned")
            .blocks
            .last()
            .cloned()
    }

    /// Tip height, or -1 when the chain is empty.
    pub fn height(&self) -> i64 {
        let inner = self.inner.read().expect("chain lock poisoned");
        inner.blocks.len() as i64 - 1
    }

    pub fn by_height(&self, height: u64) -> Option<Block> {
        self.inner
            .read()
            .expect("chain lock poisoned")
            .blocks
            .get(height as usize)
            .cloned()
    }

    pub fn by_hash(&self, hash: &BlockHash) -> Option<Block> {
        let inner = self.inner.read().expect("chain lock poisoned");
        inner
            .by_hash
            .get(hash)
            .and_then(|&i| inner.blocks.get(i))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("chain lock poisoned").blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChainStore {
    fn default() -> Self {
        Self::new()
    }
}
