use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use ep1_core::block::Block;
use ep1_core::error::Ep1Error;
use ep1_core::transaction::Transaction;
use ep1_core::types::TxId;
use ep1_crypto::auth::verify_transaction_auth;
use ep1_crypto::hash::tx_id_from_payload;
use tracing::debug;

/// Which pending transactions a proposer gets. V1 ships FIFO; fee- or
/// impact-weighted policies slot in here without touching the pool.
pub trait SelectionPolicy: Send + Sync {
    /// `pending` arrives in insertion order.
    fn select(&self, pending: &[Transaction], max: usize) -> Vec<Transaction>;
}

/// Insertion-order selection.
pub struct FifoPolicy;

impl SelectionPolicy for FifoPolicy {
    fn select(&self, pending: &[Transaction], max: usize) -> Vec<Transaction> {
        pending.iter().take(max).cloned().collect()
    }
}

struct PoolInner {
    by_id: HashMap<TxId, Transaction>,
    order: VecDeque<TxId>,
}

/// Admitted-but-uncommitted transactions, deduplicated by id and capped.
pub struct Mempool {
    inner: RwLock<PoolInner>,
    capacity: usize,
    policy: Box<dyn SelectionPolicy>,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, Box::new(FifoPolicy))
    }

    pub fn with_policy(capacity: usize, policy: Box<dyn SelectionPolicy>) -> Self {
        Self {
            inner: RwLock::new(PoolInner {
                by_id: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
            policy,
        }
    }

    /// Admit one transaction. Checks run in protocol order: id shape,
    /// duplicate, authentication, canonical-hash integrity, capacity.
    pub fn admit(&self, tx: Transaction) -> Result<(), Ep1Error> {
        if tx.id.as_bytes() == &[0u8; 32] {
            return Err(Ep1Error::InvalidTransaction(
                "empty or malformed transaction id".into(),
            ));
        }
        {
            let inner = self.inner.read().expect("mempool lock poisoned");
            if inner.by_id.contains_key(&tx.id) {
                return Err(Ep1Error::TransactionExists(tx.id.to_hex()));
            }
        }
        verify_transaction_auth(&tx)?;
        let computed = tx_id_from_payload(&tx.canonical_payload());
        if computed != tx.id {
            return Err(Ep1Error::HashMismatch {
                computed: computed.to_hex(),
                stored: tx.id.to_hex(),
            });
        }

        let mut inner = self.inner.write().expect("mempool lock poisoned");
        // Re-check under the write lock: a concurrent admit may have won.
        if inner.by_id.contains_key(&tx.id) {
            return Err(Ep1Error::TransactionExists(tx.id.to_hex()));
        }
        if inner.by_id.len() >= self.capacity {
            return Err(Ep1Error::MempoolFull(self.capacity));
        }
        debug!(tx = %tx.id, "admitted transaction");
        inner.order.push_back(tx.id);
        inner.by_id.insert(tx.id, tx);
        Ok(())
    }

    /// Up to `max` pending transactions through the selection policy.
    pub fn get_pending(&self, max: usize) -> Vec<Transaction> {
        let inner = self.inner.read().expect("mempool lock poisoned");
        let ordered: Vec<Transaction> = inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect();
        self.policy.select(&ordered, max)
    }

    /// Drop the given ids. Missing ids are ignored.
    pub fn remove(&self, ids: &[TxId]) {
        let mut inner = self.inner.write().expect("mempool lock poisoned");
        let PoolInner { by_id, order } = &mut *inner;
        for id in ids {
            by_id.remove(id);
        }
        order.retain(|id| by_id.contains_key(id));
    }

    /// Remove everything the given blocks already committed.
    pub fn prune_blocks(&self, blocks: &[Block]) {
        let ids: Vec<TxId> = blocks.iter().flat_map(|b| b.tx_ids()).collect();
        if !ids.is_empty() {
            debug!(count = ids.len(), "pruning committed transactions");
            self.remove(&ids);
        }
    }

    pub fn get(&self, id: &TxId) -> Result<Transaction, Ep1Error> {
        self.inner
            .read()
            .expect("mempool lock poisoned")
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| Ep1Error::TransactionNotFound(id.to_hex()))
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.inner
            .read()
            .expect("mempool lock poisoned")
            .by_id
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("mempool lock poisoned").by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
