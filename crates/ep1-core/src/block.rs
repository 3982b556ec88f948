use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::transaction::Transaction;
use crate::types::{BlockHash, PublicKeyBytes, SignatureBytes, Timestamp, TxId};

/// The atomic unit of chain extension.
///
/// The hash commits to everything except itself and the proposer signature;
/// the signature covers the same pre-hash payload. Transactions enter the
/// hash by id — each id already commits to its own canonical payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Strictly monotonic per chain; 0 for genesis.
    pub height: u64,

    /// Creation time, Unix nanoseconds.
    pub timestamp: Timestamp,

    /// Hash of the parent block; all-zero for genesis.
    pub prev_hash: BlockHash,

    pub transactions: Vec<Transaction>,

    /// Raw public-key bytes of the proposing validator.
    pub proposer: PublicKeyBytes,

    /// Proposer signature over the pre-hash payload.
    pub signature: SignatureBytes,

    /// SHA-256 of the pre-hash payload.
    pub hash: BlockHash,

    /// Optional audit trail captured into the hash for forward extension.
    pub audit_log: Option<String>,
}

impl Block {
    /// Serialize the canonical pre-hash payload: compact JSON, keys in
    /// lexicographic order, transactions as their hex ids in block order.
    pub fn pre_hash_payload(&self) -> Vec<u8> {
        let mut obj = Map::new();
        if let Some(log) = &self.audit_log {
            obj.insert("auditLog".into(), Value::from(log.as_str()));
        }
        obj.insert("height".into(), Value::from(self.height));
        obj.insert("prevHash".into(), Value::from(self.prev_hash.to_hex()));
        obj.insert("proposer".into(), Value::from(self.proposer.to_hex()));
        obj.insert("timestamp".into(), Value::from(self.timestamp));
        let ids: Vec<Value> = self
            .transactions
            .iter()
            .map(|tx| Value::from(tx.id.to_hex()))
            .collect();
        obj.insert("transactions".into(), Value::from(ids));

        serde_json::to_vec(&Value::Object(obj))
            .expect("pre-hash payload serialization is infallible")
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }

    pub fn tx_ids(&self) -> Vec<TxId> {
        self.transactions.iter().map(|tx| tx.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxType;

    fn sample_block() -> Block {
        let mut tx = Transaction::unsigned(TxType::Stimulus, 10);
        tx.id = TxId::from_bytes([7u8; 32]);
        Block {
            height: 4,
            timestamp: 1_700_000_000_000_000_000,
            prev_hash: BlockHash::from_bytes([1u8; 32]),
            transactions: vec![tx],
            proposer: PublicKeyBytes::from_bytes(vec![0x04; 65]),
            signature: SignatureBytes::from_bytes(vec![0u8; 64]),
            hash: BlockHash::from_bytes([9u8; 32]),
            audit_log: None,
        }
    }

    #[test]
    fn payload_excludes_hash_and_signature() {
        let mut block = sample_block();
        let before = block.pre_hash_payload();
        block.hash = BlockHash::from_bytes([0xEE; 32]);
        block.signature = SignatureBytes::from_bytes(vec![0xEE; 64]);
        assert_eq!(before, block.pre_hash_payload());
    }

    #[test]
    fn payload_commits_to_proposer_and_audit_log() {
        let mut block = sample_block();
        let plain = block.pre_hash_payload();

        block.proposer = PublicKeyBytes::from_bytes(vec![0x05; 65]);
        let reproposed = block.pre_hash_payload();
        assert_ne!(plain, reproposed);

        block.audit_log = Some("epoch rollover".into());
        assert_ne!(reproposed, block.pre_hash_payload());
    }

    #[test]
    fn payload_commits_to_tx_order() {
        let mut block = sample_block();
        let mut second = Transaction::unsigned(TxType::Stimulus, 11);
        second.id = TxId::from_bytes([8u8; 32]);
        block.transactions.push(second);

        let forward = block.pre_hash_payload();
        block.transactions.reverse();
        assert_ne!(forward, block.pre_hash_payload());
    }

    #[test]
    fn wire_round_trip() {
        let block = sample_block();
        let bytes = bincode::serialize(&block).unwrap();
        let back: Block = bincode::deserialize(&bytes).unwrap();
        assert_eq!(block, back);
    }
}
