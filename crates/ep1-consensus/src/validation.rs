use std::sync::Arc;

use ep1_chain::store::ChainStore;
use ep1_core::block::Block;
use ep1_core::constants::{MAX_FUTURE_DRIFT_NANOS, STALE_BLOCK_WARN_NANOS};
use ep1_core::error::Ep1Error;
use ep1_core::transaction::Transaction;
use ep1_core::types::Timestamp;
use ep1_crypto::auth::verify_transaction_auth;
use ep1_crypto::hash::{block_hash_from_payload, tx_id_from_payload};
use ep1_crypto::keypair::verify_signature;
use tracing::warn;

use crate::registry::ValidatorRegistry;
use crate::slashing::{SlashingEvidence, SlashingLog};

/// Stateless-plus-stateful block validation against the current tip and the
/// validator registry. Checks run in a fixed order; the first failure
/// short-circuits, and hash/continuity/proposer/signature/content
/// violations leave slashing evidence behind. Deeper UTXO checks are the
/// state store's job at apply time.
pub struct ValidationService {
    chain: Arc<ChainStore>,
    registry: Arc<ValidatorRegistry>,
    slashing: Arc<SlashingLog>,
}

impl ValidationService {
    pub fn new(
        chain: Arc<ChainStore>,
        registry: Arc<ValidatorRegistry>,
        slashing: Arc<SlashingLog>,
    ) -> Self {
        Self {
            chain,
            registry,
            slashing,
        }
    }

    pub fn validate_block(&self, block: &Block, now: Timestamp) -> Result<(), Ep1Error> {
        // ── 1. Structural ────────────────────────────────────────────────────
        if block.proposer.is_empty() {
            return Err(self.reject(block, Ep1Error::PublicKeyMissingOrInvalid, now, ""));
        }
        if block.signature.is_empty() {
            return Err(self.reject(block, Ep1Error::SignatureMissingOrInvalid, now, ""));
        }

        // ── 2. Self-hash ─────────────────────────────────────────────────────
        let payload = block.pre_hash_payload();
        let computed = block_hash_from_payload(&payload);
        if computed != block.hash {
            let err = Ep1Error::HashMismatch {
                computed: computed.to_hex(),
                stored: block.hash.to_hex(),
            };
            return Err(self.reject(block, err, now, &block.hash.to_hex()));
        }

        // ── 3/4. Chain continuity ────────────────────────────────────────────
        match self.chain.last_block() {
            Some(tip) if block.height > 0 => {
                if block.height != tip.height + 1 {
                    let err = Ep1Error::InvalidHeight {
                        expected: tip.height + 1,
                        got: block.height,
                    };
                    return Err(self.reject(block, err, now, ""));
                }
                if block.prev_hash != tip.hash {
                    let err = Ep1Error::InvalidPrevHash(block.prev_hash.to_hex());
                    return Err(self.reject(block, err, now, &block.prev_hash.to_hex()));
                }
                if block.timestamp <= tip.timestamp {
                    return Err(self.reject(block, Ep1Error::TimeNotMonotonic, now, ""));
                }
            }
            Some(_) => {
                return Err(self.reject(block, Ep1Error::GenesisUnexpected, now, ""));
            }
            None => {
                if block.height != 0 {
                    let err = Ep1Error::GenesisExpected(block.height);
                    return Err(self.reject(block, err, now, ""));
                }
                if !block.prev_hash.is_zero() {
                    let err = Ep1Error::InvalidPrevHash(block.prev_hash.to_hex());
                    return Err(self.reject(block, err, now, &block.prev_hash.to_hex()));
                }
            }
        }

        // ── 5. Time bounds ───────────────────────────────────────────────────
        if block.timestamp > now + MAX_FUTURE_DRIFT_NANOS {
            return Err(Ep1Error::TimeTooFuture);
        }
        if now.saturating_sub(block.timestamp) > STALE_BLOCK_WARN_NANOS {
            warn!(height = block.height, "block is older than five minutes");
        }

        // ── 6. Proposer legitimacy ───────────────────────────────────────────
        if block.height > 0 {
            let expected = self.registry.proposer_for_height(block.height)?;
            if expected.public_key.as_bytes() != block.proposer.as_bytes() {
                return Err(self.reject(
                    block,
                    Ep1Error::UnauthorizedSigner,
                    now,
                    &block.proposer.to_hex(),
                ));
            }
        }

        // ── 7. Proposer signature ────────────────────────────────────────────
        if let Err(err) = verify_signature(&block.proposer, &payload, &block.signature) {
            return Err(self.reject(block, err, now, ""));
        }

        // ── 8. Transactions ──────────────────────────────────────────────────
        for tx in &block.transactions {
            if let Err(err) = self.validate_transaction(tx) {
                return Err(self.reject(block, err, now, &tx.id.to_hex()));
            }
        }
        Ok(())
    }

    /// Authentication plus canonical-hash integrity for one transaction.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), Ep1Error> {
        verify_transaction_auth(tx)?;
        let computed = tx_id_from_payload(&tx.canonical_payload());
        if computed != tx.id {
            return Err(Ep1Error::HashMismatch {
                computed: computed.to_hex(),
                stored: tx.id.to_hex(),
            });
        }
        Ok(())
    }

    fn reject(
        &self,
        block: &Block,
        violation: Ep1Error,
        now: Timestamp,
        detail: &str,
    ) -> Ep1Error {
        self.slashing.record(SlashingEvidence {
            height: block.height,
            offender: block.proposer.clone(),
            violation: violation.clone(),
            detail: detail.to_string(),
            observed_at: now,
        });
        violation
    }
}
