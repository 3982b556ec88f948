//! Transaction authentication: single-signer and M-of-N multisig.
//!
//! Single signers sign the canonical payload bytes; multisig signer records
//! sign the 32-byte transaction id. The multisig sender identifier commits
//! to (M, N, sorted authorized keys), so the authorized list order is
//! consensus-critical.

use std::collections::HashSet;

use ep1_core::block::Block;
use ep1_core::error::Ep1Error;
use ep1_core::transaction::{MultiSigAuth, SignerRecord, Transaction};
use ep1_core::types::PublicKeyBytes;

use crate::hash::{block_hash_from_payload, sha256, tx_id_from_payload};
use crate::keypair::{verify_signature, KeyPair};

/// Derive the deterministic multisig sender identifier:
/// SHA256(u32be(M) ‖ u32be(N) ‖ concat(sorted public keys)).
pub fn multisig_address(
    required: u32,
    authorized: &[PublicKeyBytes],
) -> Result<Vec<u8>, Ep1Error> {
    let total = authorized.len() as u32;
    if required == 0 || required > total {
        return Err(Ep1Error::MultisigConfigInvalid { required, total });
    }
    let mut sorted: Vec<&PublicKeyBytes> = authorized.iter().collect();
    sorted.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));

    let mut preimage = Vec::new();
    preimage.extend_from_slice(&required.to_be_bytes());
    preimage.extend_from_slice(&total.to_be_bytes());
    for key in sorted {
        preimage.extend_from_slice(key.as_bytes());
    }
    Ok(sha256(&preimage).to_vec())
}

/// Fill in sender identity, id, and signature for a single-signer tx.
pub fn sign_single_sig(tx: &mut Transaction, keypair: &KeyPair) {
    tx.from = keypair.public_key.as_bytes().to_vec();
    tx.public_key = Some(keypair.public_key.clone());
    let payload = tx.canonical_payload();
    tx.id = tx_id_from_payload(&payload);
    tx.signature = Some(keypair.sign(&payload));
}

/// Attach an M-of-N configuration, derive the multisig sender identifier,
/// and fix the id. Signatures are collected afterwards.
pub fn prepare_multisig(
    tx: &mut Transaction,
    required: u32,
    mut authorized: Vec<PublicKeyBytes>,
) -> Result<(), Ep1Error> {
    tx.from = multisig_address(required, &authorized)?;
    authorized.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
    tx.multisig = Some(MultiSigAuth {
        required_signatures: required,
        authorized_keys: authorized,
        signers: Vec::new(),
    });
    let payload = tx.canonical_payload();
    tx.id = tx_id_from_payload(&payload);
    Ok(())
}

/// Collect one signer's signature over the transaction id.
pub fn add_multisig_signature(tx: &mut Transaction, keypair: &KeyPair) -> Result<(), Ep1Error> {
    let id_bytes = *tx.id.as_bytes();
    let ms = tx.multisig.as_mut().ok_or(Ep1Error::InvalidTransactionType)?;
    ms.signers.push(SignerRecord {
        public_key: keypair.public_key.clone(),
        signature: keypair.sign(&id_bytes),
    });
    Ok(())
}

/// Stamp a block with its proposer identity, signature, and hash. The
/// signature and hash both cover the finalized pre-hash payload, so every
/// other field must be set before sealing.
pub fn seal_block(block: &mut Block, proposer: &KeyPair) {
    block.proposer = proposer.public_key.clone();
    let payload = block.pre_hash_payload();
    block.signature = proposer.sign(&payload);
    block.hash = block_hash_from_payload(&payload);
}

/// Verify a transaction's authentication proof, single or multisig.
///
/// Does not check id integrity — the mempool recomputes the canonical hash
/// separately.
pub fn verify_transaction_auth(tx: &Transaction) -> Result<(), Ep1Error> {
    match &tx.multisig {
        Some(ms) => verify_multisig(tx, ms),
        None => verify_single(tx),
    }
}

fn verify_single(tx: &Transaction) -> Result<(), Ep1Error> {
    let public_key = tx
        .public_key
        .as_ref()
        .ok_or(Ep1Error::PublicKeyMissingOrInvalid)?;
    if tx.from != public_key.as_bytes() {
        return Err(Ep1Error::PublicKeyMissingOrInvalid);
    }
    let signature = tx
        .signature
        .as_ref()
        .ok_or(Ep1Error::SignatureMissingOrInvalid)?;
    verify_signature(public_key, &tx.canonical_payload(), signature)
}

fn verify_multisig(tx: &Transaction, ms: &MultiSigAuth) -> Result<(), Ep1Error> {
    let required = ms.required_signatures;
    let total = ms.authorized_keys.len() as u32;
    if required == 0 || required > total {
        return Err(Ep1Error::MultisigConfigInvalid { required, total });
    }
    if tx.from != multisig_address(required, &ms.authorized_keys)? {
        return Err(Ep1Error::PublicKeyMissingOrInvalid);
    }
    let got = ms.signers.len() as u32;
    if got < required {
        return Err(Ep1Error::NotEnoughSigners {
            need: required,
            got,
        });
    }

    let authorized: HashSet<&[u8]> = ms
        .authorized_keys
        .iter()
        .map(|k| k.as_bytes())
        .collect();
    let mut seen: HashSet<&[u8]> = HashSet::new();
    for signer in &ms.signers {
        let key = signer.public_key.as_bytes();
        if !seen.insert(key) {
            return Err(Ep1Error::DuplicateSigner);
        }
        if !authorized.contains(key) {
            return Err(Ep1Error::UnauthorizedSigner);
        }
        verify_signature(&signer.public_key, tx.id.as_bytes(), &signer.signature)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep1_core::transaction::TxType;
    use ep1_core::types::Address;

    fn transfer_skeleton() -> Transaction {
        let mut tx = Transaction::unsigned(TxType::Standard, 42);
        tx.to = Some(Address::from_bytes(vec![0xAA; 20]));
        tx.amount = Some(100);
        tx.fee = 1;
        tx
    }

    fn multisig_transfer(
        required: u32,
        members: &[KeyPair],
        signer_indices: &[usize],
    ) -> Transaction {
        let mut tx = transfer_skeleton();
        let keys: Vec<PublicKeyBytes> = members.iter().map(|k| k.public_key.clone()).collect();
        prepare_multisig(&mut tx, required, keys).unwrap();
        for &i in signer_indices {
            add_multisig_signature(&mut tx, &members[i]).unwrap();
        }
        tx
    }

    #[test]
    fn single_sig_verifies() {
        let kp = KeyPair::generate();
        let mut tx = transfer_skeleton();
        sign_single_sig(&mut tx, &kp);
        assert!(verify_transaction_auth(&tx).is_ok());
    }

    #[test]
    fn single_sig_sender_mismatch_fails() {
        let kp = KeyPair::generate();
        let mut tx = transfer_skeleton();
        sign_single_sig(&mut tx, &kp);
        tx.from = KeyPair::generate().public_key.as_bytes().to_vec();
        assert_eq!(
            verify_transaction_auth(&tx),
            Err(Ep1Error::PublicKeyMissingOrInvalid)
        );
    }

    #[test]
    fn two_of_three_any_two_distinct_signers_verify() {
        let members: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        for pair in [[0usize, 1], [0, 2], [1, 2]] {
            let tx = multisig_transfer(2, &members, &pair);
            assert!(verify_transaction_auth(&tx).is_ok(), "pair {pair:?}");
        }
    }

    #[test]
    fn one_signer_is_not_enough() {
        let members: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let tx = multisig_transfer(2, &members, &[0]);
        assert_eq!(
            verify_transaction_auth(&tx),
            Err(Ep1Error::NotEnoughSigners { need: 2, got: 1 })
        );
    }

    #[test]
    fn duplicate_signer_is_rejected() {
        let members: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let tx = multisig_transfer(2, &members, &[0, 0]);
        assert_eq!(verify_transaction_auth(&tx), Err(Ep1Error::DuplicateSigner));
    }

    #[test]
    fn unauthorized_signer_is_rejected() {
        let members: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let mut tx = multisig_transfer(2, &members, &[0]);
        let outsider = KeyPair::generate();
        add_multisig_signature(&mut tx, &outsider).unwrap();
        assert_eq!(
            verify_transaction_auth(&tx),
            Err(Ep1Error::UnauthorizedSigner)
        );
    }

    #[test]
    fn threshold_above_set_size_is_invalid_config() {
        let members: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let keys: Vec<PublicKeyBytes> =
            members.iter().map(|k| k.public_key.clone()).collect();
        assert_eq!(
            multisig_address(4, &keys),
            Err(Ep1Error::MultisigConfigInvalid {
                required: 4,
                total: 3
            })
        );
    }

    #[test]
    fn multisig_address_ignores_input_order() {
        let members: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let keys: Vec<PublicKeyBytes> =
            members.iter().map(|k| k.public_key.clone()).collect();
        let mut reversed = keys.clone();
        reversed.reverse();
        assert_eq!(
            multisig_address(2, &keys).unwrap(),
            multisig_address(2, &reversed).unwrap()
        );
    }
}
