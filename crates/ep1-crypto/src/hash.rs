use ep1_core::types::{BlockHash, TxId};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Compute SHA-256 of arbitrary bytes → 32-byte array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256 (checksum domain).
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// RIPEMD160(SHA256(data)) → 20-byte address payload.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(sha256(data)).into()
}

/// Derive a TxId from the canonical transaction payload bytes.
pub fn tx_id_from_payload(payload: &[u8]) -> TxId {
    TxId::from_bytes(sha256(payload))
}

/// Derive a BlockHash from the canonical pre-hash payload bytes.
pub fn block_hash_from_payload(payload: &[u8]) -> BlockHash {
    BlockHash::from_bytes(sha256(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        // SHA-256("abc") from FIPS 180-2.
        let digest = sha256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hash160_is_20_bytes_and_stable() {
        let a = hash160(b"some public key bytes");
        let b = hash160(b"some public key bytes");
        assert_eq!(a, b);
        assert_ne!(a, hash160(b"other bytes"));
    }

    #[test]
    fn sha256d_differs_from_single_round() {
        assert_ne!(sha256(b"x"), sha256d(b"x"));
    }
}
