use ep1_core::constants::{ADDRESS_CHECKSUM_LEN, ADDRESS_PREFIX, ADDRESS_VERSION_BYTE};
use ep1_core::error::Ep1Error;
use ep1_core::types::{Address, PublicKeyBytes, TxId};

use crate::hash::{hash160, sha256, sha256d};

/// Derive the 20-byte address payload of a public key.
pub fn address_from_pubkey(public_key: &PublicKeyBytes) -> Address {
    Address::from_bytes(hash160(public_key.as_bytes()).to_vec())
}

/// Deterministic 32-byte contract address: SHA-256 of the deploy tx id.
pub fn contract_address(deploy_tx_id: &TxId) -> Address {
    Address::from_bytes(sha256(deploy_tx_id.as_bytes()).to_vec())
}

/// Encode an address payload into its human form:
/// `ep1_` + hex(version ‖ payload ‖ checksum4), checksum = SHA256d prefix.
pub fn encode_address(address: &Address) -> String {
    let mut body = Vec::with_capacity(1 + address.as_bytes().len() + ADDRESS_CHECKSUM_LEN);
    body.push(ADDRESS_VERSION_BYTE);
    body.extend_from_slice(address.as_bytes());
    let checksum = sha256d(&body);
    body.extend_from_slice(&checksum[..ADDRESS_CHECKSUM_LEN]);
    format!("{}{}", ADDRESS_PREFIX, hex::encode(body))
}

/// Parse and verify a human address back into its raw payload.
pub fn decode_address(text: &str) -> Result<Address, Ep1Error> {
    let hex_part = text
        .strip_prefix(ADDRESS_PREFIX)
        .ok_or_else(|| Ep1Error::Serialization(format!("address missing {ADDRESS_PREFIX} prefix")))?;
    let body = hex::decode(hex_part)
        .map_err(|e| Ep1Error::Serialization(format!("address hex: {e}")))?;
    if body.len() < 1 + ADDRESS_CHECKSUM_LEN {
        return Err(Ep1Error::Serialization("address too short".into()));
    }
    if body[0] != ADDRESS_VERSION_BYTE {
        return Err(Ep1Error::Serialization(format!(
            "unknown address version {:#04x}",
            body[0]
        )));
    }
    let (payload_part, checksum) = body.split_at(body.len() - ADDRESS_CHECKSUM_LEN);
    let expected = sha256d(payload_part);
    if checksum != &expected[..ADDRESS_CHECKSUM_LEN] {
        return Err(Ep1Error::Serialization("address checksum mismatch".into()));
    }
    Ok(Address::from_bytes(payload_part[1..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::KeyPair;

    #[test]
    fn pubkey_address_is_20_bytes() {
        let kp = KeyPair::generate();
        let addr = address_from_pubkey(&kp.public_key);
        assert_eq!(addr.as_bytes().len(), 20);
    }

    #[test]
    fn encode_decode_round_trip() {
        let kp = KeyPair::generate();
        let addr = address_from_pubkey(&kp.public_key);
        let text = encode_address(&addr);
        assert!(text.starts_with("ep1_"));
        assert_eq!(decode_address(&text).unwrap(), addr);
    }

    #[test]
    fn tampered_checksum_is_rejected() {
        let addr = Address::from_bytes(vec![0x11; 20]);
        let mut text = encode_address(&addr);
        // Flip the last hex digit.
        let last = text.pop().unwrap();
        text.push(if last == '0' { '1' } else { '0' });
        assert!(decode_address(&text).is_err());
    }

    #[test]
    fn wrong_prefix_is_rejected() {
        let addr = Address::from_bytes(vec![0x11; 20]);
        let text = encode_address(&addr).replace("ep1_", "ep2_");
        assert!(decode_address(&text).is_err());
    }

    #[test]
    fn contract_addresses_are_32_bytes_and_deterministic() {
        let id = TxId::from_bytes([3u8; 32]);
        let a = contract_address(&id);
        let b = contract_address(&id);
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), 32);
    }
}
