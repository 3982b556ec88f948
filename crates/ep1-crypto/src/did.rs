use ep1_core::constants::DID_KEY_MULTICODEC;
use ep1_core::error::Ep1Error;
use ep1_core::types::{PublicKeyBytes, PUBLIC_KEY_LEN};

const DID_KEY_PREFIX: &str = "did:key:";
const MULTIBASE_BASE58BTC: char = 'z';

/// Encode an uncompressed P-256 public key as a did:key identifier:
/// `did:key:` + multibase(Base58BTC) of varint(0x1201) ‖ key bytes.
pub fn did_key_encode(public_key: &PublicKeyBytes) -> Result<String, Ep1Error> {
    let raw = public_key.as_bytes();
    if raw.len() != PUBLIC_KEY_LEN || raw[0] != 0x04 {
        return Err(Ep1Error::UnsupportedCurve);
    }
    let mut bytes = varint(DID_KEY_MULTICODEC);
    bytes.extend_from_slice(raw);
    Ok(format!(
        "{}{}{}",
        DID_KEY_PREFIX,
        MULTIBASE_BASE58BTC,
        bs58::encode(bytes).into_string()
    ))
}

/// Parse a did:key identifier back into the raw public key. The multibase
/// prefix and multicodec header fail with distinct error kinds.
pub fn did_key_decode(did: &str) -> Result<PublicKeyBytes, Ep1Error> {
    let encoded = did
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or(Ep1Error::PublicKeyMissingOrInvalid)?;
    let b58 = encoded
        .strip_prefix(MULTIBASE_BASE58BTC)
        .ok_or(Ep1Error::PublicKeyMissingOrInvalid)?;
    let bytes = bs58::decode(b58)
        .into_vec()
        .map_err(|_| Ep1Error::PublicKeyMissingOrInvalid)?;

    let (code, rest) = read_varint(&bytes).ok_or(Ep1Error::PublicKeyMissingOrInvalid)?;
    if code != DID_KEY_MULTICODEC {
        return Err(Ep1Error::UnsupportedCurve);
    }
    if rest.len() != PUBLIC_KEY_LEN || rest[0] != 0x04 {
        return Err(Ep1Error::PublicKeyMissingOrInvalid);
    }
    Ok(PublicKeyBytes::from_bytes(rest.to_vec()))
}

/// Unsigned LEB128 varint encoding.
fn varint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(2);
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(bytes: &[u8]) -> Option<(u64, &[u8])> {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().enumerate() {
        if i >= 9 {
            return None;
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, &bytes[i + 1..]));
        }
    }
    None
}
