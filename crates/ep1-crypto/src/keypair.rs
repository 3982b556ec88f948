use ep1_core::error::Ep1Error;
use ep1_core::types::{PublicKeyBytes, SignatureBytes, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// An EP1 keypair: ECDSA P-256 secret + uncompressed 65-byte public key.
///
/// The secret scalar is zeroized on drop and never printed.
#[derive(Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: PublicKeyBytes,
    secret_key: Vec<u8>,
}

impl KeyPair {
    /// Generate a fresh P-256 keypair.
    pub fn generate() -> Self {
        let sk = SigningKey::random(&mut OsRng);
        let pk = sk.verifying_key().to_encoded_point(false);
        Self {
            public_key: PublicKeyBytes::from_bytes(pk.as_bytes().to_vec()),
            secret_key: sk.to_bytes().to_vec(),
        }
    }

    /// Restore a keypair from a raw 32-byte secret scalar.
    pub fn from_secret_bytes(sk_bytes: &[u8]) -> Result<Self, Ep1Error> {
        let sk = SigningKey::from_slice(sk_bytes).map_err(|_| Ep1Error::UnsupportedCurve)?;
        let pk = sk.verifying_key().to_encoded_point(false);
        Ok(Self {
            public_key: PublicKeyBytes::from_bytes(pk.as_bytes().to_vec()),
            secret_key: sk.to_bytes().to_vec(),
        })
    }

    /// Sign `message` (hashed internally with SHA-256). Returns the fixed
    /// 64-byte R ‖ S form used everywhere in the protocol.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let sk = SigningKey::from_slice(&self.secret_key)
            .expect("stored secret key is a valid scalar");
        let sig: Signature = sk.sign(message);
        SignatureBytes::from_bytes(sig.to_bytes().to_vec())
    }

    /// Read-only view of the secret scalar (wallet export).
    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ public_key: {:?} }}", self.public_key)
    }
}

/// Verify a fixed-width ECDSA signature over `message` with an uncompressed
/// P-256 public key.
pub fn verify_signature(
    public_key: &PublicKeyBytes,
    message: &[u8],
    signature: &SignatureBytes,
) -> Result<(), Ep1Error> {
    if public_key.as_bytes().len() != PUBLIC_KEY_LEN {
        return Err(Ep1Error::PublicKeyMissingOrInvalid);
    }
    let vk = VerifyingKey::from_sec1_bytes(public_key.as_bytes())
        .map_err(|_| Ep1Error::PublicKeyMissingOrInvalid)?;
    if signature.as_bytes().len() != SIGNATURE_LEN {
        return Err(Ep1Error::SignatureMissingOrInvalid);
    }
    let sig = Signature::from_slice(signature.as_bytes())
        .map_err(|_| Ep1Error::SignatureMissingOrInvalid)?;
    vk.verify(message, &sig)
        .map_err(|_| Ep1Error::SignatureMissingOrInvalid)
}
