use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Address, Amount, PublicKeyBytes, SignatureBytes, Timestamp, TxId};

// ── TxType ───────────────────────────────────────────────────────────────────

/// Closed set of transaction kinds. The string forms below are part of the
/// hash contract and must never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    Standard,
    ContractDeploy,
    ContractCall,
    Stimulus,
    Tax,
}

impl TxType {
    /// Canonical tag used in the hash payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Standard => "standard",
            TxType::ContractDeploy => "contract-deploy",
            TxType::ContractCall => "contract-call",
            TxType::Stimulus => "stimulus",
            TxType::Tax => "tax",
        }
    }
}

impl std::fmt::Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Multisig authentication ──────────────────────────────────────────────────

/// One collected signature in an M-of-N transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerRecord {
    pub public_key: PublicKeyBytes,
    /// Signature over the 32-byte transaction id.
    pub signature: SignatureBytes,
}

/// M-of-N authentication data. `authorized_keys` is kept sorted; the sorted
/// order is what the multisig sender identifier commits to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSigAuth {
    pub required_signatures: u32,
    pub authorized_keys: Vec<PublicKeyBytes>,
    pub signers: Vec<SignerRecord>,
}

// ── Transaction ──────────────────────────────────────────────────────────────

/// A fully-formed EP1 transaction.
///
/// The id is SHA-256 of [`Transaction::canonical_payload`], which covers
/// every field except the id itself and the signature data. Spend inputs are
/// not carried on the wire; the state store resolves them from the sender's
/// unspent outputs when the enclosing block is applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// SHA-256 of the canonical payload.
    pub id: TxId,

    /// Creation time, Unix nanoseconds.
    pub timestamp: Timestamp,

    pub tx_type: TxType,

    /// Sender identifier: raw public-key bytes for a single signer, the
    /// derived 32-byte multisig identifier otherwise.
    pub from: Vec<u8>,

    /// Recipient address payload.
    pub to: Option<Address>,

    pub amount: Option<Amount>,

    pub fee: Amount,

    /// Single-signer public key. Absent for multisig.
    pub public_key: Option<PublicKeyBytes>,

    /// Single-signer signature over the canonical payload. Absent for multisig.
    pub signature: Option<SignatureBytes>,

    /// WASM bytecode for contract-deploy.
    pub contract_code: Option<Vec<u8>>,

    /// Target address for contract-call.
    pub target_contract: Option<Address>,

    /// Exported entry point for contract-call.
    pub function_name: Option<String>,

    /// Opaque call argument bytes for contract-call.
    pub arguments: Option<Vec<u8>>,

    pub multisig: Option<MultiSigAuth>,
}

impl Transaction {
    /// Serialize the canonical hash payload: a compact JSON object with keys
    /// in lexicographic order, byte fields in lower-case hex, bytecode and
    /// argument bytes in standard base64. Bit-exact across implementations.
    pub fn canonical_payload(&self) -> Vec<u8> {
        let mut obj = Map::new();

        if let Some(amount) = self.amount {
            obj.insert("amount".into(), Value::from(amount));
        }
        if let Some(args) = &self.arguments {
            obj.insert("arguments".into(), Value::from(BASE64.encode(args)));
        }
        if let Some(ms) = &self.multisig {
            let mut keys: Vec<String> = ms.authorized_keys.iter().map(|k| k.to_hex()).collect();
            keys.sort();
            obj.insert("authorizedPublicKeys".into(), Value::from(keys));
            obj.insert(
                "requiredSignatures".into(),
                Value::from(ms.required_signatures),
            );
        }
        if let Some(code) = &self.contract_code {
            obj.insert("contractCode".into(), Value::from(BASE64.encode(code)));
        }
        obj.insert("fee".into(), Value::from(self.fee));
        obj.insert("from".into(), Value::from(hex::encode(&self.from)));
        if let Some(name) = &self.function_name {
            obj.insert("functionName".into(), Value::from(name.as_str()));
        }
        if let Some(pk) = &self.public_key {
            obj.insert("publicKey".into(), Value::from(pk.to_hex()));
        }
        if let Some(target) = &self.target_contract {
            obj.insert("targetContractAddress".into(), Value::from(target.to_hex()));
        }
        obj.insert("timestamp".into(), Value::from(self.timestamp));
        if let Some(to) = &self.to {
            obj.insert("to".into(), Value::from(to.to_hex()));
        }
        obj.insert("txType".into(), Value::from(self.tx_type.as_str()));

        // serde_json's map is ordered; compact output has no whitespace.
        serde_json::to_vec(&Value::Object(obj))
            .expect("canonical payload serialization is infallible")
    }

    /// An unsigned skeleton with the given type; callers fill in the rest and
    /// finalize with the crypto layer.
    pub fn unsigned(tx_type: TxType, timestamp: Timestamp) -> Self {
        Self {
            id: TxId::from_bytes([0u8; 32]),
            timestamp,
            tx_type,
            from: Vec::new(),
            to: None,
            amount: None,
            fee: 0,
            public_key: None,
            signature: None,
            contract_code: None,
            target_contract: None,
            function_name: None,
            arguments: None,
            multisig: None,
        }
    }

    pub fn is_multisig(&self) -> bool {
        self.multisig.is_some()
    }
}
