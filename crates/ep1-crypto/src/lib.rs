pub mod address;
pub mod auth;
pub mod did;
pub mod hash;
pub mod keypair;

pub use address::{address_from_pubkey, contract_address, decode_address, encode_address};
pub use auth::{
    add_multisig_signature, multisig_address, prepare_multisig, seal_block, sign_single_sig,
    verify_transaction_auth,
};
pub use did::{did_key_decode, did_key_encode};
pub use hash::{block_hash_from_payload, hash160, sha256, sha256d, tx_id_from_payload};
pub use keypair::{verify_signature, KeyPair};
