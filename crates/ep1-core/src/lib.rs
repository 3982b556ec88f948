pub mod block;
pub mod constants;
pub mod error;
pub mod transaction;
pub mod types;

pub use block::Block;
pub use constants::*;
pub use error::Ep1Error;
pub use transaction::{MultiSigAuth, SignerRecord, Transaction, TxType};
pub use types::*;
