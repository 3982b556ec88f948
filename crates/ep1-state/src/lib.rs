pub mod account;
pub mod store;
pub mod utxo;

pub use account::{Account, WealthCategory};
pub use store::{CommittedEvent, StagedBlock, StateConfig, StateStore};
pub use utxo::{Utxo, UtxoKey};
