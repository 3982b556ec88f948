pub mod genesis;
pub mod store;

pub use genesis::{build_genesis, GenesisAllocation};
pub use store::ChainStore;
