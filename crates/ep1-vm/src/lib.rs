pub mod gas;
pub mod host;
pub mod sandbox;

pub use gas::GasTank;
pub use host::{
    ContractEffects, ContractEvent, ExecutionContext, HostStatus, StateView,
};
pub use sandbox::{ContractReceipt, VmConfig, VmService};
