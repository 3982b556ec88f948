pub mod engine;
pub mod proposer;
pub mod registry;
pub mod slashing;
pub mod validation;

pub use engine::{ConsensusEngine, EngineConfig, EngineServices};
pub use proposer::ProposerService;
pub use registry::{Validator, ValidatorRegistry};
pub use slashing::{SlashingEvidence, SlashingLog};
pub use validation::ValidationService;
