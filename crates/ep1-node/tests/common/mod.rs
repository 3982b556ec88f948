//! Shared fixture: a full node stack wired to an in-process hub.

use std::sync::Arc;
use std::time::Duration;

use ep1_chain::genesis::{build_genesis, GenesisAllocation};
use ep1_chain::store::ChainStore;
use ep1_consensus::engine::{ConsensusEngine, EngineConfig, EngineServices};
use ep1_consensus::proposer::ProposerService;
use ep1_consensus::registry::{Validator, ValidatorRegistry};
use ep1_consensus::slashing::SlashingLog;
use ep1_consensus::validation::ValidationService;
use ep1_core::block::Block;
use ep1_crypto::keypair::KeyPair;
use ep1_mempool::pool::Mempool;
use ep1_network::adapter::InProcessHub;
use ep1_state::store::StateStore;
use ep1_vm::sandbox::{VmConfig, VmService};

pub struct TestNode {
    pub chain: Arc<ChainStore>,
    pub state: Arc<StateStore>,
    pub mempool: Arc<Mempool>,
    pub slashing: Arc<SlashingLog>,
    pub engine: ConsensusEngine,
}

/// Build a node on the hub. `validators` is the full set this node trusts;
/// the node proposes only when its own key is scheduled.
pub fn node_on_hub(hub: &InProcessHub, keypair: Arc<KeyPair>, validators: &[Validator]) -> TestNode {
    let (broadcaster, inbound) = hub.join();

    let chain = Arc::new(ChainStore::new());
    let state = Arc::new(StateStore::new());
    let mempool = Arc::new(Mempool::new(1_024));
    let registry = Arc::new(ValidatorRegistry::new());
    for validator in validators {
        registry.add(validator.clone());
    }
    let slashing = Arc::new(SlashingLog::new());
    let validation = Arc::new(ValidationService::new(
        Arc::clone(&chain),
        Arc::clone(&registry),
        Arc::clone(&slashing),
    ));
    let proposer = Arc::new(ProposerService::new(
        Some(Arc::clone(&keypair)),
        Arc::clone(&mempool),
    ));
    let vm = Arc::new(VmService::new(VmConfig::default()).unwrap());

    let engine = ConsensusEngine::new(
        EngineConfig {
            tick_interval: Duration::from_millis(20),
        },
        EngineServices {
            chain: Arc::clone(&chain),
            state: Arc::clone(&state),
            mempool: Arc::clone(&mempool),
            registry,
            validation,
            proposer,
            vm,
            broadcaster,
            inbound,
        },
    )
    .unwrap();

    TestNode {
        chain,
        state,
        mempool,
        slashing,
        engine,
    }
}

pub fn now_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// A genesis block for the given allocations, stamped with the real clock.
pub fn genesis_for(keypair: &KeyPair, allocations: &[GenesisAllocation]) -> Block {
    build_genesis(keypair, allocations, now_ns())
}
