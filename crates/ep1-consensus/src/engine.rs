//! The consensus engine: proposer loop + intake loop + lifecycle.
//!
//! Both loops are tokio tasks sharing a watch-channel shutdown signal. The
//! proposer loop ticks, checks the schedule, and — when this node owns the
//! slot — builds a block, imports it through the local pipeline, and
//! broadcasts it. The intake loop drives peer blocks and transactions
//! through the same pipeline. Single-unit failures log and the loops
//! continue; only lifecycle misuse is an error to the caller.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ep1_chain::store::ChainStore;
use ep1_core::block::Block;
use ep1_core::constants::PROPOSER_TICK_MILLIS;
use ep1_core::error::Ep1Error;
use ep1_core::types::{PublicKeyBytes, Timestamp};
use ep1_mempool::pool::Mempool;
use ep1_network::adapter::{Broadcaster, NetworkReceiver};
use ep1_network::message::NetworkMessage;
use ep1_state::store::StateStore;
use ep1_vm::sandbox::VmService;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::proposer::ProposerService;
use crate::registry::ValidatorRegistry;
use crate::validation::ValidationService;

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(PROPOSER_TICK_MILLIS),
        }
    }
}

/// Everything the engine drives, injected at construction. Services never
/// reference the engine back; the dependency graph stays a DAG.
pub struct EngineServices {
    pub chain: Arc<ChainStore>,
    pub state: Arc<StateStore>,
    pub mempool: Arc<Mempool>,
    pub registry: Arc<ValidatorRegistry>,
    pub validation: Arc<ValidationService>,
    pub proposer: Arc<ProposerService>,
    pub vm: Arc<VmService>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub inbound: NetworkReceiver,
}

// ── Engine ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    New,
    Running,
    Stopped,
}

struct EngineShared {
    chain: Arc<ChainStore>,
    state: Arc<StateStore>,
    mempool: Arc<Mempool>,
    registry: Arc<ValidatorRegistry>,
    validation: Arc<ValidationService>,
    proposer: Arc<ProposerService>,
    vm: Arc<VmService>,
    broadcaster: Arc<dyn Broadcaster>,
    local_key: Option<PublicKeyBytes>,
    consensus_height: AtomicI64,
}

/// Lifecycle: New → Running → Stopped, terminal. `start` and `stop` are
/// both once-latched.
pub struct ConsensusEngine {
    config: EngineConfig,
    shared: Arc<EngineShared>,
    inbound: Mutex<Option<NetworkReceiver>>,
    phase: Mutex<Phase>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsensusEngine {
    pub fn new(config: EngineConfig, services: EngineServices) -> Result<Self, Ep1Error> {
        if config.tick_interval.is_zero() {
            return Err(Ep1Error::InvalidEngineConfig(
                "tick interval must be positive".into(),
            ));
        }
        let (shutdown, _) = watch::channel(false);
        let local_key = services.proposer.public_key();
        Ok(Self {
            config,
            shared: Arc::new(EngineShared {
                chain: services.chain,
                state: services.state,
                mempool: services.mempool,
                registry: services.registry,
                validation: services.validation,
                proposer: services.proposer,
                vm: services.vm,
                broadcaster: services.broadcaster,
                local_key,
                consensus_height: AtomicI64::new(-1),
            }),
            inbound: Mutex::new(Some(services.inbound)),
            phase: Mutex::new(Phase::New),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn both loops. Fails with `EngineAlreadyRunning` on any second
    /// call, stopped engines included — there is no restart.
    pub fn start(&self) -> Result<(), Ep1Error> {
        let mut phase = self.phase.lock().expect("engine lock poisoned");
        if *phase != Phase::New {
            return Err(Ep1Error::EngineAlreadyRunning);
        }
        let inbound = self
            .inbound
            .lock()
            .expect("engine lock poisoned")
            .take()
            .ok_or(Ep1Error::EngineAlreadyRunning)?;
        *phase = Phase::Running;

        let mut tasks = self.tasks.lock().expect("engine lock poisoned");
        tasks.push(tokio::spawn(proposer_loop(
            Arc::clone(&self.shared),
            self.config.tick_interval,
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(intake_loop(
            Arc::clone(&self.shared),
            inbound,
            self.shutdown.subscribe(),
        )));
        info!("consensus engine started");
        Ok(())
    }

    /// Signal cancellation and wait for both loops to drain.
    pub async fn stop(&self) -> Result<(), Ep1Error> {
        {
            let mut phase = self.phase.lock().expect("engine lock poisoned");
            if *phase != Phase::Running {
                return Err(Ep1Error::EngineNotRunning);
            }
            *phase = Phase::Stopped;
        }
        let _ = self.shutdown.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("engine lock poisoned"));
        for task in tasks {
            let _ = task.await;
        }
        info!("consensus engine stopped");
        Ok(())
    }

    /// Height of the last block this engine imported; -1 before any.
    pub fn consensus_height(&self) -> i64 {
        self.shared.consensus_height.load(Ordering::SeqCst)
    }

    /// Run one block through validate → prepare → append → commit, then
    /// clear its transactions from the mempool. Used for both local
    /// proposals and peer blocks.
    pub fn import_block(&self, block: &Block) -> Result<(), Ep1Error> {
        self.shared.import_block(block, now_nanos())
    }
}

impl EngineShared {
    fn import_block(&self, block: &Block, now: Timestamp) -> Result<(), Ep1Error> {
        self.validation.validate_block(block, now)?;
        let staged = self.state.prepare(block, &self.vm)?;
        self.chain.append(block.clone())?;
        self.state.commit(staged)?;
        self.mempool.remove(&block.tx_ids());
        self.consensus_height
            .store(block.height as i64, Ordering::SeqCst);
        Ok(())
    }

    /// One proposer tick: propose iff the chain is non-empty and the
    /// schedule assigns the next height to this node's key.
    fn propose_once(&self, now: Timestamp) -> Result<bool, Ep1Error> {
        let Some(local_key) = &self.local_key else {
            return Ok(false);
        };
        let Some(tip) = self.chain.last_block() else {
            return Ok(false);
        };
        let next_height = tip.height + 1;
        let expected = self.registry.proposer_for_height(next_height)?;
        if expected.public_key != *local_key {
            return Ok(false);
        }

        let block = self
            .proposer
            .build_block(next_height, tip.hash, tip.timestamp, now)?;
        self.import_block(&block, now)?;
        self.broadcaster.broadcast_block(&block);
        info!(height = block.height, hash = %block.hash, txs = block.transactions.len(), "proposed block");
        Ok(true)
    }
}

// ── Loops ────────────────────────────────────────────────────────────────────

async fn proposer_loop(
    shared: Arc<EngineShared>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(tick);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                // A missed slot must never kill the loop.
                if let Err(e) = shared.propose_once(now_nanos()) {
                    warn!(error = %e, "proposal attempt failed");
                }
            }
        }
    }
    info!("proposer loop drained");
}

async fn intake_loop(
    shared: Arc<EngineShared>,
    mut inbound: NetworkReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = inbound.recv() => {
                match message {
                    None => break,
                    Some(NetworkMessage::Block(block)) => {
                        match shared.import_block(&block, now_nanos()) {
                            Ok(()) => info!(height = block.height, "imported peer block"),
                            Err(e) => {
                                warn!(error = %e, height = block.height, "rejected peer block");
                            }
                        }
                    }
                    Some(NetworkMessage::Transaction(tx)) => {
                        if let Err(e) = shared.mempool.admit(tx) {
                            warn!(error = %e, "rejected peer transaction");
                        }
                    }
                }
            }
        }
    }
    info!("intake loop drained");
}

fn now_nanos() -> Timestamp {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Validator;
    use crate::slashing::SlashingLog;
    use ep1_core::constants::DEFAULT_MEMPOOL_CAPACITY;
    use ep1_crypto::keypair::KeyPair;
    use ep1_network::adapter::InProcessHub;
    use ep1_vm::sandbox::VmConfig;

    fn engine_fixture(keypair: Option<Arc<KeyPair>>) -> (ConsensusEngine, InProcessHub) {
        let hub = InProcessHub::new();
        let (broadcaster, inbound) = hub.join();

        let chain = Arc::new(ChainStore::new());
        let state = Arc::new(StateStore::new());
        let mempool = Arc::new(Mempool::new(DEFAULT_MEMPOOL_CAPACITY));
        let registry = Arc::new(ValidatorRegistry::new());
        if let Some(kp) = &keypair {
            registry.add(Validator::new(kp.public_key.clone(), 10));
        }
        let slashing = Arc::new(SlashingLog::new());
        let validation = Arc::new(ValidationService::new(
            Arc::clone(&chain),
            Arc::clone(&registry),
            slashing,
        ));
        let proposer = Arc::new(ProposerService::new(keypair, Arc::clone(&mempool)));
        let vm = Arc::new(VmService::new(VmConfig::default()).unwrap());

        let engine = ConsensusEngine::new(
            EngineConfig {
                tick_interval: Duration::from_millis(20),
            },
            EngineServices {
                chain,
                state,
                mempool,
                registry,
                validation,
                proposer,
                vm,
                broadcaster,
                inbound,
            },
        )
        .unwrap();
        (engine, hub)
    }

    #[tokio::test]
    async fn start_is_once_latched() {
        let (engine, _hub) = engine_fixture(None);
        engine.start().unwrap();
        assert_eq!(engine.start(), Err(Ep1Error::EngineAlreadyRunning));
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_before_start_is_an_error() {
        let (engine, _hub) = engine_fixture(None);
        assert_eq!(engine.stop().await, Err(Ep1Error::EngineNotRunning));
    }

    #[tokio::test]
    async fn lifecycle_is_terminal() {
        let (engine, _hub) = engine_fixture(None);
        engine.start().unwrap();
        engine.stop().await.unwrap();
        assert_eq!(engine.stop().await, Err(Ep1Error::EngineNotRunning));
        assert_eq!(engine.start(), Err(Ep1Error::EngineAlreadyRunning));
    }

    #[tokio::test]
    async fn zero_tick_interval_is_invalid_config() {
        let hub = InProcessHub::new();
        let (broadcaster, inbound) = hub.join();
        let chain = Arc::new(ChainStore::new());
        let state = Arc::new(StateStore::new());
        let mempool = Arc::new(Mempool::new(8));
        let registry = Arc::new(ValidatorRegistry::new());
        let validation = Arc::new(ValidationService::new(
            Arc::clone(&chain),
            Arc::clone(&registry),
            Arc::new(SlashingLog::new()),
        ));
        let proposer = Arc::new(ProposerService::new(None, Arc::clone(&mempool)));
        let vm = Arc::new(VmService::new(VmConfig::default()).unwrap());
        let result = ConsensusEngine::new(
            EngineConfig {
                tick_interval: Duration::ZERO,
            },
            EngineServices {
                chain,
                state,
                mempool,
                registry,
                validation,
                proposer,
                vm,
                broadcaster,
                inbound,
            },
        );
        assert!(matches!(result, Err(Ep1Error::InvalidEngineConfig(_))));
    }

    #[tokio::test]
    async fn empty_chain_ticks_do_not_propose() {
        let kp = Arc::new(KeyPair::generate());
        let (engine, hub) = engine_fixture(Some(kp));
        let (_observer_tx, mut observer_rx) = hub.join();

        engine.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.stop().await.unwrap();

        assert!(observer_rx.try_recv().is_none());
        assert_eq!(engine.consensus_height(), -1);
    }
}
