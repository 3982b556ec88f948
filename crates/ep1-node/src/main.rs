//! ep1-node — the EP1 full-node binary.
//!
//! Startup sequence:
//!   1. Load (or generate) the validator keypair
//!   2. Build the in-memory stores and consensus services
//!   3. Bootstrap genesis if the chain is empty
//!   4. Start the consensus engine (proposer + intake loops)
//!   5. Wait for ctrl-c, then drain both loops

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

use ep1_chain::genesis::{build_genesis, GenesisAllocation};
use ep1_chain::store::ChainStore;
use ep1_consensus::engine::{ConsensusEngine, EngineConfig, EngineServices};
use ep1_consensus::proposer::ProposerService;
use ep1_consensus::registry::{Validator, ValidatorRegistry};
use ep1_consensus::slashing::SlashingLog;
use ep1_consensus::validation::ValidationService;
use ep1_core::constants::{DEFAULT_MEMPOOL_CAPACITY, PROPOSER_TICK_MILLIS};
use ep1_core::types::PublicKeyBytes;
use ep1_crypto::address::{address_from_pubkey, decode_address};
use ep1_crypto::keypair::KeyPair;
use ep1_mempool::pool::Mempool;
use ep1_network::adapter::InProcessHub;
use ep1_state::store::StateStore;
use ep1_vm::sandbox::{VmConfig, VmService};

#[derive(Parser, Debug)]
#[command(
    name = "ep1-node",
    version,
    about = "EP1 full node — Proof-of-Stake chain with WASM contracts"
)]
struct Args {
    /// Hex-encoded 32-byte validator secret key. Omit for an ephemeral key.
    #[arg(long)]
    secret_key: Option<String>,

    /// Path to the validator-set JSON (array of {publicKey, stake}).
    #[arg(long)]
    validators: Option<PathBuf>,

    /// Path to the genesis-allocation JSON (array of {recipient, amount}).
    #[arg(long)]
    genesis_allocations: Option<PathBuf>,

    /// Proposer tick interval in milliseconds.
    #[arg(long, default_value_t = PROPOSER_TICK_MILLIS)]
    tick_ms: u64,

    /// Mempool admission capacity.
    #[arg(long, default_value_t = DEFAULT_MEMPOOL_CAPACITY)]
    mempool_capacity: usize,
}

#[derive(Debug, Deserialize)]
struct ValidatorSpec {
    #[serde(rename = "publicKey")]
    public_key: String,
    stake: u64,
}

#[derive(Debug, Deserialize)]
struct AllocationSpec {
    recipient: String,
    amount: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ep1=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("EP1 node starting");

    // ── Validator identity ────────────────────────────────────────────────────
    let keypair = Arc::new(load_or_generate_keypair(args.secret_key.as_deref())?);
    let own_address = address_from_pubkey(&keypair.public_key);
    info!(address = %own_address, "validator identity");

    // ── Stores & services ─────────────────────────────────────────────────────
    let chain = Arc::new(ChainStore::new());
    let state = Arc::new(StateStore::new());
    let mempool = Arc::new(Mempool::new(args.mempool_capacity));
    let registry = Arc::new(ValidatorRegistry::new());
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
    let vm = Arc::new(VmService::new(VmConfig::default()).context("building WASM runtime")?);

    for validator in load_validators(args.validators.as_deref(), &keypair)? {
        info!(stake = validator.stake, key = %validator.public_key.to_hex(), "registered validator");
        registry.add(validator);
    }

    // ── Network adapter ───────────────────────────────────────────────────────
    // The wire transport is pluggable; a single-process node runs against the
    // in-process hub and simply has no peers to fan out to.
    let hub = InProcessHub::new();
    let (broadcaster, inbound) = hub.join();

    let engine = ConsensusEngine::new(
        EngineConfig {
            tick_interval: Duration::from_millis(args.tick_ms),
        },
        EngineServices {
            chain: Arc::clone(&chain),
            state: Arc::clone(&state),
            mempool: Arc::clone(&mempool),
            registry: Arc::clone(&registry),
            validation,
            proposer,
            vm: Arc::clone(&vm),
            broadcaster,
            inbound,
        },
    )
    .context("building consensus engine")?;

    // ── Genesis if fresh ──────────────────────────────────────────────────────
    if chain.is_empty() {
        info!("empty chain — bootstrapping genesis");
        let allocations =
            load_allocations(args.genesis_allocations.as_deref(), &own_address)?;
        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let genesis = build_genesis(&keypair, &allocations, now);
        engine
            .import_block(&genesis)
            .context("importing genesis block")?;
    }

    // ── Run ───────────────────────────────────────────────────────────────────
    engine.start().map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(height = chain.height(), "node ready");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    engine.stop().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(())
}

/// Load the secret key from hex, or generate an ephemeral keypair.
fn load_or_generate_keypair(secret_hex: Option<&str>) -> anyhow::Result<KeyPair> {
    if let Some(hex_str) = secret_hex {
        let bytes = hex::decode(hex_str).context("decoding --secret-key hex")?;
        return KeyPair::from_secret_bytes(&bytes)
            .map_err(|e| anyhow::anyhow!("loading secret key: {e}"));
    }
    warn!("No --secret-key provided. Generating an ephemeral key — DO NOT USE IN PRODUCTION.");
    Ok(KeyPair::generate())
}

/// Load the validator set, defaulting to this node alone with stake 1.
fn load_validators(
    path: Option<&std::path::Path>,
    own: &KeyPair,
) -> anyhow::Result<Vec<Validator>> {
    let Some(path) = path else {
        warn!("No --validators provided — running as a single-validator chain.");
        return Ok(vec![Validator::new(own.public_key.clone(), 1)]);
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading validator set from {}", path.display()))?;
    let specs: Vec<ValidatorSpec> =
        serde_json::from_str(&json).context("parsing validator set JSON")?;
    specs
        .into_iter()
        .map(|spec| {
            let key = hex::decode(&spec.public_key)
                .with_context(|| format!("validator key hex: {}", spec.public_key))?;
            Ok(Validator::new(PublicKeyBytes::from_bytes(key), spec.stake))
        })
        .collect()
}

/// Load genesis allocations, defaulting to a single grant to this node.
fn load_allocations(
    path: Option<&std::path::Path>,
    own_address: &ep1_core::types::Address,
) -> anyhow::Result<Vec<GenesisAllocation>> {
    let Some(path) = path else {
        return Ok(vec![GenesisAllocation {
            recipient: own_address.clone(),
            amount: 1_000_000,
        }]);
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading genesis allocations from {}", path.display()))?;
    let specs: Vec<AllocationSpec> =
        serde_json::from_str(&json).context("parsing genesis allocation JSON")?;
    specs
        .into_iter()
        .map(|spec| {
            let recipient = decode_address(&spec.recipient)
                .map_err(|e| anyhow::anyhow!("allocation recipient {}: {e}", spec.recipient))?;
            Ok(GenesisAllocation {
                recipient,
                amount: spec.amount,
            })
        })
        .collect()
}
