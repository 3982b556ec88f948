//! ─── EP1 Protocol Constants ─────────────────────────────────────────────────
//!
//! Consensus-critical values live here so every crate reads the same ones.
//! Changing any constant in the "Canonical encoding" section is a hard fork.

// ── Canonical encoding ───────────────────────────────────────────────────────

/// Human-readable address prefix.
pub const ADDRESS_PREFIX: &str = "ep1_";

/// Version byte prepended to the RIPEMD160 payload of an address.
pub const ADDRESS_VERSION_BYTE: u8 = 0x00;

/// Number of checksum bytes appended to an encoded address.
pub const ADDRESS_CHECKSUM_LEN: usize = 4;

/// Multicodec code for an uncompressed P-256 public key (did:key header).
pub const DID_KEY_MULTICODEC: u64 = 0x1201;

// ── Time protocol (nanoseconds) ──────────────────────────────────────────────

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Incoming blocks stamped further than this into the future are rejected.
pub const MAX_FUTURE_DRIFT_NANOS: i64 = 10 * NANOS_PER_SEC;

/// Proposals stamped further than this into the future fail locally.
pub const PROPOSAL_MAX_DRIFT_NANOS: i64 = 5 * NANOS_PER_SEC;

/// Blocks older than this log a staleness warning (never a rejection).
pub const STALE_BLOCK_WARN_NANOS: i64 = 5 * 60 * NANOS_PER_SEC;

// ── Consensus ────────────────────────────────────────────────────────────────

/// Proposer loop tick interval.
pub const PROPOSER_TICK_MILLIS: u64 = 1_000;

/// Maximum transactions pulled from the mempool per candidate block.
pub const MAX_BLOCK_TXS: usize = 100;

// ── Mempool ──────────────────────────────────────────────────────────────────

/// Default admission capacity. V1 does no eviction once full.
pub const DEFAULT_MEMPOOL_CAPACITY: usize = 10_000;

// ── Contract execution ───────────────────────────────────────────────────────

/// Default per-call gas limit.
pub const DEFAULT_GAS_LIMIT: u64 = 5_000_000;

/// Flat charge taken before the first guest instruction executes.
pub const GAS_INSTANTIATION_BASE: u64 = 10_000;

/// Flat charge per host-function invocation.
pub const GAS_HOST_CALL_BASE: u64 = 100;

/// Charge per byte a host function reads from or writes to guest memory.
pub const GAS_HOST_CALL_PER_BYTE: u64 = 1;

// ── Network adapter ──────────────────────────────────────────────────────────

/// Bound of the per-node inbound message channel; sends beyond it drop.
pub const NETWORK_CHANNEL_CAPACITY: usize = 256;
