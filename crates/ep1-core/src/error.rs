use thiserror::Error;

/// The closed error taxonomy of the node. Callers match on variants;
/// string forms are for logs only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Ep1Error {
    // ── Config / lifecycle ───────────────────────────────────────────────────
    #[error("consensus engine is already running")]
    EngineAlreadyRunning,

    #[error("consensus engine is not running")]
    EngineNotRunning,

    #[error("invalid engine configuration: {0}")]
    InvalidEngineConfig(String),

    #[error("no proposer key configured on this node")]
    ProposerNotConfigured,

    // ── Chain continuity ─────────────────────────────────────────────────────
    #[error("invalid block height: expected {expected}, got {got}")]
    InvalidHeight { expected: u64, got: u64 },

    #[error("invalid previous-block hash: {0}")]
    InvalidPrevHash(String),

    #[error("block already exists: {0}")]
    DuplicateBlock(String),

    #[error("expected genesis block (empty chain) but got height {0}")]
    GenesisExpected(u64),

    #[error("unexpected genesis block: chain already has a tip")]
    GenesisUnexpected,

    // ── Crypto ───────────────────────────────────────────────────────────────
    #[error("signature missing or invalid")]
    SignatureMissingOrInvalid,

    #[error("public key missing or invalid")]
    PublicKeyMissingOrInvalid,

    #[error("hash mismatch: computed {computed}, stored {stored}")]
    HashMismatch { computed: String, stored: String },

    #[error("unsupported curve or key encoding")]
    UnsupportedCurve,

    #[error("signer not in the authorized key set")]
    UnauthorizedSigner,

    #[error("duplicate signer public key in multisig")]
    DuplicateSigner,

    #[error("invalid multisig configuration: required {required} of {total}")]
    MultisigConfigInvalid { required: u32, total: u32 },

    #[error("not enough signers: need {need}, got {got}")]
    NotEnoughSigners { need: u32, got: u32 },

    // ── Time protocol ────────────────────────────────────────────────────────
    #[error("block timestamp too far in the future")]
    TimeTooFuture,

    #[error("block timestamp not strictly after parent")]
    TimeNotMonotonic,

    // ── State ────────────────────────────────────────────────────────────────
    #[error("referenced UTXO not found: {0}")]
    UtxoNotFound(String),

    #[error("UTXO already spent: {0}")]
    UtxoAlreadySpent(String),

    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u64, have: u64 },

    #[error("invalid transaction type for this operation")]
    InvalidTransactionType,

    #[error("state corruption: {0}")]
    StateCorruption(String),

    #[error("contract code already exists at {0}")]
    ContractCodeExists(String),

    #[error("no contract code at {0}")]
    ContractCodeMissing(String),

    // ── Mempool ──────────────────────────────────────────────────────────────
    #[error("transaction exists: {0}")]
    TransactionExists(String),

    #[error("mempool full (capacity {0})")]
    MempoolFull(usize),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("mempool unavailable")]
    MempoolUnavailable,

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("invalid proposal timestamp")]
    InvalidTimestamp,

    // ── VM ───────────────────────────────────────────────────────────────────
    #[error("wasm compile error: {0}")]
    WasmCompile(String),

    #[error("wasm instantiation error: {0}")]
    WasmInstantiate(String),

    #[error("wasm export missing: {0}")]
    WasmExportMissing(String),

    #[error("wasm execution error: {0}")]
    WasmExecution(String),

    #[error("out of gas")]
    OutOfGas,

    #[error("invalid memory access in host call")]
    InvalidMemoryAccess,

    #[error("guest buffer too small")]
    BufferTooSmall,

    #[error("caller public key not available")]
    PublicKeyNotAvailable,

    #[error("bad host-call argument")]
    BadArgument,

    #[error("host function execution failed: {0}")]
    HostFunctionExecution(String),

    // ── Serialization ────────────────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),
}
