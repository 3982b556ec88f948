//! Host-function surface exposed to guest contracts.
//!
//! Imports live under the `env` module; guest linear memory must be exported
//! as `memory`. Status-returning imports return the codes below directly;
//! length-returning imports return the true length on success and the
//! negated status on failure, so the numbering never shifts. Every call
//! charges a flat base fee, then a per-byte fee for the data it moves; every
//! pointer/length pair is bounds-checked before any state is touched.

use std::sync::Arc;

use ep1_core::constants::{GAS_HOST_CALL_BASE, GAS_HOST_CALL_PER_BYTE};
use ep1_core::error::Ep1Error;
use ep1_core::types::{Address, Amount, PublicKeyBytes, Timestamp};
use ep1_crypto::did::did_key_encode;
use tracing::{debug, warn};
use wasmtime::{AsContextMut, Caller, Linker, Memory};

use crate::gas::GasTank;

// ── Status codes (ABI-frozen) ────────────────────────────────────────────────

/// Closed status set shared with guests. Values are part of the ABI and
/// must never shift between releases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum HostStatus {
    Success = 0,
    Failure = 1,
    InvalidMemoryAccess = 3,
    BufferTooSmall = 4,
    OutOfGas = 5,
    PublicKeyNotAvailable = 6,
    BadArgument = 7,
}

impl HostStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Negated form used by length-returning imports.
    pub fn negated(self) -> i32 {
        -(self as i32)
    }
}

// ── Execution context & staged effects ───────────────────────────────────────

/// Read-only view of committed state handed to the sandbox by the state
/// store. Implementations overlay any earlier in-block changes themselves.
pub trait StateView: Send + Sync {
    fn contract_storage_get(&self, contract: &Address, key: &[u8]) -> Option<Vec<u8>>;
    fn balance_of(&self, address: &Address) -> Amount;
}

/// Per-call execution parameters.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub contract_address: Address,
    pub caller_public_key: PublicKeyBytes,
    pub block_timestamp: Timestamp,
    pub gas_limit: u64,
    /// Call argument bytes from the transaction. Reserved for future host
    /// exposure; not injected into guest memory.
    pub arguments: Vec<u8>,
}

/// An indexable event emitted by a guest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractEvent {
    pub topic: Vec<u8>,
    pub data: Vec<u8>,
}

/// Everything a guest changed, buffered until the call returns successfully.
#[derive(Clone, Debug, Default)]
pub struct ContractEffects {
    /// Storage writes in call order; `None` deletes the key.
    pub storage_writes: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    /// Funds sent from the contract's own balance.
    pub sends: Vec<(Address, Amount)>,
    pub events: Vec<ContractEvent>,
}

/// Store data bound to one sandbox instance.
pub struct HostEnv {
    pub view: Arc<dyn StateView>,
    pub ctx: ExecutionContext,
    pub gas: Arc<GasTank>,
    pub effects: ContractEffects,
    /// Set by the sandbox once the instance's memory export is resolved.
    pub memory: Option<Memory>,
}

impl HostEnv {
    /// Latest staged value for a key, if this execution wrote it.
    fn staged_storage_get(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        self.effects
            .storage_writes
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Balance as this execution sees it: committed view adjusted by the
    /// sends already staged here.
    fn effective_balance(&self, address: &Address) -> Amount {
        let mut balance = self.view.balance_of(address);
        for (to, amount) in &self.effects.sends {
            if *address == self.ctx.contract_address {
                balance = balance.saturating_sub(*amount);
            }
            if to == address {
                balance = balance.saturating_add(*amount);
            }
        }
        balance
    }
}

// ── Memory helpers ───────────────────────────────────────────────────────────

fn guest_read(
    caller: &mut Caller<'_, HostEnv>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, HostStatus> {
    if ptr < 0 || len < 0 {
        return Err(HostStatus::InvalidMemoryAccess);
    }
    let memory = caller.data().memory.ok_or(HostStatus::Failure)?;
    let data = memory.data(&caller);
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or(HostStatus::InvalidMemoryAccess)?;
    if end > data.len() {
        return Err(HostStatus::InvalidMemoryAccess);
    }
    Ok(data[start..end].to_vec())
}

/// Copy `bytes` into guest memory, truncating to the buffer. The caller
/// still reports the full length so guests detect truncation.
fn guest_write(
    caller: &mut Caller<'_, HostEnv>,
    ptr: i32,
    buf_len: i32,
    bytes: &[u8],
) -> Result<(), HostStatus> {
    if ptr < 0 || buf_len < 0 {
        return Err(HostStatus::InvalidMemoryAccess);
    }
    let memory = caller.data().memory.ok_or(HostStatus::Failure)?;
    let data = memory.data_mut(caller.as_context_mut());
    let start = ptr as usize;
    let end = start
        .checked_add(buf_len as usize)
        .ok_or(HostStatus::InvalidMemoryAccess)?;
    if end > data.len() {
        return Err(HostStatus::InvalidMemoryAccess);
    }
    let n = bytes.len().min(buf_len as usize);
    data[start..start + n].copy_from_slice(&bytes[..n]);
    Ok(())
}

/// Charge gas; out-of-gas halts the guest with a trap. The sandbox maps the
/// trap back to `OutOfGas` via the tank's exhaustion flag.
fn charge(gas: &GasTank, amount: u64) -> wasmtime::Result<()> {
    gas.consume(amount)
        .map_err(|_| wasmtime::Error::msg("gas limit exceeded in host call"))
}

fn byte_cost(len: usize) -> u64 {
    (len as u64).saturating_mul(GAS_HOST_CALL_PER_BYTE)
}

// ── Registration ─────────────────────────────────────────────────────────────

/// Link every `env` import the guest may use.
pub fn register(linker: &mut Linker<HostEnv>) -> Result<(), Ep1Error> {
    linker
        .func_wrap(
            "env",
            "host_log_message",
            |mut caller: Caller<'_, HostEnv>, ptr: i32, len: i32| -> wasmtime::Result<()> {
                charge(&caller.data().gas, GAS_HOST_CALL_BASE)?;
                let bytes = match guest_read(&mut caller, ptr, len) {
                    Ok(b) => b,
                    Err(status) => {
                        warn!(?status, "host_log_message rejected");
                        return Ok(());
                    }
                };
                charge(&caller.data().gas, byte_cost(bytes.len()))?;
                debug!(target: "contract", contract = %caller.data().ctx.contract_address, "{}", String::from_utf8_lossy(&bytes));
                Ok(())
            },
        )
        .map_err(|e| Ep1Error::HostFunctionExecution(e.to_string()))?;

    linker
        .func_wrap(
            "env",
            "blockchain_set_storage",
            |mut caller: Caller<'_, HostEnv>,
             key_ptr: i32,
             key_len: i32,
             val_ptr: i32,
             val_len: i32|
             -> wasmtime::Result<i32> {
                charge(&caller.data().gas, GAS_HOST_CALL_BASE)?;
                let key = match guest_read(&mut caller, key_ptr, key_len) {
                    Ok(k) => k,
                    Err(status) => return Ok(status.code()),
                };
                if key.is_empty() {
                    return Ok(HostStatus::BadArgument.code());
                }
                // A null/empty value pointer deletes the key.
                let value = if val_ptr == 0 || val_len == 0 {
                    None
                } else {
                    match guest_read(&mut caller, val_ptr, val_len) {
                        Ok(v) => Some(v),
                        Err(status) => return Ok(status.code()),
                    }
                };
                let moved = key.len() + value.as_ref().map_or(0, |v| v.len());
                charge(&caller.data().gas, byte_cost(moved))?;
                caller.data_mut().effects.storage_writes.push((key, value));
                Ok(HostStatus::Success.code())
            },
        )
        .map_err(|e| Ep1Error::HostFunctionExecution(e.to_string()))?;

    linker
        .func_wrap(
            "env",
            "blockchain_get_storage",
            |mut caller: Caller<'_, HostEnv>,
             key_ptr: i32,
             key_len: i32,
             buf_ptr: i32,
             buf_len: i32|
             -> wasmtime::Result<i32> {
                charge(&caller.data().gas, GAS_HOST_CALL_BASE)?;
                let key = match guest_read(&mut caller, key_ptr, key_len) {
                    Ok(k) => k,
                    Err(status) => return Ok(status.negated()),
                };
                let value = match caller.data().staged_storage_get(&key) {
                    Some(staged) => staged,
                    None => {
                        let env = caller.data();
                        env.view
                            .contract_storage_get(&env.ctx.contract_address, &key)
                    }
                };
                let Some(value) = value else {
                    charge(&caller.data().gas, byte_cost(key.len()))?;
                    return Ok(0);
                };
                charge(&caller.data().gas, byte_cost(key.len() + value.len()))?;
                if let Err(status) = guest_write(&mut caller, buf_ptr, buf_len, &value) {
                    return Ok(status.negated());
                }
                // True length even when the buffer was too small.
                Ok(value.len() as i32)
            },
        )
        .map_err(|e| Ep1Error::HostFunctionExecution(e.to_string()))?;

    linker
        .func_wrap(
            "env",
            "blockchain_get_balance",
            |mut caller: Caller<'_, HostEnv>, addr_ptr: i32, addr_len: i32| -> wasmtime::Result<i64> {
                charge(&caller.data().gas, GAS_HOST_CALL_BASE)?;
                let addr = match guest_read(&mut caller, addr_ptr, addr_len) {
                    Ok(a) => a,
                    Err(status) => return Ok(status.negated() as i64),
                };
                charge(&caller.data().gas, byte_cost(addr.len()))?;
                let balance = caller.data().effective_balance(&Address::from_bytes(addr));
                Ok(balance as i64)
            },
        )
        .map_err(|e| Ep1Error::HostFunctionExecution(e.to_string()))?;

    linker
        .func_wrap(
            "env",
            "blockchain_send_funds",
            |mut caller: Caller<'_, HostEnv>, to_ptr: i32, to_len: i32, amount: i64| -> wasmtime::Result<i32> {
                charge(&caller.data().gas, GAS_HOST_CALL_BASE)?;
                let to = match guest_read(&mut caller, to_ptr, to_len) {
                    Ok(t) => t,
                    Err(status) => return Ok(status.code()),
                };
                if amount <= 0 || to.is_empty() {
                    return Ok(HostStatus::BadArgument.code());
                }
                charge(&caller.data().gas, byte_cost(to.len()))?;
                let env = caller.data();
                let contract = env.ctx.contract_address.clone();
                if env.effective_balance(&contract) < amount as u64 {
                    return Ok(HostStatus::Failure.code());
                }
                caller
                    .data_mut()
                    .effects
                    .sends
                    .push((Address::from_bytes(to), amount as u64));
                Ok(HostStatus::Success.code())
            },
        )
        .map_err(|e| Ep1Error::HostFunctionExecution(e.to_string()))?;

    linker
        .func_wrap(
            "env",
            "blockchain_emit_event",
            |mut caller: Caller<'_, HostEnv>,
             topic_ptr: i32,
             topic_len: i32,
             data_ptr: i32,
             data_len: i32|
             -> wasmtime::Result<()> {
                charge(&caller.data().gas, GAS_HOST_CALL_BASE)?;
                let topic = match guest_read(&mut caller, topic_ptr, topic_len) {
                    Ok(t) => t,
                    Err(status) => {
                        warn!(?status, "blockchain_emit_event rejected");
                        return Ok(());
                    }
                };
                let data = match guest_read(&mut caller, data_ptr, data_len) {
                    Ok(d) => d,
                    Err(status) => {
                        warn!(?status, "blockchain_emit_event rejected");
                        return Ok(());
                    }
                };
                charge(&caller.data().gas, byte_cost(topic.len() + data.len()))?;
                caller
                    .data_mut()
                    .effects
                    .events
                    .push(ContractEvent { topic, data });
                Ok(())
            },
        )
        .map_err(|e| Ep1Error::HostFunctionExecution(e.to_string()))?;

    linker
        .func_wrap(
            "env",
            "blockchain_get_caller_public_key",
            |mut caller: Caller<'_, HostEnv>, buf_ptr: i32, buf_len: i32| -> wasmtime::Result<i32> {
                charge(&caller.data().gas, GAS_HOST_CALL_BASE)?;
                let key = caller.data().ctx.caller_public_key.as_bytes().to_vec();
                if key.is_empty() {
                    return Ok(HostStatus::PublicKeyNotAvailable.negated());
                }
                charge(&caller.data().gas, byte_cost(key.len()))?;
                if let Err(status) = guest_write(&mut caller, buf_ptr, buf_len, &key) {
                    return Ok(status.negated());
                }
                Ok(key.len() as i32)
            },
        )
        .map_err(|e| Ep1Error::HostFunctionExecution(e.to_string()))?;

    linker
        .func_wrap(
            "env",
            "blockchain_get_caller_address",
            |mut caller: Caller<'_, HostEnv>, buf_ptr: i32, buf_len: i32| -> wasmtime::Result<i32> {
                charge(&caller.data().gas, GAS_HOST_CALL_BASE)?;
                let key = caller.data().ctx.caller_public_key.clone();
                if key.is_empty() {
                    return Ok(HostStatus::PublicKeyNotAvailable.negated());
                }
                let hex_form = hex::encode(key.as_bytes());
                charge(&caller.data().gas, byte_cost(hex_form.len()))?;
                if let Err(status) = guest_write(&mut caller, buf_ptr, buf_len, hex_form.as_bytes())
                {
                    return Ok(status.negated());
                }
                Ok(hex_form.len() as i32)
            },
        )
        .map_err(|e| Ep1Error::HostFunctionExecution(e.to_string()))?;

    linker
        .func_wrap(
            "env",
            "blockchain_get_block_timestamp",
            |caller: Caller<'_, HostEnv>| -> wasmtime::Result<i64> {
                charge(&caller.data().gas, GAS_HOST_CALL_BASE)?;
                Ok(caller.data().ctx.block_timestamp)
            },
        )
        .map_err(|e| Ep1Error::HostFunctionExecution(e.to_string()))?;

    linker
        .func_wrap(
            "env",
            "blockchain_generate_did_key",
            |mut caller: Caller<'_, HostEnv>,
             pk_ptr: i32,
             pk_len: i32,
             buf_ptr: i32,
             buf_len: i32|
             -> wasmtime::Result<i32> {
                charge(&caller.data().gas, GAS_HOST_CALL_BASE)?;
                let pk = match guest_read(&mut caller, pk_ptr, pk_len) {
                    Ok(p) => p,
                    Err(status) => return Ok(status.negated()),
                };
                let did = match did_key_encode(&PublicKeyBytes::from_bytes(pk)) {
                    Ok(did) => did,
                    Err(_) => return Ok(HostStatus::BadArgument.negated()),
                };
                charge(&caller.data().gas, byte_cost(did.len()))?;
                if let Err(status) = guest_write(&mut caller, buf_ptr, buf_len, did.as_bytes()) {
                    return Ok(status.negated());
                }
                Ok(did.len() as i32)
            },
        )
        .map_err(|e| Ep1Error::HostFunctionExecution(e.to_string()))?;

    Ok(())
}
