//! The state machine: UTXO set, account registry, contract code and storage.
//!
//! Block application is split into `prepare` (build a staged delta, spend
//! checks and contract execution included, without mutating anything) and
//! `commit` (apply the delta under the write lock). The consensus engine
//! sequences prepare → chain append → commit, so a failed prepare leaves
//! both the chain and the state at the prior tip.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use ep1_core::block::Block;
use ep1_core::constants::DEFAULT_GAS_LIMIT;
use ep1_core::error::Ep1Error;
use ep1_core::transaction::{Transaction, TxType};
use ep1_core::types::{Address, Amount, PublicKeyBytes, TxId, PUBLIC_KEY_LEN};
use ep1_crypto::address::{address_from_pubkey, contract_address};
use ep1_vm::host::{ContractEvent, ExecutionContext, StateView};
use ep1_vm::sandbox::VmService;
use tracing::{info, warn};

use crate::account::{Account, WealthCategory};
use crate::utxo::{Utxo, UtxoKey};

// ── Store ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
pub struct StateConfig {
    /// Gas limit handed to every contract call.
    pub gas_limit: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
        }
    }
}

/// One event a committed contract call emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedEvent {
    pub height: u64,
    pub tx_id: TxId,
    pub event: ContractEvent,
}

#[derive(Default)]
struct StateInner {
    utxos: BTreeMap<UtxoKey, Utxo>,
    accounts: HashMap<Address, Account>,
    contract_code: HashMap<Address, Vec<u8>>,
    contract_storage: HashMap<Address, BTreeMap<Vec<u8>, Vec<u8>>>,
    events: Vec<CommittedEvent>,
}

/// Handle to the shared state machine. Cloning shares the underlying store.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<RwLock<StateInner>>,
    config: StateConfig,
}

// ── Staged delta ─────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Delta {
    spent: Vec<UtxoKey>,
    created: Vec<(UtxoKey, Utxo)>,
    deployed: Vec<(Address, Vec<u8>)>,
    /// Ordered storage writes per contract; `None` deletes.
    storage: HashMap<Address, Vec<(Vec<u8>, Option<Vec<u8>>)>>,
    /// One entry per outgoing transaction, for nonce bumps.
    senders: Vec<Address>,
    events: Vec<(TxId, ContractEvent)>,
    failed_calls: Vec<(TxId, Ep1Error)>,
}

impl Delta {
    fn is_spent(&self, key: &UtxoKey) -> bool {
        self.spent.contains(key)
    }

    fn mark_spent(&mut self, key: UtxoKey) -> Result<(), Ep1Error> {
        if self.is_spent(&key) {
            return Err(Ep1Error::UtxoAlreadySpent(key.to_string()));
        }
        self.spent.push(key);
        Ok(())
    }
}

/// The outcome of `prepare`: everything a block will change, not yet applied.
pub struct StagedBlock {
    height: u64,
    tx_ids: Vec<TxId>,
    delta: Delta,
}

impl StagedBlock {
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn tx_ids(&self) -> &[TxId] {
        &self.tx_ids
    }

    pub fn failed_calls(&self) -> &[(TxId, Ep1Error)] {
        &self.delta.failed_calls
    }
}

// ── VM state view ────────────────────────────────────────────────────────────

/// Committed state plus the in-flight block delta, as one contract call
/// sees it. Fully owned so the sandbox can hold it across execution.
struct OverlayView {
    inner: Arc<RwLock<StateInner>>,
    delta: Delta,
}

impl StateView for OverlayView {
    fn contract_storage_get(&self, contract: &Address, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(writes) = self.delta.storage.get(contract) {
            if let Some((_, value)) = writes.iter().rev().find(|(k, _)| k == key) {
                return value.clone();
            }
        }
        let inner = self.inner.read().expect("state lock poisoned");
        inner
            .contract_storage
            .get(contract)
            .and_then(|map| map.get(key).cloned())
    }

    fn balance_of(&self, address: &Address) -> Amount {
        let inner = self.inner.read().expect("state lock poisoned");
        let committed: Amount = inner
            .utxos
            .iter()
            .filter(|(key, utxo)| utxo.recipient == *address && !self.delta.is_spent(key))
            .map(|(_, utxo)| utxo.value)
            .sum();
        let staged: Amount = self
            .delta
            .created
            .iter()
            .filter(|(key, utxo)| utxo.recipient == *address && !self.delta.is_spent(key))
            .map(|(_, utxo)| utxo.value)
            .sum();
        committed + staged
    }
}

// ── Implementation ───────────────────────────────────────────────────────────

impl StateStore {
    pub fn new() -> Self {
        Self::with_config(StateConfig::default())
    }

    pub fn with_config(config: StateConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StateInner::default())),
            config,
        }
    }

    /// Stage a block: validate every spend and run every contract call
    /// without mutating the store.
    pub fn prepare(&self, block: &Block, vm: &VmService) -> Result<StagedBlock, Ep1Error> {
        let mut delta = Delta::default();
        for tx in &block.transactions {
            let checkpoint = delta.clone();
            match self.stage_transaction(&mut delta, tx, block, vm) {
                Ok(()) => {}
                Err(err) if tx.tx_type == TxType::ContractCall && is_vm_error(&err) => {
                    // Contained: the call failed, the block still applies.
                    warn!(tx = %tx.id, error = %err, "contract call failed; fee charged, effects dropped");
                    delta = checkpoint;
                    self.stage_fee_only(&mut delta, tx)?;
                    delta.failed_calls.push((tx.id, err));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(StagedBlock {
            height: block.height,
            tx_ids: block.tx_ids(),
            delta,
        })
    }

    /// Apply a staged delta. Infallible in normal operation; any failure
    /// here indicates state corruption and leaves the block unapplied.
    pub fn commit(&self, staged: StagedBlock) -> Result<(), Ep1Error> {
        let mut inner = self.inner.write().expect("state lock poisoned");
        let delta = staged.delta;

        let mut touched: BTreeSet<Address> = BTreeSet::new();
        for key in &delta.spent {
            if let Some(utxo) = inner.utxos.get(key) {
                touched.insert(utxo.recipient.clone());
            }
        }
        for (_, utxo) in &delta.created {
            touched.insert(utxo.recipient.clone());
        }

        // Created before spent so intra-block chains resolve.
        for (key, utxo) in delta.created {
            if inner.utxos.insert(key, utxo).is_some() {
                return Err(Ep1Error::StateCorruption(format!(
                    "duplicate output key {key}"
                )));
            }
        }
        for key in &delta.spent {
            if inner.utxos.remove(key).is_none() {
                return Err(Ep1Error::StateCorruption(format!("missing input {key}")));
            }
        }

        for (address, code) in delta.deployed {
            if inner.contract_code.insert(address.clone(), code).is_some() {
                return Err(Ep1Error::StateCorruption(format!(
                    "contract code overwritten at {address}"
                )));
            }
        }
        for (address, writes) in delta.storage {
            let map = inner.contract_storage.entry(address).or_default();
            for (key, value) in writes {
                match value {
                    Some(v) => {
                        map.insert(key, v);
                    }
                    None => {
                        map.remove(&key);
                    }
                }
            }
        }

        for sender in &delta.senders {
            touched.insert(sender.clone());
            inner
                .accounts
                .entry(sender.clone())
                .or_insert_with(|| Account::new(sender.clone()))
                .nonce += 1;
        }
        for address in touched {
            let balance: Amount = inner
                .utxos
                .values()
                .filter(|utxo| utxo.recipient == address)
                .map(|utxo| utxo.value)
                .sum();
            let account = inner
                .accounts
                .entry(address.clone())
                .or_insert_with(|| Account::new(address.clone()));
            account.balance = balance;
            account.wealth_category = Some(WealthCategory::from_balance(balance));
        }

        for (tx_id, event) in delta.events {
            info!(target: "events", tx = %tx_id, topic = %String::from_utf8_lossy(&event.topic), "contract event");
            inner.events.push(CommittedEvent {
                height: staged.height,
                tx_id,
                event,
            });
        }
        info!(
            height = staged.height,
            txs = staged.tx_ids.len(),
            failed_calls = delta.failed_calls.len(),
            "state applied"
        );
        Ok(())
    }

    /// Prepare and commit in one step.
    pub fn apply_block(&self, block: &Block, vm: &VmService) -> Result<(), Ep1Error> {
        let staged = self.prepare(block, vm)?;
        self.commit(staged)
    }

    // ── Per-type staging ─────────────────────────────────────────────────────

    fn stage_transaction(
        &self,
        delta: &mut Delta,
        tx: &Transaction,
        block: &Block,
        vm: &VmService,
    ) -> Result<(), Ep1Error> {
        match tx.tx_type {
            TxType::Standard | TxType::Tax => self.stage_transfer(delta, tx),
            TxType::Stimulus => self.stage_stimulus(delta, tx),
            TxType::ContractDeploy => self.stage_deploy(delta, tx),
            TxType::ContractCall => self.stage_call(delta, tx, block, vm),
        }
    }

    fn stage_transfer(&self, delta: &mut Delta, tx: &Transaction) -> Result<(), Ep1Error> {
        let amount = tx
            .amount
            .ok_or_else(|| Ep1Error::InvalidTransaction("transfer requires an amount".into()))?;
        if amount == 0 {
            return Err(Ep1Error::InvalidTransaction(
                "output values must be positive".into(),
            ));
        }
        let to = tx
            .to
            .clone()
            .ok_or_else(|| Ep1Error::InvalidTransaction("transfer requires a recipient".into()))?;
        let sender = sender_address(tx)?;
        let need = amount
            .checked_add(tx.fee)
            .ok_or_else(|| Ep1Error::InvalidTransaction("value overflow".into()))?;

        let inputs = self.select_inputs(delta, &sender, need)?;
        let total: Amount = inputs.iter().map(|(_, utxo)| utxo.value).sum();
        for (key, _) in inputs {
            delta.mark_spent(key)?;
        }

        self.stage_output(
            delta,
            UtxoKey::new(tx.id, 0),
            Utxo {
                value: amount,
                recipient: to,
            },
        )?;
        let change = total - need;
        if change > 0 {
            self.stage_output(
                delta,
                UtxoKey::new(tx.id, 1),
                Utxo {
                    value: change,
                    recipient: sender.clone(),
                },
            )?;
        }
        delta.senders.push(sender);
        Ok(())
    }

    fn stage_stimulus(&self, delta: &mut Delta, tx: &Transaction) -> Result<(), Ep1Error> {
        let amount = tx
            .amount
            .ok_or_else(|| Ep1Error::InvalidTransaction("stimulus requires an amount".into()))?;
        if amount == 0 {
            return Err(Ep1Error::InvalidTransaction(
                "output values must be positive".into(),
            ));
        }
        if tx.fee != 0 {
            // Stimulus has no inputs, so there is nothing to pay a fee from.
            return Err(Ep1Error::InvalidTransaction(
                "stimulus cannot carry a fee".into(),
            ));
        }
        let to = tx
            .to
            .clone()
            .ok_or_else(|| Ep1Error::InvalidTransaction("stimulus requires a recipient".into()))?;
        self.stage_output(
            delta,
            UtxoKey::new(tx.id, 0),
            Utxo {
                value: amount,
                recipient: to,
            },
        )
    }

    fn stage_deploy(&self, delta: &mut Delta, tx: &Transaction) -> Result<(), Ep1Error> {
        let code = tx
            .contract_code
            .as_ref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| Ep1Error::InvalidTransaction("deploy requires bytecode".into()))?;
        let address = contract_address(&tx.id);
        if self.committed_code(&address).is_some()
            || delta.deployed.iter().any(|(a, _)| *a == address)
        {
            return Err(Ep1Error::ContractCodeExists(address.to_hex()));
        }
        let sender = sender_address(tx)?;
        if tx.fee > 0 {
            self.stage_fee_spend(delta, tx, &sender, 0)?;
        }
        delta.deployed.push((address, code.clone()));
        delta.senders.push(sender);
        Ok(())
    }

    fn stage_call(
        &self,
        delta: &mut Delta,
        tx: &Transaction,
        block: &Block,
        vm: &VmService,
    ) -> Result<(), Ep1Error> {
        let target = tx
            .target_contract
            .clone()
            .ok_or_else(|| Ep1Error::InvalidTransaction("call requires a target contract".into()))?;
        let entry = tx
            .function_name
            .clone()
            .ok_or_else(|| Ep1Error::InvalidTransaction("call requires a function name".into()))?;
        let code = delta
            .deployed
            .iter()
            .rev()
            .find(|(a, _)| *a == target)
            .map(|(_, c)| c.clone())
            .or_else(|| self.committed_code(&target))
            .ok_or_else(|| Ep1Error::ContractCodeMissing(target.to_hex()))?;

        let sender = sender_address(tx)?;
        let amount = tx.amount.unwrap_or(0);
        let need = tx
            .fee
            .checked_add(amount)
            .ok_or_else(|| Ep1Error::InvalidTransaction("value overflow".into()))?;
        let mut next_vout = 0u32;
        if need > 0 {
            let inputs = self.select_inputs(delta, &sender, need)?;
            let total: Amount = inputs.iter().map(|(_, utxo)| utxo.value).sum();
            for (key, _) in inputs {
                delta.mark_spent(key)?;
            }
            if amount > 0 {
                self.stage_output(
                    delta,
                    UtxoKey::new(tx.id, next_vout),
                    Utxo {
                        value: amount,
                        recipient: target.clone(),
                    },
                )?;
                next_vout += 1;
            }
            let change = total - need;
            if change > 0 {
                self.stage_output(
                    delta,
                    UtxoKey::new(tx.id, next_vout),
                    Utxo {
                        value: change,
                        recipient: sender.clone(),
                    },
                )?;
                next_vout += 1;
            }
        }
        delta.senders.push(sender);

        let view = Arc::new(OverlayView {
            inner: Arc::clone(&self.inner),
            delta: delta.clone(),
        });
        let ctx = ExecutionContext {
            contract_address: target.clone(),
            caller_public_key: tx
                .public_key
                .clone()
                .unwrap_or_else(|| PublicKeyBytes::from_bytes(Vec::new())),
            block_timestamp: block.timestamp,
            gas_limit: self.config.gas_limit,
            arguments: tx.arguments.clone().unwrap_or_default(),
        };
        let receipt = vm.execute(&code, &entry, ctx, view)?;

        for (key, value) in receipt.effects.storage_writes {
            delta
                .storage
                .entry(target.clone())
                .or_default()
                .push((key, value));
        }
        for (to, value) in receipt.effects.sends {
            let inputs = self
                .select_inputs(delta, &target, value)
                .map_err(|_| Ep1Error::StateCorruption("contract send exceeds balance".into()))?;
            let total: Amount = inputs.iter().map(|(_, utxo)| utxo.value).sum();
            for (key, _) in inputs {
                delta.mark_spent(key)?;
            }
            self.stage_output(
                delta,
                UtxoKey::new(tx.id, next_vout),
                Utxo {
                    value,
                    recipient: to,
                },
            )?;
            next_vout += 1;
            let change = total - value;
            if change > 0 {
                self.stage_output(
                    delta,
                    UtxoKey::new(tx.id, next_vout),
                    Utxo {
                        value: change,
                        recipient: target.clone(),
                    },
                )?;
                next_vout += 1;
            }
        }
        for event in receipt.effects.events {
            delta.events.push((tx.id, event));
        }
        Ok(())
    }

    /// Fee-only staging for a failed contract call.
    fn stage_fee_only(&self, delta: &mut Delta, tx: &Transaction) -> Result<(), Ep1Error> {
        let sender = sender_address(tx)?;
        if tx.fee > 0 {
            self.stage_fee_spend(delta, tx, &sender, 0)?;
        }
        delta.senders.push(sender);
        Ok(())
    }

    fn stage_fee_spend(
        &self,
        delta: &mut Delta,
        tx: &Transaction,
        sender: &Address,
        change_vout: u32,
    ) -> Result<(), Ep1Error> {
        let inputs = self.select_inputs(delta, sender, tx.fee)?;
        let total: Amount = inputs.iter().map(|(_, utxo)| utxo.value).sum();
        for (key, _) in inputs {
            delta.mark_spent(key)?;
        }
        let change = total - tx.fee;
        if change > 0 {
            self.stage_output(
                delta,
                UtxoKey::new(tx.id, change_vout),
                Utxo {
                    value: change,
                    recipient: sender.clone(),
                },
            )?;
        }
        Ok(())
    }

    // ── Selection & staging primitives ───────────────────────────────────────

    /// Greedy spendable-output selection over committed-plus-staged outputs,
    /// in deterministic key order, until the target is met.
    fn select_inputs(
        &self,
        delta: &Delta,
        address: &Address,
        need: Amount,
    ) -> Result<Vec<(UtxoKey, Utxo)>, Ep1Error> {
        if need == 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().expect("state lock poisoned");
        let mut picked = Vec::new();
        let mut total: Amount = 0;
        let committed = inner
            .utxos
            .iter()
            .map(|(key, utxo)| (*key, utxo.clone()));
        let staged = delta.created.iter().cloned();
        for (key, utxo) in committed.chain(staged) {
            if utxo.recipient != *address || delta.is_spent(&key) {
                continue;
            }
            total = total.saturating_add(utxo.value);
            picked.push((key, utxo));
            if total >= need {
                return Ok(picked);
            }
        }
        Err(Ep1Error::InsufficientBalance {
            need,
            have: total,
        })
    }

    fn stage_output(
        &self,
        delta: &mut Delta,
        key: UtxoKey,
        utxo: Utxo,
    ) -> Result<(), Ep1Error> {
        if utxo.value == 0 {
            return Err(Ep1Error::InvalidTransaction(
                "output values must be positive".into(),
            ));
        }
        let inner = self.inner.read().expect("state lock poisoned");
        if inner.utxos.contains_key(&key) || delta.created.iter().any(|(k, _)| *k == key) {
            return Err(Ep1Error::StateCorruption(format!(
                "duplicate output key {key}"
            )));
        }
        drop(inner);
        delta.created.push((key, utxo));
        Ok(())
    }

    fn committed_code(&self, address: &Address) -> Option<Vec<u8>> {
        self.inner
            .read()
            .expect("state lock poisoned")
            .contract_code
            .get(address)
            .cloned()
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    /// Authoritative balance: sum of committed UTXOs owned by the address.
    pub fn balance_of(&self, address: &Address) -> Amount {
        self.inner
            .read()
            .expect("state lock poisoned")
            .utxos
            .values()
            .filter(|utxo| utxo.recipient == *address)
            .map(|utxo| utxo.value)
            .sum()
    }

    /// Greedy selection against committed state only (wallet-facing).
    pub fn spendable_outputs(
        &self,
        address: &Address,
        need: Amount,
    ) -> Result<Vec<(UtxoKey, Utxo)>, Ep1Error> {
        self.select_inputs(&Delta::default(), address, need)
    }

    pub fn contract_code(&self, address: &Address) -> Result<Vec<u8>, Ep1Error> {
        self.committed_code(address)
            .ok_or_else(|| Ep1Error::ContractCodeMissing(address.to_hex()))
    }

    pub fn contract_storage_get(&self, contract: &Address, key: &[u8]) -> Option<Vec<u8>> {
        self.inner
            .read()
            .expect("state lock poisoned")
            .contract_storage
            .get(contract)
            .and_then(|map| map.get(key).cloned())
    }

    /// Direct storage write; `None` deletes the key.
    pub fn contract_storage_set(&self, contract: &Address, key: Vec<u8>, value: Option<Vec<u8>>) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        let map = inner.contract_storage.entry(contract.clone()).or_default();
        match value {
            Some(v) => {
                map.insert(key, v);
            }
            None => {
                map.remove(&key);
            }
        }
    }

    /// Every event committed so far, in commit order.
    pub fn events(&self) -> Vec<CommittedEvent> {
        self.inner.read().expect("state lock poisoned").events.clone()
    }

    pub fn events_for_topic(&self, topic: &[u8]) -> Vec<CommittedEvent> {
        self.inner
            .read()
            .expect("state lock poisoned")
            .events
            .iter()
            .filter(|e| e.event.topic == topic)
            .cloned()
            .collect()
    }

    /// Attach (or clear) a did:key binding on an account record.
    pub fn bind_did(&self, address: &Address, did: Option<String>) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        let account = inner
            .accounts
            .entry(address.clone())
            .or_insert_with(|| Account::new(address.clone()));
        account.did = did;
    }

    pub fn account(&self, address: &Address) -> Option<Account> {
        self.inner
            .read()
            .expect("state lock poisoned")
            .accounts
            .get(address)
            .cloned()
    }

    pub fn utxo(&self, key: &UtxoKey) -> Result<Utxo, Ep1Error> {
        self.inner
            .read()
            .expect("state lock poisoned")
            .utxos
            .get(key)
            .cloned()
            .ok_or_else(|| Ep1Error::UtxoNotFound(key.to_string()))
    }

    pub fn utxo_count(&self) -> usize {
        self.inner.read().expect("state lock poisoned").utxos.len()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn sender_address(tx: &Transaction) -> Result<Address, Ep1Error> {
    if tx.is_multisig() {
        if tx.from.len() != 32 {
            return Err(Ep1Error::PublicKeyMissingOrInvalid);
        }
        Ok(Address::from_bytes(tx.from.clone()))
    } else {
        if tx.from.len() != PUBLIC_KEY_LEN {
            return Err(Ep1Error::PublicKeyMissingOrInvalid);
        }
        Ok(address_from_pubkey(&PublicKeyBytes::from_bytes(
            tx.from.clone(),
        )))
    }
}

/// Errors the sandbox reports about the call itself — contained to the
/// transaction, never fatal to the block.
fn is_vm_error(err: &Ep1Error) -> bool {
    matches!(
        err,
        Ep1Error::WasmCompile(_)
            | Ep1Error::WasmInstantiate(_)
            | Ep1Error::WasmExportMissing(_)
            | Ep1Error::WasmExecution(_)
            | Ep1Error::OutOfGas
            | Ep1Error::HostFunctionExecution(_)
    )
}
