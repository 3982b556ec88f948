use std::sync::Arc;

use ep1_core::constants::GAS_INSTANTIATION_BASE;
use ep1_core::error::Ep1Error;
use tracing::debug;
use wasmtime::{Config, Engine, Linker, Module, Store, Trap, Val, ValType};

use crate::gas::GasTank;
use crate::host::{self, ContractEffects, ExecutionContext, HostEnv, StateView};

/// Sandbox tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct VmConfig {
    /// Flat charge taken before the first guest instruction executes.
    pub instantiation_cost: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            instantiation_cost: GAS_INSTANTIATION_BASE,
        }
    }
}

/// What a successful call produced. Effects are buffered here and persisted
/// by the state store — a failing call leaves no trace.
#[derive(Debug)]
pub struct ContractReceipt {
    pub effects: ContractEffects,
    /// Host-side gas consumed, instantiation charge included.
    pub gas_consumed: u64,
    /// Guest instruction cost reported by the runtime's fuel meter.
    pub wasm_instruction_cost: u64,
}

/// The WASM execution service. Each call gets a fresh store, a fresh gas
/// tank, and a fuel budget equal to the gas limit; nothing survives between
/// calls except what the state store commits from the receipt.
pub struct VmService {
    engine: Engine,
    config: VmConfig,
}

impl VmService {
    pub fn new(config: VmConfig) -> Result<Self, Ep1Error> {
        let mut cfg = Config::new();
        cfg.consume_fuel(true);
        let engine = Engine::new(&cfg).map_err(|e| Ep1Error::WasmInstantiate(e.to_string()))?;
        Ok(Self { engine, config })
    }

    /// Compile and run `entry` in a fresh sandbox.
    pub fn execute(
        &self,
        bytecode: &[u8],
        entry: &str,
        ctx: ExecutionContext,
        view: Arc<dyn StateView>,
    ) -> Result<ContractReceipt, Ep1Error> {
        let module = Module::new(&self.engine, bytecode)
            .map_err(|e| Ep1Error::WasmCompile(e.to_string()))?;

        let gas = Arc::new(GasTank::new(ctx.gas_limit));
        let mut linker: Linker<HostEnv> = Linker::new(&self.engine);
        host::register(&mut linker)?;

        let env = HostEnv {
            view,
            ctx: ctx.clone(),
            gas: Arc::clone(&gas),
            effects: ContractEffects::default(),
            memory: None,
        };
        let mut store = Store::new(&self.engine, env);
        store
            .set_fuel(ctx.gas_limit)
            .map_err(|e| Ep1Error::WasmInstantiate(e.to_string()))?;

        // Base charge lands before any guest instruction, start section included.
        gas.consume(self.config.instantiation_cost)
            .map_err(|_| Ep1Error::OutOfGas)?;

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| Ep1Error::WasmInstantiate(e.to_string()))?;
        let memory = instance.get_memory(&mut store, "memory");
        store.data_mut().memory = memory;

        let func = instance
            .get_func(&mut store, entry)
            .ok_or_else(|| Ep1Error::WasmExportMissing(entry.to_string()))?;
        let ty = func.ty(&store);
        if ty.params().len() != 0 {
            return Err(Ep1Error::WasmExecution(format!(
                "entry point {entry} must take no parameters"
            )));
        }
        let mut results: Vec<Val> = ty.results().map(zero_val).collect();

        let outcome = func.call(&mut store, &[], &mut results);
        let fuel_remaining = store.get_fuel().unwrap_or(0);
        gas.record_wasm_cost(ctx.gas_limit.saturating_sub(fuel_remaining));

        match outcome {
            Ok(()) => {
                debug!(
                    contract = %ctx.contract_address,
                    entry,
                    gas = gas.consumed(),
                    fuel = gas.wasm_cost(),
                    "contract call complete"
                );
                let env = store.into_data();
                Ok(ContractReceipt {
                    effects: env.effects,
                    gas_consumed: gas.consumed(),
                    wasm_instruction_cost: gas.wasm_cost(),
                })
            }
            Err(err) => {
                // Gas exhaustion wins over whatever trap the runtime reports.
                if gas.is_exhausted() || matches!(err.downcast_ref::<Trap>(), Some(Trap::OutOfFuel))
                {
                    Err(Ep1Error::OutOfGas)
                } else {
                    Err(Ep1Error::WasmExecution(err.to_string()))
                }
            }
        }
    }
}

fn zero_val(ty: ValType) -> Val {
    match ty {
        ValType::I32 => Val::I32(0),
        ValType::I64 => Val::I64(0),
        ValType::F32 => Val::F32(0),
        ValType::F64 => Val::F64(0),
        ValType::V128 => Val::V128(0u128.into()),
        ValType::FuncRef => Val::FuncRef(None),
        ValType::ExternRef => Val::ExternRef(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostStatus;
    use ep1_core::types::{Address, PublicKeyBytes};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct TestView {
        storage: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
        balances: HashMap<Vec<u8>, u64>,
    }

    impl TestView {
        fn empty() -> Arc<Self> {
            Arc::new(Self {
                storage: Mutex::new(HashMap::new()),
                balances: HashMap::new(),
            })
        }

        fn with_balance(address: &[u8], amount: u64) -> Arc<Self> {
            let mut balances = HashMap::new();
            balances.insert(address.to_vec(), amount);
            Arc::new(Self {
                storage: Mutex::new(HashMap::new()),
                balances,
            })
        }
    }

    impl StateView for TestView {
        fn contract_storage_get(&self, _contract: &Address, key: &[u8]) -> Option<Vec<u8>> {
            self.storage.lock().unwrap().get(key).cloned()
        }

        fn balance_of(&self, address: &Address) -> u64 {
            self.balances.get(address.as_bytes()).copied().unwrap_or(0)
        }
    }

    fn ctx(gas_limit: u64) -> ExecutionContext {
        ExecutionContext {
            contract_address: Address::from_bytes(vec![0xCC; 32]),
            caller_public_key: PublicKeyBytes::from_bytes(vec![0x04; 65]),
            block_timestamp: 1_700_000_000_000_000_000,
            gas_limit,
            arguments: Vec::new(),
        }
    }

    fn vm() -> VmService {
        VmService::new(VmConfig::default()).unwrap()
    }

    const STORE_KV: &str = r#"
        (module
          (import "env" "blockchain_set_storage"
            (func $set (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 16) "k")
          (data (i32.const 32) "v")
          (func (export "store_kv")
            (drop (call $set (i32.const 16) (i32.const 1)
                             (i32.const 32) (i32.const 1)))))
    "#;

    #[test]
    fn storage_write_is_staged_in_the_receipt() {
        let receipt = vm()
            .execute(STORE_KV.as_bytes(), "store_kv", ctx(1_000_000), TestView::empty())
            .unwrap();
        assert_eq!(
            receipt.effects.storage_writes,
            vec![(b"k".to_vec(), Some(b"v".to_vec()))]
        );
        assert!(receipt.gas_consumed >= GAS_INSTANTIATION_BASE);
        assert!(receipt.wasm_instruction_cost > 0);
    }

    #[test]
    fn staged_write_is_visible_to_a_later_read_in_the_same_call() {
        const WRITE_THEN_READ: &str = r#"
            (module
              (import "env" "blockchain_set_storage"
                (func $set (param i32 i32 i32 i32) (result i32)))
              (import "env" "blockchain_get_storage"
                (func $get (param i32 i32 i32 i32) (result i32)))
              (memory (export "memory") 1)
              (data (i32.const 16) "k")
              (data (i32.const 32) "v")
              (func (export "run")
                (drop (call $set (i32.const 16) (i32.const 1)
                                 (i32.const 32) (i32.const 1)))
                ;; read it back into a scratch buffer, then persist the echo
                (drop (call $get (i32.const 16) (i32.const 1)
                                 (i32.const 64) (i32.const 8)))
                (drop (call $set (i32.const 16) (i32.const 1)
                                 (i32.const 64) (i32.const 1)))))
        "#;
        let receipt = vm()
            .execute(
                WRITE_THEN_READ.as_bytes(),
                "run",
                ctx(1_000_000),
                TestView::empty(),
            )
            .unwrap();
        // The second write persisted the value read back from the first.
        assert_eq!(
            receipt.effects.storage_writes.last(),
            Some(&(b"k".to_vec(), Some(b"v".to_vec())))
        );
    }

    #[test]
    fn tight_loop_runs_out_of_gas() {
        const SPIN: &str = r#"
            (module
              (memory (export "memory") 1)
              (func (export "spin") (loop $l (br $l))))
        "#;
        let err = vm()
            .execute(SPIN.as_bytes(), "spin", ctx(200_000), TestView::empty())
            .unwrap_err();
        assert_eq!(err, Ep1Error::OutOfGas);
    }

    #[test]
    fn memory_violation_returns_status_without_state_mutation() {
        // First call violates bounds; its status (3) is then persisted under
        // key "r" so the test can observe exactly one staged write.
        const PROBE: &str = r#"
            (module
              (import "env" "blockchain_set_storage"
                (func $set (param i32 i32 i32 i32) (result i32)))
              (memory (export "memory") 1)
              (data (i32.const 0) "r")
              (func (export "probe")
                (local $s i32)
                (local.set $s
                  (call $set (i32.const 2147483647) (i32.const 16)
                             (i32.const 8) (i32.const 1)))
                (i32.store8 (i32.const 8) (local.get $s))
                (drop (call $set (i32.const 0) (i32.const 1)
                                 (i32.const 8) (i32.const 1)))))
        "#;
        let receipt = vm()
            .execute(PROBE.as_bytes(), "probe", ctx(1_000_000), TestView::empty())
            .unwrap();
        assert_eq!(
            receipt.effects.storage_writes,
            vec![(b"r".to_vec(), Some(vec![3u8]))],
            "the violating call must stage nothing; only the probe write lands"
        );
    }

    #[test]
    fn send_funds_respects_the_contract_balance() {
        const SEND_TWICE: &str = r#"
            (module
              (import "env" "blockchain_send_funds"
                (func $send (param i32 i32 i64) (result i32)))
              (import "env" "blockchain_set_storage"
                (func $set (param i32 i32 i32 i32) (result i32)))
              (memory (export "memory") 1)
              (data (i32.const 0) "to..................")
              (data (i32.const 24) "s")
              (func (export "run")
                ;; 60 of 100 succeeds, the second 60 must fail with status 1
                (drop (call $send (i32.const 0) (i32.const 20) (i64.const 60)))
                (i32.store8 (i32.const 32)
                  (call $send (i32.const 0) (i32.const 20) (i64.const 60)))
                (drop (call $set (i32.const 24) (i32.const 1)
                                 (i32.const 32) (i32.const 1)))))
        "#;
        let contract = vec![0xCC; 32];
        let receipt = vm()
            .execute(
                SEND_TWICE.as_bytes(),
                "run",
                ctx(1_000_000),
                TestView::with_balance(&contract, 100),
            )
            .unwrap();
        assert_eq!(receipt.effects.sends.len(), 1);
        assert_eq!(receipt.effects.sends[0].1, 60);
        assert_eq!(
            receipt.effects.storage_writes,
            vec![(b"s".to_vec(), Some(vec![HostStatus::Failure.code() as u8]))]
        );
    }

    #[test]
    fn caller_public_key_reaches_the_guest() {
        const ECHO_CALLER: &str = r#"
            (module
              (import "env" "blockchain_get_caller_public_key"
                (func $caller (param i32 i32) (result i32)))
              (import "env" "blockchain_set_storage"
                (func $set (param i32 i32 i32 i32) (result i32)))
              (memory (export "memory") 1)
              (data (i32.const 0) "c")
              (func (export "run")
                (drop (call $caller (i32.const 64) (i32.const 65)))
                (drop (call $set (i32.const 0) (i32.const 1)
                                 (i32.const 64) (i32.const 65)))))
        "#;
        let receipt = vm()
            .execute(
                ECHO_CALLER.as_bytes(),
                "run",
                ctx(1_000_000),
                TestView::empty(),
            )
            .unwrap();
        assert_eq!(
            receipt.effects.storage_writes,
            vec![(b"c".to_vec(), Some(vec![0x04; 65]))]
        );
    }

    #[test]
    fn block_timestamp_reaches_the_guest() {
        const STAMP: &str = r#"
            (module
              (import "env" "blockchain_get_block_timestamp"
                (func $ts (result i64)))
              (import "env" "blockchain_set_storage"
                (func $set (param i32 i32 i32 i32) (result i32)))
              (memory (export "memory") 1)
              (data (i32.const 0) "t")
              (func (export "run")
                (i64.store (i32.const 8) (call $ts))
                (drop (call $set (i32.const 0) (i32.const 1)
                                 (i32.const 8) (i32.const 8)))))
        "#;
        let context = ctx(1_000_000);
        let expected = context.block_timestamp.to_le_bytes().to_vec();
        let receipt = vm()
            .execute(STAMP.as_bytes(), "run", context, TestView::empty())
            .unwrap();
        assert_eq!(
            receipt.effects.storage_writes,
            vec![(b"t".to_vec(), Some(expected))]
        );
    }

    #[test]
    fn did_key_generation_reaches_the_guest() {
        const DID_ECHO: &str = r#"
            (module
              (import "env" "blockchain_get_caller_public_key"
                (func $caller (param i32 i32) (result i32)))
              (import "env" "blockchain_generate_did_key"
                (func $did (param i32 i32 i32 i32) (result i32)))
              (import "env" "blockchain_set_storage"
                (func $set (param i32 i32 i32 i32) (result i32)))
              (memory (export "memory") 1)
              (data (i32.const 0) "d")
              (func (export "run")
                (local $n i32)
                (drop (call $caller (i32.const 16) (i32.const 65)))
                (local.set $n
                  (call $did (i32.const 16) (i32.const 65)
                             (i32.const 128) (i32.const 160)))
                (drop (call $set (i32.const 0) (i32.const 1)
                                 (i32.const 128) (local.get $n)))))
        "#;
        let expected = ep1_crypto::did::did_key_encode(&PublicKeyBytes::from_bytes(vec![
            0x04; 65
        ]))
        .unwrap();
        let receipt = vm()
            .execute(DID_ECHO.as_bytes(), "run", ctx(1_000_000), TestView::empty())
            .unwrap();
        assert_eq!(
            receipt.effects.storage_writes,
            vec![(b"d".to_vec(), Some(expected.into_bytes()))]
        );
    }

    #[test]
    fn missing_export_is_a_distinct_error() {
        let err = vm()
            .execute(STORE_KV.as_bytes(), "nope", ctx(1_000_000), TestView::empty())
            .unwrap_err();
        assert_eq!(err, Ep1Error::WasmExportMissing("nope".into()));
    }

    #[test]
    fn garbage_bytecode_fails_to_compile() {
        let err = vm()
            .execute(b"\x01\x02\x03", "run", ctx(1_000_000), TestView::empty())
            .unwrap_err();
        assert!(matches!(err, Ep1Error::WasmCompile(_)));
    }

    #[test]
    fn instantiation_cost_alone_can_exhaust_the_tank() {
        let err = vm()
            .execute(STORE_KV.as_bytes(), "store_kv", ctx(10), TestView::empty())
            .unwrap_err();
        assert_eq!(err, Ep1Error::OutOfGas);
    }
}
