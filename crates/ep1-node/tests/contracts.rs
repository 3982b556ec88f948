//! Contract lifecycle through the full consensus pipeline: deploy and call
//! inside proposed blocks, storage persistence across calls, and contained
//! execution failures.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{genesis_for, node_on_hub};
use ep1_chain::genesis::GenesisAllocation;
use ep1_consensus::registry::Validator;
use ep1_core::error::Ep1Error;
use ep1_core::transaction::{Transaction, TxType};
use ep1_core::types::Address;
use ep1_crypto::address::{address_from_pubkey, contract_address};
use ep1_crypto::auth::sign_single_sig;
use ep1_crypto::keypair::KeyPair;
use ep1_network::adapter::InProcessHub;

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

const SPIN: &str = r#"
    (module
      (memory (export "memory") 1)
      (func (export "spin") (loop $l (br $l))))
"#;

fn deploy_tx(kp: &KeyPair, code: &str, fee: u64) -> Transaction {
    let mut tx = Transaction::unsigned(TxType::ContractDeploy, common::now_ns());
    tx.contract_code = Some(code.as_bytes().to_vec());
    tx.fee = fee;
    sign_single_sig(&mut tx, kp);
    tx
}

fn call_tx(kp: &KeyPair, target: Address, entry: &str, fee: u64) -> Transaction {
    let mut tx = Transaction::unsigned(TxType::ContractCall, common::now_ns());
    tx.target_contract = Some(target);
    tx.function_name = Some(entry.to_string());
    tx.fee = fee;
    sign_single_sig(&mut tx, kp);
    tx
}

#[tokio::test]
async fn deploy_and_call_persist_contract_storage() {
    let hub = InProcessHub::new();
    let kp = Arc::new(KeyPair::generate());
    let own_address = address_from_pubkey(&kp.public_key);
    let node = node_on_hub(&hub, Arc::clone(&kp), &[Validator::new(kp.public_key.clone(), 1)]);

    node.engine
        .import_block(&genesis_for(
            &kp,
            &[GenesisAllocation {
                recipient: own_address.clone(),
                amount: 1_000,
            }],
        ))
        .unwrap();

    // Deploy and call admitted back-to-back: FIFO selection keeps them in
    // order, and the call resolves the code deployed earlier in the block.
    let deploy = deploy_tx(&kp, STORE_KV, 1);
    let contract = contract_address(&deploy.id);
    node.mempool.admit(deploy).unwrap();
    node.mempool.admit(call_tx(&kp, contract.clone(), "store_kv", 1)).unwrap();

    node.engine.start().unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    node.engine.stop().await.unwrap();

    assert!(node.state.contract_code(&contract).is_ok());
    assert_eq!(
        node.state.contract_storage_get(&contract, b"k"),
        Some(b"v".to_vec())
    );
    // Fees burned: 1000 funded, 2 paid.
    assert_eq!(node.state.balance_of(&own_address), 998);
    // Reads against a never-deployed address keep failing distinctly.
    let ghost = Address::from_bytes(vec![0xDD; 32]);
    assert!(matches!(
        node.state.contract_code(&ghost),
        Err(Ep1Error::ContractCodeMissing(_))
    ));
}

#[tokio::test]
async fn gas_exhaustion_is_contained_to_the_call() {
    let hub = InProcessHub::new();
    let kp = Arc::new(KeyPair::generate());
    let own_address = address_from_pubkey(&kp.public_key);
    let node = node_on_hub(&hub, Arc::clone(&kp), &[Validator::new(kp.public_key.clone(), 1)]);

    node.engine
        .import_block(&genesis_for(
            &kp,
            &[GenesisAllocation {
                recipient: own_address.clone(),
                amount: 1_000,
            }],
        ))
        .unwrap();

    let deploy = deploy_tx(&kp, SPIN, 1);
    let contract = contract_address(&deploy.id);
    node.mempool.admit(deploy).unwrap();
    node.mempool.admit(call_tx(&kp, contract.clone(), "spin", 1)).unwrap();

    node.engine.start().unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;
    node.engine.stop().await.unwrap();

    // The spinning call ran out of gas, yet its block committed: the fee is
    // gone, the contract exists, and no storage was touched.
    assert!(node.chain.height() >= 1);
    assert!(node.state.contract_code(&contract).is_ok());
    assert_eq!(node.state.balance_of(&own_address), 998);
    assert_eq!(node.state.contract_storage_get(&contract, b"k"), None);
    assert!(node.mempool.is_empty());
}
