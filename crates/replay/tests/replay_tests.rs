use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use hex_literal::hex;
use retrace_common::types::{
    HardFork, STATUS_FAILED, STATUS_SUCCESS, Substate, SubstateAccount, SubstateResult,
    create_address,
};
use retrace_replay::ReplayConfig;
use retrace_replay::check::check_equivalence;
use retrace_replay::error::ReplayError;
use retrace_replay::executor::{ReplayMode, apply_substate};
use retrace_replay::fork::{ReplayClass, classify};
use retrace_replay::verify::transition_substate;
use retrace_storage::SubstateStore;
use retrace_vgraph::{CallLogSink, GraphConfig, GraphCounters};
use std::sync::Arc;
use tempdir::TempDir;

const BLOCK: u64 = 5_000_000;

fn sender() -> Address {
    Address::from_low_u64_be(0xa11ce)
}

fn base_substate() -> Substate {
    let mut substate = Substate::default();
    substate.env.coinbase = Address::from_low_u64_be(0xc01dbabe);
    substate.env.difficulty = U256::from(131_072);
    substate.env.gas_limit = 10_000_000;
    substate.env.number = BLOCK;
    substate.env.timestamp = 1_500_000_000;
    substate
}

/// A plain value transfer: 100 wei at A, 10 wei to B, exactly 21000 gas at
/// price zero.
fn transfer_substate() -> Substate {
    let receiver = Address::from_low_u64_be(0xb0b);
    let mut substate = base_substate();
    substate.env.gas_limit = 21_000;
    substate.input_alloc.insert(
        sender(),
        SubstateAccount::new(0, U256::from(100), Bytes::new()),
    );
    substate.message.from = sender();
    substate.message.to = Some(receiver);
    substate.message.value = U256::from(10);
    substate.message.gas = 21_000;
    substate.message.check_nonce = true;

    substate.output_alloc.insert(
        sender(),
        SubstateAccount::new(1, U256::from(90), Bytes::new()),
    );
    substate
        .output_alloc
        .insert(receiver, SubstateAccount::new(0, U256::from(10), Bytes::new()));
    substate.result = SubstateResult {
        status: STATUS_SUCCESS,
        gas_used: 21_000,
        ..Default::default()
    };
    substate
}

/// A call into `PUSH1 1; PUSH1 2; ADD; PUSH1 0; SSTORE; STOP`.
fn sstore_substate() -> Substate {
    let contract = Address::from_low_u64_be(0xc0de);
    let mut substate = base_substate();
    substate.input_alloc.insert(
        sender(),
        SubstateAccount::new(0, U256::from(1_000_000), Bytes::new()),
    );
    substate.input_alloc.insert(
        contract,
        SubstateAccount::new(1, U256::zero(), Bytes::copy_from_slice(&hex!("600160020160005500"))),
    );
    substate.message.from = sender();
    substate.message.to = Some(contract);
    substate.message.gas = 100_000;
    substate.message.check_nonce = true;
    substate
}

#[test]
fn transfer_replay_matches_recording() {
    let substate = transfer_substate();
    let snapshot = apply_substate(
        BLOCK,
        0,
        &substate,
        HardFork::Mainnet,
        ReplayMode::Verify,
        None,
    )
    .unwrap();

    assert_eq!(snapshot.result.status, STATUS_SUCCESS);
    assert_eq!(snapshot.result.gas_used, 21_000);
    assert_eq!(snapshot.result.contract_address, Address::zero());
    assert!(snapshot.result.logs.is_empty());

    check_equivalence(
        &substate.result,
        &substate.output_alloc,
        &snapshot.result,
        &snapshot.alloc,
    )
    .unwrap();
}

#[test]
fn replay_is_deterministic() {
    let substate = sstore_substate();
    let first = apply_substate(BLOCK, 0, &substate, HardFork::Mainnet, ReplayMode::Verify, None)
        .unwrap();
    let second = apply_substate(BLOCK, 0, &substate, HardFork::Mainnet, ReplayMode::Verify, None)
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn sstore_execution_updates_storage_and_builds_live_graph() {
    let dir = TempDir::new("replay_graph_test").unwrap();
    let call_log_path = dir.path().join("calls.csv");

    let counters = Arc::new(GraphCounters::default());
    let sink = CallLogSink::spawn(&call_log_path).unwrap();
    let graph = GraphConfig {
        counters: counters.clone(),
        call_log: Some(sink.sender()),
        graph_dir: None,
    };

    let substate = sstore_substate();
    let snapshot = apply_substate(
        BLOCK,
        0,
        &substate,
        HardFork::Mainnet,
        ReplayMode::Verify,
        Some(&graph),
    )
    .unwrap();
    sink.close().unwrap();

    assert_eq!(snapshot.result.status, STATUS_SUCCESS);

    let contract = Address::from_low_u64_be(0xc0de);
    let account = snapshot.alloc.get(&contract).expect("contract account in poststate");
    assert_eq!(
        account.storage.get(&H256::from_low_u64_be(0)),
        Some(&H256::from_low_u64_be(3))
    );

    // PUSH1, PUSH1, ADD, PUSH1, SSTORE: five instructions, all feeding the
    // storage write
    assert_eq!(counters.snapshot(), (5, 5));

    let csv = std::fs::read_to_string(&call_log_path).unwrap();
    let rows: Vec<&str> = csv.lines().collect();
    assert_eq!(rows.len(), 2, "header plus one frame: {csv}");
    assert!(rows[1].starts_with(&format!("{BLOCK},5,5,")));
}

#[test]
fn create_transaction_derives_contract_address() {
    let mut substate = base_substate();
    substate.input_alloc.insert(
        sender(),
        SubstateAccount::new(7, U256::from(1_000_000), Bytes::new()),
    );
    substate.message.from = sender();
    substate.message.to = None;
    substate.message.nonce = 7;
    substate.message.check_nonce = true;
    substate.message.gas = 100_000;
    // init code returning an empty runtime: PUSH1 0; PUSH1 0; RETURN
    substate.message.data = Bytes::copy_from_slice(&hex!("60006000f3"));

    let snapshot = apply_substate(
        BLOCK,
        0,
        &substate,
        HardFork::Mainnet,
        ReplayMode::Verify,
        None,
    )
    .unwrap();

    assert_eq!(snapshot.result.status, STATUS_SUCCESS);
    assert_eq!(
        snapshot.result.contract_address,
        create_address(sender(), 7)
    );
    // the created account appears in the poststate with its bumped nonce
    let created = snapshot.alloc.get(&create_address(sender(), 7));
    assert!(created.is_some_and(|account| account.nonce == 1));
}

#[test]
fn missing_blockhash_is_fatal_only_in_verification() {
    let contract = Address::from_low_u64_be(0xc0de);
    let mut substate = base_substate();
    substate.input_alloc.insert(
        sender(),
        SubstateAccount::new(0, U256::from(1_000_000), Bytes::new()),
    );
    // PUSH3 4999999; BLOCKHASH; POP; STOP
    substate.input_alloc.insert(
        contract,
        SubstateAccount::new(1, U256::zero(), Bytes::copy_from_slice(&hex!("624c4b3f405000"))),
    );
    substate.message.from = sender();
    substate.message.to = Some(contract);
    substate.message.gas = 100_000;
    substate.message.check_nonce = true;

    let error = apply_substate(
        BLOCK,
        0,
        &substate,
        HardFork::Mainnet,
        ReplayMode::Verify,
        None,
    )
    .unwrap_err();
    assert!(matches!(error, ReplayError::MissingBlockhash(4_999_999)));

    // demoted under fork replay
    apply_substate(BLOCK, 0, &substate, HardFork::Byzantium, ReplayMode::Fork, None).unwrap();

    // and satisfied once the hash is captured
    substate
        .env
        .block_hashes
        .insert(4_999_999, H256::repeat_byte(0x13));
    apply_substate(BLOCK, 0, &substate, HardFork::Mainnet, ReplayMode::Verify, None).unwrap();
}

#[test]
fn revert_under_older_rules_is_not_identical() {
    let contract = Address::from_low_u64_be(0xc0de);
    let mut substate = base_substate();
    substate.input_alloc.insert(
        sender(),
        SubstateAccount::new(0, U256::from(1_000_000), Bytes::new()),
    );
    // PUSH1 0; PUSH1 0; REVERT — legal from Byzantium on only
    substate.input_alloc.insert(
        contract,
        SubstateAccount::new(1, U256::zero(), Bytes::copy_from_slice(&hex!("60006000fd"))),
    );
    substate.message.from = sender();
    substate.message.to = Some(contract);
    substate.message.gas = 100_000;
    substate.message.check_nonce = true;

    // record the Byzantium behavior, then replay it under Frontier rules
    let recorded = apply_substate(
        BLOCK,
        0,
        &substate,
        HardFork::Mainnet,
        ReplayMode::Fork,
        None,
    )
    .unwrap();
    assert_eq!(recorded.result.status, STATUS_FAILED);
    substate.result = recorded.result.clone();
    substate.output_alloc = recorded.alloc.clone();

    let identical = apply_substate(BLOCK, 0, &substate, HardFork::Mainnet, ReplayMode::Fork, None);
    assert_eq!(classify(&substate, &identical), ReplayClass::Identical);

    let frontier = apply_substate(BLOCK, 0, &substate, HardFork::Frontier, ReplayMode::Fork, None);
    let class = classify(&substate, &frontier);
    assert_ne!(class, ReplayClass::Identical);
}

#[test]
fn verification_over_a_store_detects_tampering() {
    let dir = TempDir::new("replay_store_test").unwrap();
    let store = SubstateStore::open(dir.path()).unwrap();
    let config = ReplayConfig {
        workers: 2,
        ..Default::default()
    };

    let substate = transfer_substate();
    store.put_substate(BLOCK, 0, &substate).unwrap();

    let summary = transition_substate(&store, &config, BLOCK, BLOCK).unwrap();
    assert_eq!(summary.blocks, 1);
    assert_eq!(summary.txs, 1);

    // tamper with the recorded gas and the same range must fail
    let mut tampered = substate.clone();
    tampered.result.gas_used = 20_000;
    store.put_substate(BLOCK, 0, &tampered).unwrap();

    let error = transition_substate(&store, &config, BLOCK, BLOCK).unwrap_err();
    assert!(matches!(error.root(), ReplayError::Inconsistent(_)));
}

#[test]
fn filters_skip_plain_transfers() {
    let dir = TempDir::new("replay_filter_test").unwrap();
    let store = SubstateStore::open(dir.path()).unwrap();
    let config = ReplayConfig {
        workers: 1,
        skip_transfer_txs: true,
        ..Default::default()
    };

    store.put_substate(BLOCK, 0, &transfer_substate()).unwrap();
    let summary = transition_substate(&store, &config, BLOCK, BLOCK).unwrap();
    assert_eq!(summary.blocks, 1);
    assert_eq!(summary.txs, 0);
}
