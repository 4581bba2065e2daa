use bytes::Bytes;
use ethereum_types::Address;
use retrace_common::types::{
    HardFork, Log, STATUS_FAILED, STATUS_SUCCESS, Substate, SubstateAccount, SubstateAlloc,
    SubstateResult, bloom_from_logs, create_address,
};
use retrace_vgraph::{GraphConfig, ValueGraphInspector};
use revm::{
    Evm, inspector_handle_register,
    primitives::{
        B256, BlockEnv, EvmState, ExecutionResult, HaltReason, ResultAndState, SpecId, TxEnv,
        TxKind,
    },
};

use crate::db::{self, PrestateDb};
use crate::error::ReplayError;

/// How strictly to treat conditions that only matter in some drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Equivalence verification: an uncaptured BLOCKHASH is fatal.
    Verify,
    /// Hard-fork replay: the block may be outside the 256-block window under
    /// the re-targeted rules, so a missing blockhash is ignored.
    Fork,
    /// Fuzzing: like `Fork`, and callers additionally swallow VM errors.
    Fuzz,
}

/// Why the re-executed transaction did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFailure {
    pub reason: String,
    pub out_of_gas: bool,
}

/// Post-execution view of one replayed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSnapshot {
    pub result: SubstateResult,
    pub alloc: SubstateAlloc,
    pub failure: Option<ReplayFailure>,
}

const MAINNET_CHAIN_ID: u64 = 1;

/// The revm rule set for a replay: named forks map directly, Mainnet selects
/// by the block number. DAO-fork balance rewrites never apply here, so the
/// replayed account states are exactly the message's own effects.
pub fn spec_id_for(fork: HardFork, block: u64) -> SpecId {
    let fork = match fork {
        HardFork::Mainnet => HardFork::mainnet_rules_at(block),
        other => other,
    };
    match fork {
        HardFork::Frontier => SpecId::FRONTIER,
        HardFork::Homestead => SpecId::HOMESTEAD,
        HardFork::TangerineWhistle => SpecId::TANGERINE,
        HardFork::SpuriousDragon => SpecId::SPURIOUS_DRAGON,
        HardFork::Byzantium => SpecId::BYZANTIUM,
        HardFork::Petersburg => SpecId::PETERSBURG,
        HardFork::Istanbul | HardFork::Mainnet => SpecId::ISTANBUL,
    }
}

fn block_env(substate: &Substate) -> BlockEnv {
    let env = &substate.env;
    BlockEnv {
        number: revm::primitives::U256::from(env.number),
        coinbase: db::to_revm_address(env.coinbase),
        timestamp: revm::primitives::U256::from(env.timestamp),
        gas_limit: revm::primitives::U256::from(env.gas_limit),
        basefee: revm::primitives::U256::ZERO,
        difficulty: db::to_revm_u256(env.difficulty),
        prevrandao: Some(B256::from(env.difficulty.to_big_endian())),
        blob_excess_gas_and_price: None,
    }
}

fn tx_env(substate: &Substate) -> TxEnv {
    let message = &substate.message;
    TxEnv {
        caller: db::to_revm_address(message.from),
        gas_limit: message.gas,
        gas_price: db::to_revm_u256(message.gas_price),
        transact_to: match message.to {
            Some(to) => TxKind::Call(db::to_revm_address(to)),
            None => TxKind::Create,
        },
        value: db::to_revm_u256(message.value),
        data: revm::primitives::Bytes::copy_from_slice(&message.data),
        nonce: message.check_nonce.then_some(message.nonce),
        chain_id: None,
        ..Default::default()
    }
}

/// Re-executes one recorded transaction against its substate prestate.
///
/// Builds the in-memory world state, configures the VM context from `env`
/// and `message`, applies the message and extracts the poststate. A VM-level
/// revert or halt is a normal outcome captured in the snapshot; only
/// pre-execution rejections (nonce, funds, intrinsic gas) surface as
/// [`ReplayError::Evm`].
pub fn apply_substate(
    block: u64,
    tx: usize,
    substate: &Substate,
    fork: HardFork,
    mode: ReplayMode,
    graph: Option<&GraphConfig>,
) -> Result<ExecutionSnapshot, ReplayError> {
    let spec_id = spec_id_for(fork, substate.env.number);
    let db = PrestateDb::from_substate(substate);
    let block_env = block_env(substate);
    let tx_env = tx_env(substate);

    let (outcome, missing_blockhash) = match graph {
        None => {
            let mut evm = Evm::builder()
                .with_db(db)
                .with_block_env(block_env)
                .with_tx_env(tx_env)
                .modify_cfg_env(|cfg| cfg.chain_id = MAINNET_CHAIN_ID)
                .with_spec_id(spec_id)
                .build();
            let outcome = evm.transact().map_err(|err| ReplayError::Evm(err.to_string()))?;
            (outcome, evm.context.evm.db.missing_blockhash)
        }
        Some(config) => {
            let inspector = ValueGraphInspector::new(block, tx, config.clone());
            let mut evm = Evm::builder()
                .with_db(db)
                .with_external_context(inspector)
                .with_block_env(block_env)
                .with_tx_env(tx_env)
                .modify_cfg_env(|cfg| cfg.chain_id = MAINNET_CHAIN_ID)
                .with_spec_id(spec_id)
                .append_handler_register(inspector_handle_register)
                .build();
            let outcome = evm.transact().map_err(|err| ReplayError::Evm(err.to_string()))?;
            (outcome, evm.context.evm.db.missing_blockhash)
        }
    };

    if mode == ReplayMode::Verify {
        if let Some(number) = missing_blockhash {
            return Err(ReplayError::MissingBlockhash(number));
        }
    }

    Ok(extract_snapshot(substate, spec_id, outcome))
}

fn extract_snapshot(
    substate: &Substate,
    spec_id: SpecId,
    outcome: ResultAndState,
) -> ExecutionSnapshot {
    let ResultAndState { result, state } = outcome;

    let logs: Vec<Log> = result
        .logs()
        .iter()
        .map(|log| Log {
            address: db::to_eth_address(log.address),
            topics: log.data.topics().iter().map(|topic| db::to_eth_h256(*topic)).collect(),
            data: Bytes::copy_from_slice(&log.data.data),
        })
        .collect();

    let contract_address = if substate.message.is_create() {
        create_address(substate.message.from, substate.message.nonce)
    } else {
        Address::zero()
    };

    let failure = match &result {
        ExecutionResult::Success { .. } => None,
        ExecutionResult::Revert { .. } => Some(ReplayFailure {
            reason: "execution reverted".to_string(),
            out_of_gas: false,
        }),
        ExecutionResult::Halt { reason, .. } => Some(ReplayFailure {
            reason: format!("{reason:?}"),
            out_of_gas: matches!(reason, HaltReason::OutOfGas(_)),
        }),
    };

    let snapshot_result = SubstateResult {
        status: if result.is_success() {
            STATUS_SUCCESS
        } else {
            STATUS_FAILED
        },
        bloom: bloom_from_logs(&logs),
        logs,
        contract_address,
        gas_used: result.gas_used(),
    };

    ExecutionSnapshot {
        alloc: post_alloc(&substate.input_alloc, &state, spec_id),
        result: snapshot_result,
        failure,
    }
}

/// Folds revm's touched-account state over the input allocation into the
/// minimum sufficient poststate: accounts that differ from their input entry.
/// Destroyed accounts (and, from Spurious Dragon on, touched-empty ones)
/// disappear; surviving storage is the input slots merged with the net
/// writes, zero-valued slots dropped.
fn post_alloc(input: &SubstateAlloc, state: &EvmState, spec_id: SpecId) -> SubstateAlloc {
    let mut output = SubstateAlloc::new();
    for (revm_address, account) in state {
        if !account.is_touched() {
            continue;
        }
        let address = db::to_eth_address(*revm_address);
        let state_clear = SpecId::enabled(spec_id, SpecId::SPURIOUS_DRAGON);
        if account.is_selfdestructed() || (account.is_empty() && state_clear) {
            continue;
        }

        let input_account = input.get(&address);
        let mut storage = input_account
            .map(|account| account.storage.clone())
            .unwrap_or_default();
        for (key, slot) in &account.storage {
            let key = db::to_eth_h256(B256::from(key.to_be_bytes::<32>()));
            if slot.present_value.is_zero() {
                storage.remove(&key);
            } else {
                storage.insert(
                    key,
                    db::to_eth_h256(B256::from(slot.present_value.to_be_bytes::<32>())),
                );
            }
        }

        let code = account
            .info
            .code
            .as_ref()
            .map(|code| Bytes::copy_from_slice(code.original_byte_slice()))
            .unwrap_or_default();

        let replayed = SubstateAccount {
            nonce: account.info.nonce,
            balance: db::to_eth_u256(account.info.balance),
            storage,
            code,
        };
        if input_account != Some(&replayed) {
            output.insert(address, replayed);
        }
    }
    output
}
