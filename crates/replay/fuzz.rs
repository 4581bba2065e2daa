use bytes::Bytes;
use ethereum_types::Address;
use retrace_common::types::HardFork;
use retrace_storage::SubstateStore;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::executor::{ReplayMode, apply_substate};

fn parse_block_tx(token: &str) -> Result<(u64, usize), ReplayError> {
    let invalid = || ReplayError::VmConfig(format!("failed to parse blockTx data: {token}"));
    let (block, tx) = token.split_once('_').ok_or_else(invalid)?;
    Ok((
        block.parse().map_err(|_| invalid())?,
        tx.parse().map_err(|_| invalid())?,
    ))
}

/// Replays the fuzz matrix for one contract: every candidate call-data blob
/// against every recorded transaction targeting `address`, with the blob
/// substituted into the historical message. Execution errors and reverts are
/// expected outcomes of fuzzed inputs and are swallowed.
pub fn contract_fuzzer(
    store: &SubstateStore,
    config: &ReplayConfig,
    address: Address,
    call_data_path: &Path,
    block_txs_path: &Path,
) -> Result<u64, ReplayError> {
    let call_data_list: Vec<Bytes> = fs::read_to_string(call_data_path)?
        .split_whitespace()
        .map(|token| {
            hex::decode(token.trim_start_matches("0x"))
                .map(Bytes::from)
                .map_err(|err| ReplayError::VmConfig(format!("bad call data {token}: {err}")))
        })
        .collect::<Result<_, _>>()?;

    let block_txs: Vec<(u64, usize)> = fs::read_to_string(block_txs_path)?
        .split_whitespace()
        .map(parse_block_tx)
        .collect::<Result<_, _>>()?;

    info!(
        "ContractFuzzer: {} call data blobs x {} transactions against {address:#x}",
        call_data_list.len(),
        block_txs.len()
    );

    let mut runs = 0u64;
    for call_data in &call_data_list {
        for (block, tx) in &block_txs {
            fuzz_one(store, config, address, call_data.clone(), *block, *tx)?;
            runs += 1;
        }
    }
    info!("ContractFuzzer: executed {runs} fuzzed messages");
    Ok(runs)
}

fn fuzz_one(
    store: &SubstateStore,
    config: &ReplayConfig,
    address: Address,
    call_data: Bytes,
    block: u64,
    tx: usize,
) -> Result<(), ReplayError> {
    let Some(mut substate) = store.get_substate(block, tx)? else {
        return Err(ReplayError::MissingSubstate {
            block_tx: format!("{block}_{tx}"),
        });
    };
    if substate.message.to != Some(address) {
        return Err(ReplayError::VmConfig(format!(
            "{block}_{tx}'s inputMessage.To is not address {address:#x}"
        )));
    }
    substate.message.data = call_data;

    // fuzzed inputs routinely revert or trap; the prestate snapshot is
    // discarded either way
    if let Err(err) = apply_substate(
        block,
        tx,
        &substate,
        config.hard_fork,
        ReplayMode::Fuzz,
        None,
    ) {
        debug!("{block}_{tx}: fuzzed execution failed: {err}");
    }
    Ok(())
}

/// Builds the offline address-to-substate index: for every transaction in
/// the range whose target has non-empty code in its prestate, the
/// `"<block>_<tx>"` key is appended under the target address. Each address
/// materializes as a lowercase hex file of newline-separated keys.
pub fn address_to_substate(
    store: &SubstateStore,
    first: u64,
    last: u64,
    out_dir: &Path,
) -> Result<u64, ReplayError> {
    if first > last {
        return Err(ReplayError::VmConfig(format!(
            "first block {first} is larger than last block {last}"
        )));
    }

    let mut index: BTreeMap<Address, Vec<String>> = BTreeMap::new();
    let mut total = 0u64;
    for block in first..=last {
        for tx in 0usize.. {
            if !store.has_substate(block, tx)? {
                break;
            }
            let Some(substate) = store.get_substate(block, tx)? else {
                break;
            };
            let Some(to) = substate.message.to else {
                continue;
            };
            let has_code = substate
                .input_alloc
                .get(&to)
                .is_some_and(|account| !account.code.is_empty());
            if !has_code {
                continue;
            }
            index.entry(to).or_default().push(format!("{block}_{tx}"));
            total += 1;
        }
        if block % 10_000 == 0 {
            info!(
                "AddressToSubstate: number = {block}, len(a2s) = {}, totalBlockTx = {total}",
                index.len()
            );
        }
    }

    fs::create_dir_all(out_dir)?;
    for (address, block_txs) in &index {
        let path = out_dir.join(format!("{address:#x}"));
        fs::write(path, block_txs.join("\n") + "\n")?;
    }
    info!(
        "AddressToSubstate: wrote {} address files, {total} keys",
        index.len()
    );
    Ok(total)
}
