use retrace_common::types::Substate;
use retrace_storage::SubstateStore;
use std::ops::Add;
use tracing::info;

use crate::error::ReplayError;

/// Decoded byte sizes of one substate, broken down by section.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubstateSize {
    pub total: i64,
    pub input_alloc: i64,
    pub output_alloc: i64,
    pub env: i64,
    pub message: i64,
    pub result: i64,
}

impl Add for SubstateSize {
    type Output = SubstateSize;

    fn add(self, other: SubstateSize) -> SubstateSize {
        SubstateSize {
            total: self.total + other.total,
            input_alloc: self.input_alloc + other.input_alloc,
            output_alloc: self.output_alloc + other.output_alloc,
            env: self.env + other.env,
            message: self.message + other.message,
            result: self.result + other.result,
        }
    }
}

fn alloc_size(alloc: &retrace_common::types::SubstateAlloc, code_by_hash: bool) -> i64 {
    alloc
        .values()
        .map(|account| {
            // address, nonce, balance
            let mut size = 20 + 8 + 32;
            size += (32 + 32) * account.storage.len() as i64;
            size += if code_by_hash {
                32
            } else {
                account.code.len() as i64
            };
            size
        })
        .sum()
}

impl SubstateSize {
    /// Flat sizing of the decoded representation; with `code_by_hash` every
    /// bytecode blob (and CREATE init code) counts as its 32 byte hash.
    pub fn measure(substate: &Substate, code_by_hash: bool) -> SubstateSize {
        let mut size = SubstateSize {
            input_alloc: alloc_size(&substate.input_alloc, code_by_hash),
            output_alloc: alloc_size(&substate.output_alloc, code_by_hash),
            ..Default::default()
        };

        // coinbase, difficulty, gasLimit, number, timestamp + hash pairs
        size.env = 20 + 32 + 8 + 8 + 8 + (8 + 32) * substate.env.block_hashes.len() as i64;

        // nonce, checkNonce, gasPrice, gas, from, value
        let mut message = 8 + 1 + 32 + 8 + 20 + 32;
        if substate.message.to.is_some() {
            message += 20;
        }
        message += if code_by_hash && substate.message.is_create() {
            32
        } else {
            substate.message.data.len() as i64
        };
        size.message = message;

        // status, bloom, contractAddress, gasUsed + logs
        let mut result = 8 + 256 + 20 + 8;
        for log in &substate.result.logs {
            result += 20 + 32 * log.topics.len() as i64 + log.data.len() as i64;
        }
        size.result = result;

        size.total = size.input_alloc + size.output_alloc + size.env + size.message + size.result;
        size
    }
}

/// Prints aggregate sizing statistics for a block range, with and without
/// replacing code by its hash.
pub fn inspect_substate(
    store: &SubstateStore,
    first: u64,
    last: u64,
) -> Result<(SubstateSize, SubstateSize), ReplayError> {
    if first > last {
        return Err(ReplayError::VmConfig(format!(
            "first block {first} is larger than last block {last}"
        )));
    }

    let mut flat = SubstateSize::default();
    let mut hashed = SubstateSize::default();
    for block in first..=last {
        if block % 10_000 == 0 {
            info!("InspectSubstate: number = {block}");
        }
        for tx in 0usize.. {
            if !store.has_substate(block, tx)? {
                break;
            }
            let Some(substate) = store.get_substate(block, tx)? else {
                break;
            };
            flat = flat + SubstateSize::measure(&substate, false);
            hashed = hashed + SubstateSize::measure(&substate, true);
        }
    }

    print_size("total substate size", &flat);
    print_size("total substate size (replaced code with code hash)", &hashed);
    Ok((flat, hashed))
}

fn print_size(title: &str, size: &SubstateSize) {
    println!("{title}: {}", size.total);
    println!("InputAlloc: {}", size.input_alloc);
    println!("OutputAlloc: {}", size.output_alloc);
    println!("Env: {}", size.env);
    println!("Message: {}", size.message);
    println!("Result: {}\n", size.result);
}
