use retrace_common::types::HardFork;
use retrace_storage::SubstateStore;
use tracing::{error, info};

use crate::check::check_equivalence;
use crate::config::{ReplayConfig, skip_transaction};
use crate::driver::{RangeSummary, run_block_range};
use crate::error::ReplayError;
use crate::executor::{ReplayMode, apply_substate};

/// Verification replay (`t8n-substate`): re-executes every recorded
/// transaction in `[first, last]` under mainnet rules and requires the
/// result and poststate to match the recording exactly.
pub fn transition_substate(
    store: &SubstateStore,
    config: &ReplayConfig,
    first: u64,
    last: u64,
) -> Result<RangeSummary, ReplayError> {
    info!("TransitionSubstate: blocks {first}..={last}, #worker = {}", config.workers);

    let task = |block: u64| verify_block(store, config, block);
    let summary = run_block_range(first, last, config.workers, &task)?;
    summary.log("TransitionSubstate");
    Ok(summary)
}

fn verify_block(
    store: &SubstateStore,
    config: &ReplayConfig,
    block: u64,
) -> Result<i64, ReplayError> {
    let mut executed = 0i64;
    for tx in 0usize.. {
        if !store.has_substate(block, tx)? {
            break;
        }
        let Some(substate) = store.get_substate(block, tx)? else {
            break;
        };
        if skip_transaction(config, &substate) {
            continue;
        }

        let snapshot = apply_substate(
            block,
            tx,
            &substate,
            HardFork::Mainnet,
            ReplayMode::Verify,
            None,
        )
        .map_err(|err| err.at(block, tx))?;

        if let Err(inconsistency) = check_equivalence(
            &substate.result,
            &substate.output_alloc,
            &snapshot.result,
            &snapshot.alloc,
        ) {
            error!("{block}_{tx}: {inconsistency}");
            dump_mismatch(&substate, &snapshot.result, &snapshot.alloc);
            return Err(ReplayError::Inconsistent(inconsistency).at(block, tx));
        }
        executed += 1;
    }
    Ok(executed)
}

/// On a mismatch both sides are dumped in the JSON exchange form, the way a
/// human will actually diff them.
fn dump_mismatch(
    substate: &retrace_common::types::Substate,
    replayed_result: &retrace_common::types::SubstateResult,
    replayed_alloc: &retrace_common::types::SubstateAlloc,
) {
    let sections: [(&str, serde_json::Result<String>); 6] = [
        ("inputAlloc", serde_json::to_string_pretty(&substate.input_alloc)),
        ("inputEnv", serde_json::to_string_pretty(&substate.env)),
        ("inputMessage", serde_json::to_string_pretty(&substate.message)),
        ("outputAlloc", serde_json::to_string_pretty(&substate.output_alloc)),
        ("replayedAlloc", serde_json::to_string_pretty(replayed_alloc)),
        ("outputResult", serde_json::to_string_pretty(&substate.result)),
    ];
    for (name, json) in sections {
        if let Ok(json) = json {
            error!("{name}:\n{json}");
        }
    }
    if let Ok(json) = serde_json::to_string_pretty(replayed_result) {
        error!("replayedResult:\n{json}");
    }
}
