use retrace_storage::SubstateStore;
use tracing::info;

use crate::config::ReplayConfig;
use crate::driver::{RangeSummary, run_block_range};
use crate::error::ReplayError;

/// Copies a block range from the source store into a fresh target store,
/// re-encoding every record and carrying its code blobs along.
pub fn dump_substate(
    source: &SubstateStore,
    target: &SubstateStore,
    config: &ReplayConfig,
    first: u64,
    last: u64,
) -> Result<RangeSummary, ReplayError> {
    info!("DumpSubstate: blocks {first}..={last}, #worker = {}", config.workers);

    let task = |block: u64| dump_block(source, target, block);
    let summary = run_block_range(first, last, config.workers, &task)?;
    summary.log("DumpSubstate");
    Ok(summary)
}

fn dump_block(
    source: &SubstateStore,
    target: &SubstateStore,
    block: u64,
) -> Result<i64, ReplayError> {
    let mut copied = 0i64;
    for tx in 0usize.. {
        if !source.has_substate(block, tx)? {
            break;
        }
        let Some(substate) = source.get_substate(block, tx)? else {
            break;
        };
        target
            .put_substate(block, tx, &substate)
            .map_err(|err| ReplayError::from(err).at(block, tx))?;
        copied += 1;
    }
    Ok(copied)
}
