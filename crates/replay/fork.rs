use retrace_common::types::{STATUS_SUCCESS, Substate, SubstateAlloc};
use retrace_storage::SubstateStore;
use retrace_vgraph::{CallLogSink, GraphConfig, GraphCounters};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::check::check_equivalence;
use crate::config::{ReplayConfig, skip_transaction};
use crate::driver::{RangeSummary, run_block_range};
use crate::error::ReplayError;
use crate::executor::{ExecutionSnapshot, ReplayMode, apply_substate};

/// Outcome class of one transaction replayed under re-targeted rules.
/// Classes are statistics, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReplayClass {
    Identical,
    InvalidAlloc,
    MoreGas,
    LessGas,
    OutOfGas,
    Misc,
    /// The recorded transaction succeeded but the replay failed; carries the
    /// replay's runtime error.
    Runtime(String),
}

impl fmt::Display for ReplayClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayClass::Identical => f.write_str("identical"),
            ReplayClass::InvalidAlloc => f.write_str("invalid alloc in replay-fork"),
            ReplayClass::MoreGas => f.write_str("more gas in replay-fork"),
            ReplayClass::LessGas => f.write_str("less gas in replay-fork"),
            ReplayClass::OutOfGas => f.write_str("out of gas in replay-fork"),
            ReplayClass::Misc => f.write_str("misc in replay-fork"),
            ReplayClass::Runtime(reason) => f.write_str(reason),
        }
    }
}

/// Fork-replay alloc comparison: nonce, code and storage only. Balances
/// drift with gas schedules across forks and are deliberately not flagged.
fn fork_alloc_matches(recorded: &SubstateAlloc, replayed: &SubstateAlloc) -> bool {
    if recorded.len() != replayed.len() {
        return false;
    }
    recorded.iter().all(|(address, recorded_account)| {
        replayed.get(address).is_some_and(|replayed_account| {
            recorded_account.nonce == replayed_account.nonce
                && recorded_account.code == replayed_account.code
                && recorded_account.storage == replayed_account.storage
        })
    })
}

/// Classifies a fork replay against the recording, per the outcome table of
/// the gas-variance study.
pub fn classify(substate: &Substate, replay: &Result<ExecutionSnapshot, ReplayError>) -> ReplayClass {
    let snapshot = match replay {
        Err(error) => return ReplayClass::Runtime(error.root().to_string()),
        Ok(snapshot) => snapshot,
    };

    let recorded_result = &substate.result;
    let recorded_alloc = &substate.output_alloc;
    if check_equivalence(
        recorded_result,
        recorded_alloc,
        &snapshot.result,
        &snapshot.alloc,
    )
    .is_ok()
    {
        return ReplayClass::Identical;
    }

    let recorded_ok = recorded_result.status == STATUS_SUCCESS;
    let replayed_ok = snapshot.result.status == STATUS_SUCCESS;
    match (recorded_ok, replayed_ok) {
        (true, true) => {
            if !fork_alloc_matches(recorded_alloc, &snapshot.alloc) {
                ReplayClass::InvalidAlloc
            } else if snapshot.result.gas_used > recorded_result.gas_used {
                ReplayClass::MoreGas
            } else if snapshot.result.gas_used < recorded_result.gas_used {
                ReplayClass::LessGas
            } else {
                ReplayClass::Misc
            }
        }
        (true, false) => match &snapshot.failure {
            Some(failure) if failure.out_of_gas => ReplayClass::OutOfGas,
            Some(failure) => ReplayClass::Runtime(failure.reason.clone()),
            None => ReplayClass::Misc,
        },
        (false, _) => ReplayClass::Misc,
    }
}

pub type ReplayForkStats = HashMap<String, i64>;

/// Hard-fork replay (`replay-fork`): re-executes the range under the
/// configured rule set and aggregates outcome classes instead of failing.
/// Missing blockhashes are non-fatal here. When graph tracing is configured
/// the value graph and call-log sink are attached to every transaction.
pub fn replay_fork(
    store: &SubstateStore,
    config: &ReplayConfig,
    first: u64,
    last: u64,
) -> Result<(RangeSummary, ReplayForkStats), ReplayError> {
    info!(
        "ReplayFork: blocks {first}..={last}, hard-fork {}, #worker = {}",
        config.hard_fork, config.workers
    );

    let counters = Arc::new(GraphCounters::default());
    let sink = match &config.call_log {
        Some(path) => Some(CallLogSink::spawn(path)?),
        None => None,
    };
    let graph_config = config.traces_graphs().then(|| {
        if let Some(dir) = &config.graph_dir {
            let _ = std::fs::create_dir_all(dir);
        }
        GraphConfig {
            counters: counters.clone(),
            call_log: sink.as_ref().map(|sink| sink.sender()),
            graph_dir: config.graph_dir.clone(),
        }
    });

    let stats: Mutex<ReplayForkStats> = Mutex::new(HashMap::new());
    let task = |block: u64| {
        let block_stats = replay_fork_block(store, config, graph_config.as_ref(), block)?;
        let executed: i64 = block_stats.values().sum();
        let mut stats = stats.lock().expect("stats mutex poisoned");
        for (class, count) in block_stats {
            *stats.entry(class).or_default() += count;
        }
        Ok(executed)
    };
    let summary = run_block_range(first, last, config.workers, &task)?;
    summary.log("ReplayFork");

    if let Some(sink) = sink {
        sink.close()?;
    }
    if config.traces_graphs() {
        let (total, live) = counters.snapshot();
        info!("ReplayFork: value graph: {total} instructions, {live} live");
    }

    let stats = stats.into_inner().expect("stats mutex poisoned");
    info!("ReplayFork: = list of differences =");
    info!("ReplayFork: = {:>12} total #tx", summary.txs);
    let mut classes: Vec<_> = stats.iter().collect();
    classes.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (class, count) in classes {
        info!("ReplayFork: = {count:>12} {class}");
    }

    Ok((summary, stats))
}

fn replay_fork_block(
    store: &SubstateStore,
    config: &ReplayConfig,
    graph: Option<&GraphConfig>,
    block: u64,
) -> Result<ReplayForkStats, ReplayError> {
    let mut block_stats = ReplayForkStats::new();
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

        let replay = apply_substate(
            block,
            tx,
            &substate,
            config.hard_fork,
            ReplayMode::Fork,
            graph,
        );
        let class = classify(&substate, &replay);
        *block_stats.entry(class.to_string()).or_default() += 1;
    }
    Ok(block_stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ReplayFailure;
    use bytes::Bytes;
    use ethereum_types::{Address, U256};
    use retrace_common::types::{SubstateAccount, SubstateResult};

    fn recorded_ok() -> Substate {
        let mut substate = Substate::default();
        substate.result = SubstateResult {
            status: STATUS_SUCCESS,
            gas_used: 30_000,
            ..Default::default()
        };
        substate.output_alloc.insert(
            Address::from_low_u64_be(1),
            SubstateAccount::new(5, U256::from(100), Bytes::new()),
        );
        substate
    }

    fn snapshot_like(substate: &Substate) -> ExecutionSnapshot {
        ExecutionSnapshot {
            result: substate.result.clone(),
            alloc: substate.output_alloc.clone(),
            failure: None,
        }
    }

    #[test]
    fn matching_replay_is_identical() {
        let substate = recorded_ok();
        let replay = Ok(snapshot_like(&substate));
        assert_eq!(classify(&substate, &replay), ReplayClass::Identical);
    }

    #[test]
    fn balance_only_drift_is_misc() {
        let substate = recorded_ok();
        let mut snapshot = snapshot_like(&substate);
        snapshot
            .alloc
            .get_mut(&Address::from_low_u64_be(1))
            .unwrap()
            .balance = U256::from(42);
        assert_eq!(classify(&substate, &Ok(snapshot)), ReplayClass::Misc);
    }

    #[test]
    fn gas_divergence_classifies_by_direction() {
        let substate = recorded_ok();

        let mut more = snapshot_like(&substate);
        more.result.gas_used = 31_000;
        assert_eq!(classify(&substate, &Ok(more)), ReplayClass::MoreGas);

        let mut less = snapshot_like(&substate);
        less.result.gas_used = 29_000;
        assert_eq!(classify(&substate, &Ok(less)), ReplayClass::LessGas);
    }

    #[test]
    fn storage_divergence_is_invalid_alloc() {
        let substate = recorded_ok();
        let mut snapshot = snapshot_like(&substate);
        snapshot
            .alloc
            .get_mut(&Address::from_low_u64_be(1))
            .unwrap()
            .storage
            .insert(
                ethereum_types::H256::from_low_u64_be(1),
                ethereum_types::H256::from_low_u64_be(9),
            );
        assert_eq!(classify(&substate, &Ok(snapshot)), ReplayClass::InvalidAlloc);
    }

    #[test]
    fn failed_replay_of_successful_recording_surfaces_the_reason() {
        let substate = recorded_ok();

        let mut reverted = snapshot_like(&substate);
        reverted.result.status = 0;
        reverted.failure = Some(ReplayFailure {
            reason: "execution reverted".into(),
            out_of_gas: false,
        });
        assert_eq!(
            classify(&substate, &Ok(reverted)),
            ReplayClass::Runtime("execution reverted".into())
        );

        let mut oog = snapshot_like(&substate);
        oog.result.status = 0;
        oog.failure = Some(ReplayFailure {
            reason: "OutOfGas(Basic)".into(),
            out_of_gas: true,
        });
        assert_eq!(classify(&substate, &Ok(oog)), ReplayClass::OutOfGas);
    }

    #[test]
    fn failed_recording_is_misc() {
        let mut substate = recorded_ok();
        substate.result.status = 0;
        let mut snapshot = snapshot_like(&substate);
        snapshot.result.gas_used = 12;
        assert_eq!(classify(&substate, &Ok(snapshot)), ReplayClass::Misc);
    }
}
