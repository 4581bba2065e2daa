use retrace_common::types::{SubstateAlloc, SubstateResult};
use std::fmt;

/// First divergence found between the recorded and re-executed poststate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inconsistency {
    /// Which side of the comparison diverged.
    pub kind: InconsistencyKind,
    /// Dotted path of the first differing field, e.g. `alloc[0x…].nonce`.
    pub field: String,
    pub recorded: String,
    pub replayed: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InconsistencyKind {
    Result,
    Alloc,
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.kind {
            InconsistencyKind::Result => "result",
            InconsistencyKind::Alloc => "alloc",
        };
        write!(
            f,
            "inconsistent output: {side} ({}: recorded {}, replayed {})",
            self.field, self.recorded, self.replayed
        )
    }
}

fn diff(
    kind: InconsistencyKind,
    field: impl Into<String>,
    recorded: impl fmt::Debug,
    replayed: impl fmt::Debug,
) -> Inconsistency {
    Inconsistency {
        kind,
        field: field.into(),
        recorded: format!("{recorded:?}"),
        replayed: format!("{replayed:?}"),
    }
}

/// Compares recorded and re-executed results field by field.
pub fn check_result(
    recorded: &SubstateResult,
    replayed: &SubstateResult,
) -> Result<(), Inconsistency> {
    use InconsistencyKind::Result as R;

    if recorded.status != replayed.status {
        return Err(diff(R, "status", recorded.status, replayed.status));
    }
    if recorded.bloom != replayed.bloom {
        return Err(diff(R, "bloom", recorded.bloom, replayed.bloom));
    }
    if recorded.logs.len() != replayed.logs.len() {
        return Err(diff(R, "logs.len", recorded.logs.len(), replayed.logs.len()));
    }
    for (index, (recorded_log, replayed_log)) in
        recorded.logs.iter().zip(&replayed.logs).enumerate()
    {
        if recorded_log.address != replayed_log.address {
            return Err(diff(
                R,
                format!("logs[{index}].address"),
                recorded_log.address,
                replayed_log.address,
            ));
        }
        if recorded_log.topics != replayed_log.topics {
            return Err(diff(
                R,
                format!("logs[{index}].topics"),
                &recorded_log.topics,
                &replayed_log.topics,
            ));
        }
        if recorded_log.data != replayed_log.data {
            return Err(diff(
                R,
                format!("logs[{index}].data"),
                &recorded_log.data,
                &replayed_log.data,
            ));
        }
    }
    if recorded.contract_address != replayed.contract_address {
        return Err(diff(
            R,
            "contract_address",
            recorded.contract_address,
            replayed.contract_address,
        ));
    }
    if recorded.gas_used != replayed.gas_used {
        return Err(diff(R, "gas_used", recorded.gas_used, replayed.gas_used));
    }
    Ok(())
}

/// Compares recorded and re-executed post allocations account by account.
pub fn check_alloc(
    recorded: &SubstateAlloc,
    replayed: &SubstateAlloc,
) -> Result<(), Inconsistency> {
    use InconsistencyKind::Alloc as A;

    for (address, recorded_account) in recorded {
        let Some(replayed_account) = replayed.get(address) else {
            return Err(diff(A, format!("alloc[{address:#x}]"), "present", "absent"));
        };
        if recorded_account.nonce != replayed_account.nonce {
            return Err(diff(
                A,
                format!("alloc[{address:#x}].nonce"),
                recorded_account.nonce,
                replayed_account.nonce,
            ));
        }
        if recorded_account.balance != replayed_account.balance {
            return Err(diff(
                A,
                format!("alloc[{address:#x}].balance"),
                recorded_account.balance,
                replayed_account.balance,
            ));
        }
        if recorded_account.code != replayed_account.code {
            return Err(diff(
                A,
                format!("alloc[{address:#x}].code"),
                &recorded_account.code,
                &replayed_account.code,
            ));
        }
        if recorded_account.storage != replayed_account.storage {
            return Err(diff(
                A,
                format!("alloc[{address:#x}].storage"),
                &recorded_account.storage,
                &replayed_account.storage,
            ));
        }
    }
    if let Some(address) = replayed.keys().find(|address| !recorded.contains_key(address)) {
        return Err(diff(A, format!("alloc[{address:#x}]"), "absent", "present"));
    }
    Ok(())
}

pub fn check_equivalence(
    recorded_result: &SubstateResult,
    recorded_alloc: &SubstateAlloc,
    replayed_result: &SubstateResult,
    replayed_alloc: &SubstateAlloc,
) -> Result<(), Inconsistency> {
    check_result(recorded_result, replayed_result)?;
    check_alloc(recorded_alloc, replayed_alloc)
}
