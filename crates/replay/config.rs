use retrace_common::types::{HardFork, Substate};
use std::path::PathBuf;

/// Driver configuration, assembled by the CLI and passed down whole; workers
/// never consult flags on their own.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub workers: usize,
    pub skip_transfer_txs: bool,
    pub skip_call_txs: bool,
    pub skip_create_txs: bool,
    pub hard_fork: HardFork,
    /// CSV destination for per-frame liveness logs; enables graph tracing.
    pub call_log: Option<PathBuf>,
    /// Directory for per-frame GraphViz renderings; enables graph tracing.
    pub graph_dir: Option<PathBuf>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            workers: 4,
            skip_transfer_txs: false,
            skip_call_txs: false,
            skip_create_txs: false,
            hard_fork: HardFork::Mainnet,
            call_log: None,
            graph_dir: None,
        }
    }
}

impl ReplayConfig {
    pub fn traces_graphs(&self) -> bool {
        self.call_log.is_some() || self.graph_dir.is_some()
    }
}

/// Per-transaction filters over the message target.
pub fn skip_transaction(config: &ReplayConfig, substate: &Substate) -> bool {
    match substate.message.to {
        Some(to) => {
            let has_code = substate
                .input_alloc
                .get(&to)
                .is_some_and(|account| !account.code.is_empty());
            (config.skip_transfer_txs && !has_code) || (config.skip_call_txs && has_code)
        }
        None => config.skip_create_txs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ethereum_types::{Address, U256};
    use retrace_common::types::SubstateAccount;

    fn substate_with_target(code: Option<&'static [u8]>) -> Substate {
        let mut substate = Substate::default();
        match code {
            None => substate.message.to = None,
            Some(code) => {
                let target = Address::from_low_u64_be(0xbb);
                substate.message.to = Some(target);
                substate.input_alloc.insert(
                    target,
                    SubstateAccount::new(0, U256::zero(), Bytes::from_static(code)),
                );
            }
        }
        substate
    }

    #[test]
    fn filters_select_by_target_kind() {
        let transfer = substate_with_target(Some(b""));
        let call = substate_with_target(Some(b"\x60\x00"));
        let create = substate_with_target(None);

        let config = ReplayConfig {
            skip_transfer_txs: true,
            ..Default::default()
        };
        assert!(skip_transaction(&config, &transfer));
        assert!(!skip_transaction(&config, &call));
        assert!(!skip_transaction(&config, &create));

        let config = ReplayConfig {
            skip_call_txs: true,
            ..Default::default()
        };
        assert!(!skip_transaction(&config, &transfer));
        assert!(skip_transaction(&config, &call));

        let config = ReplayConfig {
            skip_create_txs: true,
            ..Default::default()
        };
        assert!(!skip_transaction(&config, &transfer));
        assert!(skip_transaction(&config, &create));

        // all three: only calls into code survive
        let config = ReplayConfig {
            skip_transfer_txs: true,
            skip_call_txs: false,
            skip_create_txs: true,
            ..Default::default()
        };
        assert!(skip_transaction(&config, &transfer));
        assert!(!skip_transaction(&config, &call));
        assert!(skip_transaction(&config, &create));
    }
}
