use clap::{Parser as ClapParser, Subcommand as ClapSubcommand};
use ethereum_types::Address;
use retrace_common::types::HardFork;
use retrace_replay::{
    ReplayConfig, ReplayError,
    dump::dump_substate,
    fork::replay_fork,
    fuzz::{address_to_substate, contract_fuzzer},
    inspect::inspect_substate,
    verify::transition_substate,
};
use retrace_storage::{StoreError, SubstateStore};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, filter::Directive};

pub const VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

#[derive(ClapParser)]
#[command(
    name = "retrace",
    version = VERSION_STRING,
    about = "Offline replay of recorded transaction substates"
)]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Subcommand,
}

#[derive(ClapParser)]
pub struct Options {
    #[arg(
        long = "substate-dir",
        value_name = "DIRECTORY",
        default_value = "substate-db",
        help = "Root of the substate store (substate/ and code/ partitions).",
        help_heading = "Store options"
    )]
    pub substate_dir: PathBuf,
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error",
        help_heading = "Logging options"
    )]
    pub log_level: Level,
}

#[derive(clap::Args)]
pub struct WorkerOpts {
    #[arg(
        long = "workers",
        value_name = "N",
        default_value_t = 4,
        help = "Number of parallel replay workers.",
        help_heading = "Replay options"
    )]
    pub workers: usize,
    #[arg(
        long = "skip-transfer-txs",
        help = "Skip regular transactions (ETH transfer).",
        help_heading = "Replay options"
    )]
    pub skip_transfer_txs: bool,
    #[arg(
        long = "skip-call-txs",
        help = "Skip CALL transactions targeting contract bytecode.",
        help_heading = "Replay options"
    )]
    pub skip_call_txs: bool,
    #[arg(
        long = "skip-create-txs",
        help = "Skip CREATE transactions.",
        help_heading = "Replay options"
    )]
    pub skip_create_txs: bool,
}

impl WorkerOpts {
    fn to_config(&self) -> ReplayConfig {
        ReplayConfig {
            workers: self.workers,
            skip_transfer_txs: self.skip_transfer_txs,
            skip_call_txs: self.skip_call_txs,
            skip_create_txs: self.skip_create_txs,
            ..Default::default()
        }
    }
}

#[derive(ClapSubcommand)]
pub enum Subcommand {
    #[command(
        name = "t8n-substate",
        about = "Verify replay equivalence over a block range."
    )]
    T8nSubstate {
        block_first: u64,
        block_last: u64,
        #[command(flatten)]
        worker_opts: WorkerOpts,
    },
    #[command(
        name = "replay-fork",
        about = "Replay a block range under a chosen hard fork and classify the deltas."
    )]
    ReplayFork {
        block_first: u64,
        block_last: u64,
        #[arg(
            long = "hard-fork",
            value_name = "BLOCK",
            default_value_t = 0,
            help = "Fork activation block selecting the rule set; 0 means Mainnet rules.",
            help_heading = "Replay options"
        )]
        hard_fork: u64,
        #[arg(
            long = "call-log",
            value_name = "FILE",
            help = "Write per-frame liveness statistics to this CSV file.",
            help_heading = "Value graph options"
        )]
        call_log: Option<PathBuf>,
        #[arg(
            long = "graph-dir",
            value_name = "DIRECTORY",
            help = "Write one GraphViz file per call frame into this directory.",
            help_heading = "Value graph options"
        )]
        graph_dir: Option<PathBuf>,
        #[command(flatten)]
        worker_opts: WorkerOpts,
    },
    #[command(
        name = "contract-fuzzer",
        about = "Replay the fuzz matrix for one contract address."
    )]
    ContractFuzzer {
        address: String,
        call_data_path: PathBuf,
        block_txs_path: PathBuf,
    },
    #[command(
        name = "address-to-substate",
        about = "Index contract-addressed transactions as per-address block_tx lists."
    )]
    AddressToSubstate {
        block_first: u64,
        block_last: u64,
        #[arg(
            long = "out-dir",
            value_name = "DIRECTORY",
            default_value = "address-to-substate",
            help_heading = "Index options"
        )]
        out_dir: PathBuf,
    },
    #[command(
        name = "dump-substate",
        about = "Copy a block range from the source store into a fresh target store."
    )]
    DumpSubstate {
        target_dir: PathBuf,
        first: u64,
        last: u64,
        #[command(flatten)]
        worker_opts: WorkerOpts,
    },
    #[command(
        name = "inspect-substate",
        about = "Print aggregate sizing statistics, with and without code-hash substitution."
    )]
    InspectSubstate { first: u64, last: u64 },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Usage(String),
}

impl CliError {
    /// Process exit code: 2 EVM error, 3 VM configuration error, 4 missing
    /// blockhash, 10 JSON error, 11 I/O error, 1 anything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Replay(error) => match error.root() {
                ReplayError::Evm(_) => 2,
                ReplayError::VmConfig(_) => 3,
                ReplayError::MissingBlockhash(_) => 4,
                ReplayError::Json(_) => 10,
                ReplayError::Io(_) => 11,
                ReplayError::Store(StoreError::Backend(_)) => 11,
                _ => 1,
            },
            CliError::Store(StoreError::Backend(_)) => 11,
            CliError::Store(_) => 1,
            CliError::Usage(_) => 1,
        }
    }
}

pub fn init_tracing(opts: &Options) {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(opts.log_level))
        .from_env_lossy();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn parse_address(value: &str) -> Result<Address, CliError> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|err| CliError::Usage(format!("invalid address {value:?}: {err}")))?;
    if bytes.len() != 20 {
        return Err(CliError::Usage(format!(
            "invalid address {value:?}: expected 20 bytes"
        )));
    }
    Ok(Address::from_slice(&bytes))
}

fn check_range(first: u64, last: u64) -> Result<(), CliError> {
    if first > last {
        return Err(CliError::Usage(format!(
            "first block {first} has larger number than last block {last}"
        )));
    }
    Ok(())
}

pub fn run(cli: CLI) -> Result<(), CliError> {
    let substate_dir = &cli.opts.substate_dir;
    match cli.command {
        Subcommand::T8nSubstate {
            block_first,
            block_last,
            worker_opts,
        } => {
            check_range(block_first, block_last)?;
            let store = SubstateStore::open_read_only(substate_dir)?;
            let config = worker_opts.to_config();
            transition_substate(&store, &config, block_first, block_last)?;
            Ok(())
        }
        Subcommand::ReplayFork {
            block_first,
            block_last,
            hard_fork,
            call_log,
            graph_dir,
            worker_opts,
        } => {
            check_range(block_first, block_last)?;
            let fork = HardFork::from_fork_block(hard_fork).ok_or_else(|| {
                ReplayError::VmConfig(format!("invalid hard-fork block number {hard_fork}"))
            })?;
            info!("ReplayFork: hard-fork: block {hard_fork} ({fork})");

            let store = SubstateStore::open_read_only(substate_dir)?;
            let mut config = worker_opts.to_config();
            config.hard_fork = fork;
            config.call_log = call_log;
            config.graph_dir = graph_dir;
            replay_fork(&store, &config, block_first, block_last)?;
            Ok(())
        }
        Subcommand::ContractFuzzer {
            address,
            call_data_path,
            block_txs_path,
        } => {
            let address = parse_address(&address)?;
            let store = SubstateStore::open_read_only(substate_dir)?;
            let config = ReplayConfig::default();
            contract_fuzzer(&store, &config, address, &call_data_path, &block_txs_path)?;
            Ok(())
        }
        Subcommand::AddressToSubstate {
            block_first,
            block_last,
            out_dir,
        } => {
            check_range(block_first, block_last)?;
            let store = SubstateStore::open_read_only(substate_dir)?;
            address_to_substate(&store, block_first, block_last, &out_dir)?;
            Ok(())
        }
        Subcommand::DumpSubstate {
            target_dir,
            first,
            last,
            worker_opts,
        } => {
            check_range(first, last)?;
            let source = SubstateStore::open_read_only(substate_dir)?;
            let target = SubstateStore::open(&target_dir)?;
            let config = worker_opts.to_config();
            dump_substate(&source, &target, &config, first, last)?;
            Ok(())
        }
        Subcommand::InspectSubstate { first, last } => {
            check_range(first, last)?;
            let store = SubstateStore::open_read_only(substate_dir)?;
            inspect_substate(&store, first, last)?;
            Ok(())
        }
    }
}
