use retrace_storage::StoreError;
use thiserror::Error;

use crate::check::Inconsistency;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("getHash({0}) invoked, blockhash for that block not provided")]
    MissingBlockhash(u64),
    #[error("vm configuration error: {0}")]
    VmConfig(String),
    #[error("evm error: {0}")]
    Evm(String),
    #[error("{0}")]
    Inconsistent(Inconsistency),
    #[error("no substate recorded for {block_tx}")]
    MissingSubstate { block_tx: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{block_tx}: {source}")]
    Tx {
        block_tx: String,
        #[source]
        source: Box<ReplayError>,
    },
}

impl ReplayError {
    /// Attaches the failing transaction's `block_tx` key.
    pub fn at(self, block: u64, tx: usize) -> Self {
        ReplayError::Tx {
            block_tx: format!("{block}_{tx}"),
            source: Box::new(self),
        }
    }

    /// The innermost error, unwrapping transaction context.
    pub fn root(&self) -> &ReplayError {
        match self {
            ReplayError::Tx { source, .. } => source.root(),
            other => other,
        }
    }
}
