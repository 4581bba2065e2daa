use ethereum_types::H256;
use retrace_common::types::SubstateDecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rocksdb error: {0}")]
    Backend(#[from] rocksdb::Error),
    #[error("code hash {0:#x} not present in code store")]
    MissingCode(H256),
    #[error("corrupt substate record {key}: {source}")]
    Corrupt {
        key: String,
        source: SubstateDecodeError,
    },
}
