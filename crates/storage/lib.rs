pub mod error;

use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::keccak;
use retrace_common::types::{CodeResolver, Substate, SubstateDecodeError};
use rocksdb::{BlockBasedOptions, Cache, DB, ErrorKind, Options};
use std::path::Path;
use tracing::{info, warn};

pub use error::StoreError;

const SUBSTATE_DIR: &str = "substate";
const CODE_DIR: &str = "code";

/// 1 GiB LRU block cache shared by both partitions.
const BLOCK_CACHE_BYTES: usize = 1 << 30;
/// Kept low to avoid running into the process fd limit on large stores.
const MAX_OPEN_FILES: i32 = 50;

/// The two-partition substate store: `substate/` maps `"<block>_<tx>"` keys
/// to canonical substate records, `code/` maps keccak256 hashes to bytecode.
///
/// One handle is opened by the driver and shared by reference across worker
/// threads; rocksdb synchronizes concurrent access internally.
#[derive(Debug)]
pub struct SubstateStore {
    substate_db: DB,
    code_db: DB,
}

fn db_options(cache: &Cache, read_only: bool) -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(!read_only);
    opts.set_max_open_files(MAX_OPEN_FILES);

    let mut table_opts = BlockBasedOptions::default();
    table_opts.set_block_cache(cache);
    opts.set_block_based_table_factory(&table_opts);
    opts
}

fn open_db(path: &Path, opts: &Options, read_only: bool) -> Result<DB, StoreError> {
    let open = |opts: &Options| {
        if read_only {
            DB::open_for_read_only(opts, path, false)
        } else {
            DB::open(opts, path)
        }
    };

    match open(opts) {
        Ok(db) => Ok(db),
        Err(err) if err.kind() == ErrorKind::Corruption => {
            warn!("substate partition {} is corrupted, repairing", path.display());
            DB::repair(opts, path)?;
            Ok(open(opts)?)
        }
        Err(err) => Err(err.into()),
    }
}

impl SubstateStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_mode(root.as_ref(), false)
    }

    pub fn open_read_only(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_mode(root.as_ref(), true)
    }

    fn open_with_mode(root: &Path, read_only: bool) -> Result<Self, StoreError> {
        let cache = Cache::new_lru_cache(BLOCK_CACHE_BYTES);
        let opts = db_options(&cache, read_only);

        let substate_db = open_db(&root.join(SUBSTATE_DIR), &opts, read_only)?;
        let code_db = open_db(&root.join(CODE_DIR), &opts, read_only)?;
        info!("opened substate store at {}", root.display());

        Ok(SubstateStore {
            substate_db,
            code_db,
        })
    }

    fn substate_key(block: u64, tx: usize) -> Vec<u8> {
        format!("{block}_{tx}").into_bytes()
    }

    /// Stores a bytecode blob under its keccak256. Idempotent.
    pub fn put_code(&self, code: &[u8]) -> Result<H256, StoreError> {
        let hash = keccak(code);
        self.code_db.put(hash.as_bytes(), code)?;
        Ok(hash)
    }

    pub fn get_code(&self, hash: H256) -> Result<Bytes, StoreError> {
        match self.code_db.get(hash.as_bytes())? {
            Some(code) => Ok(Bytes::from(code)),
            None => Err(StoreError::MissingCode(hash)),
        }
    }

    pub fn has_substate(&self, block: u64, tx: usize) -> Result<bool, StoreError> {
        Ok(self
            .substate_db
            .get_pinned(Self::substate_key(block, tx))?
            .is_some())
    }

    pub fn get_substate(&self, block: u64, tx: usize) -> Result<Option<Substate>, StoreError> {
        let key = Self::substate_key(block, tx);
        let Some(value) = self.substate_db.get(&key)? else {
            return Ok(None);
        };
        let substate = Substate::decode(&value, self).map_err(|source| StoreError::Corrupt {
            key: format!("{block}_{tx}"),
            source,
        })?;
        Ok(Some(substate))
    }

    /// Writes a substate record, persisting every bytecode blob it refers to
    /// first so the record never dangles.
    pub fn put_substate(&self, block: u64, tx: usize, substate: &Substate) -> Result<(), StoreError> {
        for code in substate.referenced_codes() {
            self.put_code(code)?;
        }
        self.substate_db
            .put(Self::substate_key(block, tx), substate.encode())?;
        Ok(())
    }

}

impl CodeResolver for SubstateStore {
    fn resolve_code(&self, hash: H256) -> Result<Bytes, SubstateDecodeError> {
        match self.get_code(hash) {
            Ok(code) => Ok(code),
            Err(StoreError::MissingCode(hash)) => Err(SubstateDecodeError::MissingCode(hash)),
            Err(err) => Err(SubstateDecodeError::CodeStore(err.to_string())),
        }
    }
}
