use crate::types::{CodeResolver, SubstateDecodeError};
use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::keccak;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory code store keyed by keccak256, for codec tests.
#[derive(Default)]
pub(crate) struct TestCodeStore(Mutex<HashMap<H256, Bytes>>);

impl TestCodeStore {
    pub(crate) fn put(&self, code: Bytes) {
        self.0.lock().unwrap().insert(keccak(&code), code);
    }
}

impl CodeResolver for TestCodeStore {
    fn resolve_code(&self, hash: H256) -> Result<Bytes, SubstateDecodeError> {
        self.0
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or(SubstateDecodeError::MissingCode(hash))
    }
}
