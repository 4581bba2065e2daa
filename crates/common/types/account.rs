use bytes::{BufMut, Bytes};
use ethereum_types::{H256, U256};
use keccak_hash::keccak;
use retrace_rlp::{
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::serde_utils;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SubstateDecodeError {
    #[error(transparent)]
    Rlp(#[from] RLPDecodeError),
    #[error("code hash {0:#x} not present in code store")]
    MissingCode(H256),
    #[error("code store failure: {0}")]
    CodeStore(String),
}

/// Source of bytecode blobs referenced by hash from serialized substates.
pub trait CodeResolver {
    fn resolve_code(&self, hash: H256) -> Result<Bytes, SubstateDecodeError>;
}

/// One account of a substate's pre or post allocation.
///
/// The in-memory form carries the bytecode inline; the serialized form only
/// holds its keccak256 and relies on the code partition for the blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstateAccount {
    #[serde(with = "serde_utils::u64_hex_or_dec")]
    pub nonce: u64,
    #[serde(with = "serde_utils::u256_hex_or_dec")]
    pub balance: U256,
    pub storage: BTreeMap<H256, H256>,
    #[serde(with = "serde_utils::bytes_hex")]
    pub code: Bytes,
}

impl SubstateAccount {
    pub fn new(nonce: u64, balance: U256, code: Bytes) -> Self {
        SubstateAccount {
            nonce,
            balance,
            storage: BTreeMap::new(),
            code,
        }
    }

    pub fn code_hash(&self) -> H256 {
        keccak(&self.code)
    }

    /// Serialized as `[nonce, balance, code_hash, [[key, value], …]]` with
    /// storage pairs ascending by key.
    pub(crate) fn encode_rlp(&self, buf: &mut dyn BufMut) {
        let storage: Vec<(H256, H256)> = self.storage.iter().map(|(k, v)| (*k, *v)).collect();
        Encoder::new(buf)
            .encode_field(&self.nonce)
            .encode_field(&self.balance)
            .encode_field(&self.code_hash())
            .encode_field(&storage)
            .finish();
    }

    pub(crate) fn decode_rlp<'a>(
        rlp: &'a [u8],
        code: &impl CodeResolver,
    ) -> Result<(Self, &'a [u8]), SubstateDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (balance, decoder) = decoder.decode_field("balance")?;
        let (code_hash, decoder) = decoder.decode_field::<H256>("code_hash")?;
        let (storage, decoder) = decoder.decode_field::<Vec<(H256, H256)>>("storage")?;
        let rest = decoder.finish()?;

        let account = SubstateAccount {
            nonce,
            balance,
            storage: storage.into_iter().collect(),
            code: code.resolve_code(code_hash)?,
        };
        Ok((account, rest))
    }
}
