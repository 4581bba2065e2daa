use retrace_common::types::Substate;
use revm::{
    Database,
    primitives::{AccountInfo, Address as RevmAddress, B256, Bytecode, U256 as RevmU256, keccak256},
};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;

/// Conversions between the `ethereum-types` world of the substate model and
/// revm's primitives.
pub fn to_revm_address(address: ethereum_types::Address) -> RevmAddress {
    RevmAddress::from_slice(address.as_bytes())
}

pub fn to_eth_address(address: RevmAddress) -> ethereum_types::Address {
    ethereum_types::Address::from_slice(address.as_slice())
}

pub fn to_revm_u256(value: ethereum_types::U256) -> RevmU256 {
    RevmU256::from_be_bytes(value.to_big_endian())
}

pub fn to_eth_u256(value: RevmU256) -> ethereum_types::U256 {
    ethereum_types::U256::from_big_endian(&value.to_be_bytes::<32>())
}

pub fn to_eth_h256(value: B256) -> ethereum_types::H256 {
    ethereum_types::H256::from_slice(value.as_slice())
}

/// In-memory world state reconstructed from a substate's `input_alloc`.
///
/// BLOCKHASH is served from the recorded `env.block_hashes`; a lookup outside
/// the captured set returns the zero hash and raises a sticky flag the
/// executor inspects after the run.
#[derive(Debug)]
pub struct PrestateDb {
    accounts: HashMap<RevmAddress, PrestateAccount>,
    codes: HashMap<B256, Bytecode>,
    block_hashes: BTreeMap<u64, B256>,
    pub missing_blockhash: Option<u64>,
}

#[derive(Debug)]
struct PrestateAccount {
    info: AccountInfo,
    storage: HashMap<RevmU256, RevmU256>,
}

impl PrestateDb {
    pub fn from_substate(substate: &Substate) -> Self {
        let mut accounts = HashMap::new();
        let mut codes = HashMap::new();

        for (address, account) in &substate.input_alloc {
            let bytecode = Bytecode::new_raw(revm::primitives::Bytes::copy_from_slice(&account.code));
            let code_hash = keccak256(&account.code);
            codes.insert(code_hash, bytecode.clone());

            let storage = account
                .storage
                .iter()
                .map(|(key, value)| {
                    (
                        RevmU256::from_be_bytes(key.to_fixed_bytes()),
                        RevmU256::from_be_bytes(value.to_fixed_bytes()),
                    )
                })
                .collect();

            accounts.insert(
                to_revm_address(*address),
                PrestateAccount {
                    info: AccountInfo {
                        balance: to_revm_u256(account.balance),
                        nonce: account.nonce,
                        code_hash,
                        code: Some(bytecode),
                    },
                    storage,
                },
            );
        }

        let block_hashes = substate
            .env
            .block_hashes
            .iter()
            .map(|(number, hash)| (*number, B256::from_slice(hash.as_bytes())))
            .collect();

        PrestateDb {
            accounts,
            codes,
            block_hashes,
            missing_blockhash: None,
        }
    }
}

impl Database for PrestateDb {
    type Error = Infallible;

    fn basic(&mut self, address: RevmAddress) -> Result<Option<AccountInfo>, Self::Error> {
        Ok(self.accounts.get(&address).map(|account| account.info.clone()))
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        Ok(self.codes.get(&code_hash).cloned().unwrap_or_default())
    }

    fn storage(&mut self, address: RevmAddress, index: RevmU256) -> Result<RevmU256, Self::Error> {
        Ok(self
            .accounts
            .get(&address)
            .and_then(|account| account.storage.get(&index))
            .copied()
            .unwrap_or_default())
    }

    fn block_hash(&mut self, number: u64) -> Result<B256, Self::Error> {
        match self.block_hashes.get(&number) {
            Some(hash) => Ok(*hash),
            None => {
                self.missing_blockhash.get_or_insert(number);
                Ok(B256::ZERO)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ethereum_types::{Address, H256, U256};
    use retrace_common::types::SubstateAccount;

    #[test]
    fn prestate_serves_accounts_storage_and_hashes() {
        let address = Address::from_low_u64_be(0xaa);
        let mut account = SubstateAccount::new(3, U256::from(777), Bytes::from_static(&[0x5b]));
        account
            .storage
            .insert(H256::from_low_u64_be(1), H256::from_low_u64_be(0x42));

        let mut substate = Substate::default();
        substate.input_alloc.insert(address, account);
        substate
            .env
            .block_hashes
            .insert(123, H256::repeat_byte(0xcd));

        let mut db = PrestateDb::from_substate(&substate);

        let info = db.basic(to_revm_address(address)).unwrap().unwrap();
        assert_eq!(info.nonce, 3);
        assert_eq!(info.balance, RevmU256::from(777));

        let slot = db
            .storage(to_revm_address(address), RevmU256::from(1))
            .unwrap();
        assert_eq!(slot, RevmU256::from(0x42));
        // unknown account and slot read as zero
        let other = to_revm_address(Address::from_low_u64_be(0xff));
        assert!(db.basic(other).unwrap().is_none());
        assert_eq!(db.storage(other, RevmU256::from(9)).unwrap(), RevmU256::ZERO);

        assert_eq!(db.block_hash(123).unwrap(), B256::repeat_byte(0xcd));
        assert!(db.missing_blockhash.is_none());

        // a miss is sticky and keeps the first offending number
        assert_eq!(db.block_hash(7).unwrap(), B256::ZERO);
        assert_eq!(db.block_hash(8).unwrap(), B256::ZERO);
        assert_eq!(db.missing_blockhash, Some(7));
    }
}
