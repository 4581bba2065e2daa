use bytes::{BufMut, Bytes};
use ethereum_types::{Address, BigEndianHash, Bloom, BloomInput, H256, U256};
use keccak_hash::keccak;
use retrace_rlp::{
    decode::{RLPDecode, decode_rlp_item},
    encode::{RLPEncode, encode_length},
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::account::{CodeResolver, SubstateAccount, SubstateDecodeError};
use crate::serde_utils;

/// Accounts touched by one transaction, keyed by address. The ordered map
/// keeps encodings canonical without an explicit sort.
pub type SubstateAlloc = BTreeMap<Address, SubstateAccount>;

/// Block environment of the recorded transaction. `block_hashes` holds only
/// the blocks actually consulted through BLOCKHASH.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstateEnv {
    #[serde(rename = "currentCoinbase")]
    pub coinbase: Address,
    #[serde(rename = "currentDifficulty", with = "serde_utils::u256_hex_or_dec")]
    pub difficulty: U256,
    #[serde(rename = "currentGasLimit", with = "serde_utils::u64_hex_or_dec")]
    pub gas_limit: u64,
    #[serde(rename = "currentNumber", with = "serde_utils::u64_hex_or_dec")]
    pub number: u64,
    #[serde(rename = "currentTimestamp", with = "serde_utils::u64_hex_or_dec")]
    pub timestamp: u64,
    #[serde(rename = "blockHashes", with = "serde_utils::u64_key_map")]
    pub block_hashes: BTreeMap<u64, H256>,
}

impl RLPEncode for SubstateEnv {
    fn encode(&self, buf: &mut dyn BufMut) {
        // block numbers are widened to 32 byte words in the recorded form
        let hashes: Vec<(H256, H256)> = self
            .block_hashes
            .iter()
            .map(|(number, hash)| (H256::from_uint(&U256::from(*number)), *hash))
            .collect();
        Encoder::new(buf)
            .encode_field(&self.coinbase)
            .encode_field(&self.difficulty)
            .encode_field(&self.gas_limit)
            .encode_field(&self.number)
            .encode_field(&self.timestamp)
            .encode_field(&hashes)
            .finish();
    }
}

impl RLPDecode for SubstateEnv {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (coinbase, decoder) = decoder.decode_field("coinbase")?;
        let (difficulty, decoder) = decoder.decode_field("difficulty")?;
        let (gas_limit, decoder) = decoder.decode_field("gas_limit")?;
        let (number, decoder) = decoder.decode_field("number")?;
        let (timestamp, decoder) = decoder.decode_field("timestamp")?;
        let (hashes, decoder) = decoder.decode_field::<Vec<(H256, H256)>>("block_hashes")?;
        let rest = decoder.finish()?;

        let mut block_hashes = BTreeMap::new();
        for (number, hash) in hashes {
            let number = number.into_uint();
            if number > U256::from(u64::MAX) {
                return Err(RLPDecodeError::MalformedData);
            }
            block_hashes.insert(number.low_u64(), hash);
        }

        Ok((
            SubstateEnv {
                coinbase,
                difficulty,
                gas_limit,
                number,
                timestamp,
                block_hashes,
            },
            rest,
        ))
    }
}

/// The transaction message. `to == None` is contract creation, in which case
/// `data` carries the init code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstateMessage {
    #[serde(with = "serde_utils::u64_hex_or_dec")]
    pub nonce: u64,
    #[serde(rename = "checkNonce")]
    pub check_nonce: bool,
    #[serde(rename = "gasPrice", with = "serde_utils::u256_hex_or_dec")]
    pub gas_price: U256,
    #[serde(with = "serde_utils::u64_hex_or_dec")]
    pub gas: u64,
    pub from: Address,
    pub to: Option<Address>,
    #[serde(with = "serde_utils::u256_hex_or_dec")]
    pub value: U256,
    #[serde(rename = "input", with = "serde_utils::bytes_hex")]
    pub data: Bytes,
}

impl SubstateMessage {
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    pub fn data_hash(&self) -> H256 {
        keccak(&self.data)
    }

    /// For CREATE messages the init code is replaced by its keccak256, with
    /// the blob expected in the code partition.
    pub(crate) fn encode_rlp(&self, buf: &mut dyn BufMut) {
        let encoder = Encoder::new(buf)
            .encode_field(&self.nonce)
            .encode_field(&self.check_nonce)
            .encode_field(&self.gas_price)
            .encode_field(&self.gas);
        let encoder = match &self.to {
            Some(to) => encoder.encode_field(&self.from).encode_field(to),
            None => encoder.encode_field(&self.from).encode_field(&Bytes::new()),
        };
        let encoder = encoder.encode_field(&self.value);
        match &self.to {
            Some(_) => encoder
                .encode_field(&self.data)
                .encode_field(&Bytes::new()),
            None => encoder
                .encode_field(&Bytes::new())
                .encode_field(&self.data_hash()),
        }
        .finish();
    }

    pub(crate) fn decode_rlp<'a>(
        rlp: &'a [u8],
        code: &impl CodeResolver,
    ) -> Result<(Self, &'a [u8]), SubstateDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (check_nonce, decoder) = decoder.decode_field("check_nonce")?;
        let (gas_price, decoder) = decoder.decode_field("gas_price")?;
        let (gas, decoder) = decoder.decode_field("gas")?;
        let (from, decoder) = decoder.decode_field("from")?;
        let (to_bytes, decoder) = decoder.decode_field::<Bytes>("to")?;
        let (value, decoder) = decoder.decode_field("value")?;
        let (data, decoder) = decoder.decode_field::<Bytes>("data")?;
        let (init_code_hash, decoder) = decoder.decode_field::<Bytes>("init_code_hash")?;
        let rest = decoder.finish()?;

        let to = match to_bytes.len() {
            0 => None,
            20 => Some(Address::from_slice(&to_bytes)),
            _ => return Err(RLPDecodeError::InvalidLength.into()),
        };
        let data = match to {
            Some(_) => {
                if !init_code_hash.is_empty() {
                    return Err(RLPDecodeError::MalformedData.into());
                }
                data
            }
            None => {
                if init_code_hash.len() != 32 || !data.is_empty() {
                    return Err(RLPDecodeError::MalformedData.into());
                }
                code.resolve_code(H256::from_slice(&init_code_hash))?
            }
        };

        Ok((
            SubstateMessage {
                nonce,
                check_nonce,
                gas_price,
                gas,
                from,
                to,
                value,
                data,
            },
            rest,
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(with = "serde_utils::bytes_hex")]
    pub data: Bytes,
}

impl RLPEncode for Log {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.address)
            .encode_field(&self.topics)
            .encode_field(&self.data)
            .finish();
    }
}

impl RLPDecode for Log {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (address, decoder) = decoder.decode_field("address")?;
        let (topics, decoder) = decoder.decode_field("topics")?;
        let (data, decoder) = decoder.decode_field("data")?;
        Ok((
            Log {
                address,
                topics,
                data,
            },
            decoder.finish()?,
        ))
    }
}

/// Receipt-level outcome of the recorded transaction. `contract_address` is
/// zero unless the message was a CREATE.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstateResult {
    #[serde(with = "serde_utils::u64_hex_or_dec")]
    pub status: u64,
    #[serde(rename = "logsBloom")]
    pub bloom: Bloom,
    pub logs: Vec<Log>,
    #[serde(rename = "contractAddress")]
    pub contract_address: Address,
    #[serde(rename = "gasUsed", with = "serde_utils::u64_hex_or_dec")]
    pub gas_used: u64,
}

pub const STATUS_SUCCESS: u64 = 1;
pub const STATUS_FAILED: u64 = 0;

impl RLPEncode for SubstateResult {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.status)
            .encode_field(&self.bloom)
            .encode_field(&self.logs)
            .encode_field(&self.contract_address)
            .encode_field(&self.gas_used)
            .finish();
    }
}

impl RLPDecode for SubstateResult {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (status, decoder) = decoder.decode_field("status")?;
        let (bloom, decoder) = decoder.decode_field("bloom")?;
        let (logs, decoder) = decoder.decode_field("logs")?;
        let (contract_address, decoder) = decoder.decode_field("contract_address")?;
        let (gas_used, decoder) = decoder.decode_field("gas_used")?;
        Ok((
            SubstateResult {
                status,
                bloom,
                logs,
                contract_address,
                gas_used,
            },
            decoder.finish()?,
        ))
    }
}

/// The boundary state of one transaction: minimum sufficient prestate,
/// minimum sufficient poststate, block environment, message and receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substate {
    #[serde(rename = "inputAlloc")]
    pub input_alloc: SubstateAlloc,
    #[serde(rename = "outputAlloc")]
    pub output_alloc: SubstateAlloc,
    pub env: SubstateEnv,
    pub message: SubstateMessage,
    pub result: SubstateResult,
}

fn encode_alloc(alloc: &SubstateAlloc, buf: &mut dyn BufMut) {
    let addresses: Vec<Address> = alloc.keys().copied().collect();
    let mut accounts_payload = Vec::new();
    for account in alloc.values() {
        account.encode_rlp(&mut accounts_payload);
    }
    let mut accounts = Vec::new();
    encode_length(0xc0, accounts_payload.len(), &mut accounts);
    accounts.extend_from_slice(&accounts_payload);

    Encoder::new(buf)
        .encode_field(&addresses)
        .encode_raw(&accounts)
        .finish();
}

fn decode_alloc<'a>(
    rlp: &'a [u8],
    code: &impl CodeResolver,
) -> Result<(SubstateAlloc, &'a [u8]), SubstateDecodeError> {
    let (is_list, payload, rest) = decode_rlp_item(rlp)?;
    if !is_list {
        return Err(RLPDecodeError::UnexpectedString.into());
    }
    let (addresses, payload) = Vec::<Address>::decode_unfinished(payload)?;
    let (is_list, mut accounts, payload) = decode_rlp_item(payload)?;
    if !is_list {
        return Err(RLPDecodeError::UnexpectedString.into());
    }
    if !payload.is_empty() {
        return Err(RLPDecodeError::MalformedData.into());
    }

    let mut alloc = SubstateAlloc::new();
    for address in addresses {
        let (account, next) = SubstateAccount::decode_rlp(accounts, code)?;
        accounts = next;
        alloc.insert(address, account);
    }
    if !accounts.is_empty() {
        // more accounts than addresses
        return Err(RLPDecodeError::MalformedData.into());
    }
    Ok((alloc, rest))
}

impl Substate {
    /// Canonical binary encoding. Account and storage maps encode in their
    /// ascending key order, so equal substates always produce equal bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        encode_alloc(&self.input_alloc, &mut payload);
        encode_alloc(&self.output_alloc, &mut payload);
        self.env.encode(&mut payload);
        self.message.encode_rlp(&mut payload);
        self.result.encode(&mut payload);

        let mut buf = Vec::new();
        encode_length(0xc0, payload.len(), &mut buf);
        buf.extend_from_slice(&payload);
        buf
    }

    /// Decodes a substate record, rehydrating account code and CREATE init
    /// code through `code`.
    pub fn decode(rlp: &[u8], code: &impl CodeResolver) -> Result<Substate, SubstateDecodeError> {
        let (is_list, payload, rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::UnexpectedString.into());
        }
        if !rest.is_empty() {
            return Err(RLPDecodeError::InvalidLength.into());
        }

        let (input_alloc, payload) = decode_alloc(payload, code)?;
        let (output_alloc, payload) = decode_alloc(payload, code)?;
        let (env, payload) = SubstateEnv::decode_unfinished(payload)?;
        let (message, payload) = SubstateMessage::decode_rlp(payload, code)?;
        let (result, payload) = SubstateResult::decode_unfinished(payload)?;
        if !payload.is_empty() {
            return Err(RLPDecodeError::MalformedData.into());
        }

        Ok(Substate {
            input_alloc,
            output_alloc,
            env,
            message,
            result,
        })
    }

    /// Every bytecode blob a serialized form of this substate refers to.
    pub fn referenced_codes(&self) -> impl Iterator<Item = &Bytes> {
        let init_code = self.message.is_create().then_some(&self.message.data);
        self.input_alloc
            .values()
            .map(|account| &account.code)
            .chain(self.output_alloc.values().map(|account| &account.code))
            .chain(init_code)
    }
}

/// Recomputes the logs bloom of a result from its logs.
pub fn bloom_from_logs(logs: &[Log]) -> Bloom {
    let mut bloom = Bloom::zero();
    for log in logs {
        let address_hash = keccak(log.address);
        bloom.accrue(BloomInput::Hash(address_hash.as_fixed_bytes()));
        for topic in &log.topics {
            let topic_hash = keccak(topic);
            bloom.accrue(BloomInput::Hash(topic_hash.as_fixed_bytes()));
        }
    }
    bloom
}

/// Standard CREATE address derivation: `keccak256(rlp([sender, nonce]))[12..]`.
pub fn create_address(sender: Address, nonce: u64) -> Address {
    let mut encoded = Vec::new();
    Encoder::new(&mut encoded)
        .encode_field(&sender)
        .encode_field(&nonce)
        .finish();
    Address::from_slice(&keccak(&encoded)[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestCodeStore;
    use hex_literal::hex;

    fn test_substate() -> Substate {
        let sender = Address::from_low_u64_be(0xaa);
        let receiver = Address::from_low_u64_be(0xbb);

        let mut contract = SubstateAccount::new(
            1,
            U256::from(5000),
            Bytes::from_static(&[0x60, 0x01, 0x60, 0x02]),
        );
        contract
            .storage
            .insert(H256::from_low_u64_be(1), H256::from_low_u64_be(0x11));
        contract
            .storage
            .insert(H256::from_low_u64_be(2), H256::from_low_u64_be(0x22));

        let mut input_alloc = SubstateAlloc::new();
        input_alloc.insert(sender, SubstateAccount::new(7, U256::from(100_000), Bytes::new()));
        input_alloc.insert(receiver, contract.clone());

        let mut output_alloc = SubstateAlloc::new();
        output_alloc.insert(sender, SubstateAccount::new(8, U256::from(60_000), Bytes::new()));

        let mut block_hashes = BTreeMap::new();
        block_hashes.insert(4_999_999, H256::repeat_byte(0x13));

        Substate {
            input_alloc,
            output_alloc,
            env: SubstateEnv {
                coinbase: Address::from_low_u64_be(0xcc),
                difficulty: U256::from(131_072),
                gas_limit: 8_000_000,
                number: 5_000_000,
                timestamp: 1_500_000_000,
                block_hashes,
            },
            message: SubstateMessage {
                nonce: 7,
                check_nonce: true,
                gas_price: U256::from(20),
                gas: 100_000,
                from: sender,
                to: Some(receiver),
                value: U256::from(10),
                data: Bytes::copy_from_slice(&hex!("a9059cbb")),
            },
            result: SubstateResult {
                status: STATUS_SUCCESS,
                bloom: Bloom::zero(),
                logs: vec![Log {
                    address: receiver,
                    topics: vec![H256::repeat_byte(0x7e)],
                    data: Bytes::from_static(b"log-data"),
                }],
                contract_address: Address::zero(),
                gas_used: 54_321,
            },
        }
    }

    fn store_for(substate: &Substate) -> TestCodeStore {
        let store = TestCodeStore::default();
        for code in substate.referenced_codes() {
            store.put(code.clone());
        }
        store
    }

    #[test]
    fn substate_round_trips() {
        let substate = test_substate();
        let store = store_for(&substate);
        let encoded = substate.encode();
        let decoded = Substate::decode(&encoded, &store).unwrap();
        assert_eq!(decoded, substate);
    }

    #[test]
    fn encoding_is_canonical() {
        // the BTreeMap-backed alloc cannot express two insertion orders, so
        // build the same substate twice with maps filled in opposite order
        let a = test_substate();
        let mut b = test_substate();
        let entries: Vec<_> = b.input_alloc.clone().into_iter().rev().collect();
        b.input_alloc.clear();
        b.input_alloc.extend(entries);
        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn create_message_data_is_stored_by_hash() {
        let mut substate = test_substate();
        substate.message.to = None;
        substate.message.data = Bytes::from(vec![0x5b; 64]);

        let store = store_for(&substate);
        let encoded = substate.encode();

        // the 64 byte init code must not appear in the record itself
        let raw = substate.message.data.as_ref();
        assert!(!encoded.windows(raw.len()).any(|window| window == raw));

        let decoded = Substate::decode(&encoded, &store).unwrap();
        assert_eq!(decoded.message.data, substate.message.data);
    }

    #[test]
    fn missing_init_code_fails_with_missing_code() {
        let mut substate = test_substate();
        substate.message.to = None;
        substate.message.data = Bytes::from(vec![0x5b; 64]);

        let store = TestCodeStore::default();
        for account in substate.input_alloc.values().chain(substate.output_alloc.values()) {
            store.put(account.code.clone());
        }
        let err = Substate::decode(&substate.encode(), &store).unwrap_err();
        assert_eq!(
            err,
            SubstateDecodeError::MissingCode(substate.message.data_hash())
        );
    }

    #[test]
    fn corrupt_record_fails_decode() {
        let substate = test_substate();
        let store = store_for(&substate);
        let mut encoded = substate.encode();
        encoded.truncate(encoded.len() - 1);
        assert!(Substate::decode(&encoded, &store).is_err());
    }

    #[test]
    fn json_round_trips() {
        let substate = test_substate();
        let json = serde_json::to_string_pretty(&substate).unwrap();
        let decoded: Substate = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, substate);
    }

    #[test]
    fn bloom_covers_log_address_and_topics() {
        let substate = test_substate();
        let bloom = bloom_from_logs(&substate.result.logs);
        assert_ne!(bloom, Bloom::zero());
        let log = &substate.result.logs[0];
        assert!(bloom.contains_input(BloomInput::Hash(keccak(log.address).as_fixed_bytes())));
        assert!(bloom.contains_input(BloomInput::Hash(keccak(log.topics[0]).as_fixed_bytes())));
    }

    #[test]
    fn create_address_derivation_matches_reference() {
        // well-known vector: sender 0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0, nonce 0
        let sender = Address::from_slice(&hex!("6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0"));
        assert_eq!(
            create_address(sender, 0),
            Address::from_slice(&hex!("cd234a471b72ba2f1ccf0a70fcaba648a5eecd8d"))
        );
    }
}
