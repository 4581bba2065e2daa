use serde::{Deserialize, Deserializer, Serializer, de::Error};

/// `bytes::Bytes` as a `0x…` hex string.
pub mod bytes_hex {
    use super::*;
    use bytes::Bytes;

    pub fn serialize<S>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(d)?;
        let bytes = hex::decode(value.trim_start_matches("0x"))
            .map_err(|e| D::Error::custom(e.to_string()))?;
        Ok(Bytes::from(bytes))
    }
}

/// `u64` as a `0x…` hex string on output, hex or decimal (string or number)
/// on input.
pub mod u64_hex_or_dec {
    use super::*;

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct U64Visitor;

        impl serde::de::Visitor<'_> for U64Visitor {
            type Value = u64;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a u64 as a number, decimal string or 0x-prefixed hex string")
            }

            fn visit_u64<E: Error>(self, v: u64) -> Result<u64, E> {
                Ok(v)
            }

            fn visit_str<E: Error>(self, v: &str) -> Result<u64, E> {
                parse_u64(v).map_err(E::custom)
            }
        }

        d.deserialize_any(U64Visitor)
    }
}

pub(crate) fn parse_u64(value: &str) -> Result<u64, String> {
    let result = if let Some(hex) = value.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        value.parse()
    };
    result.map_err(|e| format!("invalid u64 literal {value:?}: {e}"))
}

/// `U256` as a `0x…` hex string on output, hex or decimal on input.
pub mod u256_hex_or_dec {
    use super::*;
    use ethereum_types::U256;

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(d)?;
        if let Some(hex) = value.strip_prefix("0x") {
            U256::from_str_radix(hex, 16).map_err(|e| D::Error::custom(e.to_string()))
        } else {
            U256::from_dec_str(&value).map_err(|e| D::Error::custom(e.to_string()))
        }
    }
}

/// `BTreeMap<u64, H256>` with `0x…` hex keys, as used for block hashes.
pub mod u64_key_map {
    use super::*;
    use ethereum_types::H256;
    use serde::ser::SerializeMap;
    use std::collections::BTreeMap;

    pub fn serialize<S>(value: &BTreeMap<u64, H256>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(value.len()))?;
        for (number, hash) in value {
            map.serialize_entry(&format!("{number:#x}"), hash)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(d: D) -> Result<BTreeMap<u64, H256>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, H256>::deserialize(d)?;
        raw.into_iter()
            .map(|(k, v)| Ok((super::parse_u64(&k).map_err(D::Error::custom)?, v)))
            .collect()
    }
}
