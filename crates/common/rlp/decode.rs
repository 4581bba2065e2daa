use super::{constants::RLP_NULL, error::RLPDecodeError};
use bytes::Bytes;
use ethereum_types::{Address, Bloom, H256, U256};

/// Trait for decoding canonically RLP encoded data.
///
/// Implementors provide [`RLPDecode::decode_unfinished`], which decodes one
/// item and returns it along with the remaining input. [`RLPDecode::decode`]
/// additionally requires the input to be fully consumed.
pub trait RLPDecode: Sized {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError>;

    fn decode(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, remaining) = Self::decode_unfinished(rlp)?;
        if !remaining.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok(decoded)
    }
}

/// Splits the first RLP item off `data`, returning
/// `(is_list, payload, remaining)`.
pub fn decode_rlp_item(data: &[u8]) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    let first = *data.first().ok_or(RLPDecodeError::InvalidLength)?;
    match first {
        // single byte, its own payload
        0..=0x7f => Ok((false, &data[..1], &data[1..])),
        // short string
        0x80..=0xb7 => {
            let len = (first - 0x80) as usize;
            split_payload(false, &data[1..], len)
        }
        // long string
        0xb8..=0xbf => {
            let (len, rest) = decode_payload_length(&data[1..], first - 0xb7)?;
            split_payload(false, rest, len)
        }
        // short list
        0xc0..=0xf7 => {
            let len = (first - 0xc0) as usize;
            split_payload(true, &data[1..], len)
        }
        // long list
        0xf8..=0xff => {
            let (len, rest) = decode_payload_length(&data[1..], first - 0xf7)?;
            split_payload(true, rest, len)
        }
    }
}

fn split_payload(is_list: bool, data: &[u8], len: usize) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    if data.len() < len {
        return Err(RLPDecodeError::InvalidLength);
    }
    let (payload, rest) = data.split_at(len);
    Ok((is_list, payload, rest))
}

fn decode_payload_length(data: &[u8], len_of_len: u8) -> Result<(usize, &[u8]), RLPDecodeError> {
    let len_of_len = len_of_len as usize;
    if data.len() < len_of_len || len_of_len > core::mem::size_of::<usize>() {
        return Err(RLPDecodeError::InvalidLength);
    }
    // canonical form: no leading zeros, must not fit the short form
    if data[0] == 0 {
        return Err(RLPDecodeError::MalformedData);
    }
    let mut len: usize = 0;
    for byte in &data[..len_of_len] {
        len = (len << 8) | *byte as usize;
    }
    if len < 56 {
        return Err(RLPDecodeError::MalformedData);
    }
    Ok((len, &data[len_of_len..]))
}

/// Decodes one string item, rejecting lists.
pub fn decode_bytes(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    match decode_rlp_item(data)? {
        (false, payload, rest) => Ok((payload, rest)),
        (true, _, _) => Err(RLPDecodeError::UnexpectedList),
    }
}

/// Left-pads a decoded integer payload to `N` bytes, enforcing minimality.
fn static_left_pad<const N: usize>(bytes: &[u8]) -> Result<[u8; N], RLPDecodeError> {
    if bytes.len() > N {
        return Err(RLPDecodeError::InvalidLength);
    }
    if bytes.first() == Some(&0) {
        return Err(RLPDecodeError::MalformedData);
    }
    let mut padded = [0u8; N];
    padded[N - bytes.len()..].copy_from_slice(bytes);
    Ok(padded)
}

impl RLPDecode for bool {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        let value = match first {
            RLP_NULL => false,
            0x01 => true,
            b => return Err(RLPDecodeError::MalformedBoolean(b)),
        };
        Ok((value, &rlp[1..]))
    }
}

macro_rules! impl_decode_uint {
    ($($t:ty),*) => {
        $(impl RLPDecode for $t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (bytes, rest) = decode_bytes(rlp)?;
                let padded = static_left_pad(bytes)?;
                Ok((<$t>::from_be_bytes(padded), rest))
            }
        })*
    };
}

impl_decode_uint!(u8, u16, u32, u64, usize);

impl RLPDecode for U256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let padded: [u8; 32] = static_left_pad(bytes)?;
        Ok((U256::from_big_endian(&padded), rest))
    }
}

impl RLPDecode for Address {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() != 20 {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok((Address::from_slice(bytes), rest))
    }
}

impl RLPDecode for H256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() != 32 {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok((H256::from_slice(bytes), rest))
    }
}

impl RLPDecode for Bloom {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() != 256 {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok((Bloom::from_slice(bytes), rest))
    }
}

impl RLPDecode for Bytes {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((Bytes::copy_from_slice(bytes), rest))
    }
}

impl<T: RLPDecode> RLPDecode for Vec<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (is_list, mut payload, rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::UnexpectedString);
        }
        let mut items = Vec::new();
        while !payload.is_empty() {
            let (item, next) = T::decode_unfinished(payload)?;
            items.push(item);
            payload = next;
        }
        Ok((items, rest))
    }
}

impl<A: RLPDecode, B: RLPDecode> RLPDecode for (A, B) {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (is_list, payload, rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::UnexpectedString);
        }
        let (first, payload) = A::decode_unfinished(payload)?;
        let (second, payload) = B::decode_unfinished(payload)?;
        if !payload.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(((first, second), rest))
    }
}
