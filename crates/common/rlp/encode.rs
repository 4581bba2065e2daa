use bytes::{BufMut, Bytes};
use ethereum_types::{Address, Bloom, H256, U256};

use super::constants::RLP_NULL;

/// Trait for canonical RLP encoding.
///
/// Implementors only provide [`RLPEncode::encode`]; the convenience
/// [`RLPEncode::encode_to_vec`] allocates a fresh buffer.
pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

/// Writes the RLP prefix for a payload of `payload_len` bytes that is
/// already known to be a list (or a long string when `offset` is 0x80).
pub fn encode_length(offset: u8, payload_len: usize, buf: &mut dyn BufMut) {
    if payload_len < 56 {
        buf.put_u8(offset + payload_len as u8);
    } else {
        let be_len: Vec<u8> = payload_len
            .to_be_bytes()
            .into_iter()
            .skip_while(|b| *b == 0)
            .collect();
        buf.put_u8(offset + 55 + be_len.len() as u8);
        buf.put_slice(&be_len);
    }
}

/// Encodes a slice of bytes as an RLP string item.
pub fn encode_bytes(bytes: &[u8], buf: &mut dyn BufMut) {
    if bytes.len() == 1 && bytes[0] < RLP_NULL {
        buf.put_u8(bytes[0]);
    } else {
        encode_length(RLP_NULL, bytes.len(), buf);
        buf.put_slice(bytes);
    }
}

impl RLPEncode for bool {
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self {
            buf.put_u8(0x01);
        } else {
            buf.put_u8(RLP_NULL);
        }
    }
}

// Unsigned integers encode as their minimal big-endian byte string.
macro_rules! impl_encode_uint {
    ($($t:ty),*) => {
        $(impl RLPEncode for $t {
            fn encode(&self, buf: &mut dyn BufMut) {
                let bytes = self.to_be_bytes();
                let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
                encode_bytes(&bytes[start..], buf);
            }
        })*
    };
}

impl_encode_uint!(u8, u16, u32, u64, usize);

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        let bytes = self.to_big_endian();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(32);
        encode_bytes(&bytes[start..], buf);
    }
}

impl RLPEncode for Address {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for H256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for Bloom {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for Bytes {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl<T: RLPEncode> RLPEncode for Vec<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_slice().encode(buf)
    }
}

impl<T: RLPEncode> RLPEncode for &[T] {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut payload = Vec::new();
        for item in self.iter() {
            item.encode(&mut payload);
        }
        encode_length(0xc0, payload.len(), buf);
        buf.put_slice(&payload);
    }
}

impl<A: RLPEncode, B: RLPEncode> RLPEncode for (A, B) {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut payload = Vec::new();
        self.0.encode(&mut payload);
        self.1.encode(&mut payload);
        encode_length(0xc0, payload.len(), buf);
        buf.put_slice(&payload);
    }
}

impl<T: RLPEncode> RLPEncode for &T {
    fn encode(&self, buf: &mut dyn BufMut) {
        (*self).encode(buf)
    }
}
