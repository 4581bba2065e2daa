use super::{
    decode::{RLPDecode, decode_rlp_item},
    encode::{RLPEncode, encode_length},
    error::RLPDecodeError,
};
use bytes::BufMut;

/// # Struct encoding helper
///
/// Fields are encoded in the order they are passed to
/// [`Encoder::encode_field`]; [`Encoder::finish`] writes the list prefix and
/// payload into the target buffer.
///
/// ```
/// # use retrace_rlp::structs::Encoder;
/// let mut buf = vec![];
/// Encoder::new(&mut buf)
///     .encode_field(&61u8)
///     .encode_field(&75u8)
///     .finish();
/// assert_eq!(buf, vec![0xc2, 61, 75]);
/// ```
#[must_use = "`Encoder` must be consumed with `finish` to write the encoding"]
pub struct Encoder<'a> {
    buf: &'a mut dyn BufMut,
    payload: Vec<u8>,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut dyn BufMut) -> Self {
        Self {
            buf,
            payload: Vec::new(),
        }
    }

    pub fn encode_field<T: RLPEncode>(mut self, value: &T) -> Self {
        value.encode(&mut self.payload);
        self
    }

    /// Appends an already RLP encoded item as the next field.
    pub fn encode_raw(mut self, encoded: &[u8]) -> Self {
        self.payload.extend_from_slice(encoded);
        self
    }

    /// Writes the accumulated fields as one RLP list.
    pub fn finish(self) {
        encode_length(0xc0, self.payload.len(), self.buf);
        self.buf.put_slice(&self.payload);
    }
}

/// # Struct decoding helper
///
/// The struct is expected as an RLP list whose items are the fields, in the
/// order they are passed to [`Decoder::decode_field`].
#[derive(Debug)]
#[must_use = "`Decoder` must be consumed with `finish` to perform decoding checks"]
pub struct Decoder<'a> {
    payload: &'a [u8],
    remaining: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, RLPDecodeError> {
        match decode_rlp_item(buf)? {
            (true, payload, remaining) => Ok(Self { payload, remaining }),
            (false, _, _) => Err(RLPDecodeError::UnexpectedString),
        }
    }

    pub fn decode_field<T: RLPDecode>(self, name: &str) -> Result<(T, Self), RLPDecodeError> {
        let (field, rest) = T::decode_unfinished(self.payload)
            .map_err(|err| RLPDecodeError::Custom(format!("couldn't decode field '{name}': {err}")))?;
        Ok((
            field,
            Self {
                payload: rest,
                ..self
            },
        ))
    }

    /// Finishes decoding the list and returns the bytes after it.
    /// Fails if fields are left over in the payload.
    pub fn finish(self) -> Result<&'a [u8], RLPDecodeError> {
        if self.payload.is_empty() {
            Ok(self.remaining)
        } else {
            Err(RLPDecodeError::MalformedData)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Simple {
        a: u8,
        b: u64,
    }

    impl RLPEncode for Simple {
        fn encode(&self, buf: &mut dyn BufMut) {
            Encoder::new(buf)
                .encode_field(&self.a)
                .encode_field(&self.b)
                .finish();
        }
    }

    impl RLPDecode for Simple {
        fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
            let decoder = Decoder::new(rlp)?;
            let (a, decoder) = decoder.decode_field("a")?;
            let (b, decoder) = decoder.decode_field("b")?;
            Ok((Simple { a, b }, decoder.finish()?))
        }
    }

    #[test]
    fn struct_round_trip() {
        let simple = Simple { a: 61, b: 75 };
        let encoded = simple.encode_to_vec();
        assert_eq!(encoded, vec![0xc2, 61, 75]);
        assert_eq!(Simple::decode(&encoded).unwrap(), simple);
    }

    #[test]
    fn leftover_fields_are_rejected() {
        // a three item list decoded as a two field struct
        let encoded = vec![0xc3, 1, 2, 3];
        assert!(Simple::decode(&encoded).is_err());
    }
}
