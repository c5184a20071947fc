//! MessagePack encoding backed by `rmp-serde`
//!
//! Values are self-describing on the wire, so the decode hint is ignored.

use std::io::{Read, Write};

use txlog_core::{Encoding, ProviderError, ProviderKey, ProviderResult, Value, ValueKind};

pub const MSGPACK_KEY: ProviderKey = ProviderKey::new(*b"msgpack\0");

#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackEncoding;

impl MsgpackEncoding {
    pub fn new() -> Self {
        Self
    }
}

impl Encoding for MsgpackEncoding {
    fn key(&self) -> ProviderKey {
        MSGPACK_KEY
    }

    fn encode(&self, value: &Value) -> ProviderResult<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| ProviderError::Encode(e.to_string()))
    }

    fn encode_to(&self, value: &Value, mut writer: &mut dyn Write) -> ProviderResult<()> {
        rmp_serde::encode::write_named(&mut writer, value)
            .map_err(|e| ProviderError::Encode(e.to_string()))
    }

    fn decode(&self, encoded: &[u8], _hint: Option<&ValueKind>) -> ProviderResult<Value> {
        rmp_serde::from_slice(encoded).map_err(|e| ProviderError::Decode(e.to_string()))
    }

    fn decode_from(&self, reader: &mut dyn Read, _hint: Option<&ValueKind>) -> ProviderResult<Value> {
        rmp_serde::from_read(reader).map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key() {
        assert_eq!(MsgpackEncoding.key().as_bytes(), b"msgpack\0");
    }

    #[test]
    fn test_structured_value_round_trip() {
        let value = Value::List(vec![
            Value::from("order-17"),
            Value::U64(42),
            Value::Bytes(vec![0, 1, 2]),
            Value::Bool(false),
        ]);
        let encoded = MsgpackEncoding.encode(&value).unwrap();
        assert_eq!(MsgpackEncoding.decode(&encoded, None).unwrap(), value);
    }

    #[test]
    fn test_stream_methods() {
        let value = Value::from("streamed");
        let mut buf = Vec::new();
        MsgpackEncoding.encode_to(&value, &mut buf).unwrap();
        assert_eq!(buf, MsgpackEncoding.encode(&value).unwrap());

        let mut reader = buf.as_slice();
        assert_eq!(
            MsgpackEncoding.decode_from(&mut reader, None).unwrap(),
            value
        );
    }

    #[test]
    fn test_garbage_is_decode_error() {
        assert!(matches!(
            MsgpackEncoding.decode(&[0xc1], None),
            Err(ProviderError::Decode(_))
        ));
    }
}
