//! Fixed-width binary encoding
//!
//! Values are written as their raw machine representation in the configured
//! byte order. The format carries no schema, so decoding needs a
//! [`ValueKind`] hint. Strings and lists of variable-width elements have no
//! fixed-width form and are rejected.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use txlog_core::{Encoding, ProviderError, ProviderKey, ProviderResult, Value, ValueKind};

/// Byte order of a [`BinaryEncoding`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Encoding key of the little-endian binary provider
pub const BINARY_LITTLE_KEY: ProviderKey = ProviderKey::new(*b"binaryl\0");

/// Encoding key of the big-endian binary provider
pub const BINARY_BIG_KEY: ProviderKey = ProviderKey::new(*b"binaryb\0");

#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryEncoding {
    endian: Endian,
}

impl BinaryEncoding {
    pub fn new(endian: Endian) -> Self {
        Self { endian }
    }

    pub fn little() -> Self {
        Self::new(Endian::Little)
    }

    pub fn big() -> Self {
        Self::new(Endian::Big)
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    fn write_value<B: ByteOrder>(value: &Value, out: &mut Vec<u8>) -> ProviderResult<()> {
        match value {
            Value::Bool(v) => out.push(u8::from(*v)),
            Value::U8(v) => out.push(*v),
            Value::I8(v) => out.push(*v as u8),
            Value::U16(v) => put::<2>(out, |b| B::write_u16(b, *v)),
            Value::I16(v) => put::<2>(out, |b| B::write_i16(b, *v)),
            Value::U32(v) => put::<4>(out, |b| B::write_u32(b, *v)),
            Value::I32(v) => put::<4>(out, |b| B::write_i32(b, *v)),
            Value::F32(v) => put::<4>(out, |b| B::write_f32(b, *v)),
            Value::U64(v) => put::<8>(out, |b| B::write_u64(b, *v)),
            Value::I64(v) => put::<8>(out, |b| B::write_i64(b, *v)),
            Value::F64(v) => put::<8>(out, |b| B::write_f64(b, *v)),
            Value::Bytes(bytes) => out.extend_from_slice(bytes),
            Value::Text(_) => {
                return Err(ProviderError::Unsupported(
                    "binary encoding has no fixed-width form for text".to_string(),
                ));
            }
            Value::List(items) => {
                let Some(first) = items.first() else {
                    return Ok(());
                };
                let kind = first.kind();
                if kind.fixed_width().is_none() {
                    return Err(ProviderError::Unsupported(format!(
                        "binary encoding cannot write lists of {:?}",
                        kind
                    )));
                }
                for item in items {
                    if item.kind() != kind {
                        return Err(ProviderError::Encode(format!(
                            "mixed list element kinds: {:?} and {:?}",
                            kind,
                            item.kind()
                        )));
                    }
                    Self::write_value::<B>(item, out)?;
                }
            }
        }
        Ok(())
    }

    fn read_value<B: ByteOrder>(encoded: &[u8], kind: &ValueKind) -> ProviderResult<Value> {
        match kind.fixed_width() {
            Some(width) if encoded.len() != width => {
                return Err(ProviderError::Decode(format!(
                    "expected {} bytes for {:?}, got {}",
                    width,
                    kind,
                    encoded.len()
                )));
            }
            _ => {}
        }

        let value = match kind {
            ValueKind::Bool => Value::Bool(encoded[0] != 0),
            ValueKind::U8 => Value::U8(encoded[0]),
            ValueKind::I8 => Value::I8(encoded[0] as i8),
            ValueKind::U16 => Value::U16(B::read_u16(encoded)),
            ValueKind::I16 => Value::I16(B::read_i16(encoded)),
            ValueKind::U32 => Value::U32(B::read_u32(encoded)),
            ValueKind::I32 => Value::I32(B::read_i32(encoded)),
            ValueKind::F32 => Value::F32(B::read_f32(encoded)),
            ValueKind::U64 => Value::U64(B::read_u64(encoded)),
            ValueKind::I64 => Value::I64(B::read_i64(encoded)),
            ValueKind::F64 => Value::F64(B::read_f64(encoded)),
            ValueKind::Bytes => Value::Bytes(encoded.to_vec()),
            ValueKind::Text => {
                return Err(ProviderError::Unsupported(
                    "binary encoding has no fixed-width form for text".to_string(),
                ));
            }
            ValueKind::List(element) => {
                let width = element.fixed_width().ok_or_else(|| {
                    ProviderError::Unsupported(format!(
                        "binary encoding cannot read lists of {:?}",
                        element
                    ))
                })?;
                if encoded.len() % width != 0 {
                    return Err(ProviderError::Decode(format!(
                        "{} bytes is not a whole number of {}-byte elements",
                        encoded.len(),
                        width
                    )));
                }
                let items = encoded
                    .chunks_exact(width)
                    .map(|chunk| Self::read_value::<B>(chunk, element))
                    .collect::<ProviderResult<Vec<_>>>()?;
                Value::List(items)
            }
        };
        Ok(value)
    }
}

fn put<const N: usize>(out: &mut Vec<u8>, write: impl FnOnce(&mut [u8])) {
    let mut buf = [0u8; N];
    write(&mut buf[..]);
    out.extend_from_slice(&buf);
}

impl Encoding for BinaryEncoding {
    fn key(&self) -> ProviderKey {
        match self.endian {
            Endian::Little => BINARY_LITTLE_KEY,
            Endian::Big => BINARY_BIG_KEY,
        }
    }

    fn encode(&self, value: &Value) -> ProviderResult<Vec<u8>> {
        let mut out = Vec::new();
        match self.endian {
            Endian::Little => Self::write_value::<LittleEndian>(value, &mut out)?,
            Endian::Big => Self::write_value::<BigEndian>(value, &mut out)?,
        }
        Ok(out)
    }

    fn decode(&self, encoded: &[u8], hint: Option<&ValueKind>) -> ProviderResult<Value> {
        let kind = hint.ok_or_else(|| {
            ProviderError::Decode("binary decoding requires a value kind".to_string())
        })?;
        match self.endian {
            Endian::Little => Self::read_value::<LittleEndian>(encoded, kind),
            Endian::Big => Self::read_value::<BigEndian>(encoded, kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(BinaryEncoding::little().key().as_bytes(), b"binaryl\0");
        assert_eq!(BinaryEncoding::big().key().as_bytes(), b"binaryb\0");
    }

    #[test]
    fn test_byte_order() {
        let value = Value::U32(0x0102_0304);
        assert_eq!(
            BinaryEncoding::little().encode(&value).unwrap(),
            vec![4, 3, 2, 1]
        );
        assert_eq!(
            BinaryEncoding::big().encode(&value).unwrap(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn test_scalar_and_list_decode() {
        let enc = BinaryEncoding::big();
        let list = Value::List(vec![Value::I16(-2), Value::I16(300)]);
        let bytes = enc.encode(&list).unwrap();
        assert_eq!(bytes, vec![0xff, 0xfe, 0x01, 0x2c]);

        let kind = ValueKind::List(Box::new(ValueKind::I16));
        assert_eq!(enc.decode(&bytes, Some(&kind)).unwrap(), list);
        assert_eq!(
            enc.decode(&[1], Some(&ValueKind::Bool)).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_bytes_are_raw() {
        let enc = BinaryEncoding::little();
        let bytes = enc.encode(&Value::Bytes(b"hello".to_vec())).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(
            enc.decode(&bytes, Some(&ValueKind::Bytes)).unwrap(),
            Value::Bytes(b"hello".to_vec())
        );
    }

    #[test]
    fn test_text_unsupported() {
        let enc = BinaryEncoding::little();
        assert!(matches!(
            enc.encode(&Value::from("nope")),
            Err(ProviderError::Unsupported(_))
        ));
        assert!(matches!(
            enc.encode(&Value::List(vec![Value::from("a")])),
            Err(ProviderError::Unsupported(_))
        ));
    }

    #[test]
    fn test_decode_requires_hint_and_width() {
        let enc = BinaryEncoding::little();
        assert!(matches!(
            enc.decode(&[0; 4], None),
            Err(ProviderError::Decode(_))
        ));
        assert!(matches!(
            enc.decode(&[0; 3], Some(&ValueKind::U32)),
            Err(ProviderError::Decode(_))
        ));
        assert!(matches!(
            enc.decode(&[0; 5], Some(&ValueKind::List(Box::new(ValueKind::U16)))),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn test_mixed_list_rejected() {
        let enc = BinaryEncoding::little();
        let mixed = Value::List(vec![Value::U8(1), Value::U16(2)]);
        assert!(matches!(enc.encode(&mixed), Err(ProviderError::Encode(_))));
    }
}
