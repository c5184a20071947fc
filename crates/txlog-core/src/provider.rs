//! Provider capability traits
//!
//! Every record names the encoding and encryption transforms that produced
//! its payload by an 8-byte [`ProviderKey`] stored in the record header.
//! Concrete providers live outside this crate and are plugged in through
//! [`Encoding`] and [`Encryption`].

use std::fmt;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// Size of a provider key in bytes
pub const PROVIDER_KEY_SIZE: usize = 8;

/// Opaque 8-byte key identifying a provider implementation
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderKey([u8; PROVIDER_KEY_SIZE]);

impl ProviderKey {
    pub const fn new(bytes: [u8; PROVIDER_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; PROVIDER_KEY_SIZE] {
        &self.0
    }

    pub const fn to_bytes(self) -> [u8; PROVIDER_KEY_SIZE] {
        self.0
    }
}

impl From<[u8; PROVIDER_KEY_SIZE]> for ProviderKey {
    fn from(bytes: [u8; PROVIDER_KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ProviderKey {
    /// Printable ASCII with trailing NULs dropped, other bytes escaped
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self
            .0
            .iter()
            .rposition(|b| *b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        for b in &self.0[..end] {
            if b.is_ascii_graphic() {
                write!(f, "{}", *b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderKey(\"{}\")", self)
    }
}

/// An application value carried by a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bytes(Vec<u8>),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    /// The shape of this value, usable as a decode hint
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::U8(_) => ValueKind::U8,
            Value::U16(_) => ValueKind::U16,
            Value::U32(_) => ValueKind::U32,
            Value::U64(_) => ValueKind::U64,
            Value::I8(_) => ValueKind::I8,
            Value::I16(_) => ValueKind::I16,
            Value::I32(_) => ValueKind::I32,
            Value::I64(_) => ValueKind::I64,
            Value::F32(_) => ValueKind::F32,
            Value::F64(_) => ValueKind::F64,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Text(_) => ValueKind::Text,
            // Lists are treated as homogeneous; an empty list reports U8 elements
            Value::List(items) => ValueKind::List(Box::new(
                items.first().map(Value::kind).unwrap_or(ValueKind::U8),
            )),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from!(
    bool => Bool,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Vec<u8> => Bytes,
    String => Text,
    Vec<Value> => List,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

/// Expected shape of an encoded value, for formats that carry no schema
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bytes,
    Text,
    List(Box<ValueKind>),
}

impl ValueKind {
    /// Encoded width in bytes for fixed-width kinds
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            ValueKind::Bool | ValueKind::U8 | ValueKind::I8 => Some(1),
            ValueKind::U16 | ValueKind::I16 => Some(2),
            ValueKind::U32 | ValueKind::I32 | ValueKind::F32 => Some(4),
            ValueKind::U64 | ValueKind::I64 | ValueKind::F64 => Some(8),
            ValueKind::Bytes | ValueKind::Text | ValueKind::List(_) => None,
        }
    }
}

/// Turns application values into payload bytes and back
pub trait Encoding: Send + Sync {
    /// Key stamped into every record this provider encodes
    fn key(&self) -> ProviderKey;

    fn encode(&self, value: &Value) -> ProviderResult<Vec<u8>>;

    fn encode_to(&self, value: &Value, writer: &mut dyn Write) -> ProviderResult<()> {
        let encoded = self.encode(value)?;
        writer.write_all(&encoded)?;
        Ok(())
    }

    /// Decode a value; schema-less formats may ignore `hint`
    fn decode(&self, encoded: &[u8], hint: Option<&ValueKind>) -> ProviderResult<Value>;

    fn decode_from(&self, reader: &mut dyn Read, hint: Option<&ValueKind>) -> ProviderResult<Value> {
        let mut encoded = Vec::new();
        reader.read_to_end(&mut encoded)?;
        self.decode(&encoded, hint)
    }
}

/// Wraps encoded payload bytes
pub trait Encryption: Send + Sync {
    /// Key stamped into every record this provider encrypts
    fn key(&self) -> ProviderKey;

    fn encrypt(&self, plaintext: &[u8]) -> ProviderResult<Vec<u8>>;

    fn encrypt_to(&self, plaintext: &[u8], writer: &mut dyn Write) -> ProviderResult<()> {
        let ciphertext = self.encrypt(plaintext)?;
        writer.write_all(&ciphertext)?;
        Ok(())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> ProviderResult<Vec<u8>>;

    fn decrypt_from(&self, reader: &mut dyn Read) -> ProviderResult<Vec<u8>> {
        let mut ciphertext = Vec::new();
        reader.read_to_end(&mut ciphertext)?;
        self.decrypt(&ciphertext)
    }
}
