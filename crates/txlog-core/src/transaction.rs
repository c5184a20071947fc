//! Transaction record codec
//!
//! A record on the wire is an 8-byte little-endian length `L` followed by
//! `L` bytes of header and payload:
//!
//! ```text
//! Legacy: [8B len][8B id LE][1B action][8B encoding key][8B encryption key][payload]
//! V1:     [8B len][1B ver=1][16B UUIDv7][1B action][8B encoding key][8B encryption key][payload]
//! ```
//!
//! Header offsets are a pure function of the [`WireFormat`]. Versioned
//! records are identified by their first header byte; legacy records carry
//! no tag and can only be decoded through the explicit legacy entry points.

use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::action::Action;
use crate::error::{CodecError, CodecResult};
use crate::provider::{PROVIDER_KEY_SIZE, ProviderKey};

/// Size of the little-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Version tag of the UUIDv7 header layout
pub const FORMAT_VERSION_1: u8 = 1;

/// Byte offsets of the fixed header fields, relative to the start of the body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub version: Option<usize>,
    pub id: usize,
    pub id_len: usize,
    pub action: usize,
    pub encoding_key: usize,
    pub encryption_key: usize,
    pub header_len: usize,
}

const LEGACY_LAYOUT: Layout = Layout {
    version: None,
    id: 0,
    id_len: 8,
    action: 8,
    encoding_key: 9,
    encryption_key: 17,
    header_len: 25,
};

const V1_LAYOUT: Layout = Layout {
    version: Some(0),
    id: 1,
    id_len: 16,
    action: 17,
    encoding_key: 18,
    encryption_key: 26,
    header_len: 34,
};

/// Header layout generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// Untagged header with a 64-bit counter id (read-compatible)
    Legacy,
    /// Version-tagged header with a 128-bit time-ordered id
    V1,
}

impl WireFormat {
    pub const fn layout(self) -> Layout {
        match self {
            WireFormat::Legacy => LEGACY_LAYOUT,
            WireFormat::V1 => V1_LAYOUT,
        }
    }

    pub const fn version_tag(self) -> Option<u8> {
        match self {
            WireFormat::Legacy => None,
            WireFormat::V1 => Some(FORMAT_VERSION_1),
        }
    }

    /// Resolve the format from a version tag byte
    pub fn from_tag(tag: u8) -> CodecResult<Self> {
        match tag {
            FORMAT_VERSION_1 => Ok(WireFormat::V1),
            other => Err(CodecError::UnknownVersion(other)),
        }
    }
}

/// Record identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransactionId {
    /// Counter-style id of the legacy layout
    Counter(u64),
    /// Time-ordered UUIDv7
    Time(Uuid),
}

impl TransactionId {
    /// Generate a fresh time-ordered id
    pub fn generate() -> Self {
        TransactionId::Time(Uuid::now_v7())
    }

    /// The wire format able to carry this id
    pub fn format(&self) -> WireFormat {
        match self {
            TransactionId::Counter(_) => WireFormat::Legacy,
            TransactionId::Time(_) => WireFormat::V1,
        }
    }

    /// Creation time embedded in a time-ordered id
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match self {
            TransactionId::Counter(_) => None,
            TransactionId::Time(uuid) => {
                let (secs, nanos) = uuid.get_timestamp()?.to_unix();
                DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos)
            }
        }
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        TransactionId::Counter(0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionId::Counter(id) => write!(f, "{}", id),
            TransactionId::Time(uuid) => write!(f, "{}", uuid),
        }
    }
}

/// A single log record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    id: TransactionId,
    action: Action,
    encoding_key: ProviderKey,
    encryption_key: ProviderKey,
    payload: Vec<u8>,
}

impl Transaction {
    pub fn new(id: TransactionId, action: Action) -> Self {
        Self {
            id,
            action,
            ..Default::default()
        }
    }

    /// Set both provider keys
    pub fn with_keys(mut self, encoding_key: ProviderKey, encryption_key: ProviderKey) -> Self {
        self.encoding_key = encoding_key;
        self.encryption_key = encryption_key;
        self
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.set_payload(payload);
        self
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn set_id(&mut self, id: TransactionId) {
        self.id = id;
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn set_action(&mut self, action: Action) {
        self.action = action;
    }

    pub fn encoding_key(&self) -> ProviderKey {
        self.encoding_key
    }

    pub fn set_encoding_key(&mut self, key: ProviderKey) {
        self.encoding_key = key;
    }

    pub fn encryption_key(&self) -> ProviderKey {
        self.encryption_key
    }

    pub fn set_encryption_key(&mut self, key: ProviderKey) {
        self.encryption_key = key;
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the payload, reusing the existing allocation
    pub fn set_payload(&mut self, payload: &[u8]) {
        self.payload.clear();
        self.payload.extend_from_slice(payload);
    }

    pub fn append_payload(&mut self, data: &[u8]) {
        self.payload.extend_from_slice(data);
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn format(&self) -> WireFormat {
        self.id.format()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.id.created_at()
    }

    /// Length of header plus payload, the value of the length prefix
    pub fn body_len(&self) -> u64 {
        (self.format().layout().header_len + self.payload.len()) as u64
    }

    /// Total on-wire length including the length prefix
    pub fn encoded_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.format().layout().header_len + self.payload.len()
    }

    /// Overwrite every field with its default, keeping payload capacity
    pub fn reset(&mut self) {
        self.id = TransactionId::default();
        self.action = Action::default();
        self.encoding_key = ProviderKey::default();
        self.encryption_key = ProviderKey::default();
        self.payload.clear();
    }

    // ------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------

    /// Serialize into a new length-prefixed buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Append the length-prefixed serialization to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());

        let mut word = [0u8; 8];
        LittleEndian::write_u64(&mut word, self.body_len());
        out.extend_from_slice(&word);

        match self.id {
            TransactionId::Counter(id) => {
                LittleEndian::write_u64(&mut word, id);
                out.extend_from_slice(&word);
            }
            TransactionId::Time(uuid) => {
                out.push(FORMAT_VERSION_1);
                out.extend_from_slice(uuid.as_bytes());
            }
        }

        out.push(self.action.as_byte());
        out.extend_from_slice(self.encoding_key.as_bytes());
        out.extend_from_slice(self.encryption_key.as_bytes());
        out.extend_from_slice(&self.payload);
    }

    /// Write the record with a single `write_all`, returning bytes written
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> CodecResult<usize> {
        let encoded = self.encode();
        writer.write_all(&encoded)?;
        Ok(encoded.len())
    }

    pub async fn write_to_async<W: AsyncWrite + Unpin + ?Sized>(
        &self,
        writer: &mut W,
    ) -> CodecResult<usize> {
        let encoded = self.encode();
        writer.write_all(&encoded).await?;
        Ok(encoded.len())
    }

    // ------------------------------------------------------------------
    // Decoding
    // ------------------------------------------------------------------

    /// Decode one complete framed versioned record
    pub fn decode(framed: &[u8]) -> CodecResult<Self> {
        Self::decode_framed(framed, None)
    }

    /// Decode one complete framed record in the untagged legacy layout
    pub fn decode_legacy(framed: &[u8]) -> CodecResult<Self> {
        Self::decode_framed(framed, Some(WireFormat::Legacy))
    }

    /// Decode a body (no length prefix); `None` dispatches on the version tag
    pub fn decode_body(body: &[u8], format: Option<WireFormat>) -> CodecResult<Self> {
        let mut tx = Self::default();
        let format = resolve_format(body, format)?;
        tx.read_header(body, format)?;
        tx.payload
            .extend_from_slice(&body[format.layout().header_len..]);
        Ok(tx)
    }

    fn decode_framed(framed: &[u8], format: Option<WireFormat>) -> CodecResult<Self> {
        if framed.len() < LENGTH_PREFIX_SIZE {
            return Err(CodecError::InsufficientLengthPrefix);
        }
        let expected = LittleEndian::read_u64(&framed[..LENGTH_PREFIX_SIZE]);
        let body = &framed[LENGTH_PREFIX_SIZE..];
        let actual = body.len() as u64;
        if actual < expected {
            return Err(CodecError::InsufficientData { expected, actual });
        }
        if actual > expected {
            return Err(CodecError::TrailingData {
                extra: (actual - expected) as usize,
            });
        }
        Self::decode_body(body, format)
    }

    /// Consume exactly one versioned record from `reader`, overwriting `self`
    pub fn read_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> CodecResult<()> {
        self.read_framed(reader, None)
    }

    /// Consume exactly one legacy record from `reader`, overwriting `self`
    pub fn read_legacy_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> CodecResult<()> {
        self.read_framed(reader, Some(WireFormat::Legacy))
    }

    fn read_framed<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
        format: Option<WireFormat>,
    ) -> CodecResult<()> {
        self.reset();

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        if read_full(reader, &mut prefix)? < LENGTH_PREFIX_SIZE {
            return Err(CodecError::InsufficientLengthPrefix);
        }
        let expected = LittleEndian::read_u64(&prefix);

        // Read into the payload buffer so pooled records reuse their allocation;
        // `take` bounds the read without trusting `expected` for an up-front allocation.
        let mut body = std::mem::take(&mut self.payload);
        let actual = (&mut *reader).take(expected).read_to_end(&mut body)? as u64;
        self.finish_body(body, expected, actual, format)
    }

    /// Async counterpart of [`read_from`](Self::read_from)
    pub async fn read_from_async<R: AsyncRead + Unpin + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> CodecResult<()> {
        self.reset();

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        if read_full_async(reader, &mut prefix).await? < LENGTH_PREFIX_SIZE {
            return Err(CodecError::InsufficientLengthPrefix);
        }
        let expected = LittleEndian::read_u64(&prefix);

        let mut body = std::mem::take(&mut self.payload);
        let actual = (&mut *reader)
            .take(expected)
            .read_to_end(&mut body)
            .await? as u64;
        self.finish_body(body, expected, actual, None)
    }

    fn finish_body(
        &mut self,
        mut body: Vec<u8>,
        expected: u64,
        actual: u64,
        format: Option<WireFormat>,
    ) -> CodecResult<()> {
        if actual < expected {
            body.clear();
            self.payload = body;
            return Err(CodecError::InsufficientData { expected, actual });
        }

        let format = match resolve_format(&body, format) {
            Ok(format) => format,
            Err(e) => {
                body.clear();
                self.payload = body;
                return Err(e);
            }
        };
        if let Err(e) = self.read_header(&body, format) {
            body.clear();
            self.payload = body;
            return Err(e);
        }

        body.drain(..format.layout().header_len);
        self.payload = body;
        Ok(())
    }

    fn read_header(&mut self, body: &[u8], format: WireFormat) -> CodecResult<()> {
        let layout = format.layout();
        if body.len() < layout.header_len {
            return Err(CodecError::HeaderTooShort {
                expected: layout.header_len,
                actual: body.len(),
            });
        }

        let id_bytes = &body[layout.id..layout.id + layout.id_len];
        self.id = match format {
            WireFormat::Legacy => TransactionId::Counter(LittleEndian::read_u64(id_bytes)),
            WireFormat::V1 => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(id_bytes);
                TransactionId::Time(Uuid::from_bytes(uuid))
            }
        };
        self.action = Action::try_from(body[layout.action])?;
        self.encoding_key = key_at(body, layout.encoding_key);
        self.encryption_key = key_at(body, layout.encryption_key);
        Ok(())
    }
}

fn resolve_format(body: &[u8], format: Option<WireFormat>) -> CodecResult<WireFormat> {
    match format {
        Some(format) => Ok(format),
        None => match body.first() {
            Some(tag) => WireFormat::from_tag(*tag),
            None => Err(CodecError::HeaderTooShort {
                expected: V1_LAYOUT.header_len,
                actual: 0,
            }),
        },
    }
}

fn key_at(body: &[u8], offset: usize) -> ProviderKey {
    let mut key = [0u8; PROVIDER_KEY_SIZE];
    key.copy_from_slice(&body[offset..offset + PROVIDER_KEY_SIZE]);
    ProviderKey::new(key)
}

/// Fill `buf` until it is full or the reader reports end of stream
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

async fn read_full_async<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn legacy_vector() -> Transaction {
        Transaction::new(TransactionId::Counter(0), Action::Add)
            .with_keys(
                ProviderKey::new([0, 1, 2, 3, 4, 5, 6, 7]),
                ProviderKey::new([8, 9, 10, 11, 12, 13, 14, 15]),
            )
            .with_payload(&[16, 17, 18])
    }

    fn v1_record(payload: &[u8]) -> Transaction {
        Transaction::new(TransactionId::generate(), Action::Remove)
            .with_keys(
                ProviderKey::new(*b"msgpack\0"),
                ProviderKey::new(*b"none\0\0\0\0"),
            )
            .with_payload(payload)
    }

    #[test]
    fn test_legacy_concrete_vector() {
        let encoded = legacy_vector().encode();
        assert_eq!(
            encoded,
            vec![
                28, 0, 0, 0, 0, 0, 0, 0, //
                0, 0, 0, 0, 0, 0, 0, 0, //
                43, //
                0, 1, 2, 3, 4, 5, 6, 7, //
                8, 9, 10, 11, 12, 13, 14, 15, //
                16, 17, 18,
            ]
        );
        assert_eq!(encoded.len(), 8 + 25 + 3);
    }

    #[test]
    fn test_length_prefix_matches_remainder() {
        for tx in [legacy_vector(), v1_record(b""), v1_record(&[7u8; 300])] {
            let encoded = tx.encode();
            let prefix = LittleEndian::read_u64(&encoded[..8]);
            assert_eq!(prefix, (encoded.len() - 8) as u64);
            assert_eq!(prefix, tx.body_len());
        }
    }

    #[test]
    fn test_v1_layout_offsets() {
        let tx = v1_record(b"abc");
        let encoded = tx.encode();
        let body = &encoded[8..];
        assert_eq!(body[0], FORMAT_VERSION_1);
        let TransactionId::Time(uuid) = tx.id() else {
            panic!("expected a time-ordered id");
        };
        assert_eq!(&body[1..17], uuid.as_bytes());
        assert_eq!(body[17], b'-');
        assert_eq!(&body[18..26], b"msgpack\0");
        assert_eq!(&body[26..34], b"none\0\0\0\0");
        assert_eq!(&body[34..], b"abc");
    }

    #[test]
    fn test_round_trip_v1() {
        let tx = v1_record(b"payload bytes");
        let decoded = Transaction::decode(&tx.encode()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_round_trip_legacy() {
        let tx = Transaction::new(TransactionId::Counter(u64::MAX - 3), Action::Clear)
            .with_keys(ProviderKey::new(*b"binaryl\0"), ProviderKey::new(*b"chacha20"))
            .with_payload(&[0xFF; 40]);
        let decoded = Transaction::decode_legacy(&tx.encode()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_versioned_decode_rejects_unknown_tag() {
        // Legacy bytes start with the id, not a version tag
        let mut legacy = legacy_vector();
        legacy.set_id(TransactionId::Counter(9));
        let err = Transaction::decode(&legacy.encode()).unwrap_err();
        assert_eq!(err, CodecError::UnknownVersion(9));
    }

    #[test]
    fn test_decode_rejects_short_header() {
        let mut framed = vec![3, 0, 0, 0, 0, 0, 0, 0];
        framed.extend_from_slice(&[FORMAT_VERSION_1, 0, 0]);
        assert_eq!(
            Transaction::decode(&framed).unwrap_err(),
            CodecError::HeaderTooShort {
                expected: 34,
                actual: 3
            }
        );
    }

    #[test]
    fn test_decode_rejects_invalid_action() {
        let mut encoded = v1_record(b"x").encode();
        encoded[8 + 17] = b'?';
        assert_eq!(
            Transaction::decode(&encoded).unwrap_err(),
            CodecError::InvalidAction(b'?')
        );
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut encoded = v1_record(b"x").encode();
        encoded.push(0);
        assert_eq!(
            Transaction::decode(&encoded).unwrap_err(),
            CodecError::TrailingData { extra: 1 }
        );
    }

    #[test]
    fn test_truncated_stream_reports_insufficient_data() {
        let full = legacy_vector().encode();
        let truncated = &full[..8 + 18];
        let mut tx = Transaction::default();
        let err = tx.read_legacy_from(&mut Cursor::new(truncated)).unwrap_err();
        assert_eq!(
            err,
            CodecError::InsufficientData {
                expected: 28,
                actual: 18
            }
        );
        assert!(err.to_string().contains("did not read expected amount of data"));
    }

    #[test]
    fn test_short_prefix_reports_length_error() {
        let mut tx = Transaction::default();
        let err = tx.read_from(&mut Cursor::new(vec![28u8, 0, 0])).unwrap_err();
        assert_eq!(err, CodecError::InsufficientLengthPrefix);

        let err = tx.read_from(&mut Cursor::new(Vec::<u8>::new())).unwrap_err();
        assert!(err.is_end_of_records());
    }

    #[test]
    fn test_stream_reads_consecutive_records() {
        let records: Vec<_> = (0..5).map(|i| v1_record(&[i; 4])).collect();
        let mut stream = Vec::new();
        for tx in &records {
            tx.write_to(&mut stream).unwrap();
        }

        let mut cursor = Cursor::new(stream);
        let mut tx = Transaction::default();
        for expected in &records {
            tx.read_from(&mut cursor).unwrap();
            assert_eq!(&tx, expected);
        }
        assert!(tx.read_from(&mut cursor).unwrap_err().is_end_of_records());
    }

    #[test]
    fn test_read_overwrites_previous_state() {
        let mut tx = v1_record(&[1u8; 64]);
        let next = v1_record(b"z");
        tx.read_from(&mut Cursor::new(next.encode())).unwrap();
        assert_eq!(tx, next);
    }

    #[tokio::test]
    async fn test_async_stream_round_trip() {
        let first = v1_record(b"first");
        let second = v1_record(b"second");
        let mut stream = Vec::new();
        first.write_to_async(&mut stream).await.unwrap();
        second.write_to_async(&mut stream).await.unwrap();

        let mut cursor = Cursor::new(stream);
        let mut tx = Transaction::default();
        tx.read_from_async(&mut cursor).await.unwrap();
        assert_eq!(tx, first);
        tx.read_from_async(&mut cursor).await.unwrap();
        assert_eq!(tx, second);
        assert_eq!(
            tx.read_from_async(&mut cursor).await.unwrap_err(),
            CodecError::InsufficientLengthPrefix
        );
    }

    #[test]
    fn test_created_at_from_time_id() {
        let before = Utc::now() - chrono::Duration::seconds(1);
        let tx = v1_record(b"");
        let created = tx.created_at().unwrap();
        assert!(created >= before);
        assert!(created <= Utc::now() + chrono::Duration::seconds(1));
        assert!(legacy_vector().created_at().is_none());
    }

    #[test]
    fn test_reset_clears_fields() {
        let mut tx = v1_record(b"data");
        tx.reset();
        assert_eq!(tx, Transaction::default());
    }
}
