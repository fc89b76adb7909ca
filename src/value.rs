use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Tag byte for serializer-produced object payloads.
pub const TAG_OBJECT: u8 = 0x00;
/// Tag byte for raw byte-array payloads, stored verbatim.
pub const TAG_BYTES: u8 = 0x01;
/// Tag byte for UTF-8 string payloads.
pub const TAG_STRING: u8 = 0x02;

/// Payload is a value on its way into or out of the store, before the tag
/// byte and compression are applied.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// An arbitrary object, carried as the serializer's interchange form.
    Object(serde_json::Value),
    /// A raw byte array.
    Bytes(Vec<u8>),
    /// A UTF-8 string.
    Text(String),
}

impl Payload {
    fn kind_name(&self) -> &'static str {
        match self {
            Payload::Object(_) => "object",
            Payload::Bytes(_) => "bytes",
            Payload::Text(_) => "string",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("failed to serialize value: {0}")]
    Serialize(String),

    #[error("failed to compress payload: {0}")]
    Compress(#[from] std::io::Error),
}

impl From<serde_json::Error> for EncodeError {
    fn from(e: serde_json::Error) -> Self {
        EncodeError::Serialize(e.to_string())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("stored payload is empty")]
    Empty,

    #[error("unknown payload tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("string payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("failed to deserialize value: {0}")]
    Deserialize(String),

    #[error("payload kind mismatch: wanted={wanted}, actual={actual}")]
    KindMismatch {
        wanted: &'static str,
        actual: &'static str,
    },

    #[error("failed to decompress payload: {0}")]
    Decompress(#[from] std::io::Error),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Deserialize(e.to_string())
    }
}

/// ToPayload converts a caller value into a storable [`Payload`].
///
/// Strings and byte slices become their dedicated payload kinds; wrap any
/// serde-serializable type in [`Json`] to store it through the object tag.
pub trait ToPayload {
    fn to_payload(&self) -> Result<Payload, EncodeError>;
}

/// FromPayload converts a stored [`Payload`] back into a caller value.
pub trait FromPayload: Sized {
    fn from_payload(payload: Payload) -> Result<Self, DecodeError>;
}

/// Json wraps an arbitrary serde value for storage through the object tag.
///
/// ```ignore
/// cache.set_static(("users", "42"), &Json(user), &[])?;
/// let user: Option<Json<User>> = cache.get(("users", "42"))?;
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Json<T>(pub T);

impl<T> ToPayload for &T
where
    T: ToPayload + ?Sized,
{
    fn to_payload(&self) -> Result<Payload, EncodeError> {
        (**self).to_payload()
    }
}

impl ToPayload for str {
    fn to_payload(&self) -> Result<Payload, EncodeError> {
        Ok(Payload::Text(self.to_string()))
    }
}

impl ToPayload for String {
    fn to_payload(&self) -> Result<Payload, EncodeError> {
        Ok(Payload::Text(self.clone()))
    }
}

impl ToPayload for [u8] {
    fn to_payload(&self) -> Result<Payload, EncodeError> {
        Ok(Payload::Bytes(self.to_vec()))
    }
}

impl ToPayload for Vec<u8> {
    fn to_payload(&self) -> Result<Payload, EncodeError> {
        Ok(Payload::Bytes(self.clone()))
    }
}

impl ToPayload for serde_json::Value {
    fn to_payload(&self) -> Result<Payload, EncodeError> {
        Ok(Payload::Object(self.clone()))
    }
}

impl<T> ToPayload for Json<T>
where
    T: Serialize,
{
    fn to_payload(&self) -> Result<Payload, EncodeError> {
        Ok(Payload::Object(serde_json::to_value(&self.0)?))
    }
}

impl FromPayload for String {
    fn from_payload(payload: Payload) -> Result<Self, DecodeError> {
        match payload {
            Payload::Text(s) => Ok(s),
            other => Err(DecodeError::KindMismatch {
                wanted: "string",
                actual: other.kind_name(),
            }),
        }
    }
}

impl FromPayload for Vec<u8> {
    fn from_payload(payload: Payload) -> Result<Self, DecodeError> {
        match payload {
            Payload::Bytes(b) => Ok(b),
            other => Err(DecodeError::KindMismatch {
                wanted: "bytes",
                actual: other.kind_name(),
            }),
        }
    }
}

impl FromPayload for serde_json::Value {
    fn from_payload(payload: Payload) -> Result<Self, DecodeError> {
        match payload {
            Payload::Object(v) => Ok(v),
            other => Err(DecodeError::KindMismatch {
                wanted: "object",
                actual: other.kind_name(),
            }),
        }
    }
}

impl<T> FromPayload for Json<T>
where
    T: DeserializeOwned,
{
    fn from_payload(payload: Payload) -> Result<Self, DecodeError> {
        match payload {
            Payload::Object(v) => Ok(Json(serde_json::from_value(v)?)),
            other => Err(DecodeError::KindMismatch {
                wanted: "object",
                actual: other.kind_name(),
            }),
        }
    }
}

/// Serializer turns object payloads into bytes and back.
///
/// The interchange form is `serde_json::Value`, so alternative encodings
/// (CBOR, MessagePack) plug in without touching the tag layout.
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>, EncodeError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<serde_json::Value, DecodeError>;
}

/// JsonSerializer is the default object serializer.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<serde_json::Value, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compressor shrinks tagged streams that crossed the compression threshold.
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;
}

/// DeflateCompressor is the default compressor.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCompressor {
    level: Compression,
}

impl DeflateCompressor {
    pub fn new(level: Compression) -> Self {
        DeflateCompressor { level }
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        DeflateCompressor {
            level: Compression::default(),
        }
    }
}

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() * 2);
        DeflateDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Pipeline applies the tag byte, the serializer and the compression policy
/// in one place, and reverses them on the way out.
pub(crate) struct Pipeline {
    serializer: Arc<dyn Serializer>,
    compressor: Arc<dyn Compressor>,
    compression_threshold: usize,
}

impl Pipeline {
    pub(crate) fn new(
        serializer: Arc<dyn Serializer>,
        compressor: Arc<dyn Compressor>,
        compression_threshold: usize,
    ) -> Self {
        Pipeline {
            serializer,
            compressor,
            compression_threshold,
        }
    }

    /// encode produces the stored bytes and the compressed flag for a value.
    pub(crate) fn encode<T>(&self, value: &T) -> Result<(Vec<u8>, bool), EncodeError>
    where
        T: ToPayload + ?Sized,
    {
        let stream = match value.to_payload()? {
            Payload::Text(s) => tagged(TAG_STRING, s.as_bytes()),
            Payload::Bytes(b) => tagged(TAG_BYTES, &b),
            Payload::Object(v) => tagged(TAG_OBJECT, &self.serializer.serialize(&v)?),
        };
        if stream.len() >= self.compression_threshold {
            Ok((self.compressor.compress(&stream)?, true))
        } else {
            Ok((stream, false))
        }
    }

    /// decode reverses [`Pipeline::encode`] given the stored bytes and flag.
    pub(crate) fn decode<T>(&self, stored: &[u8], compressed: bool) -> Result<T, DecodeError>
    where
        T: FromPayload,
    {
        let raw;
        let data: &[u8] = if compressed {
            raw = self.compressor.decompress(stored)?;
            &raw
        } else {
            stored
        };
        let (tag, body) = data.split_first().ok_or(DecodeError::Empty)?;
        let payload = match *tag {
            TAG_STRING => Payload::Text(String::from_utf8(body.to_vec())?),
            TAG_BYTES => Payload::Bytes(body.to_vec()),
            TAG_OBJECT => Payload::Object(self.serializer.deserialize(body)?),
            other => return Err(DecodeError::UnknownTag(other)),
        };
        T::from_payload(payload)
    }
}

fn tagged(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut stream = Vec::with_capacity(body.len() + 1);
    stream.push(tag);
    stream.extend_from_slice(body);
    stream
}
