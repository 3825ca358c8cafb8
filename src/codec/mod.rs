//! Payload codec: bincode serialization wrapped in an optional compressor.
//!
//! # Framing
//! Every encoded payload is `[ codec tag (1 B) | compressed bincode ]`.
//! The tag makes each payload self-describing, so a container may mix
//! codecs freely and a reader never needs out-of-band configuration.
//!
//! | Tag | Codec |
//! |-----|-------|
//! | 0   | none  |
//! | 1   | zstd  |
//! | 2   | lz4   |
//!
//! Tags are permanent.  A tag is NEVER reused for a different codec.
//!
//! Compression is opportunistic: already-compressed input can grow by a
//! few bytes.  Callers accept that.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Default Zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

// ── CodecId ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecId {
    None,
    #[default]
    Zstd,
    Lz4,
}

impl CodecId {
    /// The on-disk tag byte.
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            CodecId::None => 0,
            CodecId::Zstd => 1,
            CodecId::Lz4  => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CodecId::None),
            1 => Some(CodecId::Zstd),
            2 => Some(CodecId::Lz4),
            _ => None,
        }
    }

    /// Human-readable name (for diagnostics only; never parsed from disk).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None => "none",
            CodecId::Zstd => "zstd",
            CodecId::Lz4  => "lz4",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(CodecId::None),
            "zstd" => Some(CodecId::Zstd),
            "lz4"  => Some(CodecId::Lz4),
            _      => None,
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Unknown codec tag {0:#04x}")]
    UnknownCodec(u8),
    #[error("Empty payload")]
    Empty,
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn codec_id(&self) -> CodecId { CodecId::None }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8])        -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn codec_id(&self) -> CodecId { CodecId::Zstd }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, level).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::decode_all(data).map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn codec_id(&self) -> CodecId { CodecId::Lz4 }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::compress_prepend_size(data))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::None => Box::new(NoneCodec),
        CodecId::Zstd => Box::new(ZstdCodec),
        CodecId::Lz4  => Box::new(Lz4Codec),
    }
}

// ── Object framing ───────────────────────────────────────────────────────────

/// Serialize `value` with bincode and compress it with `codec`.
pub fn serialize<T: Serialize>(value: &T, codec: CodecId, level: i32) -> Result<Vec<u8>, CodecError> {
    let raw = bincode::serialize(value)
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    let codec = get_codec(codec);
    let body = codec.compress(&raw, level)?;

    let mut out = Vec::with_capacity(1 + body.len());
    out.push(codec.codec_id().tag());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Inverse of [`serialize`].  The codec is taken from the leading tag byte.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let (&tag, body) = bytes.split_first().ok_or(CodecError::Empty)?;
    let codec = CodecId::from_tag(tag).ok_or(CodecError::UnknownCodec(tag))?;
    let raw = get_codec(codec).decompress(body)?;
    bincode::deserialize(&raw).map_err(|e| CodecError::Serialization(e.to_string()))
}
