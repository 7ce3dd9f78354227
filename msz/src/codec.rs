//! Source payload codecs and target block codecs.
//!
//! mzML binary payloads are base64 text wrapping either a raw little-endian
//! numeric array or a zlib-deflated one. The container side compresses whole
//! stream blocks with zstd, or stores them verbatim.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::cv;
use crate::error::{MszError, Result};

/// Payload compression declared by the source mzML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCompression {
    Zlib,
    None,
}

impl SourceCompression {
    pub fn from_accession(acc: u32) -> Option<Self> {
        match acc {
            cv::ACC_ZLIB_COMPRESSION => Some(Self::Zlib),
            cv::ACC_NO_COMPRESSION => Some(Self::None),
            _ => None,
        }
    }

    pub fn accession(self) -> u32 {
        match self {
            Self::Zlib => cv::ACC_ZLIB_COMPRESSION,
            Self::None => cv::ACC_NO_COMPRESSION,
        }
    }
}

/// Decodes one `<binary>` payload to its raw numeric bytes.
pub fn decode_payload(b64: &[u8], compression: SourceCompression) -> Result<Vec<u8>> {
    let decoded = BASE64
        .decode(b64)
        .map_err(|e| MszError::MalformedSource(format!("invalid base64 payload: {e}")))?;

    match compression {
        SourceCompression::None => Ok(decoded),
        SourceCompression::Zlib => {
            let mut raw = Vec::with_capacity(decoded.len() * 3);
            let mut inflater = ZlibDecoder::new(&decoded[..]);
            inflater
                .read_to_end(&mut raw)
                .map_err(|e| MszError::MalformedSource(format!("zlib payload rejected: {e}")))?;
            Ok(raw)
        }
    }
}

/// Re-encodes raw numeric bytes to the payload text the source used.
///
/// The deflate side always runs at the default level; that is what the
/// common mzML writers emit, which keeps lossless round-trips byte-exact.
pub fn encode_payload(raw: &[u8], compression: SourceCompression) -> Result<Vec<u8>> {
    let body = match compression {
        SourceCompression::None => BASE64.encode(raw),
        SourceCompression::Zlib => {
            let mut deflater = ZlibEncoder::new(Vec::new(), Compression::default());
            deflater.write_all(raw)?;
            BASE64.encode(deflater.finish()?)
        }
    };
    Ok(body.into_bytes())
}

/// Target codec for one compressed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCodec {
    Zstd,
    Store,
}

impl BlockCodec {
    pub fn from_accession(acc: u32) -> Result<Self> {
        match acc {
            cv::ACC_CODEC_ZSTD => Ok(Self::Zstd),
            cv::ACC_CODEC_STORE => Ok(Self::Store),
            other => Err(MszError::Unsupported(format!(
                "unknown target codec accession {other}"
            ))),
        }
    }

    pub fn accession(self) -> u32 {
        match self {
            Self::Zstd => cv::ACC_CODEC_ZSTD,
            Self::Store => cv::ACC_CODEC_STORE,
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "zstd" | "ZSTD" => Ok(Self::Zstd),
            "none" | "nocomp" => Ok(Self::Store),
            other => Err(MszError::InvalidArgument(format!(
                "unknown block codec: {other}"
            ))),
        }
    }
}

/// Per-worker compression context, allocated once and reused across blocks.
pub struct BlockCompressor {
    codec: BlockCodec,
    cctx: Option<zstd::bulk::Compressor<'static>>,
}

impl BlockCompressor {
    pub fn new(codec: BlockCodec, level: i32) -> Result<Self> {
        let cctx = match codec {
            BlockCodec::Zstd => {
                if !(1..=22).contains(&level) {
                    return Err(MszError::InvalidArgument(format!(
                        "zstd level {level} outside 1..=22"
                    )));
                }
                Some(zstd::bulk::Compressor::new(level)?)
            }
            BlockCodec::Store => None,
        };
        Ok(Self { codec, cctx })
    }

    pub fn compress(&mut self, src: &[u8]) -> Result<Vec<u8>> {
        match (self.codec, self.cctx.as_mut()) {
            (BlockCodec::Zstd, Some(cctx)) => Ok(cctx.compress(src)?),
            _ => Ok(src.to_vec()),
        }
    }
}

/// Per-worker decompression context.
pub struct BlockDecompressor {
    codec: BlockCodec,
    dctx: Option<zstd::bulk::Decompressor<'static>>,
}

impl BlockDecompressor {
    pub fn new(codec: BlockCodec) -> Result<Self> {
        let dctx = match codec {
            BlockCodec::Zstd => Some(zstd::bulk::Decompressor::new()?),
            BlockCodec::Store => None,
        };
        Ok(Self { codec, dctx })
    }

    /// Decompresses one block and checks it against the declared size from
    /// the block-length table.
    pub fn decompress(&mut self, src: &[u8], original_size: usize) -> Result<Vec<u8>> {
        let out = match (self.codec, self.dctx.as_mut()) {
            (BlockCodec::Zstd, Some(dctx)) => dctx.decompress(src, original_size).map_err(|e| {
                MszError::CorruptContainer(format!("block failed to decompress: {e}"))
            })?,
            _ => src.to_vec(),
        };
        if out.len() != original_size {
            return Err(MszError::CorruptContainer(format!(
                "block decompressed to {} bytes, expected {}",
                out.len(),
                original_size
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_zlib_round_trip() {
        let raw: Vec<u8> = (0..64u8).collect();
        let encoded = encode_payload(&raw, SourceCompression::Zlib).unwrap();
        let decoded = decode_payload(&encoded, SourceCompression::Zlib).unwrap();
        assert_eq!(decoded, raw);
    }

    #[test]
    fn payload_plain_round_trip() {
        let raw = b"\x01\x02\x03\x04".to_vec();
        let encoded = encode_payload(&raw, SourceCompression::None).unwrap();
        assert_eq!(encoded, b"AQIDBA==");
        let decoded = decode_payload(&encoded, SourceCompression::None).unwrap();
        assert_eq!(decoded, raw);
    }

    #[test]
    fn payload_rejects_garbage() {
        assert!(matches!(
            decode_payload(b"not base64!!", SourceCompression::None),
            Err(MszError::MalformedSource(_))
        ));
        // Valid base64 of bytes that are not a zlib stream.
        let bogus = BASE64.encode(b"plainplainplain");
        assert!(matches!(
            decode_payload(bogus.as_bytes(), SourceCompression::Zlib),
            Err(MszError::MalformedSource(_))
        ));
    }

    #[test]
    fn block_codec_round_trip() {
        let data = vec![7u8; 4096];
        let mut c = BlockCompressor::new(BlockCodec::Zstd, 3).unwrap();
        let compressed = c.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        let mut d = BlockDecompressor::new(BlockCodec::Zstd).unwrap();
        assert_eq!(d.decompress(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn store_codec_is_identity() {
        let data = b"stored bytes".to_vec();
        let mut c = BlockCompressor::new(BlockCodec::Store, 0).unwrap();
        let out = c.compress(&data).unwrap();
        assert_eq!(out, data);
        let mut d = BlockDecompressor::new(BlockCodec::Store).unwrap();
        assert_eq!(d.decompress(&out, data.len()).unwrap(), data);
    }

    #[test]
    fn zstd_level_is_validated() {
        assert!(matches!(
            BlockCompressor::new(BlockCodec::Zstd, 0),
            Err(MszError::InvalidArgument(_))
        ));
        assert!(matches!(
            BlockCompressor::new(BlockCodec::Zstd, 23),
            Err(MszError::InvalidArgument(_))
        ));
    }

    #[test]
    fn corrupt_block_is_detected() {
        let data = vec![42u8; 1024];
        let mut c = BlockCompressor::new(BlockCodec::Zstd, 3).unwrap();
        let mut compressed = c.compress(&data).unwrap();
        for b in compressed.iter_mut().take(4) {
            *b ^= 0xFF;
        }
        let mut d = BlockDecompressor::new(BlockCodec::Zstd).unwrap();
        assert!(matches!(
            d.decompress(&compressed, data.len()),
            Err(MszError::CorruptContainer(_))
        ));
    }
}
