//! Numeric transform catalogue.
//!
//! Each transform is a pure encode/decode pair over one decoded numeric
//! array. Every encoded array starts with a little-endian `u32` element
//! count so the decoder can reverse the transform with no ambient state;
//! arrays are concatenated back to back inside a stream and `decode_from`
//! reports how many bytes it consumed.
//!
//! Dispatch is resolved once at pipeline setup through [`Transform::resolve`];
//! invalid `(transform, element type)` combinations fail there, never
//! mid-stream.

use crate::cv;
use crate::error::{MszError, Result};

const COUNT_HEADER: usize = 4;

/// Built-in quantisation scales for the parameterless variable-width
/// delta transforms.
const VDELTA16_SCALE: f64 = 128.0;
const VDELTA24_SCALE: f64 = 65536.0;

/// Numeric element type of a source binary array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Float32,
    Float64,
}

impl ElementType {
    pub fn size(self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    pub fn from_accession(acc: u32) -> Option<Self> {
        match acc {
            cv::ACC_32_BIT_FLOAT => Some(Self::Float32),
            cv::ACC_64_BIT_FLOAT => Some(Self::Float64),
            _ => None,
        }
    }

    pub fn accession(self) -> u32 {
        match self {
            Self::Float32 => cv::ACC_32_BIT_FLOAT,
            Self::Float64 => cv::ACC_64_BIT_FLOAT,
        }
    }
}

/// Identifier of a transform, as named on the CLI and stored in the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformId {
    Lossless,
    Cast64To32,
    Log2,
    Delta16,
    Delta24,
    Delta32,
    VDelta16,
    VDelta24,
    Vbr,
    BitPack,
    Cast64To16,
}

impl TransformId {
    pub fn accession(self) -> u32 {
        match self {
            Self::Lossless => cv::ACC_TRANSFORM_LOSSLESS,
            Self::Cast64To32 => cv::ACC_TRANSFORM_CAST_64_TO_32,
            Self::Log2 => cv::ACC_TRANSFORM_LOG2,
            Self::Delta16 => cv::ACC_TRANSFORM_DELTA16,
            Self::Delta24 => cv::ACC_TRANSFORM_DELTA24,
            Self::Delta32 => cv::ACC_TRANSFORM_DELTA32,
            Self::VDelta16 => cv::ACC_TRANSFORM_VDELTA16,
            Self::VDelta24 => cv::ACC_TRANSFORM_VDELTA24,
            Self::Vbr => cv::ACC_TRANSFORM_VBR,
            Self::BitPack => cv::ACC_TRANSFORM_BITPACK,
            Self::Cast64To16 => cv::ACC_TRANSFORM_CAST_64_TO_16,
        }
    }

    pub fn from_accession(acc: u32) -> Result<Self> {
        Ok(match acc {
            cv::ACC_TRANSFORM_LOSSLESS => Self::Lossless,
            cv::ACC_TRANSFORM_CAST_64_TO_32 => Self::Cast64To32,
            cv::ACC_TRANSFORM_LOG2 => Self::Log2,
            cv::ACC_TRANSFORM_DELTA16 => Self::Delta16,
            cv::ACC_TRANSFORM_DELTA24 => Self::Delta24,
            cv::ACC_TRANSFORM_DELTA32 => Self::Delta32,
            cv::ACC_TRANSFORM_VDELTA16 => Self::VDelta16,
            cv::ACC_TRANSFORM_VDELTA24 => Self::VDelta24,
            cv::ACC_TRANSFORM_VBR => Self::Vbr,
            cv::ACC_TRANSFORM_BITPACK => Self::BitPack,
            cv::ACC_TRANSFORM_CAST_64_TO_16 => Self::Cast64To16,
            other => {
                return Err(MszError::Unsupported(format!(
                    "unknown transform accession {other}"
                )))
            }
        })
    }

    /// Parses the CLI name. Unknown names are rejected here, before any
    /// pipeline is set up.
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "" | "lossless" => Self::Lossless,
            "cast" => Self::Cast64To32,
            "cast16" => Self::Cast64To16,
            "log" => Self::Log2,
            "delta16" => Self::Delta16,
            "delta24" => Self::Delta24,
            "delta32" => Self::Delta32,
            "vdelta16" => Self::VDelta16,
            "vdelta24" => Self::VDelta24,
            "vbr" => Self::Vbr,
            "bitpack" => Self::BitPack,
            other => {
                return Err(MszError::InvalidArgument(format!(
                    "unknown lossy compression type: {other}"
                )))
            }
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Lossless => "lossless",
            Self::Cast64To32 => "cast",
            Self::Cast64To16 => "cast16",
            Self::Log2 => "log",
            Self::Delta16 => "delta16",
            Self::Delta24 => "delta24",
            Self::Delta32 => "delta32",
            Self::VDelta16 => "vdelta16",
            Self::VDelta24 => "vdelta24",
            Self::Vbr => "vbr",
            Self::BitPack => "bitpack",
        }
    }

    pub fn is_lossless(self) -> bool {
        matches!(self, Self::Lossless)
    }

    fn needs_scale(self) -> bool {
        matches!(
            self,
            Self::Delta16 | Self::Delta24 | Self::Delta32 | Self::Vbr | Self::BitPack | Self::Cast64To16
        )
    }
}

/// Declared reconstruction tolerance of a transform, used by the test suite.
#[derive(Debug, Clone, Copy)]
pub enum Tolerance {
    Exact,
    Absolute(f64),
    Multiplicative(f64),
}

/// A transform resolved against a source element type and parameters.
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    id: TransformId,
    element: ElementType,
    scale: f64,
}

impl Transform {
    /// Selection matrix: `(transform id, source element type) → behaviour`.
    pub fn resolve(id: TransformId, element: ElementType, scale: f32) -> Result<Self> {
        let wide_only = !matches!(id, TransformId::Lossless | TransformId::Log2);
        if wide_only && element != ElementType::Float64 {
            return Err(MszError::Unsupported(format!(
                "transform {} requires a 64-bit source array",
                id.name()
            )));
        }
        if id.needs_scale() && !(scale > 0.0) {
            return Err(MszError::InvalidArgument(format!(
                "transform {} requires a positive scale factor",
                id.name()
            )));
        }
        let scale = match id {
            TransformId::VDelta16 => VDELTA16_SCALE,
            TransformId::VDelta24 => VDELTA24_SCALE,
            _ => scale as f64,
        };
        Ok(Self { id, element, scale })
    }

    pub fn id(&self) -> TransformId {
        self.id
    }

    pub fn tolerance(&self) -> Tolerance {
        match self.id {
            TransformId::Lossless => Tolerance::Exact,
            TransformId::Cast64To32 => Tolerance::Multiplicative(1.0 + 1e-6),
            TransformId::Log2 => Tolerance::Multiplicative(2f64.powf(0.01)),
            TransformId::Vbr => Tolerance::Absolute(self.scale),
            _ => Tolerance::Absolute(1.0 / self.scale),
        }
    }

    /// Encodes one decoded numeric array, appending to `out`.
    pub fn encode(&self, raw: &[u8], out: &mut Vec<u8>) -> Result<()> {
        match self.id {
            TransformId::Lossless => {
                let count = element_count(raw, self.element)?;
                write_count(count, out);
                out.extend_from_slice(raw);
            }
            TransformId::Cast64To32 => {
                let vals = read_f64s(raw)?;
                write_count(vals.len(), out);
                for v in vals {
                    out.extend_from_slice(&(v as f32).to_le_bytes());
                }
            }
            TransformId::Log2 => {
                let vals = self.read_source(raw)?;
                write_count(vals.len(), out);
                for v in vals {
                    let q = if v > 0.0 {
                        (v.log2() * 100.0).floor().clamp(0.0, 65535.0) as u16
                    } else {
                        0
                    };
                    out.extend_from_slice(&q.to_le_bytes());
                }
            }
            TransformId::Delta16 => self.encode_delta(raw, 2, out)?,
            TransformId::Delta24 => self.encode_delta(raw, 3, out)?,
            TransformId::Delta32 => self.encode_delta(raw, 4, out)?,
            TransformId::VDelta16 => self.encode_vdelta(raw, 2, out)?,
            TransformId::VDelta24 => self.encode_vdelta(raw, 3, out)?,
            TransformId::Vbr => self.encode_vbr(raw, out)?,
            TransformId::BitPack => self.encode_bitpack(raw, out)?,
            TransformId::Cast64To16 => {
                let vals = read_f64s(raw)?;
                write_count(vals.len(), out);
                for v in vals {
                    let q = (v * self.scale).round().clamp(0.0, 65535.0) as u16;
                    out.extend_from_slice(&q.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    /// Decodes one array from the front of `buf`, returning the raw bytes in
    /// the source element type and the number of encoded bytes consumed.
    pub fn decode_from(&self, buf: &[u8]) -> Result<(Vec<u8>, usize)> {
        let (count, mut pos) = read_count(buf)?;
        match self.id {
            TransformId::Lossless => {
                let len = count * self.element.size();
                let body = take(buf, pos, len)?;
                Ok((body.to_vec(), pos + len))
            }
            TransformId::Cast64To32 => {
                let body = take(buf, pos, count * 4)?;
                let mut raw = Vec::with_capacity(count * 8);
                for chunk in body.chunks_exact(4) {
                    let v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64;
                    raw.extend_from_slice(&v.to_le_bytes());
                }
                Ok((raw, pos + count * 4))
            }
            TransformId::Log2 => {
                let body = take(buf, pos, count * 2)?;
                let mut raw = Vec::with_capacity(count * self.element.size());
                for chunk in body.chunks_exact(2) {
                    let q = u16::from_le_bytes([chunk[0], chunk[1]]);
                    self.push_source(2f64.powf(q as f64 / 100.0), &mut raw);
                }
                Ok((raw, pos + count * 2))
            }
            TransformId::Delta16 => self.decode_delta(buf, count, pos, 2),
            TransformId::Delta24 => self.decode_delta(buf, count, pos, 3),
            TransformId::Delta32 => self.decode_delta(buf, count, pos, 4),
            TransformId::VDelta16 => self.decode_vdelta(buf, count, pos, 2),
            TransformId::VDelta24 => self.decode_vdelta(buf, count, pos, 3),
            TransformId::Vbr => {
                let mut raw = Vec::new();
                let mut q_prev: i64 = 0;
                for _ in 0..count {
                    let z = read_varint(buf, &mut pos)?;
                    q_prev = q_prev.wrapping_add(unzigzag(z));
                    raw.extend_from_slice(&(q_prev as f64 * self.scale).to_le_bytes());
                }
                Ok((raw, pos))
            }
            TransformId::BitPack => self.decode_bitpack(buf, count, pos),
            TransformId::Cast64To16 => {
                let body = take(buf, pos, count * 2)?;
                let mut raw = Vec::with_capacity(count * 8);
                for chunk in body.chunks_exact(2) {
                    let q = u16::from_le_bytes([chunk[0], chunk[1]]);
                    raw.extend_from_slice(&(q as f64 / self.scale).to_le_bytes());
                }
                Ok((raw, pos + count * 2))
            }
        }
    }

    fn read_source(&self, raw: &[u8]) -> Result<Vec<f64>> {
        match self.element {
            ElementType::Float64 => read_f64s(raw),
            ElementType::Float32 => {
                if raw.len() % 4 != 0 {
                    return Err(ragged(raw.len(), 4));
                }
                Ok(raw
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                    .collect())
            }
        }
    }

    fn push_source(&self, v: f64, raw: &mut Vec<u8>) {
        match self.element {
            ElementType::Float64 => raw.extend_from_slice(&v.to_le_bytes()),
            ElementType::Float32 => raw.extend_from_slice(&(v as f32).to_le_bytes()),
        }
    }

    fn encode_delta(&self, raw: &[u8], width: usize, out: &mut Vec<u8>) -> Result<()> {
        let vals = read_f64s(raw)?;
        write_count(vals.len(), out);
        if let Some((&first, rest)) = vals.split_first() {
            out.extend_from_slice(&first.to_le_bytes());
            let (min, max) = int_range(width);
            let mut recon = first;
            for &v in rest {
                let q = ((v - recon) * self.scale).round().clamp(min as f64, max as f64) as i64;
                write_int_n(q, width, out);
                recon += q as f64 / self.scale;
            }
        }
        Ok(())
    }

    fn decode_delta(
        &self,
        buf: &[u8],
        count: usize,
        mut pos: usize,
        width: usize,
    ) -> Result<(Vec<u8>, usize)> {
        let mut raw = Vec::with_capacity(count.min(buf.len()) * 8);
        if count > 0 {
            let mut recon = read_f64(buf, &mut pos)?;
            raw.extend_from_slice(&recon.to_le_bytes());
            let body = take(buf, pos, (count - 1) * width)?;
            for chunk in body.chunks_exact(width) {
                let q = read_int_n(chunk, width);
                recon += q as f64 / self.scale;
                raw.extend_from_slice(&recon.to_le_bytes());
            }
            pos += (count - 1) * width;
        }
        Ok((raw, pos))
    }

    fn encode_vdelta(&self, raw: &[u8], width: usize, out: &mut Vec<u8>) -> Result<()> {
        let vals = read_f64s(raw)?;
        write_count(vals.len(), out);
        if let Some((&first, rest)) = vals.split_first() {
            out.extend_from_slice(&first.to_le_bytes());
            let (min, max) = int_range(width);
            let mut recon = first;
            for &v in rest {
                let d = ((v - recon) * self.scale).round();
                // The minimum slot value is reserved as the escape marker; a
                // difference that does not fit restarts from an exact value.
                if d > min as f64 && d <= max as f64 {
                    let q = d as i64;
                    write_int_n(q, width, out);
                    recon += q as f64 / self.scale;
                } else {
                    write_int_n(min, width, out);
                    out.extend_from_slice(&v.to_le_bytes());
                    recon = v;
                }
            }
        }
        Ok(())
    }

    fn decode_vdelta(
        &self,
        buf: &[u8],
        count: usize,
        mut pos: usize,
        width: usize,
    ) -> Result<(Vec<u8>, usize)> {
        let mut raw = Vec::new();
        if count > 0 {
            let mut recon = read_f64(buf, &mut pos)?;
            raw.extend_from_slice(&recon.to_le_bytes());
            let (min, _) = int_range(width);
            for _ in 1..count {
                let slot = take(buf, pos, width)?;
                let q = read_int_n(slot, width);
                pos += width;
                if q == min {
                    recon = read_f64(buf, &mut pos)?;
                } else {
                    recon += q as f64 / self.scale;
                }
                raw.extend_from_slice(&recon.to_le_bytes());
            }
        }
        Ok((raw, pos))
    }

    fn encode_vbr(&self, raw: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let vals = read_f64s(raw)?;
        write_count(vals.len(), out);
        let mut q_prev: i64 = 0;
        for v in vals {
            let q = (v / self.scale).round() as i64;
            write_varint(zigzag(q.wrapping_sub(q_prev)), out);
            q_prev = q;
        }
        Ok(())
    }

    fn encode_bitpack(&self, raw: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let vals = read_f64s(raw)?;
        write_count(vals.len(), out);
        if let Some((&first, rest)) = vals.split_first() {
            out.extend_from_slice(&first.to_le_bytes());
            let mut recon = first;
            let mut zigzags = Vec::with_capacity(rest.len());
            for &v in rest {
                let q = ((v - recon) * self.scale).round() as i64;
                recon += q as f64 / self.scale;
                zigzags.push(zigzag(q));
            }
            for chunk in zigzags.chunks(BITPACK_CHUNK) {
                let width = chunk
                    .iter()
                    .map(|&z| 64 - z.leading_zeros())
                    .max()
                    .unwrap_or(0) as u8;
                out.push(width);
                pack_bits(chunk, width, out);
            }
        }
        Ok(())
    }

    fn decode_bitpack(&self, buf: &[u8], count: usize, mut pos: usize) -> Result<(Vec<u8>, usize)> {
        let mut raw = Vec::new();
        if count > 0 {
            let mut recon = read_f64(buf, &mut pos)?;
            raw.extend_from_slice(&recon.to_le_bytes());
            let mut remaining = count - 1;
            while remaining > 0 {
                let chunk_len = remaining.min(BITPACK_CHUNK);
                let width = *take(buf, pos, 1)?.first().ok_or_else(|| short(buf.len()))?;
                pos += 1;
                if width > 64 {
                    return Err(MszError::CorruptContainer(format!(
                        "bit-packed chunk width {width} exceeds 64"
                    )));
                }
                let nbytes = (chunk_len * width as usize + 7) / 8;
                let body = take(buf, pos, nbytes)?;
                for z in unpack_bits(body, width, chunk_len) {
                    recon += unzigzag(z) as f64 / self.scale;
                    raw.extend_from_slice(&recon.to_le_bytes());
                }
                pos += nbytes;
                remaining -= chunk_len;
            }
        }
        Ok((raw, pos))
    }
}

const BITPACK_CHUNK: usize = 128;

fn element_count(raw: &[u8], element: ElementType) -> Result<usize> {
    let size = element.size();
    if raw.len() % size != 0 {
        return Err(ragged(raw.len(), size));
    }
    Ok(raw.len() / size)
}

fn ragged(len: usize, size: usize) -> MszError {
    MszError::MalformedSource(format!(
        "decoded array of {len} bytes is not a multiple of the {size}-byte element"
    ))
}

fn short(len: usize) -> MszError {
    MszError::CorruptContainer(format!("encoded array truncated at {len} bytes"))
}

fn read_f64s(raw: &[u8]) -> Result<Vec<f64>> {
    if raw.len() % 8 != 0 {
        return Err(ragged(raw.len(), 8));
    }
    Ok(raw
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}

fn write_count(count: usize, out: &mut Vec<u8>) {
    out.extend_from_slice(&(count as u32).to_le_bytes());
}

fn read_count(buf: &[u8]) -> Result<(usize, usize)> {
    let header = take(buf, 0, COUNT_HEADER)?;
    let count = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    Ok((count, COUNT_HEADER))
}

fn take(buf: &[u8], pos: usize, len: usize) -> Result<&[u8]> {
    buf.get(pos..pos + len).ok_or_else(|| short(buf.len()))
}

fn read_f64(buf: &[u8], pos: &mut usize) -> Result<f64> {
    let b = take(buf, *pos, 8)?;
    *pos += 8;
    Ok(f64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

fn int_range(width: usize) -> (i64, i64) {
    let bits = width as u32 * 8;
    (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
}

fn write_int_n(v: i64, width: usize, out: &mut Vec<u8>) {
    out.extend_from_slice(&(v as u64).to_le_bytes()[..width]);
}

fn read_int_n(bytes: &[u8], width: usize) -> i64 {
    let mut u: u64 = 0;
    for (i, &b) in bytes.iter().take(width).enumerate() {
        u |= (b as u64) << (8 * i);
    }
    let shift = 64 - 8 * width as u32;
    ((u << shift) as i64) >> shift
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(z: u64) -> i64 {
    ((z >> 1) as i64) ^ -((z & 1) as i64)
}

fn write_varint(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut v: u64 = 0;
    for shift in (0..70).step_by(7) {
        let byte = *buf.get(*pos).ok_or_else(|| short(buf.len()))?;
        *pos += 1;
        v |= ((byte & 0x7F) as u64) << shift.min(63);
        if byte & 0x80 == 0 {
            return Ok(v);
        }
    }
    Err(MszError::CorruptContainer(
        "varint longer than 10 bytes".into(),
    ))
}

fn pack_bits(zigzags: &[u64], width: u8, out: &mut Vec<u8>) {
    if width == 0 {
        return;
    }
    let mut acc: u128 = 0;
    let mut bits: u32 = 0;
    for &z in zigzags {
        acc |= (z as u128) << bits;
        bits += width as u32;
        while bits >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push(acc as u8);
    }
}

fn unpack_bits(bytes: &[u8], width: u8, count: usize) -> Vec<u64> {
    if width == 0 {
        return vec![0; count];
    }
    let mut values = Vec::with_capacity(count);
    let mut acc: u128 = 0;
    let mut bits: u32 = 0;
    let mut iter = bytes.iter();
    let mask: u128 = if width == 64 {
        u64::MAX as u128
    } else {
        (1u128 << width) - 1
    };
    for _ in 0..count {
        while bits < width as u32 {
            acc |= (*iter.next().unwrap_or(&0) as u128) << bits;
            bits += 8;
        }
        values.push((acc & mask) as u64);
        acc >>= width;
        bits -= width as u32;
    }
    values
}
