//! On-disk container layout: fixed header, trailer, and the bounds-checked
//! cursor used to parse container sections.
//!
//! All multi-byte integers are little-endian. The container is laid out as:
//! header, XML stream, m/z stream, intensity stream, three block-length
//! tables, partition table, trailer. Section offsets are recorded in the
//! trailer as they are written.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::codec::{BlockCodec, SourceCompression};
use crate::error::{MszError, Result};
use crate::transform::{ElementType, TransformId};

pub const MAGIC_TAG: u32 = 0x035F_51B5;
pub const FORMAT_VERSION_MAJOR: u32 = 1;
pub const FORMAT_VERSION_MINOR: u32 = 0;
pub const HEADER_SIZE: usize = 512;
pub const TRAILER_SIZE: usize = 88;

const IDENT_OFFSET: usize = 12;
const IDENT_SIZE: usize = 128;
const DESCRIPTOR_OFFSET: usize = 140;
const BLOCKSIZE_OFFSET: usize = 176;
const CHECKSUM_OFFSET: usize = 184;
const CHECKSUM_SIZE: usize = 32;

const IDENT: &str = "msz container - structure-aware mzML compressor";
/// Checksum generation is not implemented; the field carries a fixed
/// placeholder, as prior format revisions did.
const CHECKSUM_PLACEHOLDER: &[u8; CHECKSUM_SIZE] = b"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx";

/// The written data-format descriptor, persisted verbatim in the header.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    pub source_mz: ElementType,
    pub source_inten: ElementType,
    pub source_compression: SourceCompression,
    pub spectrum_count: u32,
    pub xml_codec: BlockCodec,
    pub mz_codec: BlockCodec,
    pub inten_codec: BlockCodec,
    pub mz_scale: f32,
    pub inten_scale: f32,
    pub blocksize: u64,
}

/// Writes the fixed 512-byte header.
pub fn write_header<W: Write>(w: &mut W, df: &Descriptor) -> Result<()> {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..4].copy_from_slice(&MAGIC_TAG.to_le_bytes());
    buf[4..8].copy_from_slice(&FORMAT_VERSION_MAJOR.to_le_bytes());
    buf[8..12].copy_from_slice(&FORMAT_VERSION_MINOR.to_le_bytes());
    buf[IDENT_OFFSET..IDENT_OFFSET + IDENT.len()].copy_from_slice(IDENT.as_bytes());

    let mut off = DESCRIPTOR_OFFSET;
    for field in [
        df.source_mz.accession(),
        df.source_inten.accession(),
        df.source_compression.accession(),
        df.spectrum_count,
        df.xml_codec.accession(),
        df.mz_codec.accession(),
        df.inten_codec.accession(),
    ] {
        buf[off..off + 4].copy_from_slice(&field.to_le_bytes());
        off += 4;
    }
    buf[off..off + 4].copy_from_slice(&df.mz_scale.to_le_bytes());
    buf[off + 4..off + 8].copy_from_slice(&df.inten_scale.to_le_bytes());
    buf[BLOCKSIZE_OFFSET..BLOCKSIZE_OFFSET + 8].copy_from_slice(&df.blocksize.to_le_bytes());
    buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_SIZE].copy_from_slice(CHECKSUM_PLACEHOLDER);

    w.write_all(&buf)?;
    Ok(())
}

/// Recovers the descriptor from a mapped container.
pub fn read_header(data: &[u8]) -> Result<Descriptor> {
    if data.len() < HEADER_SIZE {
        return Err(MszError::CorruptContainer(format!(
            "file of {} bytes is smaller than the {HEADER_SIZE}-byte header",
            data.len()
        )));
    }
    let mut cur = ByteCursor::new(data);
    if cur.read_u32()? != MAGIC_TAG {
        return Err(MszError::CorruptContainer("bad magic tag".into()));
    }
    let major = cur.read_u32()?;
    if major != FORMAT_VERSION_MAJOR {
        return Err(MszError::Unsupported(format!(
            "container format version {major} is not supported"
        )));
    }
    let _minor = cur.read_u32()?;

    let mut cur = ByteCursor::new(&data[DESCRIPTOR_OFFSET..]);
    let mz_acc = cur.read_u32()?;
    let inten_acc = cur.read_u32()?;
    let comp_acc = cur.read_u32()?;
    let spectrum_count = cur.read_u32()?;
    let xml_codec = BlockCodec::from_accession(cur.read_u32()?)?;
    let mz_codec = BlockCodec::from_accession(cur.read_u32()?)?;
    let inten_codec = BlockCodec::from_accession(cur.read_u32()?)?;
    let mz_scale = cur.read_f32()?;
    let inten_scale = cur.read_f32()?;

    let mut cur = ByteCursor::new(&data[BLOCKSIZE_OFFSET..]);
    let blocksize = cur.read_u64()?;

    let source_mz = ElementType::from_accession(mz_acc).ok_or_else(|| {
        MszError::CorruptContainer(format!("header carries unknown m/z element accession {mz_acc}"))
    })?;
    let source_inten = ElementType::from_accession(inten_acc).ok_or_else(|| {
        MszError::CorruptContainer(format!(
            "header carries unknown intensity element accession {inten_acc}"
        ))
    })?;
    let source_compression = SourceCompression::from_accession(comp_acc).ok_or_else(|| {
        MszError::CorruptContainer(format!(
            "header carries unknown payload compression accession {comp_acc}"
        ))
    })?;

    Ok(Descriptor {
        source_mz,
        source_inten,
        source_compression,
        spectrum_count,
        xml_codec,
        mz_codec,
        inten_codec,
        mz_scale,
        inten_scale,
        blocksize,
    })
}

/// Fixed-size trailer at the end of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub xml_pos: u64,
    pub mz_pos: u64,
    pub inten_pos: u64,
    pub xml_blk_pos: u64,
    pub mz_blk_pos: u64,
    pub inten_blk_pos: u64,
    pub divisions_pos: u64,
    pub spectrum_count: u64,
    pub original_filesize: u64,
    pub n_divisions: u32,
    pub mz_transform: TransformId,
    pub inten_transform: TransformId,
}

impl Trailer {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        for field in [
            self.xml_pos,
            self.mz_pos,
            self.inten_pos,
            self.xml_blk_pos,
            self.mz_blk_pos,
            self.inten_blk_pos,
            self.divisions_pos,
            self.spectrum_count,
            self.original_filesize,
        ] {
            w.write_u64::<LittleEndian>(field)?;
        }
        w.write_u32::<LittleEndian>(self.n_divisions)?;
        w.write_u32::<LittleEndian>(MAGIC_TAG)?;
        w.write_u32::<LittleEndian>(self.mz_transform.accession())?;
        w.write_u32::<LittleEndian>(self.inten_transform.accession())?;
        Ok(())
    }

    /// Reads and sanity-checks the trailer of a mapped container.
    pub fn read_from(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE + TRAILER_SIZE {
            return Err(MszError::CorruptContainer(
                "file too small to hold a trailer".into(),
            ));
        }
        let trailer_pos = data.len() - TRAILER_SIZE;
        let mut cur = ByteCursor::new(&data[trailer_pos..]);
        let xml_pos = cur.read_u64()?;
        let mz_pos = cur.read_u64()?;
        let inten_pos = cur.read_u64()?;
        let xml_blk_pos = cur.read_u64()?;
        let mz_blk_pos = cur.read_u64()?;
        let inten_blk_pos = cur.read_u64()?;
        let divisions_pos = cur.read_u64()?;
        let spectrum_count = cur.read_u64()?;
        let original_filesize = cur.read_u64()?;
        let n_divisions = cur.read_u32()?;
        let magic = cur.read_u32()?;
        let mz_transform = TransformId::from_accession(cur.read_u32()?)?;
        let inten_transform = TransformId::from_accession(cur.read_u32()?)?;

        if magic != MAGIC_TAG {
            return Err(MszError::CorruptContainer("bad trailer magic tag".into()));
        }

        let trailer = Self {
            xml_pos,
            mz_pos,
            inten_pos,
            xml_blk_pos,
            mz_blk_pos,
            inten_blk_pos,
            divisions_pos,
            spectrum_count,
            original_filesize,
            n_divisions,
            mz_transform,
            inten_transform,
        };
        trailer.check_offsets(trailer_pos as u64)?;
        Ok(trailer)
    }

    fn check_offsets(&self, trailer_pos: u64) -> Result<()> {
        let sections = [
            self.xml_pos,
            self.mz_pos,
            self.inten_pos,
            self.xml_blk_pos,
            self.mz_blk_pos,
            self.inten_blk_pos,
            self.divisions_pos,
        ];
        let mut prev = HEADER_SIZE as u64;
        for off in sections {
            if off < prev || off > trailer_pos {
                return Err(MszError::CorruptContainer(format!(
                    "trailer offset {off} out of range (previous {prev}, trailer at {trailer_pos})"
                )));
            }
            prev = off;
        }
        Ok(())
    }
}

/// Bounds-checked little-endian reader over a container section. Reads past
/// the end are reported as `CorruptContainer`, never panics.
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn check_remaining(&self, n: usize) -> Result<()> {
        if self.data.len() - self.pos < n {
            return Err(MszError::CorruptContainer(format!(
                "section truncated: need {n} bytes at offset {}",
                self.pos
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.check_remaining(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_u32_vec(&mut self, n: usize) -> Result<Vec<u32>> {
        self.check_remaining(n.checked_mul(4).ok_or_else(overflow)?)?;
        (0..n).map(|_| self.read_u32()).collect()
    }

    pub fn read_u64_vec(&mut self, n: usize) -> Result<Vec<u64>> {
        self.check_remaining(n.checked_mul(8).ok_or_else(overflow)?)?;
        (0..n).map(|_| self.read_u64()).collect()
    }

    pub fn read_f32_vec(&mut self, n: usize) -> Result<Vec<f32>> {
        self.check_remaining(n.checked_mul(4).ok_or_else(overflow)?)?;
        (0..n).map(|_| self.read_f32()).collect()
    }
}

fn overflow() -> MszError {
    MszError::CorruptContainer("section length overflows".into())
}

/// Fully parsed view of a mapped container, shared by the decoder and the
/// extractor: descriptor, trailer, the three stream sections, block-length
/// tables, partition table, and the per-division block ranges reconstructed
/// from the recorded block counts.
pub struct ContainerIndex<'a> {
    pub df: Descriptor,
    pub trailer: Trailer,
    pub divisions: crate::division::Divisions,
    pub streams: [&'a [u8]; 3],
    pub tables: [crate::block::BlockLenTable; 3],
    /// Per stream, per division: the range of block indices the division
    /// contributed.
    pub ranges: [Vec<std::ops::Range<usize>>; 3],
}

impl<'a> ContainerIndex<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let df = read_header(data)?;
        let trailer = Trailer::read_from(data)?;
        let trailer_pos = (data.len() - TRAILER_SIZE) as u64;

        let streams = [
            section(data, trailer.xml_pos, trailer.mz_pos)?,
            section(data, trailer.mz_pos, trailer.inten_pos)?,
            section(data, trailer.inten_pos, trailer.xml_blk_pos)?,
        ];
        let tables = [
            crate::block::BlockLenTable::read_from(section(
                data,
                trailer.xml_blk_pos,
                trailer.mz_blk_pos,
            )?)?,
            crate::block::BlockLenTable::read_from(section(
                data,
                trailer.mz_blk_pos,
                trailer.inten_blk_pos,
            )?)?,
            crate::block::BlockLenTable::read_from(section(
                data,
                trailer.inten_blk_pos,
                trailer.divisions_pos,
            )?)?,
        ];
        let divisions = crate::division::Divisions::read_from(
            section(data, trailer.divisions_pos, trailer_pos)?,
            trailer.n_divisions as usize,
        )?;

        if divisions.spectrum_count() as u64 != trailer.spectrum_count {
            return Err(MszError::CorruptContainer(format!(
                "partition table holds {} spectra, trailer declares {}",
                divisions.spectrum_count(),
                trailer.spectrum_count
            )));
        }

        // Declared sizes are bounded by the recorded source size: division
        // spans address source bytes, and transform output never exceeds
        // the decoded payloads it was built from by more than the per-array
        // headers. A container that claims otherwise is damaged, and the
        // bound keeps hostile inputs from driving allocations.
        let size_bound = trailer
            .original_filesize
            .saturating_mul(4)
            .saturating_add(1 << 20);
        for div in &divisions.divisions {
            if div.size > trailer.original_filesize {
                return Err(MszError::CorruptContainer(format!(
                    "division size {} exceeds the source size {}",
                    div.size, trailer.original_filesize
                )));
            }
            for table in [&div.xml, &div.mz, &div.inten, &div.spectra] {
                table.validate().map_err(|_| {
                    MszError::CorruptContainer(
                        "partition table violates the position-table invariants".into(),
                    )
                })?;
            }
        }
        for table in &tables {
            if table.total_original() > size_bound {
                return Err(MszError::CorruptContainer(format!(
                    "block-length table declares {} uncompressed bytes for a {}-byte source",
                    table.total_original(),
                    trailer.original_filesize
                )));
            }
        }

        let mut ranges: [Vec<std::ops::Range<usize>>; 3] = Default::default();
        for (s, (table, stream)) in tables.iter().zip(&streams).enumerate() {
            if table.total_compressed() != stream.len() as u64 {
                return Err(MszError::CorruptContainer(format!(
                    "block-length table sums to {} bytes, stream holds {}",
                    table.total_compressed(),
                    stream.len()
                )));
            }
            let mut next = 0usize;
            for div in &divisions.divisions {
                let count = div.block_counts[s] as usize;
                let end = next.checked_add(count).filter(|&e| e <= table.len()).ok_or_else(|| {
                    MszError::CorruptContainer(
                        "division block counts overrun the block-length table".into(),
                    )
                })?;
                ranges[s].push(next..end);
                next = end;
            }
            if next != table.len() {
                return Err(MszError::CorruptContainer(format!(
                    "divisions account for {next} blocks, table holds {}",
                    table.len()
                )));
            }
        }

        Ok(Self {
            df,
            trailer,
            divisions,
            streams,
            tables,
            ranges,
        })
    }

    /// Decompresses one division's blocks of one stream into a contiguous
    /// buffer.
    pub fn decompress_division_stream(
        &self,
        stream: usize,
        division: usize,
        dctx: &mut crate::codec::BlockDecompressor,
    ) -> Result<Vec<u8>> {
        let table = &self.tables[stream];
        let range = self.ranges[stream][division].clone();
        let mut offset = table.offset_of(range.start) as usize;
        let mut out = Vec::new();
        for blk in &table.0[range] {
            let end = offset + blk.compressed_size as usize;
            let src = self.streams[stream].get(offset..end).ok_or_else(|| {
                MszError::CorruptContainer("compressed block overruns its stream".into())
            })?;
            out.extend_from_slice(&dctx.decompress(src, blk.original_size as usize)?);
            offset = end;
        }
        Ok(out)
    }
}

fn section(data: &[u8], start: u64, end: u64) -> Result<&[u8]> {
    if start > end || end as usize > data.len() {
        return Err(MszError::CorruptContainer(format!(
            "section {start}..{end} out of range for {} bytes",
            data.len()
        )));
    }
    Ok(&data[start as usize..end as usize])
}
