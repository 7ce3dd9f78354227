//! Growable block accumulation and block-length bookkeeping.
//!
//! Transform output is appended to a growable buffer; whenever the fill
//! reaches the configured block size the buffer is handed to the stream's
//! block codec and emitted as one compressed block. The concatenation of the
//! decompressed blocks of a stream equals the concatenation of the transform
//! outputs for that stream's divisions, in division order.

use std::io::Write;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::BlockCompressor;
use crate::error::{MszError, Result};

/// One compressed block, kept in memory between codec and writer.
pub struct CompressedBlock {
    pub data: Vec<u8>,
    pub original_size: u64,
}

/// One `(original_size, compressed_size)` pair of a block-length table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLen {
    pub original_size: u64,
    pub compressed_size: u64,
}

/// Ordered block lengths for one stream, one entry per compressed block.
#[derive(Debug, Default, Clone)]
pub struct BlockLenTable(pub Vec<BlockLen>);

impl BlockLenTable {
    pub const ENTRY_SIZE: usize = 16;

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, original_size: u64, compressed_size: u64) {
        self.0.push(BlockLen {
            original_size,
            compressed_size,
        });
    }

    pub fn total_compressed(&self) -> u64 {
        self.0.iter().map(|b| b.compressed_size).sum()
    }

    pub fn total_original(&self) -> u64 {
        self.0.iter().map(|b| b.original_size).sum()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        for blk in &self.0 {
            w.write_u64::<LittleEndian>(blk.original_size)?;
            w.write_u64::<LittleEndian>(blk.compressed_size)?;
        }
        Ok(())
    }

    /// Parses a table from its container section; the entry count is
    /// determined by the section length.
    pub fn read_from(mut section: &[u8]) -> Result<Self> {
        if section.len() % Self::ENTRY_SIZE != 0 {
            return Err(MszError::CorruptContainer(format!(
                "block-length table length {} is not a multiple of {}",
                section.len(),
                Self::ENTRY_SIZE
            )));
        }
        let mut table = BlockLenTable::default();
        while !section.is_empty() {
            let original_size = section.read_u64::<LittleEndian>()?;
            let compressed_size = section.read_u64::<LittleEndian>()?;
            table.push(original_size, compressed_size);
        }
        Ok(table)
    }

    /// Byte offset of block `index` within the stream, from the summed
    /// compressed sizes of the preceding blocks.
    pub fn offset_of(&self, index: usize) -> u64 {
        self.0[..index].iter().map(|b| b.compressed_size).sum()
    }
}

/// Accumulates transform output and rolls compressed blocks.
pub struct BlockAccumulator {
    buf: Vec<u8>,
    blocksize: usize,
}

impl BlockAccumulator {
    pub fn new(blocksize: u64) -> Self {
        let blocksize = blocksize.max(1) as usize;
        Self {
            buf: Vec::with_capacity(blocksize.min(1 << 24)),
            blocksize,
        }
    }

    /// Appends bytes, emitting a compressed block once the fill reaches the
    /// block size. The buffer keeps its capacity across blocks.
    pub fn append(
        &mut self,
        data: &[u8],
        codec: &mut BlockCompressor,
        out: &mut Vec<CompressedBlock>,
    ) -> Result<()> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= self.blocksize {
            self.emit(codec, out)?;
        }
        Ok(())
    }

    /// Discards any accumulated bytes, e.g. after a failed division.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Emits whatever remains in the buffer. Called at division boundaries
    /// so that no block straddles two divisions.
    pub fn flush(
        &mut self,
        codec: &mut BlockCompressor,
        out: &mut Vec<CompressedBlock>,
    ) -> Result<()> {
        if !self.buf.is_empty() {
            self.emit(codec, out)?;
        }
        Ok(())
    }

    fn emit(&mut self, codec: &mut BlockCompressor, out: &mut Vec<CompressedBlock>) -> Result<()> {
        let compressed = codec.compress(&self.buf)?;
        out.push(CompressedBlock {
            data: compressed,
            original_size: self.buf.len() as u64,
        });
        self.buf.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BlockCodec;

    #[test]
    fn accumulator_rolls_at_blocksize() {
        let mut acc = BlockAccumulator::new(8);
        let mut codec = BlockCompressor::new(BlockCodec::Store, 0).unwrap();
        let mut blocks = Vec::new();

        acc.append(b"abcd", &mut codec, &mut blocks).unwrap();
        assert!(blocks.is_empty());
        acc.append(b"efgh", &mut codec, &mut blocks).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].data, b"abcdefgh");

        acc.append(b"ij", &mut codec, &mut blocks).unwrap();
        acc.flush(&mut codec, &mut blocks).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].data, b"ij");
        assert_eq!(blocks[1].original_size, 2);

        // Flushing an empty buffer emits nothing.
        acc.flush(&mut codec, &mut blocks).unwrap();
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn table_round_trip() {
        let mut table = BlockLenTable::default();
        table.push(100, 10);
        table.push(200, 20);
        let mut bytes = Vec::new();
        table.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 2 * BlockLenTable::ENTRY_SIZE);

        let parsed = BlockLenTable::read_from(&bytes).unwrap();
        assert_eq!(parsed.0, table.0);
        assert_eq!(parsed.total_compressed(), 30);
        assert_eq!(parsed.total_original(), 300);
        assert_eq!(parsed.offset_of(1), 10);
    }

    #[test]
    fn table_rejects_ragged_section() {
        assert!(matches!(
            BlockLenTable::read_from(&[0u8; 17]),
            Err(MszError::CorruptContainer(_))
        ));
    }
}
