//! Random-access extraction of spectra from a container.
//!
//! Requested spectra are located through the partition table's prefix sums;
//! only the blocks of the touched divisions are decompressed, and both the
//! decompressed buffers and the re-encoded binary payloads are cached per
//! division so adjacent requests share work.

use std::io::Write;
use std::sync::Arc;

use memchr::memmem;

use crate::codec::{encode_payload, BlockDecompressor};
use crate::container::ContainerIndex;
use crate::division::{Division, StreamKind};
use crate::error::{MszError, Result};
use crate::transform::Transform;

/// What to extract: explicit indices, scan numbers resolved through the
/// partition table, or every spectrum of one MS level.
#[derive(Debug, Clone)]
pub enum Selection {
    Indices(Vec<u64>),
    Scans(Vec<u64>),
    MsLevel(u32),
}

pub struct Extractor<'a> {
    index: ContainerIndex<'a>,
    mz_transform: Transform,
    inten_transform: Transform,
    dctx: [BlockDecompressor; 3],
    /// Decompressed division data per stream, filled on first touch.
    raw_cache: [Vec<Option<Arc<Vec<u8>>>>; 3],
    /// Re-encoded base64 payloads per binary stream and division.
    encoded_cache: [Vec<Option<Arc<Vec<Vec<u8>>>>>; 2],
}

impl<'a> Extractor<'a> {
    pub fn open(data: &'a [u8]) -> Result<Self> {
        let index = ContainerIndex::parse(data)?;
        if index.divisions.is_empty() || index.trailer.spectrum_count == 0 {
            return Err(MszError::CorruptContainer(
                "container holds no spectra".into(),
            ));
        }
        let mz_transform = Transform::resolve(
            index.trailer.mz_transform,
            index.df.source_mz,
            index.df.mz_scale,
        )?;
        let inten_transform = Transform::resolve(
            index.trailer.inten_transform,
            index.df.source_inten,
            index.df.inten_scale,
        )?;
        let dctx = [
            BlockDecompressor::new(index.df.xml_codec)?,
            BlockDecompressor::new(index.df.mz_codec)?,
            BlockDecompressor::new(index.df.inten_codec)?,
        ];
        let n = index.divisions.len();
        Ok(Self {
            index,
            mz_transform,
            inten_transform,
            dctx,
            raw_cache: [vec![None; n], vec![None; n], vec![None; n]],
            encoded_cache: [vec![None; n], vec![None; n]],
        })
    }

    pub fn spectrum_count(&self) -> u64 {
        self.index.trailer.spectrum_count
    }

    /// Divisions whose blocks have been decompressed for `stream`. Exists
    /// so callers (and the test suite) can observe block-access locality.
    pub fn decompressed_divisions(&self, stream: StreamKind) -> Vec<usize> {
        self.raw_cache[stream.index()]
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i))
            .collect()
    }

    /// Materialises a valid mzML holding exactly the selected spectra.
    pub fn extract<W: Write>(&mut self, selection: &Selection, out: &mut W) -> Result<()> {
        let indices = self.resolve(selection)?;

        // Prologue: source bytes up to the first spectrum, with the
        // spectrumList count rewritten to the extracted count.
        let xml0 = self.raw_division(0, 0)?;
        let div0 = &self.index.divisions.divisions[0];
        if div0.spectra.is_empty() {
            return Err(MszError::CorruptContainer(
                "first division holds no spectra".into(),
            ));
        }
        let first_start = div0.spectra.start[0];
        let pro_end = xml_buffer_offset(div0, first_start).ok_or_else(|| {
            MszError::CorruptContainer("first spectrum start lies outside the xml spans".into())
        })?;
        let prologue = xml0.get(..pro_end).ok_or_else(short_xml)?;
        out.write_all(&rewrite_spectrum_count(prologue, indices.len())?)?;

        for &idx in &indices {
            self.emit_spectrum(idx, out)?;
        }

        // Epilogue: source bytes after the last spectrum, verbatim.
        let n = self.index.trailer.spectrum_count;
        let (last_d, last_l) = self
            .index
            .divisions
            .locate_index(n - 1)
            .ok_or_else(|| MszError::CorruptContainer("partition table lost its tail".into()))?;
        let last_end = self.index.divisions.divisions[last_d].spectra.end[last_l];
        let tail_d = self.index.divisions.len() - 1;
        let tail_buf = self.raw_division(0, tail_d)?;
        let tail_div = &self.index.divisions.divisions[tail_d];
        if tail_div.xml.is_empty() {
            return Err(MszError::CorruptContainer(
                "trailing division holds no xml span".into(),
            ));
        }
        let offset = last_end
            .checked_sub(tail_div.xml.start[0])
            .ok_or_else(short_xml)? as usize;
        out.write_all(tail_buf.get(offset..).ok_or_else(short_xml)?)?;
        out.flush()?;
        Ok(())
    }

    /// Resolves a selection to the spectrum indices to emit, sorted
    /// ascending: extracted spectra keep their source document order
    /// regardless of the order the caller named them in.
    fn resolve(&self, selection: &Selection) -> Result<Vec<u64>> {
        let n = self.index.trailer.spectrum_count;
        let mut indices = match selection {
            Selection::Indices(wanted) => {
                for &idx in wanted {
                    if idx >= n {
                        return Err(MszError::InvalidArgument(format!(
                            "spectrum index {idx} out of range (0..{n})"
                        )));
                    }
                }
                wanted.clone()
            }
            Selection::Scans(scans) => {
                let mut indices = Vec::with_capacity(scans.len());
                for &scan in scans {
                    indices.push(self.scan_to_index(scan)?);
                }
                indices
            }
            Selection::MsLevel(level) => {
                let mut indices = Vec::new();
                let mut offset = 0u64;
                for div in &self.index.divisions.divisions {
                    for (i, &l) in div.ms_levels.iter().enumerate() {
                        if l == *level {
                            indices.push(offset + i as u64);
                        }
                    }
                    offset += div.spectrum_count() as u64;
                }
                indices
            }
        };
        if indices.is_empty() {
            return Err(MszError::InvalidArgument(
                "selection matches no spectra".into(),
            ));
        }
        indices.sort_unstable();
        indices.dedup();
        Ok(indices)
    }

    fn scan_to_index(&self, scan: u64) -> Result<u64> {
        let mut offset = 0u64;
        for div in &self.index.divisions.divisions {
            if let Some(p) = div.scans.iter().position(|&s| s == scan) {
                return Ok(offset + p as u64);
            }
            offset += div.spectrum_count() as u64;
        }
        Err(MszError::InvalidArgument(format!(
            "scan number {scan} is absent from the partition table"
        )))
    }

    fn emit_spectrum<W: Write>(&mut self, idx: u64, out: &mut W) -> Result<()> {
        let (d, l) = self
            .index
            .divisions
            .locate_index(idx)
            .ok_or_else(|| MszError::InvalidArgument(format!("spectrum index {idx} not found")))?;

        let xml_buf = self.raw_division(0, d)?;
        let mz_payloads = self.encoded_division(StreamKind::Mz, d)?;
        let inten_payloads = self.encoded_division(StreamKind::Inten, d)?;
        let k = self.index.divisions.divisions[d].spectrum_count();
        let next_xml = if l + 1 == k {
            Some(self.raw_division(0, d + 1)?)
        } else {
            None
        };

        let div = &self.index.divisions.divisions[d];
        let spec_start = div.spectra.start[l];
        let spec_end = div.spectra.end[l];

        // Head: spectrum open tag up to and including the first <binary>.
        let head = 2 * l;
        let (head_start, _) = div.xml.span(head);
        let cum = xml_buffer_offset_span(div, head);
        let from = cum + spec_start.checked_sub(head_start).ok_or_else(short_xml)? as usize;
        let to = cum + div.xml.span_len(head) as usize;
        out.write_all(xml_buf.get(from..to).ok_or_else(short_xml)?)?;

        // Re-encoded m/z payload.
        out.write_all(&mz_payloads[l])?;

        // Mid: between the two binary blocks.
        let mid = 2 * l + 1;
        let cum = xml_buffer_offset_span(div, mid);
        out.write_all(
            xml_buf
                .get(cum..cum + div.xml.span_len(mid) as usize)
                .ok_or_else(short_xml)?,
        )?;

        // Re-encoded intensity payload.
        out.write_all(&inten_payloads[l])?;

        // Tail: from after the second </binary> to the spectrum end. The
        // closing span belongs to the next spectrum's head, or to the next
        // division when this spectrum ends the division.
        match next_xml {
            None => {
                let tail = 2 * (l + 1);
                let (tail_start, _) = div.xml.span(tail);
                let cum = xml_buffer_offset_span(div, tail);
                let len = spec_end.checked_sub(tail_start).ok_or_else(short_xml)? as usize;
                out.write_all(xml_buf.get(cum..cum + len).ok_or_else(short_xml)?)?;
            }
            Some(next_buf) => {
                let next_div = self
                    .index
                    .divisions
                    .divisions
                    .get(d + 1)
                    .ok_or_else(short_xml)?;
                if next_div.xml.is_empty() {
                    return Err(short_xml());
                }
                let len = spec_end
                    .checked_sub(next_div.xml.start[0])
                    .ok_or_else(short_xml)? as usize;
                out.write_all(next_buf.get(..len).ok_or_else(short_xml)?)?;
            }
        }
        Ok(())
    }

    /// Decompresses and caches one division's data for one stream.
    fn raw_division(&mut self, stream: usize, d: usize) -> Result<Arc<Vec<u8>>> {
        if self.raw_cache[stream][d].is_none() {
            let buf =
                self.index
                    .decompress_division_stream(stream, d, &mut self.dctx[stream])?;
            if stream == 0 {
                let expected = self.index.divisions.divisions[d].xml.total_len();
                if buf.len() as u64 != expected {
                    return Err(MszError::CorruptContainer(format!(
                        "division {d} xml data is {} bytes, position tables expect {expected}",
                        buf.len()
                    )));
                }
            }
            self.raw_cache[stream][d] = Some(Arc::new(buf));
        }
        match &self.raw_cache[stream][d] {
            Some(buf) => Ok(buf.clone()),
            None => Err(short_xml()),
        }
    }

    /// Transform-decodes and re-encodes every payload of one binary stream
    /// of one division, cached for reuse across spectra.
    fn encoded_division(&mut self, stream: StreamKind, d: usize) -> Result<Arc<Vec<Vec<u8>>>> {
        let s = match stream {
            StreamKind::Mz | StreamKind::Inten => stream.index(),
            StreamKind::Xml => {
                return Err(MszError::InvalidArgument(
                    "xml stream carries no binary payloads".into(),
                ))
            }
        };
        if self.encoded_cache[s - 1][d].is_none() {
            let buf = self.raw_division(s, d)?;
            let div = &self.index.divisions.divisions[d];
            let (table, transform) = match stream {
                StreamKind::Mz => (&div.mz, &self.mz_transform),
                _ => (&div.inten, &self.inten_transform),
            };
            let compression = self.index.df.source_compression;
            let mut payloads = Vec::with_capacity(table.len());
            let mut off = 0usize;
            for i in 0..table.len() {
                if table.span_len(i) == 0 {
                    payloads.push(Vec::new());
                    continue;
                }
                let (raw, consumed) = transform.decode_from(&buf[off..])?;
                off += consumed;
                payloads.push(encode_payload(&raw, compression)?);
            }
            if off != buf.len() {
                return Err(MszError::CorruptContainer(format!(
                    "division {d} binary data does not match its position table"
                )));
            }
            self.encoded_cache[s - 1][d] = Some(Arc::new(payloads));
        }
        match &self.encoded_cache[s - 1][d] {
            Some(payloads) => Ok(payloads.clone()),
            None => Err(short_xml()),
        }
    }
}

fn short_xml() -> MszError {
    MszError::CorruptContainer("xml span overruns its decompressed division data".into())
}

/// Offset of file position `pos` within the division's concatenated xml
/// data, or `None` when it falls outside every span.
fn xml_buffer_offset(div: &Division, pos: u64) -> Option<usize> {
    let mut cum = 0usize;
    for i in 0..div.xml.len() {
        let (s, e) = div.xml.span(i);
        if pos >= s && pos < e {
            return Some(cum + (pos - s) as usize);
        }
        cum += (e - s) as usize;
    }
    None
}

/// Offset of the start of xml span `span` within the division's
/// concatenated xml data.
fn xml_buffer_offset_span(div: &Division, span: usize) -> usize {
    (0..span).map(|i| div.xml.span_len(i)).sum::<u64>() as usize
}

/// Splices the extracted spectrum count into the `spectrumList` open tag.
fn rewrite_spectrum_count(prologue: &[u8], count: usize) -> Result<Vec<u8>> {
    let p = memmem::find(prologue, b"<spectrumList").ok_or_else(|| {
        MszError::CorruptContainer("mzML prologue carries no spectrumList tag".into())
    })?;
    let c = memmem::find(&prologue[p..], b"count=\"")
        .map(|q| p + q + 7)
        .ok_or_else(|| {
            MszError::CorruptContainer("spectrumList tag carries no count attribute".into())
        })?;
    let digits = prologue[c..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    let mut out = Vec::with_capacity(prologue.len() + 8);
    out.extend_from_slice(&prologue[..c]);
    out.extend_from_slice(count.to_string().as_bytes());
    out.extend_from_slice(&prologue[c + digits..]);
    Ok(out)
}
