//! Position tables, divisions, and the partitioner.
//!
//! A division is a contiguous run of spectra carrying aligned position
//! tables for the three stream kinds plus per-spectrum metadata. The
//! division set tiles the source file exactly: every byte belongs to
//! exactly one span of exactly one division.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::container::ByteCursor;
use crate::cv;
use crate::error::{MszError, Result};

/// The three logical streams of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Xml,
    Mz,
    Inten,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Xml, StreamKind::Mz, StreamKind::Inten];

    pub fn index(self) -> usize {
        match self {
            Self::Xml => 0,
            Self::Mz => 1,
            Self::Inten => 2,
        }
    }

    pub fn accession(self) -> u32 {
        match self {
            Self::Xml => cv::ACC_XML_STREAM,
            Self::Mz => cv::ACC_MZ_ARRAY,
            Self::Inten => cv::ACC_INTENSITY_ARRAY,
        }
    }
}

/// Two equal-length ordered sequences of absolute file offsets.
///
/// Invariants: offsets are monotonic non-decreasing across the sequence,
/// `end[i] >= start[i]`, and empty spans are permitted (they preserve
/// alignment between the three tables).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PositionTable {
    pub start: Vec<u64>,
    pub end: Vec<u64>,
}

impl PositionTable {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            start: Vec::with_capacity(n),
            end: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    pub fn push(&mut self, start: u64, end: u64) {
        self.start.push(start);
        self.end.push(end);
    }

    pub fn span(&self, i: usize) -> (u64, u64) {
        (self.start[i], self.end[i])
    }

    pub fn span_len(&self, i: usize) -> u64 {
        self.end[i] - self.start[i]
    }

    /// Summed span lengths.
    pub fn total_len(&self) -> u64 {
        self.start
            .iter()
            .zip(&self.end)
            .map(|(&s, &e)| e - s)
            .sum()
    }

    /// Copies spans `range` into a new table.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        Self {
            start: self.start[range.clone()].to_vec(),
            end: self.end[range].to_vec(),
        }
    }

    /// Checks the table invariants.
    pub fn validate(&self) -> Result<()> {
        let mut prev: u64 = 0;
        for i in 0..self.len() {
            let (s, e) = (self.start[i], self.end[i]);
            if e < s {
                return Err(MszError::MalformedSource(format!(
                    "span {i} has negative length ({s}..{e})"
                )));
            }
            if s < prev {
                return Err(MszError::MalformedSource(format!(
                    "span {i} start {s} breaks monotonicity (previous end {prev})"
                )));
            }
            prev = e;
        }
        Ok(())
    }
}

/// A contiguous run of spectra with aligned position tables.
///
/// For `k` spectra the xml table has `2k` spans here (head and mid per
/// spectrum); the span following a spectrum's intensity block belongs to
/// the next spectrum's head, or to the trailing division. The encapsulating
/// division produced by the scanner carries `2k + 1` spans, the extra one
/// being the document tail.
#[derive(Debug, Default, Clone)]
pub struct Division {
    /// Spectrum tag boundaries: `<spectrum` start to just past `</spectrum>`.
    pub spectra: PositionTable,
    pub xml: PositionTable,
    pub mz: PositionTable,
    pub inten: PositionTable,
    /// Summed span lengths over the xml, mz, and inten tables.
    pub size: u64,
    pub scans: Vec<u64>,
    pub ms_levels: Vec<u32>,
    pub ret_times: Vec<f32>,
    /// Compressed blocks this division contributed per stream, filled in
    /// during compression and persisted for random access.
    pub block_counts: [u32; 3],
}

impl Division {
    pub fn spectrum_count(&self) -> usize {
        self.mz.len()
    }

    pub fn table(&self, stream: StreamKind) -> &PositionTable {
        match stream {
            StreamKind::Xml => &self.xml,
            StreamKind::Mz => &self.mz,
            StreamKind::Inten => &self.inten,
        }
    }

    fn recompute_size(&mut self) {
        self.size = self.xml.total_len() + self.mz.total_len() + self.inten.total_len();
    }

    fn write_table<W: Write>(table: &PositionTable, w: &mut W) -> Result<()> {
        w.write_u32::<LittleEndian>(table.len() as u32)?;
        for &s in &table.start {
            w.write_u64::<LittleEndian>(s)?;
        }
        for &e in &table.end {
            w.write_u64::<LittleEndian>(e)?;
        }
        Ok(())
    }

    fn read_table(cur: &mut ByteCursor) -> Result<PositionTable> {
        let n = cur.read_u32()? as usize;
        cur.check_remaining(n.checked_mul(16).ok_or_else(|| {
            MszError::CorruptContainer("position table length overflows".into())
        })?)?;
        let mut table = PositionTable::with_capacity(n);
        table.start = cur.read_u64_vec(n)?;
        table.end = cur.read_u64_vec(n)?;
        Ok(table)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        Self::write_table(&self.xml, w)?;
        Self::write_table(&self.mz, w)?;
        Self::write_table(&self.inten, w)?;
        w.write_u64::<LittleEndian>(self.size)?;
        for count in self.block_counts {
            w.write_u32::<LittleEndian>(count)?;
        }
        Self::write_table(&self.spectra, w)?;
        for &scan in &self.scans {
            w.write_u64::<LittleEndian>(scan)?;
        }
        for &level in &self.ms_levels {
            w.write_u32::<LittleEndian>(level)?;
        }
        for &rt in &self.ret_times {
            w.write_f32::<LittleEndian>(rt)?;
        }
        Ok(())
    }

    pub fn read_from(cur: &mut ByteCursor) -> Result<Self> {
        let xml = Self::read_table(cur)?;
        let mz = Self::read_table(cur)?;
        let inten = Self::read_table(cur)?;
        let size = cur.read_u64()?;
        let mut block_counts = [0u32; 3];
        for count in &mut block_counts {
            *count = cur.read_u32()?;
        }
        let spectra = Self::read_table(cur)?;
        let k = mz.len();
        let scans = cur.read_u64_vec(k)?;
        let ms_levels = cur.read_u32_vec(k)?;
        let ret_times = cur.read_f32_vec(k)?;

        if inten.len() != k || spectra.len() != k || xml.len() < 2 * k {
            return Err(MszError::CorruptContainer(
                "division tables are not aligned".into(),
            ));
        }
        Ok(Self {
            spectra,
            xml,
            mz,
            inten,
            size,
            scans,
            ms_levels,
            ret_times,
            block_counts,
        })
    }
}

/// Ordered division set covering the source document exactly once.
#[derive(Debug, Default, Clone)]
pub struct Divisions {
    pub divisions: Vec<Division>,
}

impl Divisions {
    pub fn len(&self) -> usize {
        self.divisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.divisions.is_empty()
    }

    pub fn spectrum_count(&self) -> usize {
        self.divisions.iter().map(|d| d.spectrum_count()).sum()
    }

    pub fn total_size(&self) -> u64 {
        self.divisions.iter().map(|d| d.size).sum()
    }

    /// Resolves a global spectrum index to `(division, local index)` over
    /// the prefix sums of per-division spectrum counts.
    pub fn locate_index(&self, index: u64) -> Option<(usize, usize)> {
        let mut offset = 0u64;
        for (i, div) in self.divisions.iter().enumerate() {
            let count = div.spectrum_count() as u64;
            if index < offset + count {
                return Some((i, (index - offset) as usize));
            }
            offset += count;
        }
        None
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        for div in &self.divisions {
            div.write_to(w)?;
        }
        Ok(())
    }

    pub fn read_from(section: &[u8], n_divisions: usize) -> Result<Self> {
        let mut cur = ByteCursor::new(section);
        let mut divisions = Vec::with_capacity(n_divisions.min(1 << 20));
        for _ in 0..n_divisions {
            divisions.push(Division::read_from(&mut cur)?);
        }
        Ok(Self { divisions })
    }
}

/// Splits the encapsulating division over `workers` threads.
///
/// Produces `T + 1` divisions for `T = min(workers, spectrum count)`: the
/// first `T - 1` hold `floor(N/T)` spectra, the `T`-th the remainder, and
/// the last only the residual XML after the final spectrum. Per-spectrum
/// order is preserved.
pub fn partition(whole: &Division, workers: usize) -> Result<Divisions> {
    let n = whole.spectrum_count();
    if n == 0 {
        return Err(MszError::MalformedSource(
            "document contains no spectra".into(),
        ));
    }
    if whole.xml.len() != 2 * n + 1 {
        return Err(MszError::MalformedSource(format!(
            "encapsulating division has {} xml spans for {} spectra",
            whole.xml.len(),
            n
        )));
    }

    let t = workers.max(1).min(n);
    let per = n / t;
    let mut divisions = Vec::with_capacity(t + 1);
    let mut spec_i = 0usize;

    for d in 0..t {
        let take = if d == t - 1 { per + n % t } else { per };
        let mut div = Division {
            spectra: whole.spectra.slice(spec_i..spec_i + take),
            xml: whole.xml.slice(2 * spec_i..2 * (spec_i + take)),
            mz: whole.mz.slice(spec_i..spec_i + take),
            inten: whole.inten.slice(spec_i..spec_i + take),
            scans: whole.scans[spec_i..spec_i + take].to_vec(),
            ms_levels: whole.ms_levels[spec_i..spec_i + take].to_vec(),
            ret_times: whole.ret_times[spec_i..spec_i + take].to_vec(),
            ..Division::default()
        };
        div.recompute_size();
        divisions.push(div);
        spec_i += take;
    }

    // Trailing division: the xml suffix after the last spectrum.
    let mut tail = Division {
        xml: whole.xml.slice(2 * n..2 * n + 1),
        ..Division::default()
    };
    tail.recompute_size();
    divisions.push(tail);

    Ok(Divisions { divisions })
}
