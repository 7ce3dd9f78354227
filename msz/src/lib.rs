//! Structure-aware compression of mzML mass-spectrometry documents.
//!
//! An mzML file interleaves XML markup with large base64-encoded,
//! zlib-deflated numeric arrays holding m/z and intensity samples. A
//! generic compressor sees opaque bytes; this library exploits the known
//! structure instead, splitting the document into three logical streams —
//! markup, m/z binary, intensity binary — and routing each through its own
//! numeric transform and block codec, in parallel across partitions of the
//! spectrum list.
//!
//! # Architecture
//!
//! Compression runs as a pipeline:
//!
//! 1. **Probe / pattern detection**: classify the input and detect the
//!    source element types, payload compression, and spectrum count.
//! 2. **Position scanning**: record, per spectrum, the byte spans of the
//!    markup and the two binary payloads, plus scan number, MS level, and
//!    retention time.
//! 3. **Partitioning**: split the spectra into divisions of equal spectrum
//!    count, one per worker, plus a trailing markup-only division.
//! 4. **Codec pipeline**: per division and stream, decode base64+zlib,
//!    apply the numeric transform, and roll compressed blocks.
//! 5. **Writing**: header, three streams, three block-length tables,
//!    partition table, trailer.
//!
//! Decompression reverses the pipeline division by division; extraction
//! pulls only the blocks of the divisions holding the requested spectra.
//!
//! # Quick start
//!
//! ```no_run
//! use msz::{compress_path, decompress_path, CompressOptions};
//!
//! let opts = CompressOptions::default();
//! compress_path("run.mzML".as_ref(), "run.msz".as_ref(), &opts).unwrap();
//! decompress_path("run.msz".as_ref(), "run.mzML".as_ref(), 0).unwrap();
//! ```

pub mod block;
pub mod codec;
pub mod container;
pub mod cv;
pub mod detect;
pub mod division;
pub mod error;
pub mod extract;
pub mod scan;
pub mod transform;
pub mod writer;

mod compress;
mod decompress;

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use memmap2::Mmap;

pub use codec::{BlockCodec, SourceCompression};
pub use compress::{compress_mzml, CompressOptions};
pub use container::{Descriptor, Trailer};
pub use decompress::decompress_msz;
pub use detect::{pattern_detect, probe, FileKind, SourceFormat};
pub use division::StreamKind;
pub use error::{MszError, Result};
pub use extract::{Extractor, Selection};
pub use transform::{ElementType, Tolerance, Transform, TransformId};
pub use writer::CountingWriter;

/// Maps a file read-only.
///
/// The mapping is read-only and shared between workers; the file is
/// expected not to change underneath it for the duration of the operation.
pub fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap)
}

/// Compresses an mzML file into a container file.
pub fn compress_path(input: &Path, output: &Path, opts: &CompressOptions) -> Result<Trailer> {
    let mmap = map_file(input)?;
    if probe(&mmap) != FileKind::MzML {
        return Err(MszError::Unsupported(format!(
            "{} is not an indexed mzML document",
            input.display()
        )));
    }
    let mut out = CountingWriter::new(BufWriter::new(File::create(output)?));
    let trailer = compress_mzml(&mmap, &mut out, opts)?;
    out.finish()?;
    Ok(trailer)
}

/// Decompresses a container file back to mzML.
pub fn decompress_path(input: &Path, output: &Path, threads: usize) -> Result<()> {
    let mmap = map_file(input)?;
    if probe(&mmap) != FileKind::Msz {
        return Err(MszError::Unsupported(format!(
            "{} is not an msz container",
            input.display()
        )));
    }
    let mut out = BufWriter::new(File::create(output)?);
    decompress_msz(&mmap, &mut out, threads)
}

/// Extracts selected spectra from a container file into a new mzML file.
pub fn extract_path(input: &Path, output: &Path, selection: &Selection) -> Result<()> {
    let mmap = map_file(input)?;
    if probe(&mmap) != FileKind::Msz {
        return Err(MszError::Unsupported(format!(
            "{} is not an msz container",
            input.display()
        )));
    }
    let mut extractor = Extractor::open(&mmap)?;
    let mut out = BufWriter::new(File::create(output)?);
    extractor.extract(selection, &mut out)
}
