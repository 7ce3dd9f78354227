//! Parallel decoder: container back to mzML.
//!
//! Each division is reconstructed independently: its block ranges are
//! decompressed from the three streams, then the position tables are walked
//! interleaving `(xml, m/z, xml, intensity)` spans per spectrum, applying
//! the inverse numeric transform and re-encoding base64(+zlib). Division
//! outputs are joined in partition order by a single writer.

use std::io::Write;

use crossbeam_channel::bounded;
use log::{debug, info};
use rayon::prelude::*;

use crate::codec::{encode_payload, BlockDecompressor, SourceCompression};
use crate::compress::{effective_threads, ordered_drain};
use crate::container::ContainerIndex;
use crate::division::Division;
use crate::error::{MszError, Result};
use crate::transform::Transform;

struct DecodeCtx {
    mz_transform: Transform,
    inten_transform: Transform,
    compression: SourceCompression,
}

struct WorkerState {
    dctx: [BlockDecompressor; 3],
}

impl WorkerState {
    fn new(index: &ContainerIndex) -> Result<Self> {
        Ok(Self {
            dctx: [
                BlockDecompressor::new(index.df.xml_codec)?,
                BlockDecompressor::new(index.df.mz_codec)?,
                BlockDecompressor::new(index.df.inten_codec)?,
            ],
        })
    }
}

/// Decompresses a mapped container, writing the reconstructed mzML.
pub fn decompress_msz<W: Write>(data: &[u8], out: &mut W, threads: usize) -> Result<()> {
    let index = ContainerIndex::parse(data)?;
    debug!(
        "container: {} divisions, {} spectra, original {} bytes",
        index.trailer.n_divisions, index.trailer.spectrum_count, index.trailer.original_filesize
    );

    let ctx = DecodeCtx {
        mz_transform: Transform::resolve(
            index.trailer.mz_transform,
            index.df.source_mz,
            index.df.mz_scale,
        )?,
        inten_transform: Transform::resolve(
            index.trailer.inten_transform,
            index.df.source_inten,
            index.df.inten_scale,
        )?,
        compression: index.df.source_compression,
    };

    let threads = effective_threads(threads).min(index.divisions.len().max(1));
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| MszError::Io(std::io::Error::other(e)))?;

    let (tx, rx) = bounded::<(usize, Result<Vec<u8>>)>((threads * 2).max(2));
    let index_ref = &index;
    let ctx_ref = &ctx;

    let written = std::thread::scope(|s| {
        s.spawn(move || {
            pool.install(|| {
                index_ref
                    .divisions
                    .divisions
                    .par_iter()
                    .enumerate()
                    .for_each_init(
                        || WorkerState::new(index_ref),
                        |state, (i, div)| {
                            let result = match state {
                                Ok(state) => decompress_division(index_ref, ctx_ref, div, i, state),
                                Err(_) => Err(MszError::CorruptContainer(
                                    "failed to set up a worker decompression context".into(),
                                )),
                            };
                            let _ = tx.send((i, result));
                        },
                    );
            });
            drop(tx);
        });

        let mut written = 0u64;
        ordered_drain(rx, |_, chunk: Vec<u8>| {
            out.write_all(&chunk)?;
            written += chunk.len() as u64;
            Ok(())
        })
        .map(|()| written)
    })?;

    out.flush()?;
    info!(
        "reconstructed {} bytes (source was {})",
        written, index.trailer.original_filesize
    );
    Ok(())
}

/// Rebuilds one division's slice of the mzML document.
fn decompress_division(
    index: &ContainerIndex,
    ctx: &DecodeCtx,
    div: &Division,
    division: usize,
    state: &mut WorkerState,
) -> Result<Vec<u8>> {
    let xml_buf = index.decompress_division_stream(0, division, &mut state.dctx[0])?;
    let mz_buf = index.decompress_division_stream(1, division, &mut state.dctx[1])?;
    let inten_buf = index.decompress_division_stream(2, division, &mut state.dctx[2])?;

    let mut out = Vec::with_capacity(div.size as usize);
    let mut xml_off = 0usize;
    let mut mz_off = 0usize;
    let mut inten_off = 0usize;

    let k = div.spectrum_count();
    for i in 0..k {
        copy_span(&mut out, &xml_buf, &mut xml_off, div.xml.span_len(2 * i))?;
        emit_binary(
            &mut out,
            &mz_buf,
            &mut mz_off,
            div.mz.span_len(i),
            &ctx.mz_transform,
            ctx.compression,
        )?;
        copy_span(
            &mut out,
            &xml_buf,
            &mut xml_off,
            div.xml.span_len(2 * i + 1),
        )?;
        emit_binary(
            &mut out,
            &inten_buf,
            &mut inten_off,
            div.inten.span_len(i),
            &ctx.inten_transform,
            ctx.compression,
        )?;
    }
    // Residual xml spans (the trailing division's document tail).
    for i in 2 * k..div.xml.len() {
        copy_span(&mut out, &xml_buf, &mut xml_off, div.xml.span_len(i))?;
    }

    if xml_off != xml_buf.len() || mz_off != mz_buf.len() || inten_off != inten_buf.len() {
        return Err(MszError::CorruptContainer(format!(
            "division {division} stream data does not match its position tables"
        )));
    }
    Ok(out)
}

fn copy_span(out: &mut Vec<u8>, buf: &[u8], off: &mut usize, len: u64) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let len = len as usize;
    let slice = buf.get(*off..*off + len).ok_or_else(|| {
        MszError::CorruptContainer("xml span overruns its decompressed block".into())
    })?;
    out.extend_from_slice(slice);
    *off += len;
    Ok(())
}

fn emit_binary(
    out: &mut Vec<u8>,
    buf: &[u8],
    off: &mut usize,
    span_len: u64,
    transform: &Transform,
    compression: SourceCompression,
) -> Result<()> {
    if span_len == 0 {
        return Ok(());
    }
    let (raw, consumed) = transform.decode_from(&buf[*off..])?;
    *off += consumed;
    let payload = encode_payload(&raw, compression)?;
    out.extend_from_slice(&payload);
    Ok(())
}
