//! Parallel compression pipeline.
//!
//! Three stages run in sequence — XML, m/z, intensity — and each stage
//! fans its divisions out over a rayon pool. Workers read through the
//! shared memory map, own their per-thread codec resources, and send
//! finished blocks over a bounded channel; the single writer thread
//! reorders results into partition order before writing. Workers are never
//! cancelled: the channel is drained to completion and the first failure in
//! partition order is surfaced afterwards.

use std::collections::HashMap;
use std::io::Write;

use crossbeam_channel::{bounded, Receiver};
use log::{debug, info};
use rayon::prelude::*;

use crate::block::{BlockAccumulator, BlockLenTable, CompressedBlock};
use crate::codec::{decode_payload, BlockCodec, BlockCompressor, SourceCompression};
use crate::container::{write_header, Descriptor, Trailer};
use crate::detect::pattern_detect;
use crate::division::{partition, Division, Divisions, StreamKind};
use crate::error::{MszError, Result};
use crate::scan::scan_mzml;
use crate::transform::{Transform, TransformId};
use crate::writer::CountingWriter;

/// Caller configuration for compression.
#[derive(Debug, Clone, Copy)]
pub struct CompressOptions {
    /// Worker count; 0 selects the available parallelism.
    pub threads: usize,
    /// Growable-buffer fill at which a compressed block is emitted.
    pub blocksize: u64,
    pub zstd_level: i32,
    pub xml_codec: BlockCodec,
    pub mz_codec: BlockCodec,
    pub inten_codec: BlockCodec,
    pub mz_transform: TransformId,
    pub inten_transform: TransformId,
    pub mz_scale_factor: f32,
    pub inten_scale_factor: f32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            blocksize: 100_000_000,
            zstd_level: 3,
            xml_codec: BlockCodec::Zstd,
            mz_codec: BlockCodec::Zstd,
            inten_codec: BlockCodec::Zstd,
            mz_transform: TransformId::Lossless,
            inten_transform: TransformId::Lossless,
            mz_scale_factor: 1000.0,
            inten_scale_factor: 0.0,
        }
    }
}

pub(crate) fn effective_threads(requested: usize) -> usize {
    if requested > 0 {
        requested
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Per-stream context handed to the workers.
struct StreamCtx {
    codec: BlockCodec,
    level: i32,
    blocksize: u64,
    /// `None` for the XML stream; binary streams decode the source payload
    /// and apply their numeric transform.
    payload: Option<(Transform, SourceCompression)>,
}

struct WorkerState {
    codec: BlockCompressor,
    acc: BlockAccumulator,
    enc_buf: Vec<u8>,
}

impl WorkerState {
    fn new(ctx: &StreamCtx) -> Result<Self> {
        Ok(Self {
            codec: BlockCompressor::new(ctx.codec, ctx.level)?,
            acc: BlockAccumulator::new(ctx.blocksize),
            enc_buf: Vec::new(),
        })
    }
}

/// Compresses a mapped mzML document into the container layout, returning
/// the written trailer.
pub fn compress_mzml<W: Write>(
    data: &[u8],
    out: &mut CountingWriter<W>,
    opts: &CompressOptions,
) -> Result<Trailer> {
    let fmt = pattern_detect(data)?;
    debug!(
        "source: mz={:?} inten={:?} compression={:?} spectra={}",
        fmt.mz_format, fmt.inten_format, fmt.compression, fmt.spectrum_count
    );

    let whole = scan_mzml(data, &fmt)?;
    let threads = effective_threads(opts.threads);
    let mut divisions = partition(&whole, threads)?;
    info!(
        "partitioned {} spectra into {} divisions over {} threads",
        fmt.spectrum_count,
        divisions.len(),
        threads
    );

    // All dispatch is resolved here; invalid combinations never reach the
    // workers. The intensity transform resolves against the intensity
    // element type, the m/z transform against the m/z element type.
    let mz_transform = Transform::resolve(opts.mz_transform, fmt.mz_format, opts.mz_scale_factor)?;
    let inten_transform = Transform::resolve(
        opts.inten_transform,
        fmt.inten_format,
        opts.inten_scale_factor,
    )?;

    let df = Descriptor {
        source_mz: fmt.mz_format,
        source_inten: fmt.inten_format,
        source_compression: fmt.compression,
        spectrum_count: fmt.spectrum_count,
        xml_codec: opts.xml_codec,
        mz_codec: opts.mz_codec,
        inten_codec: opts.inten_codec,
        mz_scale: opts.mz_scale_factor,
        inten_scale: opts.inten_scale_factor,
        blocksize: opts.blocksize,
    };
    write_header(out, &df)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.min(divisions.len()))
        .build()
        .map_err(|e| MszError::Io(std::io::Error::other(e)))?;

    let contexts = [
        StreamCtx {
            codec: opts.xml_codec,
            level: opts.zstd_level,
            blocksize: opts.blocksize,
            payload: None,
        },
        StreamCtx {
            codec: opts.mz_codec,
            level: opts.zstd_level,
            blocksize: opts.blocksize,
            payload: Some((mz_transform, fmt.compression)),
        },
        StreamCtx {
            codec: opts.inten_codec,
            level: opts.zstd_level,
            blocksize: opts.blocksize,
            payload: Some((inten_transform, fmt.compression)),
        },
    ];
    // Surface bad codec configuration before any stream is written.
    for ctx in &contexts {
        BlockCompressor::new(ctx.codec, ctx.level)?;
    }

    let mut stream_pos = [0u64; 3];
    let mut tables: Vec<BlockLenTable> = Vec::with_capacity(3);
    for stream in StreamKind::ALL {
        let s = stream.index();
        stream_pos[s] = out.offset();
        let (table, counts) = compress_stream(data, &divisions, stream, &contexts[s], &pool, out)?;
        for (div, count) in divisions.divisions.iter_mut().zip(&counts) {
            div.block_counts[s] = *count;
        }
        info!(
            "stream {:?}: {} blocks, {} -> {} bytes",
            stream,
            table.len(),
            table.total_original(),
            table.total_compressed()
        );
        tables.push(table);
    }

    let mut blk_pos = [0u64; 3];
    for (table, pos) in tables.iter().zip(&mut blk_pos) {
        *pos = out.offset();
        table.write_to(out)?;
    }

    let divisions_pos = out.offset();
    divisions.write_to(out)?;

    let trailer = Trailer {
        xml_pos: stream_pos[0],
        mz_pos: stream_pos[1],
        inten_pos: stream_pos[2],
        xml_blk_pos: blk_pos[0],
        mz_blk_pos: blk_pos[1],
        inten_blk_pos: blk_pos[2],
        divisions_pos,
        spectrum_count: fmt.spectrum_count as u64,
        original_filesize: data.len() as u64,
        n_divisions: divisions.len() as u32,
        mz_transform: opts.mz_transform,
        inten_transform: opts.inten_transform,
    };
    trailer.write_to(out)?;
    out.flush()?;
    Ok(trailer)
}

/// Runs one stream stage: every division in parallel, blocks written in
/// partition order. Returns the block-length table and the per-division
/// block counts.
fn compress_stream<W: Write>(
    data: &[u8],
    divisions: &Divisions,
    stream: StreamKind,
    ctx: &StreamCtx,
    pool: &rayon::ThreadPool,
    out: &mut CountingWriter<W>,
) -> Result<(BlockLenTable, Vec<u32>)> {
    let n = divisions.len();
    let (tx, rx) = bounded::<(usize, Result<Vec<CompressedBlock>>)>(
        (pool.current_num_threads() * 2).max(2),
    );

    std::thread::scope(|s| {
        s.spawn(move || {
            pool.install(|| {
                divisions
                    .divisions
                    .par_iter()
                    .enumerate()
                    .for_each_init(
                        || WorkerState::new(ctx),
                        |state, (i, div)| {
                            let result = match state {
                                Ok(state) => {
                                    let r = compress_division(data, div, stream, ctx, state);
                                    if r.is_err() {
                                        state.acc.clear();
                                    }
                                    r
                                }
                                Err(_) => Err(MszError::InvalidArgument(
                                    "failed to set up a worker compression context".into(),
                                )),
                            };
                            let _ = tx.send((i, result));
                        },
                    );
            });
            drop(tx);
        });

        let mut table = BlockLenTable::default();
        let mut counts = vec![0u32; n];
        ordered_drain(rx, |i, blocks: Vec<CompressedBlock>| {
            counts[i] = blocks.len() as u32;
            for blk in blocks {
                table.push(blk.original_size, blk.data.len() as u64);
                out.write_all(&blk.data)?;
            }
            Ok(())
        })?;
        Ok((table, counts))
    })
}

/// Worker body for one division of one stream.
fn compress_division(
    data: &[u8],
    div: &Division,
    stream: StreamKind,
    ctx: &StreamCtx,
    state: &mut WorkerState,
) -> Result<Vec<CompressedBlock>> {
    let mut blocks = Vec::new();
    let table = div.table(stream);

    for i in 0..table.len() {
        let (start, end) = table.span(i);
        if start == end {
            continue; // empty spans preserve alignment only
        }
        let slice = &data[start as usize..end as usize];
        match &ctx.payload {
            None => state.acc.append(slice, &mut state.codec, &mut blocks)?,
            Some((transform, compression)) => {
                let raw = decode_payload(slice, *compression)?;
                state.enc_buf.clear();
                transform.encode(&raw, &mut state.enc_buf)?;
                state
                    .acc
                    .append(&state.enc_buf, &mut state.codec, &mut blocks)?;
            }
        }
    }

    // Blocks never straddle divisions.
    state.acc.flush(&mut state.codec, &mut blocks)?;
    Ok(blocks)
}

/// Drains `(index, result)` pairs, invoking `sink` in strictly increasing
/// index order. All messages are consumed even after a failure, so workers
/// always run to completion; the first failure in index order wins.
pub(crate) fn ordered_drain<T>(
    rx: Receiver<(usize, Result<T>)>,
    mut sink: impl FnMut(usize, T) -> Result<()>,
) -> Result<()> {
    let mut pending: HashMap<usize, Result<T>> = HashMap::new();
    let mut next = 0usize;
    let mut first_err: Option<MszError> = None;

    for (i, result) in rx {
        pending.insert(i, result);
        while let Some(result) = pending.remove(&next) {
            if first_err.is_none() {
                match result {
                    Ok(value) => {
                        if let Err(e) = sink(next, value) {
                            first_err = Some(e);
                        }
                    }
                    Err(e) => first_err = Some(e),
                }
            }
            next += 1;
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
