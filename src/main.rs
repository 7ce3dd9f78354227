use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;

use msz::{BlockCodec, CompressOptions, FileKind, Selection, TransformId};

#[derive(Parser, Debug)]
#[command(
    name = "mszip",
    version,
    about = "Compresses mass-spectrometry mzML data with high efficiency"
)]
struct Args {
    /// Input file (.mzML to compress, .msz to decompress or extract)
    input: PathBuf,

    /// Output file; defaults to the input with its extension swapped
    output: Option<PathBuf>,

    /// Run in verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Number of worker threads (default: auto)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// m/z lossy compression type (cast, cast16, log, delta16/24/32,
    /// vdelta16/24, vbr, bitpack)
    #[arg(short = 'z', long = "mz-lossy", default_value = "lossless")]
    mz_lossy: String,

    /// Intensity lossy compression type (same names as --mz-lossy)
    #[arg(short = 'i', long = "int-lossy", default_value = "lossless")]
    int_lossy: String,

    /// Scale factor for m/z delta/bitpack transforms, or vbr threshold
    #[arg(long = "mz-scale-factor")]
    mz_scale_factor: Option<f32>,

    /// Scale factor for intensity transforms, or vbr threshold
    #[arg(long = "int-scale-factor")]
    int_scale_factor: Option<f32>,

    /// Maximum blocksize (accepts KB, MB, GB suffixes)
    #[arg(short, long, default_value = "100MB")]
    blocksize: String,

    /// zstd compression level (1-22)
    #[arg(long = "zstd-compression-level", default_value_t = 3)]
    zstd_compression_level: i32,

    /// Target xml stream codec (zstd, none)
    #[arg(long = "target-xml-format", default_value = "zstd")]
    target_xml_format: String,

    /// Target m/z stream codec (zstd, none)
    #[arg(long = "target-mz-format", default_value = "zstd")]
    target_mz_format: String,

    /// Target intensity stream codec (zstd, none)
    #[arg(long = "target-inten-format", default_value = "zstd")]
    target_inten_format: String,

    /// Extract spectrum indices from an msz file (e.g. [1-3,5-6])
    #[arg(long = "extract-indices")]
    extract_indices: Option<String>,

    /// Extract scan numbers from an msz file (e.g. [101,103-105])
    #[arg(long = "extract-scans")]
    extract_scans: Option<String>,

    /// Extract every spectrum of one MS level from an msz file
    #[arg(long = "ms-level")]
    ms_level: Option<u32>,
}

/// Parses a size argument with an optional KB/MB/GB suffix.
fn parse_blocksize(arg: &str) -> Result<u64> {
    let upper = arg.trim().to_ascii_uppercase();
    let (digits, factor) = if let Some(d) = upper.strip_suffix("KB") {
        (d, 1_000u64)
    } else if let Some(d) = upper.strip_suffix("MB") {
        (d, 1_000_000)
    } else if let Some(d) = upper.strip_suffix("GB") {
        (d, 1_000_000_000)
    } else {
        (upper.as_str(), 1)
    };
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid blocksize: {arg}"))?;
    Ok(value * factor)
}

/// Parses a range list like `[1-3,5]` (brackets optional) into values.
fn parse_range_list(arg: &str) -> Result<Vec<u64>> {
    let inner = arg.trim().trim_start_matches('[').trim_end_matches(']');
    let mut values = Vec::new();
    for part in inner.split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u64 = lo.trim().parse().context("invalid range start")?;
                let hi: u64 = hi.trim().parse().context("invalid range end")?;
                if hi < lo {
                    bail!("range {part} runs backwards");
                }
                values.extend(lo..=hi);
            }
            None => values.push(part.trim().parse().context("invalid list entry")?),
        }
    }
    if values.is_empty() {
        bail!("empty range list: {arg}");
    }
    Ok(values)
}

/// Scale factors applied when the user gives none explicitly.
fn default_mz_scale(id: TransformId) -> f32 {
    match id {
        TransformId::Delta16 => 127.998046875,
        TransformId::Delta24 => 65536.0,
        TransformId::Delta32 => 262144.0,
        TransformId::Vbr => 0.1,
        TransformId::BitPack => 10000.0,
        TransformId::Cast64To16 => 11.801,
        _ => 1000.0,
    }
}

fn default_int_scale(id: TransformId) -> f32 {
    match id {
        TransformId::Log2 => 72.0,
        TransformId::Vbr => 1.0,
        TransformId::BitPack => 10000.0,
        TransformId::Cast64To16 => 11.801,
        _ => 0.0,
    }
}

fn selection(args: &Args) -> Result<Option<Selection>> {
    if let Some(level) = args.ms_level {
        return Ok(Some(Selection::MsLevel(level)));
    }
    if let Some(scans) = &args.extract_scans {
        return Ok(Some(Selection::Scans(parse_range_list(scans)?)));
    }
    if let Some(indices) = &args.extract_indices {
        return Ok(Some(Selection::Indices(parse_range_list(indices)?)));
    }
    Ok(None)
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}]") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .init();

    let mmap = msz::map_file(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let kind = msz::probe(&mmap);
    drop(mmap);

    match kind {
        FileKind::MzML => {
            let mz_transform = TransformId::from_name(&args.mz_lossy)?;
            let inten_transform = TransformId::from_name(&args.int_lossy)?;
            let opts = CompressOptions {
                threads: args.threads,
                blocksize: parse_blocksize(&args.blocksize)?,
                zstd_level: args.zstd_compression_level,
                xml_codec: BlockCodec::from_name(&args.target_xml_format)?,
                mz_codec: BlockCodec::from_name(&args.target_mz_format)?,
                inten_codec: BlockCodec::from_name(&args.target_inten_format)?,
                mz_transform,
                inten_transform,
                mz_scale_factor: args
                    .mz_scale_factor
                    .unwrap_or_else(|| default_mz_scale(mz_transform)),
                inten_scale_factor: args
                    .int_scale_factor
                    .unwrap_or_else(|| default_int_scale(inten_transform)),
            };
            let output = args
                .output
                .clone()
                .unwrap_or_else(|| args.input.with_extension("msz"));

            let pb = spinner("compressing");
            msz::compress_path(&args.input, &output, &opts)?;
            pb.finish_and_clear();

            let in_size = std::fs::metadata(&args.input)?.len();
            let out_size = std::fs::metadata(&output)?.len();
            println!(
                "{} ({in_size} bytes) -> {} ({out_size} bytes, {:.2}x)",
                args.input.display(),
                output.display(),
                in_size as f64 / out_size as f64
            );
        }
        FileKind::Msz => {
            let output = args
                .output
                .clone()
                .unwrap_or_else(|| args.input.with_extension("mzML"));
            match selection(&args)? {
                Some(selection) => {
                    let pb = spinner("extracting");
                    msz::extract_path(&args.input, &output, &selection)?;
                    pb.finish_and_clear();
                    println!("extracted to {}", output.display());
                }
                None => {
                    let pb = spinner("decompressing");
                    msz::decompress_path(&args.input, &output, args.threads)?;
                    pb.finish_and_clear();
                    println!("decompressed to {}", output.display());
                }
            }
        }
        FileKind::Unknown => {
            bail!(
                "{}: not an mzML document or msz container",
                args.input.display()
            );
        }
    }
    Ok(())
}
