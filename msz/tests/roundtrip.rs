//! End-to-end compression/decompression round-trips over synthetic mzML.

mod common;

use common::{build_mzml, compress_to_vec, decompress_to_vec, read_arrays, sample_spectra};
use msz::container::ContainerIndex;
use msz::{BlockCodec, CompressOptions, MszError, TransformId};

fn options(threads: usize, blocksize: u64) -> CompressOptions {
    CompressOptions {
        threads,
        blocksize,
        ..CompressOptions::default()
    }
}

#[test]
fn lossless_round_trip_is_byte_exact() {
    let source = build_mzml(&sample_spectra(3), true, true);
    let (container, trailer) = compress_to_vec(&source, &options(2, 64 * 1024));

    // Scenario: 3 spectra over 2 workers yield 3 divisions.
    assert_eq!(trailer.n_divisions, 3);
    assert_eq!(trailer.spectrum_count, 3);
    assert_eq!(trailer.original_filesize, source.len() as u64);
    assert_eq!(msz::probe(&container), msz::FileKind::Msz);

    let restored = decompress_to_vec(&container);
    assert_eq!(restored, source);
}

#[test]
fn lossless_round_trip_without_source_zlib() {
    let source = build_mzml(&sample_spectra(4), false, false);
    let (container, _) = compress_to_vec(&source, &options(2, 64 * 1024));
    assert_eq!(decompress_to_vec(&container), source);
}

#[test]
fn round_trip_with_store_codec() {
    let source = build_mzml(&sample_spectra(3), true, true);
    let opts = CompressOptions {
        xml_codec: BlockCodec::Store,
        mz_codec: BlockCodec::Store,
        inten_codec: BlockCodec::Store,
        ..options(2, 64 * 1024)
    };
    let (container, _) = compress_to_vec(&source, &opts);
    assert_eq!(decompress_to_vec(&container), source);
}

#[test]
fn single_spectrum_round_trips() {
    let source = build_mzml(&sample_spectra(1), true, true);
    let (container, trailer) = compress_to_vec(&source, &options(4, 64 * 1024));
    assert_eq!(trailer.n_divisions, 2);
    assert_eq!(decompress_to_vec(&container), source);
}

#[test]
fn worker_counts_beyond_spectrum_count_are_clamped() {
    let source = build_mzml(&sample_spectra(3), true, true);
    for threads in [1, 3, 16] {
        let (container, trailer) = compress_to_vec(&source, &options(threads, 64 * 1024));
        assert!(trailer.n_divisions <= 4);
        assert_eq!(decompress_to_vec(&container), source);
    }
}

#[test]
fn tiny_blocksize_rolls_multiple_blocks_per_division() {
    let source = build_mzml(&sample_spectra(4), true, true);
    let (container, trailer) = compress_to_vec(&source, &options(2, 48));

    let index = ContainerIndex::parse(&container).unwrap();
    assert!(
        index.tables[0].len() > trailer.n_divisions as usize - 1,
        "expected the xml stream to roll more than one block per division"
    );
    assert_eq!(decompress_to_vec(&container), source);
}

#[test]
fn empty_payload_spans_round_trip() {
    let mut spectra = sample_spectra(2);
    spectra[1].mz = Vec::new();
    spectra[1].inten = Vec::new();
    // With uncompressed payloads an empty array is a zero-length span.
    let source = build_mzml(&spectra, false, false);
    let (container, _) = compress_to_vec(&source, &options(2, 64 * 1024));
    assert_eq!(decompress_to_vec(&container), source);
}

#[test]
fn log2_intensities_stay_within_tolerance() {
    let source = build_mzml(&sample_spectra(3), true, true);
    let opts = CompressOptions {
        inten_transform: TransformId::Log2,
        inten_scale_factor: 72.0,
        ..options(2, 64 * 1024)
    };
    let (container, _) = compress_to_vec(&source, &opts);
    let restored = decompress_to_vec(&container);

    let (src_mz, src_inten) = read_arrays(&source);
    let (out_mz, out_inten) = read_arrays(&restored);

    // m/z arrays are untouched.
    assert_eq!(src_mz, out_mz);

    let factor = 2f64.powf(0.01);
    for (a, b) in src_inten.iter().zip(&out_inten) {
        assert_eq!(a.len(), b.len());
        for (&x, &y) in a.iter().zip(b) {
            assert!(y <= x * factor && y >= x / factor, "{x} vs {y}");
        }
    }
}

#[test]
fn delta_mz_stays_within_tolerance() {
    let source = build_mzml(&sample_spectra(4), false, true);
    let opts = CompressOptions {
        mz_transform: TransformId::Delta24,
        mz_scale_factor: 65536.0,
        ..options(2, 64 * 1024)
    };
    let (container, _) = compress_to_vec(&source, &opts);
    let restored = decompress_to_vec(&container);

    let (src_mz, src_inten) = read_arrays(&source);
    let (out_mz, out_inten) = read_arrays(&restored);

    assert_eq!(src_inten, out_inten);
    for (a, b) in src_mz.iter().zip(&out_mz) {
        for (&x, &y) in a.iter().zip(b) {
            assert!((x - y).abs() <= 1.0 / 65536.0, "{x} vs {y}");
        }
    }
}

#[test]
fn cast_transform_requires_wide_source() {
    // Intensities are 32-bit; narrowing them is unsupported and must fail
    // at setup, before any output is produced.
    let source = build_mzml(&sample_spectra(2), true, true);
    let opts = CompressOptions {
        inten_transform: TransformId::Cast64To32,
        ..options(1, 64 * 1024)
    };
    let mut out = msz::CountingWriter::new(Vec::new());
    let err = msz::compress_mzml(&source, &mut out, &opts).unwrap_err();
    assert!(matches!(err, MszError::Unsupported(_)));
}

#[test]
fn container_invariants_hold() {
    let source = build_mzml(&sample_spectra(5), true, true);
    let (container, trailer) = compress_to_vec(&source, &options(2, 64 * 1024));
    let index = ContainerIndex::parse(&container).unwrap();

    // The division set tiles the source exactly.
    assert_eq!(index.divisions.total_size(), source.len() as u64);
    assert_eq!(index.divisions.spectrum_count() as u64, trailer.spectrum_count);

    // Block-length sums match the physical stream sections.
    for (table, stream) in index.tables.iter().zip(&index.streams) {
        assert_eq!(table.total_compressed(), stream.len() as u64);
    }
}

#[test]
fn corrupt_block_fails_with_corrupt_container() {
    let source = build_mzml(&sample_spectra(3), true, true);
    let (mut container, trailer) = compress_to_vec(&source, &options(2, 64 * 1024));
    for i in 0..4 {
        container[trailer.xml_pos as usize + i] ^= 0xFF;
    }
    let mut out = Vec::new();
    let err = msz::decompress_msz(&container, &mut out, 2).unwrap_err();
    assert!(matches!(err, MszError::CorruptContainer(_)));
}

#[test]
fn truncated_container_fails_cleanly() {
    let source = build_mzml(&sample_spectra(3), true, true);
    let (container, _) = compress_to_vec(&source, &options(2, 64 * 1024));
    let mut out = Vec::new();
    let err = msz::decompress_msz(&container[..container.len() / 2], &mut out, 1).unwrap_err();
    assert!(matches!(err, MszError::CorruptContainer(_)));
}

#[test]
fn path_level_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("tiny.mzML");
    let container_path = dir.path().join("tiny.msz");
    let restored_path = dir.path().join("tiny.out.mzML");

    let source = build_mzml(&sample_spectra(3), true, true);
    std::fs::write(&input, &source).unwrap();

    msz::compress_path(&input, &container_path, &options(2, 64 * 1024)).unwrap();
    msz::decompress_path(&container_path, &restored_path, 2).unwrap();

    assert_eq!(std::fs::read(&restored_path).unwrap(), source);
}

#[test]
fn non_mzml_non_container_input_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("garbage.bin");
    std::fs::write(&input, vec![0x41u8; 2048]).unwrap();

    let err = msz::compress_path(&input, &dir.path().join("o.msz"), &CompressOptions::default())
        .unwrap_err();
    assert!(matches!(err, MszError::Unsupported(_)));

    let err = msz::decompress_path(&input, &dir.path().join("o.mzML"), 1).unwrap_err();
    assert!(matches!(err, MszError::Unsupported(_)));
}
