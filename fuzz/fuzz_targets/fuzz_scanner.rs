#![no_main]

use libfuzzer_sys::fuzz_target;
use msz::scan::scan_mzml;
use msz::{pattern_detect, probe, FileKind};

fuzz_target!(|data: &[u8]| {
    if data.len() > 1_000_000 {
        return;
    }
    // Arbitrary bytes must never panic the front of the pipeline; errors
    // are the expected outcome for almost every input.
    if probe(data) != FileKind::MzML {
        return;
    }
    let Ok(fmt) = pattern_detect(data) else {
        return;
    };
    if fmt.spectrum_count > 10_000 {
        return;
    }
    if let Ok(div) = scan_mzml(data, &fmt) {
        // When the scanner accepts, its tables must satisfy the span
        // invariants and tile the file.
        assert_eq!(div.mz.len() as u32, fmt.spectrum_count);
        assert_eq!(div.xml.len() as u32, 2 * fmt.spectrum_count + 1);
        assert_eq!(div.size, data.len() as u64);
    }
});
