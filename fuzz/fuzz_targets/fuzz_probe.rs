#![no_main]

use libfuzzer_sys::fuzz_target;
use msz::probe;

fuzz_target!(|data: &[u8]| {
    // The probe must classify any input without panicking and without
    // reading past the first 512 bytes.
    let _ = probe(data);
});
