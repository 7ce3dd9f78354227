#![no_main]

use libfuzzer_sys::fuzz_target;
use msz::decompress_msz;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1_000_000 {
        return;
    }
    // A damaged or hostile container must surface a typed error, never a
    // panic or runaway allocation.
    let mut out = Vec::new();
    let _ = decompress_msz(data, &mut out, 1);
});
