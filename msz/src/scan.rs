//! Structure-assuming position scanner.
//!
//! After pattern detection the document is known to be regular: every
//! spectrum holds exactly two `<binary>...</binary>` blocks, m/z first.
//! The scanner walks the file once with substring search instead of a full
//! XML parser and produces the encapsulating division: `2N + 1` xml spans,
//! `N` m/z spans, `N` intensity spans, the spectrum tag boundaries, and the
//! per-spectrum scan number, MS level, and retention time.

use memchr::memmem::Finder;

use crate::detect::SourceFormat;
use crate::division::Division;
use crate::error::{MszError, Result};

const BINARY_OPEN: &[u8] = b"<binary>";
const BINARY_CLOSE: &[u8] = b"</binary>";
const SPECTRUM_OPEN: &[u8] = b"<spectrum ";
const SPECTRUM_CLOSE: &[u8] = b"</spectrum>";

struct Finders {
    spectrum_open: Finder<'static>,
    spectrum_close: Finder<'static>,
    binary_open: Finder<'static>,
    binary_close: Finder<'static>,
    value: Finder<'static>,
}

impl Finders {
    fn new() -> Self {
        Self {
            spectrum_open: Finder::new(SPECTRUM_OPEN),
            spectrum_close: Finder::new(SPECTRUM_CLOSE),
            binary_open: Finder::new(BINARY_OPEN),
            binary_close: Finder::new(BINARY_CLOSE),
            value: Finder::new(b"value=\""),
        }
    }
}

fn find_from(
    finder: &Finder,
    data: &[u8],
    from: usize,
    what: &str,
    spectrum: usize,
) -> Result<usize> {
    finder
        .find(&data[from..])
        .map(|p| from + p)
        .ok_or_else(|| {
            MszError::MalformedSource(format!("missing {what} marker for spectrum {spectrum}"))
        })
}

fn digits_at(region: &[u8], at: usize) -> &[u8] {
    let rest = &region[at..];
    let len = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    &rest[..len]
}

/// Parses the integer following `scan=` inside the spectrum id attribute.
fn parse_scan_number(head: &[u8], spectrum: usize) -> Result<u64> {
    let p = memchr::memmem::find(head, b"scan=").ok_or_else(|| {
        MszError::MalformedSource(format!("spectrum {spectrum} carries no scan number"))
    })?;
    let digits = digits_at(head, p + 5);
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&v| v > 0)
        .ok_or_else(|| {
            MszError::MalformedSource(format!("spectrum {spectrum} has an invalid scan number"))
        })
}

fn parse_ms_level(head: &[u8], finders: &Finders, spectrum: usize) -> Result<u32> {
    let p = memchr::memmem::find(head, b"\"ms level\"").ok_or_else(|| {
        MszError::MalformedSource(format!("spectrum {spectrum} carries no ms level"))
    })?;
    let v = find_from(&finders.value, head, p, "ms level value", spectrum)?;
    let digits = digits_at(head, v + 7);
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            MszError::MalformedSource(format!("spectrum {spectrum} has an invalid ms level"))
        })
}

/// Retention time in seconds; 0 when the cvParam is absent. Values with a
/// minute unit are converted.
fn parse_retention_time(head: &[u8], finders: &Finders) -> f32 {
    let Some(p) = memchr::memmem::find(head, b"\"scan start time\"") else {
        return 0.0;
    };
    let Some(v) = finders.value.find(&head[p..]).map(|q| p + q) else {
        return 0.0;
    };
    let rest = &head[v + 7..];
    let len = rest
        .iter()
        .take_while(|&&b| b.is_ascii_digit() || b == b'.' || b == b'-' || b == b'e' || b == b'E' || b == b'+')
        .count();
    let Some(value) = std::str::from_utf8(&rest[..len]).ok().and_then(|s| s.parse::<f32>().ok())
    else {
        return 0.0;
    };
    let tag_end = memchr::memchr(b'>', rest).unwrap_or(rest.len());
    if memchr::memmem::find(&rest[..tag_end], b"minute").is_some() {
        value * 60.0
    } else {
        value
    }
}

/// Scans the document and returns the encapsulating division.
///
/// # Errors
///
/// `MalformedSource` when an expected marker is missing or out of order,
/// when the number of spectra found differs from the declared count, or
/// when any produced span would violate the position-table invariants.
pub fn scan_mzml(data: &[u8], fmt: &SourceFormat) -> Result<Division> {
    let n = fmt.spectrum_count as usize;
    if n == 0 {
        return Err(MszError::MalformedSource(
            "document declares zero spectra".into(),
        ));
    }

    let finders = Finders::new();
    let mut div = Division::default();
    let mut cursor = 0usize;
    let mut xml_start = 0usize;

    for i in 0..n {
        let spec_start = find_from(&finders.spectrum_open, data, cursor, "<spectrum", i)?;
        let mz_open = find_from(&finders.binary_open, data, spec_start, "first <binary>", i)?;
        let mz_payload = mz_open + BINARY_OPEN.len();

        let head = &data[spec_start..mz_open];
        let scan = parse_scan_number(head, i)?;
        let ms_level = parse_ms_level(head, &finders, i)?;
        let ret_time = parse_retention_time(head, &finders);

        let mz_close = find_from(&finders.binary_close, data, mz_payload, "first </binary>", i)?;
        let inten_open = find_from(&finders.binary_open, data, mz_close, "second <binary>", i)?;
        let spec_close = find_from(&finders.spectrum_close, data, mz_close, "</spectrum>", i)?;
        if inten_open > spec_close {
            return Err(MszError::MalformedSource(format!(
                "spectrum {i} holds fewer than two binary blocks"
            )));
        }
        let inten_payload = inten_open + BINARY_OPEN.len();
        let inten_close = find_from(
            &finders.binary_close,
            data,
            inten_payload,
            "second </binary>",
            i,
        )?;
        let spec_close = find_from(&finders.spectrum_close, data, inten_close, "</spectrum>", i)?;
        let spec_end = spec_close + SPECTRUM_CLOSE.len();

        div.xml.push(xml_start as u64, mz_payload as u64);
        div.mz.push(mz_payload as u64, mz_close as u64);
        div.xml.push(mz_close as u64, inten_payload as u64);
        div.inten.push(inten_payload as u64, inten_close as u64);
        div.spectra.push(spec_start as u64, spec_end as u64);
        div.scans.push(scan);
        div.ms_levels.push(ms_level);
        div.ret_times.push(ret_time);

        xml_start = inten_close;
        cursor = spec_end;
    }

    if finders.spectrum_open.find(&data[cursor..]).is_some() {
        return Err(MszError::MalformedSource(format!(
            "document holds more spectra than the declared count {n}"
        )));
    }

    div.xml.push(xml_start as u64, data.len() as u64);

    for table in [&div.xml, &div.mz, &div.inten, &div.spectra] {
        table.validate()?;
    }
    div.size = div.xml.total_len() + div.mz.total_len() + div.inten.total_len();

    log::debug!(
        "scanned {} spectra, {} xml spans, {} bytes",
        n,
        div.xml.len(),
        div.size
    );
    Ok(div)
}
