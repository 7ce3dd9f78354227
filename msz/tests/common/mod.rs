//! Shared mzML synthesis for the integration tests.
//!
//! Builds small but structurally faithful indexed mzML documents: real
//! cvParam accessions, base64 payloads, optional zlib deflation at the
//! default level (what the common mzML writers emit).

use std::io::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// One synthetic spectrum.
#[derive(Clone)]
pub struct SourceSpectrum {
    pub scan: u64,
    pub ms_level: u32,
    pub ret_time_min: f64,
    pub mz: Vec<f64>,
    pub inten: Vec<f64>,
}

impl SourceSpectrum {
    pub fn new(scan: u64, ms_level: u32, mz: Vec<f64>, inten: Vec<f64>) -> Self {
        Self {
            scan,
            ms_level,
            ret_time_min: scan as f64 * 0.01,
            mz,
            inten,
        }
    }
}

/// Produces `n` spectra with m/z ladders and varied intensities.
pub fn sample_spectra(n: usize) -> Vec<SourceSpectrum> {
    (0..n)
        .map(|i| {
            let len = 4 + i % 3;
            let mz = (0..len)
                .map(|j| 200.0 + i as f64 * 10.0 + j as f64 * 1.25)
                .collect();
            let inten = (0..len)
                .map(|j| 1000.0 + (i * 31 + j * 7) as f64)
                .collect();
            SourceSpectrum::new(100 + i as u64, 1 + (i % 2) as u32, mz, inten)
        })
        .collect()
}

fn payload(values: &[f64], as_f32: bool, zlib: bool) -> String {
    let raw: Vec<u8> = if as_f32 {
        values
            .iter()
            .flat_map(|&v| (v as f32).to_le_bytes())
            .collect()
    } else {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    };
    let body = if zlib {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&raw).unwrap();
        enc.finish().unwrap()
    } else {
        raw
    };
    BASE64.encode(body)
}

/// Renders an indexed mzML document. m/z arrays are 64-bit; intensity
/// arrays are 32-bit when `inten_f32` is set.
pub fn build_mzml(spectra: &[SourceSpectrum], inten_f32: bool, zlib: bool) -> Vec<u8> {
    let comp_acc = if zlib { 1000574 } else { 1000576 };
    let comp_name = if zlib { "zlib compression" } else { "no compression" };
    let inten_acc = if inten_f32 { 1000521 } else { 1000523 };
    let inten_name = if inten_f32 { "32-bit float" } else { "64-bit float" };

    let mut doc = String::new();
    doc.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    doc.push_str("<indexedmzML xmlns=\"http://psi.hupo.org/ms/mzml\">\n");
    doc.push_str(" <mzML id=\"synthetic\" version=\"1.1.0\">\n");
    doc.push_str("  <run id=\"run1\" defaultInstrumentConfigurationRef=\"IC1\">\n");
    doc.push_str(&format!(
        "   <spectrumList count=\"{}\" defaultDataProcessingRef=\"dp1\">\n",
        spectra.len()
    ));

    for (i, spec) in spectra.iter().enumerate() {
        let mz_b64 = payload(&spec.mz, false, zlib);
        let inten_b64 = payload(&spec.inten, inten_f32, zlib);
        doc.push_str(&format!(
            "    <spectrum index=\"{i}\" id=\"controllerType=0 controllerNumber=1 scan={}\" defaultArrayLength=\"{}\">\n",
            spec.scan,
            spec.mz.len()
        ));
        doc.push_str(&format!(
            "     <cvParam cvRef=\"MS\" accession=\"MS:1000511\" name=\"ms level\" value=\"{}\"/>\n",
            spec.ms_level
        ));
        doc.push_str("     <scanList count=\"1\">\n      <scan>\n");
        doc.push_str(&format!(
            "       <cvParam cvRef=\"MS\" accession=\"MS:1000016\" name=\"scan start time\" value=\"{}\" unitCvRef=\"UO\" unitAccession=\"UO:0000031\" unitName=\"minute\"/>\n",
            spec.ret_time_min
        ));
        doc.push_str("      </scan>\n     </scanList>\n");
        doc.push_str("     <binaryDataArrayList count=\"2\">\n");
        doc.push_str(&format!(
            "      <binaryDataArray encodedLength=\"{}\">\n",
            mz_b64.len()
        ));
        doc.push_str("       <cvParam cvRef=\"MS\" accession=\"MS:1000523\" name=\"64-bit float\"/>\n");
        doc.push_str(&format!(
            "       <cvParam cvRef=\"MS\" accession=\"MS:{comp_acc}\" name=\"{comp_name}\"/>\n"
        ));
        doc.push_str("       <cvParam cvRef=\"MS\" accession=\"MS:1000514\" name=\"m/z array\"/>\n");
        doc.push_str(&format!("       <binary>{mz_b64}</binary>\n"));
        doc.push_str("      </binaryDataArray>\n");
        doc.push_str(&format!(
            "      <binaryDataArray encodedLength=\"{}\">\n",
            inten_b64.len()
        ));
        doc.push_str(&format!(
            "       <cvParam cvRef=\"MS\" accession=\"MS:{inten_acc}\" name=\"{inten_name}\"/>\n"
        ));
        doc.push_str(&format!(
            "       <cvParam cvRef=\"MS\" accession=\"MS:{comp_acc}\" name=\"{comp_name}\"/>\n"
        ));
        doc.push_str(
            "       <cvParam cvRef=\"MS\" accession=\"MS:1000515\" name=\"intensity array\"/>\n",
        );
        doc.push_str(&format!("       <binary>{inten_b64}</binary>\n"));
        doc.push_str("      </binaryDataArray>\n");
        doc.push_str("     </binaryDataArrayList>\n");
        doc.push_str("    </spectrum>\n");
    }

    doc.push_str("   </spectrumList>\n");
    doc.push_str("  </run>\n");
    doc.push_str(" </mzML>\n");
    doc.push_str("</indexedmzML>\n");
    doc.into_bytes()
}

/// Decodes every numeric array of an mzML document back to `f64` values,
/// using the library's own scanner to locate the payloads.
pub fn read_arrays(mzml: &[u8]) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
    use base64::engine::general_purpose::STANDARD;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    let fmt = msz::pattern_detect(mzml).expect("synthetic mzML should detect");
    let div = msz::scan::scan_mzml(mzml, &fmt).expect("synthetic mzML should scan");

    let decode = |start: u64, end: u64, f32_elems: bool| -> Vec<f64> {
        let text = &mzml[start as usize..end as usize];
        let decoded = STANDARD.decode(text).expect("payload base64");
        let raw = if fmt.compression == msz::SourceCompression::Zlib {
            let mut out = Vec::new();
            ZlibDecoder::new(&decoded[..])
                .read_to_end(&mut out)
                .expect("payload zlib");
            out
        } else {
            decoded
        };
        if f32_elems {
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect()
        } else {
            raw.chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect()
        }
    };

    let mz_f32 = fmt.mz_format == msz::ElementType::Float32;
    let inten_f32 = fmt.inten_format == msz::ElementType::Float32;
    let mut mz_arrays = Vec::new();
    let mut inten_arrays = Vec::new();
    for i in 0..div.mz.len() {
        let (s, e) = div.mz.span(i);
        mz_arrays.push(decode(s, e, mz_f32));
        let (s, e) = div.inten.span(i);
        inten_arrays.push(decode(s, e, inten_f32));
    }
    (mz_arrays, inten_arrays)
}

/// Compresses an mzML byte slice to an in-memory container.
pub fn compress_to_vec(mzml: &[u8], opts: &msz::CompressOptions) -> (Vec<u8>, msz::Trailer) {
    let mut out = msz::CountingWriter::new(Vec::new());
    let trailer = msz::compress_mzml(mzml, &mut out, opts).expect("compression should succeed");
    (out.finish().unwrap(), trailer)
}

/// Decompresses an in-memory container back to mzML bytes.
pub fn decompress_to_vec(container: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    msz::decompress_msz(container, &mut out, 2).expect("decompression should succeed");
    out
}
