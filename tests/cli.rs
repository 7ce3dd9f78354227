//! End-to-end tests driving the built binary.

use std::io::Write as _;
use std::process::Command;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::ZlibEncoder;
use flate2::Compression;

const BIN: &str = env!("CARGO_BIN_EXE_mszip");

fn payload(values: &[f64]) -> String {
    let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&raw).unwrap();
    BASE64.encode(enc.finish().unwrap())
}

fn tiny_mzml(n: usize) -> Vec<u8> {
    let mut doc = String::from(
        "<?xml version=\"1.0\"?>\n<indexedmzML xmlns=\"http://psi.hupo.org/ms/mzml\">\n<mzML>\n<run id=\"r\">\n",
    );
    doc.push_str(&format!("<spectrumList count=\"{n}\">\n"));
    for i in 0..n {
        let mz = payload(&[400.0 + i as f64, 401.5 + i as f64, 403.25 + i as f64]);
        let inten = payload(&[10.0, 250.0, 4000.0]);
        doc.push_str(&format!(
            "<spectrum index=\"{i}\" id=\"scan={}\" defaultArrayLength=\"3\">\n",
            i + 1
        ));
        doc.push_str(
            "<cvParam cvRef=\"MS\" accession=\"MS:1000511\" name=\"ms level\" value=\"1\"/>\n",
        );
        doc.push_str("<binaryDataArrayList count=\"2\">\n<binaryDataArray>\n");
        doc.push_str("<cvParam cvRef=\"MS\" accession=\"MS:1000523\" name=\"64-bit float\"/>\n");
        doc.push_str("<cvParam cvRef=\"MS\" accession=\"MS:1000574\" name=\"zlib compression\"/>\n");
        doc.push_str("<cvParam cvRef=\"MS\" accession=\"MS:1000514\" name=\"m/z array\"/>\n");
        doc.push_str(&format!("<binary>{mz}</binary>\n</binaryDataArray>\n"));
        doc.push_str("<binaryDataArray>\n");
        doc.push_str("<cvParam cvRef=\"MS\" accession=\"MS:1000523\" name=\"64-bit float\"/>\n");
        doc.push_str("<cvParam cvRef=\"MS\" accession=\"MS:1000574\" name=\"zlib compression\"/>\n");
        doc.push_str("<cvParam cvRef=\"MS\" accession=\"MS:1000515\" name=\"intensity array\"/>\n");
        doc.push_str(&format!("<binary>{inten}</binary>\n</binaryDataArray>\n"));
        doc.push_str("</binaryDataArrayList>\n</spectrum>\n");
    }
    doc.push_str("</spectrumList>\n</run>\n</mzML>\n</indexedmzML>\n");
    doc.into_bytes()
}

#[test]
fn cli_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("run.mzML");
    let source = tiny_mzml(4);
    std::fs::write(&input, &source).unwrap();

    let status = Command::new(BIN)
        .arg(&input)
        .args(["--threads", "2", "--blocksize", "64KB"])
        .status()
        .expect("failed to run mszip");
    assert!(status.success());

    let container = dir.path().join("run.msz");
    assert!(container.exists());

    let restored = dir.path().join("restored.mzML");
    let status = Command::new(BIN)
        .arg(&container)
        .arg(&restored)
        .status()
        .expect("failed to run mszip");
    assert!(status.success());
    assert_eq!(std::fs::read(&restored).unwrap(), source);
}

#[test]
fn cli_extracts_indices() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("run.mzML");
    std::fs::write(&input, tiny_mzml(4)).unwrap();

    assert!(Command::new(BIN).arg(&input).status().unwrap().success());

    let subset = dir.path().join("subset.mzML");
    let status = Command::new(BIN)
        .arg(dir.path().join("run.msz"))
        .arg(&subset)
        .args(["--extract-indices", "[0,2]"])
        .status()
        .unwrap();
    assert!(status.success());

    let out = std::fs::read(&subset).unwrap();
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains("count=\"2\""));
    assert!(text.contains("scan=1"));
    assert!(text.contains("scan=3"));
}

#[test]
fn cli_rejects_unknown_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("noise.bin");
    std::fs::write(&input, vec![7u8; 1024]).unwrap();

    let output = Command::new(BIN).arg(&input).output().unwrap();
    assert!(!output.status.success());
    assert!(!output.stderr.is_empty());
}

#[test]
fn cli_rejects_unknown_transform_names() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("run.mzML");
    std::fs::write(&input, tiny_mzml(1)).unwrap();

    let output = Command::new(BIN)
        .arg(&input)
        .args(["--mz-lossy", "quantum"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
