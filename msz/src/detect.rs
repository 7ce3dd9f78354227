//! File-type probe and streaming pattern detection.
//!
//! The probe classifies an input from its first 512 bytes. The pattern
//! detector runs a streaming XML tokeniser over an mzML document and stops
//! as soon as the source data formats are known: element type per array
//! kind, payload compression, and the declared spectrum count.

use memchr::memmem;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::codec::SourceCompression;
use crate::container::MAGIC_TAG;
use crate::cv;
use crate::error::{MszError, Result};
use crate::transform::ElementType;

/// Classification of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Source mzML document (compression input).
    MzML,
    /// msz container (decompression/extraction input).
    Msz,
    Unknown,
}

/// Probes the first bytes of an input.
///
/// An input is a container iff its first 4 bytes equal the magic tag.
/// Otherwise the first 512 bytes are searched for `indexedmzML`. Nothing
/// past byte 512 is read.
pub fn probe(data: &[u8]) -> FileKind {
    if data.len() >= 4 && data[..4] == MAGIC_TAG.to_le_bytes() {
        return FileKind::Msz;
    }
    let head = &data[..data.len().min(512)];
    if memmem::find(head, b"indexedmzML").is_some() {
        FileKind::MzML
    } else {
        FileKind::Unknown
    }
}

/// The partial data-format descriptor produced by pattern detection.
#[derive(Debug, Clone, Copy)]
pub struct SourceFormat {
    pub mz_format: ElementType,
    pub inten_format: ElementType,
    pub compression: SourceCompression,
    pub spectrum_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayKind {
    Mz,
    Inten,
}

#[derive(Default)]
struct Detection {
    mz_format: Option<ElementType>,
    inten_format: Option<ElementType>,
    compression: Option<SourceCompression>,
    spectrum_count: Option<u32>,
    /// Accessions seen inside the current `binaryDataArray`; the element
    /// type is committed once the array kind is known, whichever attribute
    /// order the writer used.
    pending_element: Option<ElementType>,
    pending_kind: Option<ArrayKind>,
}

impl Detection {
    fn apply_accession(&mut self, acc: u32) -> Result<()> {
        match acc {
            cv::ACC_MZ_ARRAY => self.pending_kind = Some(ArrayKind::Mz),
            cv::ACC_INTENSITY_ARRAY => self.pending_kind = Some(ArrayKind::Inten),
            cv::ACC_ZLIB_COMPRESSION | cv::ACC_NO_COMPRESSION => {
                self.compression = SourceCompression::from_accession(acc);
            }
            cv::ACC_NUMPRESS_LINEAR | cv::ACC_NUMPRESS_PIC | cv::ACC_NUMPRESS_SLOF => {
                return Err(MszError::Unsupported(format!(
                    "numpress payload compression (MS:{acc}) is not handled"
                )));
            }
            cv::ACC_32_BIT_INTEGER..=cv::ACC_64_BIT_FLOAT => {
                match ElementType::from_accession(acc) {
                    Some(elem) => self.pending_element = Some(elem),
                    None => {
                        return Err(MszError::Unsupported(format!(
                            "binary array element type MS:{acc} is not handled"
                        )))
                    }
                }
            }
            _ => {}
        }
        if let (Some(kind), Some(elem)) = (self.pending_kind, self.pending_element) {
            match kind {
                ArrayKind::Mz => self.mz_format = Some(elem),
                ArrayKind::Inten => self.inten_format = Some(elem),
            }
            self.pending_element = None;
        }
        Ok(())
    }

    fn reset_array(&mut self) {
        self.pending_element = None;
        self.pending_kind = None;
    }

    fn complete(&self) -> Option<SourceFormat> {
        Some(SourceFormat {
            mz_format: self.mz_format?,
            inten_format: self.inten_format?,
            compression: self.compression?,
            spectrum_count: self.spectrum_count?,
        })
    }
}

fn get_attribute(e: &BytesStart, name: &str) -> Result<Option<Vec<u8>>> {
    for attr in e.attributes() {
        let attr =
            attr.map_err(|e| MszError::MalformedSource(format!("bad attribute syntax: {e}")))?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(Some(attr.value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_accession(value: &[u8]) -> Option<u32> {
    let digits = value.strip_prefix(b"MS:")?;
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Detects the source numeric formats, payload compression, and declared
/// spectrum count of an mzML document.
///
/// The traversal terminates as soon as the descriptor is complete; on a
/// regular mzML that happens within the first spectrum.
///
/// # Errors
///
/// `MalformedSource` if the tokeniser rejects the document or it ends before
/// the descriptor is complete; `Unsupported` if a required accession falls
/// outside the accepted set.
pub fn pattern_detect(data: &[u8]) -> Result<SourceFormat> {
    let mut reader = Reader::from_reader(data);
    let mut buf = Vec::new();
    let mut det = Detection::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"cvParam" => {
                    if let Some(value) = get_attribute(&e, "accession")? {
                        if let Some(acc) = parse_accession(&value) {
                            det.apply_accession(acc)?;
                        }
                    }
                }
                b"spectrumList" => {
                    if let Some(value) = get_attribute(&e, "count")? {
                        let count = std::str::from_utf8(&value)
                            .ok()
                            .and_then(|s| s.parse().ok())
                            .ok_or_else(|| {
                                MszError::MalformedSource(
                                    "spectrumList count attribute is not an integer".into(),
                                )
                            })?;
                        det.spectrum_count = Some(count);
                    }
                }
                b"binaryDataArray" => det.reset_array(),
                _ => {}
            },
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"binaryDataArray" {
                    det.reset_array();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(MszError::MalformedSource(format!(
                    "XML tokeniser rejected input at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            Ok(_) => {}
        }
        if let Some(format) = det.complete() {
            return Ok(format);
        }
        buf.clear();
    }

    Err(MszError::MalformedSource(
        "document ended before source data formats were detected".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(mz_acc: u32, inten_acc: u32, comp_acc: u32) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<indexedmzML xmlns="http://psi.hupo.org/ms/mzml">
 <mzML><run id="r"><spectrumList count="7">
  <spectrum index="0" id="scan=1">
   <binaryDataArrayList count="2">
    <binaryDataArray encodedLength="0">
     <cvParam cvRef="MS" accession="MS:{mz_acc}" name="elem"/>
     <cvParam cvRef="MS" accession="MS:{comp_acc}" name="comp"/>
     <cvParam cvRef="MS" accession="MS:1000514" name="m/z array"/>
     <binary></binary>
    </binaryDataArray>
    <binaryDataArray encodedLength="0">
     <cvParam cvRef="MS" accession="MS:{inten_acc}" name="elem"/>
     <cvParam cvRef="MS" accession="MS:{comp_acc}" name="comp"/>
     <cvParam cvRef="MS" accession="MS:1000515" name="intensity array"/>
     <binary></binary>
    </binaryDataArray>
   </binaryDataArrayList>
  </spectrum>
 </spectrumList></run></mzML>
</indexedmzML>"#
        )
    }

    #[test]
    fn detects_formats_with_element_type_first() {
        let doc = sample(1000523, 1000521, 1000574);
        let fmt = pattern_detect(doc.as_bytes()).unwrap();
        assert_eq!(fmt.mz_format, ElementType::Float64);
        assert_eq!(fmt.inten_format, ElementType::Float32);
        assert_eq!(fmt.compression, SourceCompression::Zlib);
        assert_eq!(fmt.spectrum_count, 7);
    }

    #[test]
    fn detects_uncompressed_payloads() {
        let doc = sample(1000523, 1000523, 1000576);
        let fmt = pattern_detect(doc.as_bytes()).unwrap();
        assert_eq!(fmt.compression, SourceCompression::None);
    }

    #[test]
    fn rejects_integer_element_types() {
        let doc = sample(1000522, 1000521, 1000574);
        assert!(matches!(
            pattern_detect(doc.as_bytes()),
            Err(MszError::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_numpress() {
        let doc = sample(1000523, 1000521, 1002312);
        assert!(matches!(
            pattern_detect(doc.as_bytes()),
            Err(MszError::Unsupported(_))
        ));
    }

    #[test]
    fn incomplete_document_is_malformed() {
        let doc = r#"<?xml version="1.0"?><indexedmzML><mzML></mzML></indexedmzML>"#;
        assert!(matches!(
            pattern_detect(doc.as_bytes()),
            Err(MszError::MalformedSource(_))
        ));
    }

    #[test]
    fn probe_classifies_inputs() {
        assert_eq!(probe(&MAGIC_TAG.to_le_bytes()), FileKind::Msz);
        let doc = sample(1000523, 1000521, 1000574);
        assert_eq!(probe(doc.as_bytes()), FileKind::MzML);
        assert_eq!(probe(&[0x41u8; 2048]), FileKind::Unknown);
        assert_eq!(probe(b""), FileKind::Unknown);
    }

    #[test]
    fn probe_ignores_markers_past_512_bytes() {
        let mut data = vec![b'x'; 600];
        data.extend_from_slice(b"indexedmzML");
        assert_eq!(probe(&data), FileKind::Unknown);
    }
}
