//! PDF and DOCX extraction.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;

use super::ExtractedText;
use crate::error::AppError;

/// Extract page text from a PDF. Pages are joined with a blank-line
/// separator by the extractor.
pub fn extract_pdf(path: &Path) -> Result<ExtractedText, AppError> {
    let text = pdf_extract::extract_text(path)
        .map_err(|e| AppError::Extract(format!("pdf {}: {e}", path.display())))?;
    Ok(ExtractedText::plain(text))
}

/// Extract raw text from a DOCX archive (`word/document.xml`).
///
/// `<w:t>` runs are concatenated; paragraph ends become newlines, tabs
/// become spaces.
pub fn extract_docx(path: &Path) -> Result<ExtractedText, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::Extract(format!("open {}: {e}", path.display())))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| AppError::Extract(format!("docx {}: {e}", path.display())))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| AppError::Extract(format!("docx {}: missing document.xml: {e}", path.display())))?
        .read_to_string(&mut xml)
        .map_err(|e| AppError::Extract(format!("docx {}: read document.xml: {e}", path.display())))?;

    Ok(ExtractedText::plain(document_xml_text(&xml)))
}

fn document_xml_text(xml: &str) -> String {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = true;
                }
            }
            Ok(Event::Text(t)) => {
                if in_text_run {
                    if let Ok(s) = t.unescape() {
                        out.push_str(&s);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push(' '),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            // Word's XML is machine-written; a malformed stream means a
            // truncated file. Keep whatever text was gathered.
            Err(_) => break,
            Ok(_) => {}
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_xml_runs_and_paragraphs() {
        let xml = r#"<w:document xmlns:w="ns"><w:body>
            <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second</w:t></w:r></w:p>
        </w:body></w:document>"#;
        assert_eq!(document_xml_text(xml), "Hello world\nSecond");
    }

    #[test]
    fn tabs_and_breaks() {
        let xml = r#"<d><w:p><w:t>a</w:t><w:tab/><w:t>b</w:t><w:br/><w:t>c</w:t></w:p></d>"#;
        assert_eq!(document_xml_text(xml), "a b\nc");
    }

    #[test]
    fn text_outside_runs_is_ignored() {
        let xml = r#"<d><w:p>stray<w:t>kept</w:t></w:p></d>"#;
        assert_eq!(document_xml_text(xml), "kept");
    }

    #[test]
    fn missing_pdf_is_an_error() {
        assert!(extract_pdf(Path::new("/no/such.pdf")).is_err());
    }

    #[test]
    fn non_zip_docx_is_an_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let p = dir.path().join("fake.docx");
        std::fs::write(&p, "not a zip").expect("write");
        assert!(extract_docx(&p).is_err());
    }
}
