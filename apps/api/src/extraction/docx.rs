use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use super::structure::Block;
use super::{DocumentError, RawDocument};

/// Upper bound on decompressed bytes read from one archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Characters per page used when the archive does not record a page count.
const CHARS_PER_ESTIMATED_PAGE: usize = 3000;
/// Bold paragraphs longer than this are treated as emphasised body text.
const MAX_BOLD_HEADING_CHARS: usize = 80;

const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

/// Reads a DOCX archive from memory.
pub fn read(bytes: &[u8]) -> Result<RawDocument, DocumentError> {
    if bytes.starts_with(OLE_MAGIC) {
        // Encrypted OOXML is wrapped in an OLE container, as is legacy .doc
        return Err(DocumentError::Extraction(
            "DOCX is password protected or in legacy Word format".to_string(),
        ));
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DocumentError::Extraction(format!("DOCX is not a valid archive: {e}")))?;

    let document_xml = read_entry_bounded(&mut archive, "word/document.xml")?;
    let blocks = parse_document_xml(&document_xml)?;

    let recorded_pages = match read_entry_bounded(&mut archive, "docProps/app.xml") {
        Ok(app_xml) => parse_page_count(&app_xml),
        Err(_) => None,
    };

    let (page_count, page_count_estimated) = match recorded_pages {
        Some(pages) if pages > 0 => (pages, false),
        _ => {
            let chars: usize = blocks.iter().map(block_chars).sum();
            (estimate_pages(chars), true)
        }
    };
    debug!(page_count, page_count_estimated, blocks = blocks.len(), "DOCX parsed");

    Ok(RawDocument {
        blocks,
        page_count,
        page_count_estimated,
    })
}

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, DocumentError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| DocumentError::Extraction(format!("DOCX entry {name} unavailable: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| DocumentError::Extraction(format!("DOCX entry {name} unreadable: {e}")))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(DocumentError::Extraction(format!(
            "DOCX entry {name} exceeds size limit"
        )));
    }
    Ok(out)
}

fn estimate_pages(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_ESTIMATED_PAGE).max(1)
}

fn block_chars(block: &Block) -> usize {
    match block {
        Block::Heading(t) | Block::Paragraph(t) | Block::ListItem(t) => t.chars().count(),
    }
}

/// Paragraph being assembled while walking `word/document.xml`.
#[derive(Default)]
struct ParagraphState {
    text: String,
    style: Option<String>,
    numbered: bool,
    run_bold: bool,
    in_run_props: bool,
    all_runs_bold: bool,
    has_text: bool,
}

impl ParagraphState {
    fn start() -> Self {
        Self {
            all_runs_bold: true,
            ..Self::default()
        }
    }

    fn finish(self) -> Option<Block> {
        let text = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return None;
        }

        let style = self.style.as_deref().unwrap_or_default();
        let styled_heading = style.starts_with("Heading") || style == "Title";
        let bold_heading = self.has_text
            && self.all_runs_bold
            && text.chars().count() <= MAX_BOLD_HEADING_CHARS;

        if styled_heading || bold_heading {
            Some(Block::Heading(text))
        } else if self.numbered || style.contains("List") {
            Some(Block::ListItem(text))
        } else {
            Some(Block::Paragraph(text))
        }
    }
}

fn attr_val(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"val")
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn parse_document_xml(xml: &[u8]) -> Result<Vec<Block>, DocumentError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut blocks = Vec::new();
    let mut paragraph: Option<ParagraphState> = None;
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| DocumentError::Extraction(format!("DOCX markup is malformed: {e}")))?;

        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"p" => paragraph = Some(ParagraphState::start()),
                b"r" => {
                    if let Some(p) = paragraph.as_mut() {
                        p.run_bold = false;
                    }
                }
                b"rPr" => {
                    if let Some(p) = paragraph.as_mut() {
                        p.in_run_props = true;
                    }
                }
                b"t" => in_text = true,
                b"pStyle" => {
                    if let Some(p) = paragraph.as_mut() {
                        p.style = attr_val(&e);
                    }
                }
                b"numPr" => {
                    if let Some(p) = paragraph.as_mut() {
                        p.numbered = true;
                    }
                }
                _ => {}
            },
            Event::Empty(e) => {
                if let Some(p) = paragraph.as_mut() {
                    match e.local_name().as_ref() {
                        b"pStyle" => p.style = attr_val(&e),
                        b"numPr" => p.numbered = true,
                        b"b" if p.in_run_props => {
                            p.run_bold =
                                !matches!(attr_val(&e).as_deref(), Some("0" | "false"));
                        }
                        b"tab" | b"br" => p.text.push(' '),
                        _ => {}
                    }
                }
            }
            Event::Text(te) => {
                if in_text {
                    if let Some(p) = paragraph.as_mut() {
                        let text = te.unescape().map_err(|e| {
                            DocumentError::Extraction(format!("DOCX text is malformed: {e}"))
                        })?;
                        if !text.trim().is_empty() {
                            p.has_text = true;
                            if !p.run_bold {
                                p.all_runs_bold = false;
                            }
                        }
                        p.text.push_str(&text);
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"rPr" => {
                    if let Some(p) = paragraph.as_mut() {
                        p.in_run_props = false;
                    }
                }
                b"p" => {
                    if let Some(block) = paragraph.take().and_then(ParagraphState::finish) {
                        blocks.push(block);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(blocks)
}

/// Reads `<Pages>` from `docProps/app.xml`.
fn parse_page_count(xml: &[u8]) -> Option<usize> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_pages = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"Pages" => in_pages = true,
            Ok(Event::Text(te)) if in_pages => {
                return te.unescape().ok()?.trim().parse().ok();
            }
            Ok(Event::End(_)) => in_pages = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Builds a minimal DOCX archive around the given `<w:body>` content.
    pub(crate) fn docx_fixture(body: &str, pages: Option<usize>) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", options).unwrap();
            write!(
                zip,
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
            )
            .unwrap();
            if let Some(pages) = pages {
                zip.start_file("docProps/app.xml", options).unwrap();
                write!(
                    zip,
                    r#"<?xml version="1.0" encoding="UTF-8"?><Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties"><Pages>{pages}</Pages></Properties>"#
                )
                .unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    pub(crate) fn para(text: &str) -> String {
        format!("<w:p><w:r><w:t xml:space=\"preserve\">{text}</w:t></w:r></w:p>")
    }

    #[test]
    fn test_styles_and_numbering_are_recovered() {
        let body = format!(
            "<w:p><w:pPr><w:pStyle w:val=\"Heading1\"/></w:pPr><w:r><w:t>Experience</w:t></w:r></w:p>\
             <w:p><w:pPr><w:numPr><w:ilvl w:val=\"0\"/><w:numId w:val=\"1\"/></w:numPr></w:pPr><w:r><w:t>Built dashboards</w:t></w:r></w:p>\
             {}",
            para("Worked across finance &amp; operations.")
        );
        let raw = read(&docx_fixture(&body, Some(2))).unwrap();
        assert_eq!(
            raw.blocks,
            vec![
                Block::Heading("Experience".to_string()),
                Block::ListItem("Built dashboards".to_string()),
                Block::Paragraph("Worked across finance & operations.".to_string()),
            ]
        );
        assert_eq!(raw.page_count, 2);
        assert!(!raw.page_count_estimated);
    }

    #[test]
    fn test_all_bold_paragraph_is_heading() {
        let body = "<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>Skills</w:t></w:r></w:p>\
                    <w:p><w:r><w:rPr><w:b/></w:rPr><w:t>Mixed </w:t></w:r><w:r><w:t>emphasis</w:t></w:r></w:p>";
        let raw = read(&docx_fixture(body, None)).unwrap();
        assert_eq!(raw.blocks[0], Block::Heading("Skills".to_string()));
        assert_eq!(raw.blocks[1], Block::Paragraph("Mixed emphasis".to_string()));
    }

    #[test]
    fn test_bold_off_does_not_count_as_bold() {
        let body = "<w:p><w:r><w:rPr><w:b w:val=\"0\"/></w:rPr><w:t>Plain</w:t></w:r></w:p>";
        let raw = read(&docx_fixture(body, None)).unwrap();
        assert_eq!(raw.blocks[0], Block::Paragraph("Plain".to_string()));
    }

    #[test]
    fn test_missing_app_xml_estimates_pages() {
        let long = "x".repeat(3500);
        let raw = read(&docx_fixture(&para(&long), None)).unwrap();
        assert_eq!(raw.page_count, 2);
        assert!(raw.page_count_estimated);
    }

    #[test]
    fn test_estimate_never_below_one_page() {
        assert_eq!(estimate_pages(0), 1);
        assert_eq!(estimate_pages(3000), 1);
        assert_eq!(estimate_pages(3001), 2);
    }

    #[test]
    fn test_not_a_zip_is_extraction_error() {
        let err = read(b"plain text pretending to be docx").unwrap_err();
        assert!(matches!(err, DocumentError::Extraction(_)));
    }

    #[test]
    fn test_ole_container_reports_password_protection() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        let err = read(&bytes).unwrap_err();
        assert!(err.to_string().contains("password protected"));
    }

    #[test]
    fn test_archive_without_document_xml_fails() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            zip.start_file("readme.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"hello").unwrap();
            zip.finish().unwrap();
        }
        let err = read(&cursor.into_inner()).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }
}
