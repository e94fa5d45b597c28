use std::panic;

use pdf_extract::{MediaBox, OutputDev, OutputError, Transform};
use tracing::{debug, warn};

use super::structure::{self, Block};
use super::{DocumentError, RawDocument};

/// Baseline shift, in font sizes, that starts a new line.
const LINE_SHIFT: f64 = 0.5;
/// Baseline shift, in font sizes, that leaves a blank line.
const PARAGRAPH_GAP: f64 = 1.8;

/// Reads a PDF from memory.
///
/// `lopdf` supplies the page count and the encryption check; `pdf-extract` supplies the
/// text through [`LineCollector`], which is then classified into headings, list items and
/// paragraphs.
pub fn read(bytes: &[u8]) -> Result<RawDocument, DocumentError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| {
        let msg = e.to_string();
        if is_password_error(&msg) {
            DocumentError::Extraction("PDF is password protected".to_string())
        } else {
            DocumentError::Extraction(format!("PDF could not be parsed: {msg}"))
        }
    })?;

    let encrypted = doc.is_encrypted();
    let page_count = doc.get_pages().len();
    debug!(page_count, encrypted, "PDF loaded");

    // pdf-extract panics on some malformed content streams
    let text = match panic::catch_unwind(|| collect_text(bytes)) {
        Ok(Ok(text)) => text,
        Ok(Err(e)) if encrypted => {
            warn!(error = %e, "Text extraction failed on encrypted PDF");
            return Err(DocumentError::Extraction(
                "PDF is password protected".to_string(),
            ));
        }
        Ok(Err(e)) => {
            return Err(DocumentError::Extraction(format!(
                "PDF text could not be extracted: {e}"
            )))
        }
        Err(_) => {
            return Err(DocumentError::Extraction(
                "PDF text could not be extracted: malformed content".to_string(),
            ))
        }
    };

    let blocks: Vec<Block> = structure::classify_lines(&text);

    Ok(RawDocument {
        blocks,
        page_count,
        page_count_estimated: false,
    })
}

fn collect_text(bytes: &[u8]) -> Result<String, OutputError> {
    let mut doc = pdf_extract::Document::load_mem(bytes)?;
    if doc.is_encrypted() {
        doc.decrypt("")?;
    }
    let mut collector = LineCollector::default();
    pdf_extract::output_doc(&doc, &mut collector)?;
    Ok(collector.text)
}

/// Rebuilds text lines from positioned glyphs.
///
/// Every baseline change ends the line, so a heading set tight above its body stays on a
/// line of its own. Pages are separated by a blank line.
#[derive(Default)]
struct LineCollector {
    text: String,
    last_y: Option<f64>,
    last_end: f64,
    word_start: bool,
}

impl OutputDev for LineCollector {
    fn begin_page(
        &mut self,
        _page_num: u32,
        _media_box: &MediaBox,
        _art_box: Option<(f64, f64, f64, f64)>,
    ) -> Result<(), OutputError> {
        if !self.text.is_empty() {
            self.text.push_str("\n\n");
        }
        self.last_y = None;
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn output_character(
        &mut self,
        trm: &Transform,
        width: f64,
        _spacing: f64,
        font_size: f64,
        char: &str,
    ) -> Result<(), OutputError> {
        let scale = (trm.m11 * trm.m22).abs().sqrt();
        let size = if scale > 0.0 { font_size * scale } else { font_size };
        let (x, y) = (trm.m31, trm.m32);

        if let Some(last_y) = self.last_y {
            let shift = (y - last_y).abs();
            if shift > size * PARAGRAPH_GAP {
                self.text.push_str("\n\n");
            } else if shift > size * LINE_SHIFT {
                self.text.push('\n');
            } else if self.word_start && x > self.last_end + size * 0.1 {
                self.text.push(' ');
            }
        }

        self.text.push_str(char);
        self.word_start = false;
        self.last_y = Some(y);
        self.last_end = x + width * size;
        Ok(())
    }

    fn begin_word(&mut self) -> Result<(), OutputError> {
        self.word_start = true;
        Ok(())
    }

    fn end_word(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn end_line(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

fn is_password_error(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("decrypt") || lower.contains("password") || lower.contains("encrypt")
}
