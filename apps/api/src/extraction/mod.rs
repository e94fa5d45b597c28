//! Document Extractor: validates an uploaded CV and turns it into structured text.
//!
//! Everything in here is synchronous and CPU-bound; the orchestrator runs it on the
//! blocking pool. Failures are properties of the input and are never retried.

pub mod docx;
pub mod pdf;
pub mod structure;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use structure::{Block, StructureStats};

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Unsupported file format '{0}'. Only PDF and DOCX documents are accepted")]
    UnsupportedFormat(String),

    #[error("File size {size} bytes exceeds the maximum of {max} bytes")]
    FileSize { size: usize, max: usize },

    #[error("Document has {pages} pages; between {min} and {max} are accepted")]
    Validation { pages: usize, min: usize, max: usize },

    #[error("{0}")]
    Extraction(String),
}

impl DocumentError {
    pub fn error_type(&self) -> &'static str {
        match self {
            DocumentError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT_ERROR",
            DocumentError::FileSize { .. } => "FILE_SIZE_ERROR",
            DocumentError::Validation { .. } => "VALIDATION_ERROR",
            DocumentError::Extraction(_) => "EXTRACTION_ERROR",
        }
    }

    /// Input-validation failures are the caller's fault; extraction failures are the document's.
    pub fn is_input_validation(&self) -> bool {
        !matches!(self, DocumentError::Extraction(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    Pdf,
    Docx,
    Other(String),
}

impl DeclaredType {
    /// Infers the type from the file name and the leading bytes.
    ///
    /// An explicit `.pdf` / `.docx` extension wins so that a corrupt upload is reported as
    /// an extraction failure rather than an unsupported format.
    fn infer(file_name: &str, bytes: &[u8]) -> Self {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => DeclaredType::Pdf,
            "docx" => DeclaredType::Docx,
            _ if bytes.starts_with(PDF_MAGIC) => DeclaredType::Pdf,
            "" if bytes.starts_with(ZIP_MAGIC) => DeclaredType::Docx,
            "" => DeclaredType::Other("unknown".to_string()),
            other => DeclaredType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeclaredType::Pdf => "pdf",
            DeclaredType::Docx => "docx",
            DeclaredType::Other(ext) => ext,
        }
    }
}

/// Immutable upload, constructed once per request.
#[derive(Debug, Clone)]
pub struct Document {
    raw_bytes: Vec<u8>,
    file_name: String,
    declared_type: DeclaredType,
}

impl Document {
    pub fn new(file_name: impl Into<String>, raw_bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let declared_type = DeclaredType::infer(&file_name, &raw_bytes);
        Self {
            raw_bytes,
            file_name,
            declared_type,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn declared_type(&self) -> &DeclaredType {
        &self.declared_type
    }

    pub fn size_bytes(&self) -> usize {
        self.raw_bytes.len()
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }
}

/// Output of a format reader before validation.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub blocks: Vec<Block>,
    pub page_count: usize,
    pub page_count_estimated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetadata {
    pub source_type: String,
    pub headings: usize,
    pub paragraphs: usize,
    pub list_items: usize,
    pub flat_structure: bool,
    pub page_count_estimated: bool,
}

#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub content: String,
    pub page_count: usize,
    pub char_count: usize,
    pub metadata: ExtractionMetadata,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractionLimits {
    pub max_file_size: usize,
    pub min_page_count: usize,
    pub max_page_count: usize,
    pub min_text_length: usize,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            min_page_count: 1,
            max_page_count: 10,
            min_text_length: 100,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentExtractor {
    limits: ExtractionLimits,
}

impl DocumentExtractor {
    pub fn new(limits: ExtractionLimits) -> Self {
        Self { limits }
    }

    pub fn extract(&self, document: &Document) -> Result<ExtractedText, DocumentError> {
        let size = document.size_bytes();
        if size > self.limits.max_file_size {
            return Err(DocumentError::FileSize {
                size,
                max: self.limits.max_file_size,
            });
        }

        let raw = match document.declared_type() {
            DeclaredType::Pdf => {
                if size == 0 {
                    return Err(DocumentError::Extraction("Document is empty".to_string()));
                }
                pdf::read(document.raw_bytes())?
            }
            DeclaredType::Docx => {
                if size == 0 {
                    return Err(DocumentError::Extraction("Document is empty".to_string()));
                }
                docx::read(document.raw_bytes())?
            }
            DeclaredType::Other(ext) => return Err(DocumentError::UnsupportedFormat(ext.clone())),
        };

        if raw.page_count < self.limits.min_page_count
            || raw.page_count > self.limits.max_page_count
        {
            return Err(DocumentError::Validation {
                pages: raw.page_count,
                min: self.limits.min_page_count,
                max: self.limits.max_page_count,
            });
        }

        let (content, stats) = structure::render(&raw.blocks);
        let char_count = content.chars().filter(|c| !c.is_whitespace()).count();

        if char_count == 0 {
            return Err(DocumentError::Extraction(
                "Document contains no extractable text".to_string(),
            ));
        }
        if char_count < self.limits.min_text_length {
            return Err(DocumentError::Extraction(format!(
                "Extracted text too short ({char_count} characters, minimum {})",
                self.limits.min_text_length
            )));
        }

        let metadata = metadata_for(document.declared_type(), &stats, raw.page_count_estimated);
        if metadata.flat_structure {
            debug!(file_name = %document.file_name(), "No headings or lists recovered");
        }

        info!(
            file_name = %document.file_name(),
            source_type = %document.declared_type().as_str(),
            pages = raw.page_count,
            chars = char_count,
            "Document extracted"
        );

        Ok(ExtractedText {
            content,
            page_count: raw.page_count,
            char_count,
            metadata,
        })
    }
}

fn metadata_for(
    declared: &DeclaredType,
    stats: &StructureStats,
    page_count_estimated: bool,
) -> ExtractionMetadata {
    ExtractionMetadata {
        source_type: declared.as_str().to_string(),
        headings: stats.headings,
        paragraphs: stats.paragraphs,
        list_items: stats.list_items,
        flat_structure: stats.is_flat(),
        page_count_estimated,
    }
}

#[cfg(test)]
mod tests {
    use super::docx::tests::{docx_fixture, para};
    use super::pdf::tests::two_page_cv;
    use super::*;

    fn cv_body() -> String {
        let mut body = String::from(
            "<w:p><w:pPr><w:pStyle w:val=\"Heading1\"/></w:pPr><w:r><w:t>Summary</w:t></w:r></w:p>",
        );
        body.push_str(&para(
            "Analyst with six years of experience building reporting pipelines, \
             dashboards and forecasting models for retail and logistics businesses.",
        ));
        body.push_str(
            "<w:p><w:pPr><w:numPr><w:numId w:val=\"1\"/></w:numPr></w:pPr><w:r><w:t>SQL</w:t></w:r></w:p>",
        );
        body
    }

    #[test]
    fn test_declared_type_prefers_extension() {
        assert_eq!(DeclaredType::infer("cv.PDF", b"garbage"), DeclaredType::Pdf);
        assert_eq!(DeclaredType::infer("cv.docx", b"%PDF-1.7"), DeclaredType::Docx);
    }

    #[test]
    fn test_declared_type_falls_back_to_magic_bytes() {
        assert_eq!(DeclaredType::infer("upload", b"%PDF-1.7"), DeclaredType::Pdf);
        assert_eq!(DeclaredType::infer("upload", b"PK\x03\x04rest"), DeclaredType::Docx);
        assert_eq!(DeclaredType::infer("upload.bin", b"%PDF-1.7"), DeclaredType::Pdf);
        assert_eq!(
            DeclaredType::infer("notes.txt", b"hello"),
            DeclaredType::Other("txt".to_string())
        );
    }

    #[test]
    fn test_unsupported_format_rejected() {
        let doc = Document::new("cv.txt", b"plain text cv".to_vec());
        let err = DocumentExtractor::default().extract(&doc).unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedFormat(ref ext) if ext == "txt"));
        assert_eq!(err.error_type(), "UNSUPPORTED_FORMAT_ERROR");
        assert!(err.is_input_validation());
    }

    #[test]
    fn test_oversized_file_rejected_before_parsing() {
        let limits = ExtractionLimits {
            max_file_size: 16,
            ..ExtractionLimits::default()
        };
        let doc = Document::new("cv.pdf", vec![0u8; 17]);
        let err = DocumentExtractor::new(limits).extract(&doc).unwrap_err();
        assert!(matches!(err, DocumentError::FileSize { size: 17, max: 16 }));
    }

    #[test]
    fn test_corrupt_pdf_is_extraction_error() {
        let doc = Document::new("cv.pdf", b"%PDF-1.4 truncated".to_vec());
        let err = DocumentExtractor::default().extract(&doc).unwrap_err();
        assert_eq!(err.error_type(), "EXTRACTION_ERROR");
        assert!(!err.is_input_validation());
    }

    #[test]
    fn test_docx_extracts_structured_text() {
        let doc = Document::new("cv.docx", docx_fixture(&cv_body(), Some(2)));
        let extracted = DocumentExtractor::default().extract(&doc).unwrap();
        assert!(extracted.content.starts_with("## Summary\n\n"));
        assert!(extracted.content.ends_with("- SQL"));
        assert_eq!(extracted.page_count, 2);
        assert!(!extracted.metadata.flat_structure);
        assert_eq!(extracted.metadata.source_type, "docx");
    }

    #[test]
    fn test_pdf_extracts_structured_text() {
        let doc = Document::new("reyes.pdf", two_page_cv());
        let extracted = DocumentExtractor::default().extract(&doc).unwrap();
        assert_eq!(extracted.page_count, 2);
        assert!(extracted.char_count >= ExtractionLimits::default().min_text_length);
        assert!(extracted.content.contains("## EXPERIENCE\n\nData analyst"));
        assert!(extracted.content.contains("## SKILLS\n\n- Python and SQL\n- Tableau"));
        assert_eq!(extracted.metadata.source_type, "pdf");
        assert_eq!(extracted.metadata.headings, 4);
        assert_eq!(extracted.metadata.list_items, 2);
        assert_eq!(extracted.metadata.paragraphs, 2);
        assert!(!extracted.metadata.flat_structure);
        assert!(!extracted.metadata.page_count_estimated);
    }

    #[test]
    fn test_page_count_outside_range_rejected() {
        let doc = Document::new("cv.docx", docx_fixture(&cv_body(), Some(12)));
        let err = DocumentExtractor::default().extract(&doc).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Validation { pages: 12, min: 1, max: 10 }
        ));
    }

    #[test]
    fn test_short_text_rejected() {
        let doc = Document::new("cv.docx", docx_fixture(&para("Jane Doe"), Some(1)));
        let err = DocumentExtractor::default().extract(&doc).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_empty_body_reports_no_text() {
        let doc = Document::new("cv.docx", docx_fixture("", Some(1)));
        let err = DocumentExtractor::default().extract(&doc).unwrap_err();
        assert!(err.to_string().contains("no extractable text"));
    }

    #[test]
    fn test_flat_text_is_flagged_not_rejected() {
        let text = "Experienced analyst who enjoys turning messy operational data into \
                    clear reporting for leadership teams across several industries";
        let doc = Document::new("cv.docx", docx_fixture(&para(text), Some(1)));
        let extracted = DocumentExtractor::default().extract(&doc).unwrap();
        assert!(extracted.metadata.flat_structure);
    }
}
