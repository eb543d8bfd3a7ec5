//! Plain-text extraction for uploaded documents (PDF, DOCX, TXT).
//!
//! The document kind is chosen from the file name's extension alone; the
//! bytes are never sniffed.
//!
//! PDF pages are read one at a time and text within [`PDF_MARGIN_PT`] of the
//! top or bottom edge is dropped, so running headers and footers never reach
//! the chunker. Page texts are trimmed and joined with newlines.

use std::io::Read;
use std::path::Path;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Band at the top and bottom of each PDF page treated as header or footer.
pub const PDF_MARGIN_PT: f64 = 50.0;

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Txt,
}

impl DocumentKind {
    /// Select a kind from a file name's extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Result<Self, ExtractError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            "docx" => Ok(DocumentKind::Docx),
            "txt" => Ok(DocumentKind::Txt),
            _ => Err(ExtractError::UnsupportedFileType(name.to_string())),
        }
    }
}

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFileType(String),
    Pdf(String),
    Docx(String),
    Encoding(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFileType(name) => {
                write!(f, "unsupported file type: {} (expected .pdf, .docx or .txt)", name)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
            ExtractError::Encoding(e) => write!(f, "text file is not valid UTF-8: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract plain text from `bytes` of the given kind.
pub fn extract_text(bytes: &[u8], kind: DocumentKind) -> Result<String, ExtractError> {
    match kind {
        DocumentKind::Pdf => extract_pdf(bytes),
        DocumentKind::Docx => extract_docx(bytes),
        DocumentKind::Txt => std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| ExtractError::Encoding(e.to_string())),
    }
}

/// Read a file from disk and extract its text, choosing the kind from its name.
pub fn read_document(path: &Path) -> anyhow::Result<String> {
    use anyhow::Context;

    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let kind = DocumentKind::from_file_name(name)?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(extract_text(&bytes, kind)?)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let pdf_error = |e: &dyn std::fmt::Display| ExtractError::Pdf(e.to_string());

    let mut doc = pdf_extract::Document::load_mem(bytes).map_err(|e| pdf_error(&e))?;
    if doc.is_encrypted() {
        doc.decrypt("").map_err(|e| pdf_error(&e))?;
    }
    let mut body = PageBodyText::new(PDF_MARGIN_PT);
    pdf_extract::output_doc(&doc, &mut body).map_err(|e| pdf_error(&e))?;
    Ok(body.finish())
}

/// Plain-text layout of each page, keeping only characters that lie at
/// least `margin` points inside the top and bottom of the media box.
struct PageBodyText {
    margin: f64,
    pages: Vec<String>,
    /// Lowest baseline and highest glyph top kept on the current page.
    bounds: (f64, f64),
    last_end: f64,
    last_y: f64,
    first_char: bool,
}

impl PageBodyText {
    fn new(margin: f64) -> Self {
        Self {
            margin,
            pages: Vec::new(),
            bounds: (f64::MIN, f64::MAX),
            last_end: f64::MAX,
            last_y: 0.0,
            first_char: false,
        }
    }

    fn finish(self) -> String {
        self.pages
            .iter()
            .map(|page| page.trim())
            .filter(|page| !page.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl pdf_extract::OutputDev for PageBodyText {
    fn begin_page(
        &mut self,
        _page_num: u32,
        media_box: &pdf_extract::MediaBox,
        _art_box: Option<(f64, f64, f64, f64)>,
    ) -> Result<(), pdf_extract::OutputError> {
        self.bounds = (media_box.lly + self.margin, media_box.ury - self.margin);
        self.pages.push(String::new());
        self.last_end = f64::MAX;
        self.last_y = 0.0;
        self.first_char = false;
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), pdf_extract::OutputError> {
        Ok(())
    }

    fn output_character(
        &mut self,
        trm: &pdf_extract::Transform,
        width: f64,
        _spacing: f64,
        font_size: f64,
        char: &str,
    ) -> Result<(), pdf_extract::OutputError> {
        let (x, y) = (trm.m31, trm.m32);
        let size = (font_size * (trm.m11 + trm.m21) * font_size * (trm.m12 + trm.m22))
            .abs()
            .sqrt();

        let (bottom, top) = self.bounds;
        if y < bottom || y + size > top {
            return Ok(());
        }
        let Some(page) = self.pages.last_mut() else {
            return Ok(());
        };

        if self.first_char {
            let dy = (y - self.last_y).abs();
            if dy > size * 1.5 || (x < self.last_end && dy > size * 0.5) {
                page.push('\n');
            } else if x > self.last_end + size * 0.1 {
                page.push(' ');
            }
        }
        page.push_str(char);
        self.first_char = false;
        self.last_y = y;
        self.last_end = x + width * size;
        Ok(())
    }

    fn begin_word(&mut self) -> Result<(), pdf_extract::OutputError> {
        self.first_char = true;
        Ok(())
    }

    fn end_word(&mut self) -> Result<(), pdf_extract::OutputError> {
        Ok(())
    }

    fn end_line(&mut self) -> Result<(), pdf_extract::OutputError> {
        Ok(())
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    paragraphs_text(&doc_xml)
}

/// Collect `w:t` runs, one line per `w:p` paragraph.
fn paragraphs_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
