//! Per-file-type text extraction.
//!
//! Extractors are looked up by lowercased file extension. A missing
//! extractor is not an error here: the file indexer decides whether that
//! means "metadata only" or a per-file error.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// Turns one kind of file into plain text.
pub trait ContentExtractor: Send + Sync {
    /// Lowercased extensions this extractor handles.
    fn extensions(&self) -> &[&'static str];

    fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

/// Extension → extractor lookup.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    by_extension: HashMap<String, Arc<dyn ContentExtractor>>,
}

impl ExtractorRegistry {
    /// An empty registry. Every file is "without extractor".
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in plain text, HTML, PDF and OOXML extractors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PlainTextExtractor));
        registry.register(Arc::new(HtmlExtractor));
        registry.register(Arc::new(PdfExtractor));
        registry.register(Arc::new(OoxmlExtractor));
        registry
    }

    /// Later registrations replace earlier ones for the same extension.
    pub fn register(&mut self, extractor: Arc<dyn ContentExtractor>) {
        for ext in extractor.extensions() {
            self.by_extension.insert(ext.to_string(), extractor.clone());
        }
    }

    pub fn get(&self, extension: &str) -> Option<&dyn ContentExtractor> {
        self.by_extension
            .get(&extension.to_lowercase())
            .map(|e| e.as_ref())
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ExtractError> {
    std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub struct PlainTextExtractor;

impl ContentExtractor for PlainTextExtractor {
    fn extensions(&self) -> &[&'static str] {
        &["txt", "md", "csv"]
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = read_bytes(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Markup is removed later by the file indexer, so this only decodes.
pub struct HtmlExtractor;

impl ContentExtractor for HtmlExtractor {
    fn extensions(&self) -> &[&'static str] {
        &["html", "htm"]
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = read_bytes(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub struct PdfExtractor;

impl ContentExtractor for PdfExtractor {
    fn extensions(&self) -> &[&'static str] {
        &["pdf"]
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = read_bytes(path)?;
        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
    }
}

/// Word, PowerPoint and Excel (Office Open XML) documents.
pub struct OoxmlExtractor;

impl ContentExtractor for OoxmlExtractor {
    fn extensions(&self) -> &[&'static str] {
        &["docx", "pptx", "xlsx"]
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = read_bytes(path)?;
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice()))
            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        match extension.as_str() {
            "docx" => {
                let xml = read_zip_entry(&mut archive, "word/document.xml")?;
                collect_text_runs(&xml)
            }
            "pptx" => {
                let mut out = String::new();
                for name in numbered_entries(&archive, "ppt/slides/slide") {
                    let text = collect_text_runs(&read_zip_entry(&mut archive, &name)?)?;
                    if !out.is_empty() && !text.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(&text);
                }
                Ok(out)
            }
            _ => extract_xlsx(&mut archive),
        }
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn read_zip_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Entries named `<prefix><n>.xml`, ordered by `n`.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Concatenate the text of every `<*:t>` element (`w:t` in Word, `a:t` in slides).
fn collect_text_runs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_text = false,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_xlsx(archive: &mut Archive<'_>) -> Result<String, ExtractError> {
    let shared_strings = match read_zip_entry(archive, "xl/sharedStrings.xml") {
        Ok(xml) => read_shared_strings(&xml)?,
        Err(_) => Vec::new(),
    };
    let mut sheets = Vec::new();
    for name in numbered_entries(archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_zip_entry(archive, &name)?;
        let text = shared_string_cells(&xml, &shared_strings)?;
        if !text.is_empty() {
            sheets.push(text);
        }
    }
    Ok(sheets.join(" "))
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Only shared-string cells carry text; numeric cells are skipped.
fn shared_string_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut cells: Vec<&str> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared = false;
    while cells.len() < XLSX_MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value && shared => {
                let raw = te.unescape().unwrap_or_default();
                if let Some(s) = raw
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| shared_strings.get(i))
                {
                    cells.push(s);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"c" => shared = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}
