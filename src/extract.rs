//! Text extraction collaborators.
//!
//! An [`Extractor`] turns `(filename, bytes)` into plain UTF-8 text. Two
//! implementations ship with the crate:
//!
//! | Provider | Type | Behaviour |
//! |----------|------|-----------|
//! | `local` | [`LocalExtractor`] | Decodes text formats directly; PDF via `pdf-extract`, DOCX/PPTX/XLSX via `zip` + `quick-xml` |
//! | `http` | [`HttpExtractor`] | Posts the file as multipart to `{url}/extract` and reads the text body |
//!
//! Extraction failures are returned, never panicked on; the engine records
//! them per file and retries the file on the next run.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ExtractionConfig;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Converts file bytes into plain text.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, name: &str, data: &[u8]) -> Result<String>;
}

/// Build the extractor selected by `[extraction] provider`.
pub fn create_extractor(config: &ExtractionConfig) -> Result<Arc<dyn Extractor>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalExtractor)),
        "http" => Ok(Arc::new(HttpExtractor::new(config)?)),
        other => bail!("Unknown extraction provider: {}", other),
    }
}

/// Format-level extraction failure.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

// ============ Local ============

/// In-process extraction keyed on the file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExtractor;

#[async_trait]
impl Extractor for LocalExtractor {
    async fn extract(&self, name: &str, data: &[u8]) -> Result<String> {
        let ext = extension_of(name);
        let data = data.to_vec();
        // PDF and zip parsing are CPU-bound.
        let text = tokio::task::spawn_blocking(move || extract_by_extension(&ext, &data)).await??;
        Ok(text)
    }
}

fn extension_of(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Extract text for a lowercase extension without the leading dot.
pub fn extract_by_extension(ext: &str, data: &[u8]) -> Result<String, ExtractError> {
    match ext {
        "txt" | "md" | "rst" | "csv" | "tsv" => Ok(decode_text(data)),
        "pdf" => {
            pdf_extract::extract_text_from_mem(data).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        "docx" => extract_docx(data),
        "pptx" => extract_pptx(data),
        "xlsx" => extract_xlsx(data),
        other => Err(ExtractError::Unsupported(other.to_string())),
    }
}

/// Lossy UTF-8 decode with any byte-order mark stripped.
fn decode_text(data: &[u8]) -> String {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    String::from_utf8_lossy(data).into_owned()
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(data: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(data)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
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

/// Entries named `<prefix><n>.xml`, in numeric order.
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

fn extract_docx(data: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(data)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml, b"p", "\n")
}

fn extract_pptx(data: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(data)?;
    let mut slides = Vec::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        let xml = read_entry(&mut archive, &name)?;
        let text = collect_text_runs(&xml, b"p", "\n")?;
        if !text.trim().is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

/// Concatenate every `<t>` element, inserting `separator` after each
/// `block` element closes (paragraphs for Word and PowerPoint).
fn collect_text_runs(xml: &[u8], block: &[u8], separator: &str) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == block && !out.is_empty() && !out.ends_with(separator) {
                    out.push_str(separator);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}

fn extract_xlsx(data: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(data)?;
    let shared = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        let xml = read_entry(&mut archive, "xl/sharedStrings.xml")?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_entry(&mut archive, &name)?;
        let rows = read_sheet_rows(&xml, &shared)?;
        if !rows.is_empty() {
            sheets.push(rows.join("\n"));
        }
    }
    Ok(sheets.join("\n\n"))
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
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
                    let text = te
                        .unescape()
                        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                    s.push_str(&text);
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

/// One line per row, cells separated by tabs.
fn read_sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut shared_cell = false;
    let mut in_value = false;
    let mut cells = 0usize;

    loop {
        if cells >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.local_name().as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                let raw = raw.trim();
                let value = if shared_cell {
                    raw.parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i).cloned())
                } else {
                    Some(raw.to_string())
                };
                if let Some(v) = value.filter(|v| !v.is_empty()) {
                    row.push(v);
                    cells += 1;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_cell = false,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join("\t"));
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !row.is_empty() {
        rows.push(row.join("\t"));
    }
    Ok(rows)
}

// ============ Remote ============

/// Client for an extraction service accepting `POST {url}/extract` with a
/// multipart `file` field and answering with the plain text.
pub struct HttpExtractor {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    max_retries: u32,
}

impl HttpExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let url = match &config.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => bail!("extraction.url must be set when provider is 'http'"),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let token = config
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());

        Ok(Self {
            client,
            url,
            token,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(&self, name: &str, data: &[u8]) -> Result<String> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(name.to_string());
            let form = reqwest::multipart::Form::new().part("file", part);

            let mut request = self
                .client
                .post(format!("{}/extract", self.url))
                .multipart(form);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.text().await?);
                    }

                    let body = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!("Extraction API error {}: {}", status, body));
                        continue;
                    }
                    bail!("Extraction API error {}: {}", status, body);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Extraction failed after retries")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[tokio::test]
    async fn test_plain_text_is_decoded() {
        let text = LocalExtractor
            .extract("notes.MD", b"\xEF\xBB\xBF# Title\nbody")
            .await
            .unwrap();
        assert_eq!(text, "# Title\nbody");
    }

    #[test]
    fn test_unsupported_extension() {
        let err = extract_by_extension("exe", b"MZ").unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }

    #[test]
    fn test_invalid_pdf_and_zip() {
        assert!(matches!(
            extract_by_extension("pdf", b"not a pdf").unwrap_err(),
            ExtractError::Pdf(_)
        ));
        assert!(matches!(
            extract_by_extension("docx", b"not a zip").unwrap_err(),
            ExtractError::Ooxml(_)
        ));
    }

    #[test]
    fn test_docx_paragraphs() {
        let doc = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let data = zip_with(&[("word/document.xml", doc)]);
        let text = extract_by_extension("docx", &data).unwrap();
        assert_eq!(text, "Hello world\nSecond & last");
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let slide = |t: &str| {
            format!(
                r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#,
                t
            )
        };
        let s1 = slide("first");
        let s2 = slide("second");
        let s10 = slide("tenth");
        let data = zip_with(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);
        let text = extract_by_extension("pptx", &data).unwrap();
        assert_eq!(text, "first\n\nsecond\n\ntenth");
    }

    #[test]
    fn test_xlsx_shared_and_inline_values() {
        let shared = r#"<sst><si><t>name</t></si><si><t>alice</t></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
            <row><c t="s"><v>0</v></c><c><v>age</v></c></row>
            <row><c t="s"><v>1</v></c><c><v>42</v></c></row>
        </sheetData></worksheet>"#;
        let data = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let text = extract_by_extension("xlsx", &data).unwrap();
        assert_eq!(text, "name\tage\nalice\t42");
    }

    #[test]
    fn test_http_extractor_requires_url() {
        let config = ExtractionConfig {
            provider: "http".to_string(),
            ..Default::default()
        };
        assert!(HttpExtractor::new(&config).is_err());
    }
}
