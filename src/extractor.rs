//! Plaintext extraction from uploaded documents.
//!
//! Accepted extensions: `.pdf .docx .txt .html .md`. Extraction failures for a
//! recognized extension are swallowed into an empty/placeholder string rather
//! than propagated; callers (the ingestion orchestrator) decide what an empty
//! result means.

use crate::error::{AppError, Result};
use std::path::Path;
use tracing::{debug, warn};

/// Hard cap on file size the extractor will attempt to read.
pub const MAX_FILE_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// Extensions the extractor knows how to handle.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "html", "md"];

/// Placeholder substituted for a `.txt` file with no content. Not itself
/// meaningfully informative, so callers that gate on "did extraction produce
/// usable text" should treat this the same as an empty string.
pub const EMPTY_TXT_PLACEHOLDER: &str = "[Text file is empty]";

/// Result of extracting text from a document.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub char_count: usize,
}

/// Extract plaintext from `path`. Returns an error only for structural
/// problems (missing file, unsupported extension, file too large); any
/// failure inside a supported format falls back to an empty/placeholder body.
pub fn extract(path: &Path) -> Result<ExtractedText> {
    if !path.exists() {
        return Err(AppError::NotFound(format!("{}", path.display())));
    }

    let metadata = std::fs::metadata(path)?;
    if metadata.len() > MAX_FILE_SIZE_BYTES {
        return Err(AppError::TooLarge(format!(
            "{} bytes exceeds the {} byte limit",
            metadata.len(),
            MAX_FILE_SIZE_BYTES
        )));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| AppError::UnsupportedFormat("no file extension".to_string()))?;

    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AppError::UnsupportedFormat(ext));
    }

    let raw = match ext.as_str() {
        "pdf" => extract_pdf(path),
        "docx" => extract_docx(path),
        "html" => extract_html(path),
        "md" => extract_plain(path),
        "txt" => extract_txt(path),
        other => {
            warn!("unreachable extension reached extraction dispatch: {other}");
            String::new()
        }
    };

    let text = normalize_whitespace(&raw);
    let char_count = text.chars().count();
    debug!("extracted {char_count} chars from {}", path.display());

    Ok(ExtractedText { text, char_count })
}

fn extract_pdf(path: &Path) -> String {
    match pdf_extract::extract_text(path) {
        Ok(text) if !text.trim().is_empty() => page_mark(&text),
        Ok(_) => pdf_placeholder(path),
        Err(e) => {
            warn!("pdf extraction failed for {}: {e}", path.display());
            pdf_placeholder(path)
        }
    }
}

/// Mark each page break the way the page-by-page extraction pipeline would,
/// since `pdf_extract::extract_text` already joins pages with form feeds.
fn page_mark(text: &str) -> String {
    text.split('\u{c}')
        .enumerate()
        .map(|(i, page)| format!("--- Page {} ---\n{}", i + 1, page.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn pdf_placeholder(path: &Path) -> String {
    let pages = lopdf::Document::load(path)
        .map(|doc| doc.get_pages().len())
        .unwrap_or(0);
    format!("[PDF document with {pages} page(s); no extractable text and OCR is not enabled]")
}

fn extract_docx(path: &Path) -> String {
    match docx_rs::read_docx(&std::fs::read(path).unwrap_or_default()) {
        Ok(docx) => docx
            .document
            .children
            .iter()
            .filter_map(docx_paragraph_text)
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => {
            warn!("docx extraction failed for {}: {e:?}", path.display());
            String::new()
        }
    }
}

fn docx_paragraph_text(child: &docx_rs::DocumentChild) -> Option<String> {
    use docx_rs::DocumentChild;
    match child {
        DocumentChild::Paragraph(p) => {
            let text = p
                .children
                .iter()
                .filter_map(|run| match run {
                    docx_rs::ParagraphChild::Run(r) => Some(
                        r.children
                            .iter()
                            .filter_map(|rc| match rc {
                                docx_rs::RunChild::Text(t) => Some(t.text.clone()),
                                _ => None,
                            })
                            .collect::<Vec<_>>()
                            .join(""),
                    ),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("");
            if text.trim().is_empty() {
                None
            } else {
                Some(text)
            }
        }
        DocumentChild::Table(t) => {
            let rows: Vec<String> = t
                .rows
                .iter()
                .map(|row| {
                    let docx_rs::TableChild::TableRow(row) = row;
                    row.cells
                        .iter()
                        .map(docx_table_cell_text)
                        .collect::<Vec<_>>()
                        .join(" | ")
                })
                .collect();
            if rows.is_empty() {
                None
            } else {
                Some(rows.join("\n"))
            }
        }
        _ => None,
    }
}

fn docx_table_cell_text(cell: &docx_rs::TableRowChild) -> String {
    let docx_rs::TableRowChild::TableCell(cell) = cell;
    cell.children
        .iter()
        .filter_map(|content| match content {
            docx_rs::TableCellContent::Paragraph(p) => Some(
                p.children
                    .iter()
                    .filter_map(|run| match run {
                        docx_rs::ParagraphChild::Run(r) => Some(
                            r.children
                                .iter()
                                .filter_map(|rc| match rc {
                                    docx_rs::RunChild::Text(t) => Some(t.text.clone()),
                                    _ => None,
                                })
                                .collect::<Vec<_>>()
                                .join(""),
                        ),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(""),
            ),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn extract_html(path: &Path) -> String {
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to read {}: {e}", path.display());
            return String::new();
        }
    };

    let document = scraper::Html::parse_document(&raw);
    let body_selector = scraper::Selector::parse("body, html").unwrap();
    let skip_selector = scraper::Selector::parse("script, style").unwrap();

    let skipped: std::collections::HashSet<_> = document.select(&skip_selector).map(|el| el.id()).collect();

    document
        .select(&body_selector)
        .flat_map(|el| el.descendants())
        .filter_map(scraper::ElementRef::wrap)
        .filter(|el| !skipped.contains(&el.id()))
        .flat_map(|el| {
            el.children()
                .filter_map(|child| child.value().as_text())
                .map(|t| t.to_string())
        })
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn extract_plain(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

fn extract_txt(path: &Path) -> String {
    let raw = std::fs::read_to_string(path).unwrap_or_default();
    if raw.trim().is_empty() {
        EMPTY_TXT_PLACEHOLDER.to_string()
    } else {
        raw
    }
}

/// Collapse runs of whitespace: multiple blank lines to one, runs of spaces to one.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newline_run = 0usize;
    let mut space_run = false;

    for c in text.chars() {
        match c {
            '\n' => {
                newline_run += 1;
                space_run = false;
                if newline_run <= 2 {
                    out.push('\n');
                }
            }
            ' ' | '\t' | '\r' => {
                if !space_run {
                    out.push(' ');
                }
                space_run = true;
            }
            other => {
                newline_run = 0;
                space_run = false;
                out.push(other);
            }
        }
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_normalize_whitespace_collapses_runs() {
        let input = "Hello    world\n\n\n\nGoodbye  \t there";
        let out = normalize_whitespace(input);
        assert!(!out.contains("   "));
        assert!(!out.contains("\n\n\n"));
    }

    #[test]
    fn test_extract_txt_placeholder_for_empty_file() {
        let mut f = NamedTempFile::with_suffix(".txt").unwrap();
        write!(f, "").unwrap();
        let result = extract(f.path()).unwrap();
        assert!(result.text.contains("Text file is empty"));
    }

    #[test]
    fn test_extract_txt_roundtrip() {
        let mut f = NamedTempFile::with_suffix(".txt").unwrap();
        write!(f, "A. B. C. D.").unwrap();
        let result = extract(f.path()).unwrap();
        assert_eq!(result.text, "A. B. C. D.");
        assert_eq!(result.char_count, 11);
    }

    #[test]
    fn test_extract_rejects_unsupported_extension() {
        let mut f = NamedTempFile::with_suffix(".exe").unwrap();
        write!(f, "binary").unwrap();
        let err = extract(f.path()).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_extract_missing_file() {
        let err = extract(Path::new("/nonexistent/file.txt")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_extract_html_strips_tags() {
        let mut f = NamedTempFile::with_suffix(".html").unwrap();
        write!(f, "<html><body><script>bad()</script><p>Hello world</p></body></html>").unwrap();
        let result = extract(f.path()).unwrap();
        assert!(result.text.contains("Hello world"));
        assert!(!result.text.contains("bad()"));
    }
}
