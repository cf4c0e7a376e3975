//! Text extraction and PDF structure recovery.
//!
//! Loaders hand over raw bytes plus a content type and get UTF-8 text back.
//! For PDFs there is a second, structured path: the extracted text is split
//! into [`Element`]s (headings, list items, tables, captions) and rendered as
//! Markdown, so the breadcrumb injector has real headings to work with.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_TEXT: &str = "text/plain";

/// Extraction failure. The pipeline skips the item and keeps going.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("file is {size} bytes, above the {limit} byte extraction limit")]
    TooLarge { size: u64, limit: u64 },
}

/// Extract UTF-8 text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_MARKDOWN | MIME_TEXT => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

/// Reject inputs above `limit` bytes before reading them.
pub fn check_size(size: u64, limit: u64) -> Result<(), ExtractError> {
    if size > limit {
        return Err(ExtractError::TooLarge { size, limit });
    }
    Ok(())
}

pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Structural role of a block of extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Heading { level: u8 },
    ListItem,
    Table,
    Caption,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub kind: ElementKind,
    pub text: String,
}

impl Element {
    pub fn new(kind: ElementKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*\u{2022}\u{25E6}\u{2023}]|\d{1,3}[.)])\s+(.+)$")
        .expect("bullet pattern is valid")
});

static CAPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:Figure|Fig\.|Table|Plate|Map)\s+\d+[.:]").expect("caption pattern is valid")
});

static NUMBERED_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)*)\.?\s+\p{Lu}").expect("numbered heading pattern is valid")
});

static TABLE_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\S(?:\t+| {2,})\S.*?(?:\t+| {2,})\S").expect("table row pattern is valid")
});

const MAX_HEADING_CHARS: usize = 80;

/// Guess the structural role of a single non-empty line of PDF text.
pub fn classify_line(line: &str) -> ElementKind {
    let trimmed = line.trim();

    if CAPTION_RE.is_match(trimmed) {
        return ElementKind::Caption;
    }
    if TABLE_ROW_RE.is_match(line.trim_end()) {
        return ElementKind::Table;
    }
    if let Some(caps) = NUMBERED_HEADING_RE.captures(trimmed) {
        if trimmed.chars().count() <= MAX_HEADING_CHARS && !trimmed.ends_with('.') {
            let depth = caps[1].split('.').count();
            return ElementKind::Heading {
                level: (depth + 1).min(6) as u8,
            };
        }
    }
    if BULLET_RE.is_match(trimmed) {
        return ElementKind::ListItem;
    }
    if is_shouted_title(trimmed) {
        return ElementKind::Heading { level: 1 };
    }

    ElementKind::Other
}

/// All-caps short line with at least two letters, e.g. `CHAPTER ONE`.
fn is_shouted_title(line: &str) -> bool {
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 2
        && line.chars().count() <= MAX_HEADING_CHARS
        && letters.iter().all(|c| c.is_uppercase())
        && !line.ends_with('.')
}

/// Split extracted PDF text into elements.
///
/// Consecutive body lines merge into one paragraph, consecutive table rows
/// into one table; a blank line ends either.
pub fn extract_elements(text: &str) -> Vec<Element> {
    let mut elements: Vec<Element> = Vec::new();
    let mut open: Option<Element> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            elements.extend(open.take());
            continue;
        }

        let kind = classify_line(line);
        let merged = match (open.as_mut(), kind) {
            (Some(el), ElementKind::Other) if el.kind == ElementKind::Other => {
                el.text.push(' ');
                el.text.push_str(line.trim());
                true
            }
            (Some(el), ElementKind::Table) if el.kind == ElementKind::Table => {
                el.text.push('\n');
                el.text.push_str(line.trim_end());
                true
            }
            _ => false,
        };
        if merged {
            continue;
        }

        elements.extend(open.take());
        match kind {
            ElementKind::Other => open = Some(Element::new(kind, line.trim())),
            ElementKind::Table => open = Some(Element::new(kind, line.trim_end())),
            ElementKind::ListItem => {
                let item = BULLET_RE
                    .captures(line.trim())
                    .map(|c| c[1].to_string())
                    .unwrap_or_else(|| line.trim().to_string());
                elements.push(Element::new(kind, item));
            }
            _ => elements.push(Element::new(kind, line.trim())),
        }
    }
    elements.extend(open);

    elements
}

/// Render elements as Markdown, one block per element.
pub fn render_markdown(elements: &[Element]) -> String {
    let mut blocks: Vec<String> = Vec::with_capacity(elements.len());

    for el in elements {
        let text = el.text.trim();
        if text.is_empty() {
            continue;
        }
        let block = match el.kind {
            ElementKind::Heading { level } => {
                format!("{} {}", "#".repeat(level.clamp(1, 6) as usize), text)
            }
            ElementKind::ListItem => format!("- {}", text),
            ElementKind::Table => format!("\n{}\n", text),
            ElementKind::Caption => format!("*{}*", text),
            ElementKind::Other => text.to_string(),
        };
        blocks.push(block);
    }

    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
        assert!(err.to_string().starts_with("PDF extraction failed"));
    }

    #[test]
    fn test_unsupported_content_type() {
        let err = extract_text(b"x", "application/zip").unwrap_err();
        assert_eq!(err.to_string(), "unsupported content-type: application/zip");
    }

    #[test]
    fn test_plain_text_passthrough() {
        assert_eq!(extract_text(b"# Hi", MIME_MARKDOWN).unwrap(), "# Hi");
    }

    #[test]
    fn test_size_limit() {
        assert!(check_size(10, 10).is_ok());
        let err = check_size(11, 10).unwrap_err();
        assert!(matches!(err, ExtractError::TooLarge { size: 11, limit: 10 }));
    }

    #[test]
    fn test_classify_headings() {
        assert_eq!(classify_line("CHAPTER ONE"), ElementKind::Heading { level: 1 });
        assert_eq!(classify_line("2 Setup"), ElementKind::Heading { level: 2 });
        assert_eq!(
            classify_line("2.3.1 Windows Installation"),
            ElementKind::Heading { level: 4 }
        );
    }

    #[test]
    fn test_numbered_sentence_is_not_heading() {
        assert_eq!(
            classify_line("3. Open the lid and wait."),
            ElementKind::ListItem
        );
    }

    #[test]
    fn test_classify_list_items() {
        assert_eq!(classify_line("- first"), ElementKind::ListItem);
        assert_eq!(classify_line("\u{2022} bullet"), ElementKind::ListItem);
        assert_eq!(classify_line("1) step"), ElementKind::ListItem);
    }

    #[test]
    fn test_classify_caption_and_table() {
        assert_eq!(classify_line("Figure 3: The map"), ElementKind::Caption);
        assert_eq!(classify_line("Name    Age    City"), ElementKind::Table);
        assert_eq!(classify_line("a\tb\tc"), ElementKind::Table);
    }

    #[test]
    fn test_classify_body() {
        assert_eq!(
            classify_line("The founding of the city took decades."),
            ElementKind::Other
        );
        assert_eq!(classify_line("6050"), ElementKind::Other);
    }

    #[test]
    fn test_extract_elements_merges_paragraphs() {
        let text = "HISTORY\nThe city was\nfounded long ago.\n\n- one\n- two\nA    B    C\n1    2    3\n";
        let els = extract_elements(text);
        assert_eq!(
            els,
            vec![
                Element::new(ElementKind::Heading { level: 1 }, "HISTORY"),
                Element::new(ElementKind::Other, "The city was founded long ago."),
                Element::new(ElementKind::ListItem, "one"),
                Element::new(ElementKind::ListItem, "two"),
                Element::new(ElementKind::Table, "A    B    C\n1    2    3"),
            ]
        );
    }

    #[test]
    fn test_render_markdown() {
        let els = vec![
            Element::new(ElementKind::Heading { level: 9 }, "Deep"),
            Element::new(ElementKind::Heading { level: 0 }, "Top"),
            Element::new(ElementKind::ListItem, "item"),
            Element::new(ElementKind::Table, "a | b"),
            Element::new(ElementKind::Caption, "Figure 1: x"),
            Element::new(ElementKind::Other, "body"),
            Element::new(ElementKind::Other, "   "),
        ];
        assert_eq!(
            render_markdown(&els),
            "###### Deep\n\n# Top\n\n- item\n\n\na | b\n\n\n*Figure 1: x*\n\nbody"
        );
    }

    #[test]
    fn test_rendered_headings_feed_breadcrumbs() {
        let md = render_markdown(&extract_elements("GUIDE\n1 Install\nRun the installer"));
        let annotated = crate::breadcrumb::inject_breadcrumbs(&md);
        assert!(annotated.contains("[GUIDE > Install]"), "{}", annotated);
    }
}
