//! Markdown heading detection.
//!
//! A heading line is `#` repeated 1–6 times, at least one whitespace
//! character, then a non-empty title. Anything else (`#NoSpace`, seven or
//! more hashes, a bare `###`) is ordinary content and is never an error.

use regex::Regex;
use std::sync::LazyLock;

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(#{1,6})\s+(.+)$").expect("heading pattern is valid")
});

/// A heading found while scanning a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingEvent {
    /// Number of leading `#` characters (1..=6).
    pub level: u8,
    /// Heading text with surrounding whitespace removed.
    pub title: String,
}

/// Parse a single line as a Markdown heading.
///
/// Returns `None` for content lines.
pub fn parse_heading(line: &str) -> Option<HeadingEvent> {
    let caps = HEADING_RE.captures(line)?;
    let title = caps[2].trim();
    if title.is_empty() {
        return None;
    }
    Some(HeadingEvent {
        level: caps[1].len() as u8,
        title: title.to_string(),
    })
}

/// Iterate over every heading in `text`, in document order.
pub fn headings(text: &str) -> impl Iterator<Item = HeadingEvent> + '_ {
    text.split('\n').filter_map(parse_heading)
}

/// Returns `true` if `line` is a heading line.
pub fn is_heading(line: &str) -> bool {
    parse_heading(line).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_one_through_six() {
        for level in 1..=6u8 {
            let line = format!("{} Title", "#".repeat(level as usize));
            let h = parse_heading(&line).unwrap();
            assert_eq!(h.level, level);
            assert_eq!(h.title, "Title");
        }
    }

    #[test]
    fn test_title_is_trimmed() {
        let h = parse_heading("##   Installation  ").unwrap();
        assert_eq!(h.level, 2);
        assert_eq!(h.title, "Installation");
    }

    #[test]
    fn test_crlf_line() {
        let h = parse_heading("# Windows\r").unwrap();
        assert_eq!(h.title, "Windows");
    }

    #[test]
    fn test_seven_hashes_is_content() {
        assert_eq!(parse_heading("####### Too deep"), None);
    }

    #[test]
    fn test_no_space_is_content() {
        assert_eq!(parse_heading("#hashtag"), None);
        assert_eq!(parse_heading("##NoSpace"), None);
    }

    #[test]
    fn test_leading_whitespace_is_content() {
        assert_eq!(parse_heading("  # Indented"), None);
    }

    #[test]
    fn test_bare_hashes_are_content() {
        assert_eq!(parse_heading("###"), None);
        assert_eq!(parse_heading("##   "), None);
    }

    #[test]
    fn test_breadcrumb_line_is_content() {
        assert!(!is_heading("[User Guide > Installation]"));
    }

    #[test]
    fn test_headings_in_order() {
        let text = "# A\ntext\n## B\n####### not\n### C";
        let found: Vec<(u8, String)> = headings(text).map(|h| (h.level, h.title)).collect();
        assert_eq!(
            found,
            vec![
                (1, "A".to_string()),
                (2, "B".to_string()),
                (3, "C".to_string())
            ]
        );
    }
}
